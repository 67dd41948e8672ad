//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They own the SQL, validate inputs, and talk to the AI engine and the
//! payment gateway. Handlers only extract requests and shape responses.

/// AI analysis, classification and stored insights
pub mod ai_service;
/// Aggregations behind the analytics endpoints and daily rollups
pub mod analytics_service;
/// Password hashing, access tokens, registration and login
pub mod auth_service;
/// Mailboxes, ingestion and the email inbox
pub mod email_service;
/// Subscriptions and Stripe webhooks
pub mod payment_service;
/// Tier quotas and monthly counters
pub mod usage_service;

use crate::error::AppError;

/// Reject `value` unless it lies in `min..=max`.
pub(crate) fn ensure_range(name: &str, value: i64, min: i64, max: i64) -> Result<i64, AppError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(AppError::InvalidRequest(format!(
            "{name} must be between {min} and {max}"
        )))
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Round to two decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

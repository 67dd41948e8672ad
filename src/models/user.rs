//! User account model and authentication request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::plan::SubscriptionTier;

/// Represents a user record from the database.
///
/// # Database Table
///
/// Maps to the `users` table. Passwords are stored as argon2id PHC strings,
/// never in plaintext.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,

    /// One of `free_trial`, `starter`, `professional`, `enterprise`
    pub subscription_tier: String,

    pub stripe_customer_id: Option<String>,

    /// Lifetime count of ingested emails, checked against the tier's email limit
    pub emails_processed: i64,

    /// Calls to AI endpoints since `usage_period_start`
    pub api_calls_this_month: i64,

    pub usage_period_start: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Parsed tier. Unknown values fall back to the free trial.
    pub fn tier(&self) -> SubscriptionTier {
        self.subscription_tier
            .parse()
            .unwrap_or(SubscriptionTier::FreeTrial)
    }
}

/// Request body for `POST /api/v1/auth/register`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

/// Request body for `POST /api/v1/auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Access token issued on login.
///
/// ```json
/// {
///   "access_token": "eyJhbGciOi...",
///   "token_type": "bearer",
///   "expires_in": 1800
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    /// Lifetime of the token in seconds
    pub expires_in: i64,
}

/// Public view of a user. Omits the password hash and Stripe identifiers.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub is_verified: bool,
    pub subscription_tier: SubscriptionTier,
    pub emails_processed: i64,
    pub api_calls_this_month: i64,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            subscription_tier: user.tier(),
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            is_verified: user.is_verified,
            emails_processed: user.emails_processed,
            api_calls_this_month: user.api_calls_this_month,
            created_at: user.created_at,
        }
    }
}

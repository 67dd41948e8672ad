//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error code.
///
/// # Error Categories
///
/// - **Database Errors**: Any sqlx::Error from database operations
/// - **Authentication Errors**: Bad credentials or bearer tokens
/// - **Resource Errors**: Requested resources not found or already present
/// - **Plan Errors**: Usage limits and tier-gated features
/// - **Billing Errors**: Payment provider failures and webhook signatures
/// - **Validation Errors**: Invalid request data
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Login attempt with an unknown email, wrong password or inactive user.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Bearer token is missing, malformed, expired, or its user is gone.
    #[error("Could not validate credentials")]
    InvalidToken,

    /// Requested resource does not exist or belongs to another user.
    ///
    /// The payload names the resource, e.g. "Email".
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Resource already exists (duplicate email, second live subscription).
    #[error("{0}")]
    Conflict(String),

    /// Request body or parameters are invalid.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// The user's tier quota is used up.
    ///
    /// Returns HTTP 429 Too Many Requests.
    #[error("{0}")]
    LimitExceeded(String),

    /// Feature requires a higher subscription tier.
    #[error("{0}")]
    PlanRequired(String),

    /// Stripe webhook signature is missing, stale, or does not match.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Upstream payment provider rejected or failed the call.
    #[error("{0}")]
    PaymentProvider(String),

    /// Unexpected internal failure that is not a database error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Database and internal errors are logged and hidden from the client.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                self.to_string(),
            ),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", self.to_string()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::LimitExceeded(ref msg) => {
                (StatusCode::TOO_MANY_REQUESTS, "limit_exceeded", msg.clone())
            }
            AppError::PlanRequired(ref msg) => (StatusCode::FORBIDDEN, "plan_required", msg.clone()),
            AppError::InvalidSignature => (
                StatusCode::BAD_REQUEST,
                "invalid_signature",
                self.to_string(),
            ),
            AppError::PaymentProvider(ref msg) => (
                StatusCode::BAD_GATEWAY,
                "payment_provider_error",
                msg.clone(),
            ),
            AppError::Database(ref e) => {
                tracing::error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(ref msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (AppError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AppError::InvalidToken, StatusCode::UNAUTHORIZED),
            (AppError::NotFound("Email"), StatusCode::NOT_FOUND),
            (AppError::Conflict("dup".into()), StatusCode::CONFLICT),
            (AppError::InvalidRequest("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::LimitExceeded("quota".into()), StatusCode::TOO_MANY_REQUESTS),
            (AppError::PlanRequired("pro".into()), StatusCode::FORBIDDEN),
            (AppError::InvalidSignature, StatusCode::BAD_REQUEST),
            (AppError::PaymentProvider("down".into()), StatusCode::BAD_GATEWAY),
            (AppError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn internal_details_are_not_leaked() {
        let response = AppError::Internal("secret stack trace".into()).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["error"]["code"], "internal_error");
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }

    #[test]
    fn not_found_names_the_resource() {
        assert_eq!(AppError::NotFound("Subscription").to_string(), "Subscription not found");
    }
}

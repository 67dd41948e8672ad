//! Authentication HTTP handlers.
//!
//! This module implements the auth API endpoints:
//! - POST /api/v1/auth/register - Create a user on the free trial
//! - POST /api/v1/auth/login - Exchange credentials for an access token
//! - GET /api/v1/auth/me - Profile of the authenticated user

use crate::{
    config::Config,
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::user::{LoginRequest, RegisterRequest, TokenResponse, UserResponse},
    services::auth_service,
};
use axum::{Extension, Json, extract::State, http::StatusCode};
use std::sync::Arc;

/// Register a new user.
///
/// # Endpoint
///
/// `POST /api/v1/auth/register`
///
/// # Request Body
///
/// ```json
/// {
///   "email": "ada@example.com",
///   "password": "correct horse battery",
///   "full_name": "Ada Lovelace"
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: Returns the user profile
/// - **Error (400)**: Email without `@` or password shorter than 8 characters
/// - **Error (409)**: Email already registered
pub async fn register(
    State(pool): State<DbPool>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = auth_service::register(&pool, request).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Log in with email and password.
///
/// # Endpoint
///
/// `POST /api/v1/auth/login`
///
/// # Response
///
/// - **Success (200 OK)**: Returns a bearer token
/// - **Error (401)**: Unknown email, wrong password or inactive user
///
/// ```json
/// {
///   "access_token": "eyJhbGciOi...",
///   "token_type": "bearer",
///   "expires_in": 1800
/// }
/// ```
pub async fn login(
    State(pool): State<DbPool>,
    State(config): State<Arc<Config>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = auth_service::login(&pool, &config, request).await?;
    Ok(Json(token))
}

/// Profile of the authenticated user, including usage counters.
///
/// # Endpoint
///
/// `GET /api/v1/auth/me`
pub async fn me(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UserResponse>, AppError> {
    let user = auth_service::find_user(&pool, auth.user_id).await?;
    Ok(Json(user.into()))
}

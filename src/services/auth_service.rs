//! Authentication service - password hashing, access tokens, registration and login.
//!
//! Passwords are hashed with argon2id and stored as PHC strings. Access tokens
//! are HS256 JWTs whose `sub` claim is the user id.
//!
//! Hashing is CPU bound, so it runs on the blocking thread pool.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::Config,
    db::DbPool,
    error::AppError,
    models::user::{LoginRequest, RegisterRequest, TokenResponse, User},
    services::is_unique_violation,
};

const MIN_PASSWORD_LEN: usize = 8;

/// JWT claims carried by access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
}

/// Hash a password into an argon2id PHC string.
pub async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?
}

/// Check a password against a stored PHC string. Malformed hashes never verify.
pub async fn verify_password(password: String, stored_hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || {
        let Ok(parsed) = PasswordHash::new(&stored_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))
}

/// Issue an access token for `user`.
pub fn create_token(config: &Config, user_id: Uuid, email: &str) -> Result<TokenResponse, AppError> {
    let now = Utc::now();
    let lifetime = Duration::minutes(config.access_token_expire_minutes);
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        iat: now.timestamp(),
        exp: (now + lifetime).timestamp(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token encoding failed: {e}")))?;

    Ok(TokenResponse {
        access_token: token,
        token_type: "bearer",
        expires_in: lifetime.num_seconds(),
    })
}

/// Verify signature and expiry, returning the token's claims.
pub fn decode_token(config: &Config, token: &str) -> Result<Claims, AppError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "rejected access token");
        AppError::InvalidToken
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Create a free-trial user.
///
/// # Errors
///
/// - `InvalidRequest`: email without `@` or password shorter than 8 characters
/// - `Conflict`: the email is already registered
pub async fn register(pool: &DbPool, request: RegisterRequest) -> Result<User, AppError> {
    let email = normalize_email(&request.email);
    if !email.contains('@') {
        return Err(AppError::InvalidRequest("A valid email is required".to_string()));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let hashed = hash_password(request.password).await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, hashed_password, full_name)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(hashed)
    .bind(request.full_name)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Email already registered".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok(user)
}

/// Verify credentials and issue an access token.
///
/// Unknown emails, wrong passwords and inactive users all produce the same error.
pub async fn login(
    pool: &DbPool,
    config: &Config,
    request: LoginRequest,
) -> Result<TokenResponse, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(normalize_email(&request.email))
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !verify_password(request.password, user.hashed_password.clone()).await? {
        return Err(AppError::InvalidCredentials);
    }
    if !user.is_active {
        return Err(AppError::InvalidCredentials);
    }

    create_token(config, user.id, &user.email)
}

/// Load a user by id.
pub async fn find_user(pool: &DbPool, user_id: Uuid) -> Result<User, AppError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn password_hash_round_trip() {
        let hash = hash_password("correct horse".to_string()).await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("wrong horse".into(), hash).await.unwrap());
    }

    #[tokio::test]
    async fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything".into(), "not-a-phc-string".into()).await.unwrap());
    }

    #[test]
    fn token_carries_user_id() {
        let config = Config::for_tests();
        let user_id = Uuid::new_v4();

        let token = create_token(&config, user_id, "a@example.com").unwrap();
        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.expires_in, 30 * 60);

        let claims = decode_token(&config, &token.access_token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email, "a@example.com");
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let config = Config::for_tests();
        let other = Config {
            jwt_secret: "another-secret".to_string(),
            ..Config::for_tests()
        };
        let token = create_token(&other, Uuid::new_v4(), "a@example.com").unwrap();

        assert!(matches!(
            decode_token(&config, &token.access_token),
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = Config {
            access_token_expire_minutes: -10,
            ..Config::for_tests()
        };
        let token = create_token(&config, Uuid::new_v4(), "a@example.com").unwrap();

        assert!(matches!(
            decode_token(&config, &token.access_token),
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }
}

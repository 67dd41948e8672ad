//! Bearer token authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the access token from the Authorization header
//! 2. Verify its signature and expiry
//! 3. Load the user it was issued for
//! 4. Inject authentication context into the request
//!
//! Anything missing, invalid or belonging to an inactive user is rejected with
//! HTTP 401.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{
    error::AppError, models::plan::SubscriptionTier, services::auth_service, state::AppState,
};

/// Authentication context attached to authenticated requests.
///
/// Handlers extract it with `Extension<AuthContext>`. The tier is read from the
/// database on every request, so plan changes apply to tokens issued earlier.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
    pub tier: SubscriptionTier,
}

/// Pull the token out of `Authorization: Bearer <token>`.
fn bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// JWT authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <token>` header from request
/// 2. Decode the token with the configured secret (rejects expired tokens)
/// 3. Load the user named by the `sub` claim, which must still be active
/// 4. Inject `AuthContext` into request and call the next handler
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request).ok_or(AppError::InvalidToken)?;
    let claims = auth_service::decode_token(&state.config, token)?;
    let user_id: Uuid = claims.sub.parse().map_err(|_| AppError::InvalidToken)?;

    let user = match auth_service::find_user(&state.pool, user_id).await {
        Ok(user) if user.is_active => user,
        Ok(_) | Err(AppError::NotFound(_)) => return Err(AppError::InvalidToken),
        Err(e) => return Err(e),
    };

    let tier = user.tier();
    request.extensions_mut().insert(AuthContext {
        user_id: user.id,
        email: user.email,
        tier,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(header: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn extracts_bearer_tokens() {
        assert_eq!(bearer_token(&request_with(Some("Bearer abc.def"))), Some("abc.def"));
        assert_eq!(bearer_token(&request_with(Some("bearer abc"))), Some("abc"));
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(bearer_token(&request_with(None)), None);
        assert_eq!(bearer_token(&request_with(Some("Basic dXNlcg=="))), None);
        assert_eq!(bearer_token(&request_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&request_with(Some("Bearer"))), None);
    }
}

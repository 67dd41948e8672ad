//! Email HTTP handlers.
//!
//! This module implements the email API endpoints:
//! - POST/GET /api/v1/emails/accounts, DELETE /api/v1/emails/accounts/{id}
//! - POST /api/v1/emails/ingest - Push a batch of messages
//! - GET /api/v1/emails, /search, /{id}, /stats/overview
//! - POST /api/v1/emails/{id}/actions/{action}

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::email::{
        CreateEmailAccountRequest, CreateEmailAccountResponse, EmailAccountResponse, EmailAction,
        EmailDetailResponse, EmailListQuery, EmailStatsOverview, EmailSummaryResponse,
        IngestRequest, IngestResponse, MessageResponse, SearchQuery,
    },
    services::email_service,
    tasks::JobQueue,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

/// Connect a mailbox.
///
/// # Endpoint
///
/// `POST /api/v1/emails/accounts`
///
/// # Response
///
/// - **Success (201 Created)**: `{"message": "...", "account_id": "..."}`
/// - **Error (400)**: Invalid address
/// - **Error (409)**: Address already connected
pub async fn create_account(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateEmailAccountRequest>,
) -> Result<(StatusCode, Json<CreateEmailAccountResponse>), AppError> {
    let account_id = email_service::create_account(&pool, auth.user_id, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateEmailAccountResponse {
            message: "Email account connected",
            account_id,
        }),
    ))
}

/// `GET /api/v1/emails/accounts`
pub async fn list_accounts(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<EmailAccountResponse>>, AppError> {
    Ok(Json(email_service::list_accounts(&pool, auth.user_id).await?))
}

/// Remove a mailbox and every email stored for it.
///
/// # Endpoint
///
/// `DELETE /api/v1/emails/accounts/{id}`
///
/// # Response
///
/// - **Success (204 No Content)**
/// - **Error (404)**: Account does not exist or belongs to another user
pub async fn delete_account(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    email_service::delete_account(&pool, auth.user_id, account_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Store a batch of messages pushed by a mailbox connector.
///
/// # Endpoint
///
/// `POST /api/v1/emails/ingest`
///
/// # Response
///
/// - **Success (202 Accepted)**: Counts and the analysis job id
/// - **Error (400)**: Empty or oversized batch, missing `message_id`
/// - **Error (404)**: Account does not exist or belongs to another user
/// - **Error (429)**: Email quota exceeded
///
/// ```json
/// {
///   "received": 3,
///   "stored": 2,
///   "skipped": 1,
///   "job_id": "7d0c1f9e-5b2a-4e43-9d8a-1a2b3c4d5e6f"
/// }
/// ```
pub async fn ingest(
    State(pool): State<DbPool>,
    State(jobs): State<JobQueue>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let response = email_service::ingest(&pool, &jobs, auth.user_id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// `GET /api/v1/emails?skip=0&limit=20&category=work&importance_min=0.5&unread_only=true`
pub async fn list_emails(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<EmailListQuery>,
) -> Result<Json<Vec<EmailSummaryResponse>>, AppError> {
    Ok(Json(email_service::list_emails(&pool, auth.user_id, query).await?))
}

/// `GET /api/v1/emails/search?q=invoice&limit=50`
pub async fn search_emails(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<EmailSummaryResponse>>, AppError> {
    Ok(Json(email_service::search_emails(&pool, auth.user_id, query).await?))
}

/// Detail view of one email. Opening an unread email marks it read.
pub async fn get_email(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(email_id): Path<Uuid>,
) -> Result<Json<EmailDetailResponse>, AppError> {
    Ok(Json(email_service::get_email(&pool, auth.user_id, email_id).await?))
}

/// Apply `mark_read`, `mark_unread`, `mark_important`, `archive` or `delete`.
///
/// # Endpoint
///
/// `POST /api/v1/emails/{id}/actions/{action}`
///
/// # Response
///
/// - **Success (200 OK)**: `{"message": "..."}`
/// - **Error (400)**: Unknown action
/// - **Error (404)**: Email does not exist or belongs to another user
pub async fn email_action(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path((email_id, action)): Path<(Uuid, String)>,
) -> Result<Json<MessageResponse>, AppError> {
    let action: EmailAction = action.parse().map_err(AppError::InvalidRequest)?;
    Ok(Json(
        email_service::apply_action(&pool, auth.user_id, email_id, action).await?,
    ))
}

/// `GET /api/v1/emails/stats/overview`
pub async fn stats_overview(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<EmailStatsOverview>, AppError> {
    Ok(Json(email_service::stats_overview(&pool, auth.user_id).await?))
}

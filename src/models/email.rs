//! Email and mailbox models, plus the request/response types of the emails API.
//!
//! This module defines:
//! - `EmailAccount`: a connected mailbox (Gmail, Outlook or IMAP)
//! - `Email`: a stored message with its AI analysis columns
//! - Ingestion, listing, search and action request types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::str::FromStr;
use uuid::Uuid;

/// Supported mailbox providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    Gmail,
    Outlook,
    Imap,
}

impl EmailProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailProvider::Gmail => "gmail",
            EmailProvider::Outlook => "outlook",
            EmailProvider::Imap => "imap",
        }
    }
}

/// Connected mailbox record.
///
/// # Database Table
///
/// Maps to the `email_accounts` table. OAuth tokens are kept for provider access
/// but never serialized back to clients (see `EmailAccountResponse`).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub email_address: String,
    pub display_name: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub imap_server: Option<String>,
    pub imap_port: Option<i32>,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub total_emails: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for `POST /api/v1/emails/accounts`.
#[derive(Debug, Deserialize)]
pub struct CreateEmailAccountRequest {
    pub provider: EmailProvider,
    pub email_address: String,
    pub display_name: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub imap_server: Option<String>,
    pub imap_port: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct CreateEmailAccountResponse {
    pub message: &'static str,
    pub account_id: Uuid,
}

/// Mailbox as returned to clients (no credentials).
#[derive(Debug, Serialize)]
pub struct EmailAccountResponse {
    pub id: Uuid,
    pub provider: String,
    pub email_address: String,
    pub display_name: Option<String>,
    pub imap_server: Option<String>,
    pub imap_port: Option<i32>,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub total_emails: i64,
    pub created_at: DateTime<Utc>,
}

impl From<EmailAccount> for EmailAccountResponse {
    fn from(account: EmailAccount) -> Self {
        Self {
            id: account.id,
            provider: account.provider,
            email_address: account.email_address,
            display_name: account.display_name,
            imap_server: account.imap_server,
            imap_port: account.imap_port,
            is_active: account.is_active,
            last_sync_at: account.last_sync_at,
            total_emails: account.total_emails,
            created_at: account.created_at,
        }
    }
}

/// Stored email message.
///
/// # Database Table
///
/// Maps to the `emails` table. `user_id` is denormalized from the owning
/// mailbox so every query can filter by owner without a join.
///
/// The `ai_*` columns stay NULL until the analysis job (or a direct
/// `POST /ai/analyze/single`) has run. `is_processed` flips to true at that point.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Email {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email_account_id: Uuid,
    pub message_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
    pub recipient_emails: Json<Vec<String>>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub snippet: Option<String>,
    pub labels: Json<Vec<String>>,
    pub sent_date: Option<DateTime<Utc>>,
    pub received_date: DateTime<Utc>,
    pub replied_at: Option<DateTime<Utc>>,
    pub response_time_minutes: Option<f64>,
    pub is_read: bool,
    pub is_replied: bool,
    pub is_archived: bool,
    pub is_important: bool,
    pub has_attachments: bool,
    pub ai_category: Option<String>,
    pub ai_priority: Option<String>,
    pub ai_importance_score: Option<f64>,
    pub ai_sentiment: Option<String>,
    pub ai_sentiment_score: Option<f64>,
    pub ai_summary: Option<String>,
    pub ai_key_topics: Json<Vec<String>>,
    pub ai_action_required: bool,
    pub ai_suggested_action: Option<String>,
    pub ai_confidence_score: Option<f64>,
    pub ai_analyzed_at: Option<DateTime<Utc>>,
    pub is_processed: bool,
    pub processing_error: Option<String>,
    pub processing_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single message pushed through `POST /api/v1/emails/ingest`.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
    #[serde(default)]
    pub recipient_emails: Vec<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub snippet: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub sent_date: Option<DateTime<Utc>>,
    pub received_date: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub has_attachments: bool,
}

/// Request body for `POST /api/v1/emails/ingest`.
///
/// ```json
/// {
///   "email_account_id": "550e8400-e29b-41d4-a716-446655440000",
///   "messages": [
///     {
///       "message_id": "<CAF=abc@mail.gmail.com>",
///       "subject": "Quarterly report",
///       "sender_email": "boss@example.com",
///       "body_text": "Please review the attached report before Friday."
///     }
///   ]
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub email_account_id: Uuid,
    pub messages: Vec<IncomingMessage>,
}

/// Outcome of an ingestion batch.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub received: usize,
    pub stored: usize,
    pub skipped: usize,
    /// Analysis job created for the stored emails (absent when nothing was stored)
    pub job_id: Option<Uuid>,
}

/// Query string of `GET /api/v1/emails`.
#[derive(Debug, Deserialize)]
pub struct EmailListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_list_limit")]
    pub limit: i64,
    pub category: Option<String>,
    pub importance_min: Option<f64>,
    #[serde(default)]
    pub unread_only: bool,
}

fn default_list_limit() -> i64 {
    20
}

/// Query string of `GET /api/v1/emails/search`.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: i64,
}

fn default_search_limit() -> i64 {
    50
}

/// Row of the email list.
#[derive(Debug, Serialize)]
pub struct EmailSummaryResponse {
    pub id: Uuid,
    pub subject: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub snippet: String,
    pub sent_date: Option<DateTime<Utc>>,
    pub received_date: DateTime<Utc>,
    pub is_read: bool,
    pub is_important: bool,
    pub ai_category: Option<String>,
    pub ai_importance_score: Option<f64>,
    pub ai_sentiment: Option<String>,
}

impl From<Email> for EmailSummaryResponse {
    fn from(email: Email) -> Self {
        Self {
            id: email.id,
            subject: email.subject.unwrap_or_default(),
            sender_email: email.sender_email.unwrap_or_default(),
            sender_name: email.sender_name,
            snippet: email.snippet.unwrap_or_default(),
            sent_date: email.sent_date,
            received_date: email.received_date,
            is_read: email.is_read,
            is_important: email.is_important,
            ai_category: email.ai_category,
            ai_importance_score: email.ai_importance_score,
            ai_sentiment: email.ai_sentiment,
        }
    }
}

/// Full email view returned by `GET /api/v1/emails/{id}`.
#[derive(Debug, Serialize)]
pub struct EmailDetailResponse {
    pub id: Uuid,
    pub email_account_id: Uuid,
    pub thread_id: Option<String>,
    pub subject: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub recipient_emails: Vec<String>,
    pub body_text: String,
    pub body_html: Option<String>,
    pub sent_date: Option<DateTime<Utc>>,
    pub received_date: DateTime<Utc>,
    pub is_read: bool,
    pub is_archived: bool,
    pub is_important: bool,
    pub has_attachments: bool,
    pub labels: Vec<String>,
    pub ai_category: Option<String>,
    pub ai_priority: Option<String>,
    pub ai_importance_score: Option<f64>,
    pub ai_sentiment: Option<String>,
    pub ai_summary: Option<String>,
    pub ai_key_topics: Vec<String>,
    pub ai_action_required: bool,
    pub ai_suggested_action: Option<String>,
}

impl From<Email> for EmailDetailResponse {
    fn from(email: Email) -> Self {
        Self {
            id: email.id,
            email_account_id: email.email_account_id,
            thread_id: email.thread_id,
            subject: email.subject.unwrap_or_default(),
            sender_email: email.sender_email.unwrap_or_default(),
            sender_name: email.sender_name,
            recipient_emails: email.recipient_emails.0,
            body_text: email.body_text.unwrap_or_default(),
            body_html: email.body_html,
            sent_date: email.sent_date,
            received_date: email.received_date,
            is_read: email.is_read,
            is_archived: email.is_archived,
            is_important: email.is_important,
            has_attachments: email.has_attachments,
            labels: email.labels.0,
            ai_category: email.ai_category,
            ai_priority: email.ai_priority,
            ai_importance_score: email.ai_importance_score,
            ai_sentiment: email.ai_sentiment,
            ai_summary: email.ai_summary,
            ai_key_topics: email.ai_key_topics.0,
            ai_action_required: email.ai_action_required,
            ai_suggested_action: email.ai_suggested_action,
        }
    }
}

/// Action accepted by `POST /api/v1/emails/{id}/actions/{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailAction {
    MarkRead,
    MarkUnread,
    MarkImportant,
    Archive,
    Delete,
}

impl EmailAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailAction::MarkRead => "mark_read",
            EmailAction::MarkUnread => "mark_unread",
            EmailAction::MarkImportant => "mark_important",
            EmailAction::Archive => "archive",
            EmailAction::Delete => "delete",
        }
    }
}

impl FromStr for EmailAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mark_read" => Ok(EmailAction::MarkRead),
            "mark_unread" => Ok(EmailAction::MarkUnread),
            "mark_important" => Ok(EmailAction::MarkImportant),
            "archive" => Ok(EmailAction::Archive),
            "delete" => Ok(EmailAction::Delete),
            other => Err(format!("Invalid action '{other}'")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Response of `GET /api/v1/emails/stats/overview`.
#[derive(Debug, Serialize)]
pub struct EmailStatsOverview {
    pub total_emails: i64,
    pub unread_emails: i64,
    pub this_week_emails: i64,
    /// Percentage of emails that have been read
    pub read_rate: f64,
}

impl EmailStatsOverview {
    pub fn new(total_emails: i64, unread_emails: i64, this_week_emails: i64) -> Self {
        let read = (total_emails - unread_emails) as f64;
        Self {
            total_emails,
            unread_emails,
            this_week_emails,
            read_rate: read / total_emails.max(1) as f64 * 100.0,
        }
    }
}

//! Email service - mailboxes, push ingestion and the inbox.
//!
//! This service handles:
//! - Connecting and disconnecting mailboxes
//! - Ingesting batches of messages with quota checks and de-duplication
//! - Listing, searching and acting on stored emails
//!
//! # Ownership
//!
//! Every query filters by `user_id`. An email or mailbox that belongs to another
//! user is reported as not found.

use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use std::collections::HashSet;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::email::{
        CreateEmailAccountRequest, Email, EmailAccount, EmailAccountResponse, EmailAction,
        EmailDetailResponse, EmailListQuery, EmailStatsOverview, EmailSummaryResponse,
        IncomingMessage, IngestRequest, IngestResponse, MessageResponse, SearchQuery,
    },
    services::{auth_service, is_unique_violation, usage_service},
    tasks::{Job, JobQueue},
};

pub const MAX_INGEST_BATCH: usize = 500;
const SNIPPET_CHARS: usize = 200;
const MAX_PAGE_SIZE: i64 = 100;

/// Connect a mailbox and return its id.
pub async fn create_account(
    pool: &DbPool,
    user_id: Uuid,
    request: CreateEmailAccountRequest,
) -> Result<Uuid, AppError> {
    let address = request.email_address.trim().to_lowercase();
    if !address.contains('@') {
        return Err(AppError::InvalidRequest(
            "A valid email address is required".to_string(),
        ));
    }

    let account_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO email_accounts (
            user_id, provider, email_address, display_name,
            access_token, refresh_token, imap_server, imap_port
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(request.provider.as_str())
    .bind(&address)
    .bind(request.display_name)
    .bind(request.access_token)
    .bind(request.refresh_token)
    .bind(request.imap_server)
    .bind(request.imap_port)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Email account already connected".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    tracing::info!(%user_id, %account_id, provider = request.provider.as_str(), "email account connected");
    Ok(account_id)
}

pub async fn list_accounts(
    pool: &DbPool,
    user_id: Uuid,
) -> Result<Vec<EmailAccountResponse>, AppError> {
    let accounts = sqlx::query_as::<_, EmailAccount>(
        "SELECT * FROM email_accounts WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(accounts.into_iter().map(Into::into).collect())
}

/// Disconnect a mailbox. Its emails are removed by the foreign key cascade.
pub async fn delete_account(pool: &DbPool, user_id: Uuid, account_id: Uuid) -> Result<(), AppError> {
    let deleted = sqlx::query("DELETE FROM email_accounts WHERE id = $1 AND user_id = $2")
        .bind(account_id)
        .bind(user_id)
        .execute(pool)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound("Email account"));
    }
    Ok(())
}

/// Store a batch of pushed messages and queue their analysis.
///
/// # Process
///
/// 1. Validate the batch and the mailbox ownership
/// 2. Drop duplicates within the batch and messages already stored
/// 3. Check the email quota against what is left
/// 4. Insert emails, count them against the quota, bump counters and create
///    the job row in one transaction. A quota overrun rolls everything back
/// 5. Queue an `AnalyzeEmails` job
///
/// # Errors
///
/// - `InvalidRequest`: empty batch, more than 500 messages, blank `message_id`
/// - `NotFound`: the mailbox does not belong to the user
/// - `LimitExceeded`: the user's email quota would be exceeded
pub async fn ingest(
    pool: &DbPool,
    jobs: &JobQueue,
    user_id: Uuid,
    request: IngestRequest,
) -> Result<IngestResponse, AppError> {
    let received = request.messages.len();
    if received == 0 {
        return Err(AppError::InvalidRequest("No messages to ingest".to_string()));
    }
    if received > MAX_INGEST_BATCH {
        return Err(AppError::InvalidRequest(format!(
            "At most {MAX_INGEST_BATCH} messages can be ingested per request"
        )));
    }
    if request.messages.iter().any(|m| m.message_id.trim().is_empty()) {
        return Err(AppError::InvalidRequest(
            "Every message needs a message_id".to_string(),
        ));
    }

    let account_id = request.email_account_id;
    let owned = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM email_accounts WHERE id = $1 AND user_id = $2",
    )
    .bind(account_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    if owned.is_none() {
        return Err(AppError::NotFound("Email account"));
    }

    let batch = dedup_batch(request.messages);
    let message_ids: Vec<String> = batch.iter().map(|m| m.message_id.clone()).collect();
    let existing: HashSet<String> = sqlx::query_scalar::<_, String>(
        "SELECT message_id FROM emails WHERE email_account_id = $1 AND message_id = ANY($2)",
    )
    .bind(account_id)
    .bind(&message_ids)
    .fetch_all(pool)
    .await?
    .into_iter()
    .collect();

    let fresh = without_stored(batch, &existing);

    if fresh.is_empty() {
        return Ok(IngestResponse {
            received,
            stored: 0,
            skipped: received,
            job_id: None,
        });
    }

    let user = auth_service::find_user(pool, user_id).await?;
    usage_service::check_email_quota(&user, fresh.len() as i64)?;

    let mut tx = pool.begin().await?;
    let now = Utc::now();
    let mut stored_ids = Vec::with_capacity(fresh.len());

    for message in fresh {
        let received_date = message.received_date.unwrap_or(now);
        let response_time = response_time_minutes(received_date, message.replied_at);
        let snippet = derive_snippet(message.snippet.as_deref(), message.body_text.as_deref());

        // A concurrent ingest of the same message loses the race quietly
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO emails (
                user_id, email_account_id, message_id, thread_id, subject,
                sender_email, sender_name, recipient_emails, body_text, body_html,
                snippet, labels, sent_date, received_date, replied_at,
                response_time_minutes, is_read, is_replied, has_attachments
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (email_account_id, message_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(account_id)
        .bind(&message.message_id)
        .bind(message.thread_id)
        .bind(message.subject)
        .bind(message.sender_email.map(|s| s.trim().to_lowercase()))
        .bind(message.sender_name)
        .bind(Json(message.recipient_emails))
        .bind(message.body_text)
        .bind(message.body_html)
        .bind(snippet)
        .bind(Json(message.labels))
        .bind(message.sent_date)
        .bind(received_date)
        .bind(message.replied_at)
        .bind(response_time)
        .bind(message.is_read)
        .bind(message.replied_at.is_some())
        .bind(message.has_attachments)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(id) = id {
            stored_ids.push(id);
        }
    }

    let stored = stored_ids.len();
    let mut job_id = None;

    if stored > 0 {
        // Authoritative check; the early one above reads a snapshot
        usage_service::consume_email_quota(&mut tx, user_id, user.tier(), stored as i64).await?;

        sqlx::query(
            r#"
            UPDATE email_accounts
            SET total_emails = total_emails + $2,
                last_sync_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(stored as i64)
        .execute(&mut *tx)
        .await?;

        job_id = Some(
            sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO analysis_jobs (user_id, kind, total_emails)
                VALUES ($1, 'ingest_analysis', $2)
                RETURNING id
                "#,
            )
            .bind(user_id)
            .bind(stored as i32)
            .fetch_one(&mut *tx)
            .await?,
        );
    }

    tx.commit().await?;

    if stored > 0 {
        // The reprocess sweep picks these emails up if the queue is gone
        if let Err(e) = jobs
            .enqueue(Job::AnalyzeEmails {
                user_id,
                email_ids: stored_ids,
                job_id,
            })
            .await
        {
            tracing::warn!(%user_id, error = %e, "could not queue analysis for ingested emails");
        }
    }

    tracing::info!(%user_id, %account_id, received, stored, "emails ingested");
    Ok(IngestResponse {
        received,
        stored,
        skipped: received - stored,
        job_id,
    })
}

/// Keep the first occurrence of every `message_id`.
fn dedup_batch(messages: Vec<IncomingMessage>) -> Vec<IncomingMessage> {
    let mut seen = HashSet::new();
    messages
        .into_iter()
        .filter(|m| seen.insert(m.message_id.clone()))
        .collect()
}

/// Drop the messages whose `message_id` is already stored for the mailbox.
fn without_stored(batch: Vec<IncomingMessage>, stored: &HashSet<String>) -> Vec<IncomingMessage> {
    batch
        .into_iter()
        .filter(|m| !stored.contains(&m.message_id))
        .collect()
}

/// The given snippet, or the first 200 characters of the body.
fn derive_snippet(snippet: Option<&str>, body_text: Option<&str>) -> Option<String> {
    if let Some(snippet) = snippet.map(str::trim).filter(|s| !s.is_empty()) {
        return Some(snippet.to_string());
    }

    let body = body_text.map(str::trim).filter(|b| !b.is_empty())?;
    Some(body.chars().take(SNIPPET_CHARS).collect())
}

/// Minutes between receiving and replying. Replies dated before receipt are ignored.
fn response_time_minutes(
    received: DateTime<Utc>,
    replied_at: Option<DateTime<Utc>>,
) -> Option<f64> {
    let elapsed = replied_at? - received;
    if elapsed < Duration::zero() {
        return None;
    }
    Some(elapsed.num_seconds() as f64 / 60.0)
}

/// Page through the inbox, newest first. Archived emails are hidden.
pub async fn list_emails(
    pool: &DbPool,
    user_id: Uuid,
    query: EmailListQuery,
) -> Result<Vec<EmailSummaryResponse>, AppError> {
    if query.skip < 0 {
        return Err(AppError::InvalidRequest("skip must not be negative".to_string()));
    }
    super::ensure_range("limit", query.limit, 1, MAX_PAGE_SIZE)?;
    if let Some(min) = query.importance_min {
        if !(0.0..=1.0).contains(&min) {
            return Err(AppError::InvalidRequest(
                "importance_min must be between 0 and 1".to_string(),
            ));
        }
    }

    let emails = sqlx::query_as::<_, Email>(
        r#"
        SELECT * FROM emails
        WHERE user_id = $1
          AND is_archived = FALSE
          AND ($2::TEXT IS NULL OR ai_category = $2)
          AND ($3::DOUBLE PRECISION IS NULL OR ai_importance_score >= $3)
          AND (NOT $4 OR is_read = FALSE)
        ORDER BY received_date DESC
        LIMIT $5 OFFSET $6
        "#,
    )
    .bind(user_id)
    .bind(query.category)
    .bind(query.importance_min)
    .bind(query.unread_only)
    .bind(query.limit)
    .bind(query.skip)
    .fetch_all(pool)
    .await?;

    Ok(emails.into_iter().map(Into::into).collect())
}

/// Case-insensitive substring search over subject and body.
pub async fn search_emails(
    pool: &DbPool,
    user_id: Uuid,
    query: SearchQuery,
) -> Result<Vec<EmailSummaryResponse>, AppError> {
    let term = query.q.trim();
    if term.is_empty() {
        return Err(AppError::InvalidRequest("Search query is required".to_string()));
    }
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);

    let emails = sqlx::query_as::<_, Email>(
        r#"
        SELECT * FROM emails
        WHERE user_id = $1
          AND (subject ILIKE $2 OR body_text ILIKE $2)
        ORDER BY received_date DESC
        LIMIT $3
        "#,
    )
    .bind(user_id)
    .bind(like_pattern(term))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(emails.into_iter().map(Into::into).collect())
}

/// `%term%` with LIKE wildcards in `term` escaped.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Load an email for display and mark it read.
pub async fn get_email(
    pool: &DbPool,
    user_id: Uuid,
    email_id: Uuid,
) -> Result<EmailDetailResponse, AppError> {
    let mut email = fetch_owned(pool, user_id, email_id).await?;

    if !email.is_read {
        sqlx::query("UPDATE emails SET is_read = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(email.id)
            .execute(pool)
            .await?;
        email.is_read = true;
    }

    Ok(email.into())
}

pub(crate) async fn fetch_owned(pool: &DbPool, user_id: Uuid, email_id: Uuid) -> Result<Email, AppError> {
    sqlx::query_as::<_, Email>("SELECT * FROM emails WHERE id = $1 AND user_id = $2")
        .bind(email_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Email"))
}

/// Apply a user action to one email. `delete` removes the row.
pub async fn apply_action(
    pool: &DbPool,
    user_id: Uuid,
    email_id: Uuid,
    action: EmailAction,
) -> Result<MessageResponse, AppError> {
    let sql = match action {
        EmailAction::MarkRead => {
            "UPDATE emails SET is_read = TRUE, updated_at = NOW() WHERE id = $1 AND user_id = $2"
        }
        EmailAction::MarkUnread => {
            "UPDATE emails SET is_read = FALSE, updated_at = NOW() WHERE id = $1 AND user_id = $2"
        }
        EmailAction::MarkImportant => {
            "UPDATE emails SET is_important = TRUE, ai_priority = 'high', updated_at = NOW() WHERE id = $1 AND user_id = $2"
        }
        EmailAction::Archive => {
            "UPDATE emails SET is_archived = TRUE, updated_at = NOW() WHERE id = $1 AND user_id = $2"
        }
        EmailAction::Delete => "DELETE FROM emails WHERE id = $1 AND user_id = $2",
    };

    let affected = sqlx::query(sql)
        .bind(email_id)
        .bind(user_id)
        .execute(pool)
        .await?
        .rows_affected();

    if affected == 0 {
        return Err(AppError::NotFound("Email"));
    }

    tracing::debug!(%user_id, %email_id, action = action.as_str(), "email action applied");
    Ok(MessageResponse {
        message: action_message(action).to_string(),
    })
}

fn action_message(action: EmailAction) -> &'static str {
    match action {
        EmailAction::MarkRead => "Email marked as read",
        EmailAction::MarkUnread => "Email marked as unread",
        EmailAction::MarkImportant => "Email marked as important",
        EmailAction::Archive => "Email archived",
        EmailAction::Delete => "Email deleted",
    }
}

pub async fn stats_overview(pool: &DbPool, user_id: Uuid) -> Result<EmailStatsOverview, AppError> {
    let (total, unread, this_week): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*),
            COUNT(*) FILTER (WHERE is_read = FALSE),
            COUNT(*) FILTER (WHERE received_date >= NOW() - INTERVAL '7 days')
        FROM emails
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(EmailStatsOverview::new(total, unread, this_week))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::plan::SubscriptionTier, test_support};

    fn message(id: &str) -> IncomingMessage {
        serde_json::from_value(serde_json::json!({ "message_id": id })).unwrap()
    }

    fn ingest_request(account_id: Uuid, ids: impl IntoIterator<Item = String>) -> IngestRequest {
        IngestRequest {
            email_account_id: account_id,
            messages: ids.into_iter().map(|id| message(&id)).collect(),
        }
    }

    #[test]
    fn stored_messages_are_dropped() {
        let stored: HashSet<String> = ["b".to_string()].into();

        let fresh = without_stored(vec![message("a"), message("b"), message("c")], &stored);

        let ids: Vec<&str> = fresh.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn reingest_skips_stored_messages(pool: DbPool) {
        let (state, _rx) = test_support::state_with(pool.clone());
        let user_id = test_support::insert_user(&pool, SubscriptionTier::FreeTrial).await;
        let account_id = test_support::insert_account(&pool, user_id).await;

        let first = ingest(
            &pool,
            &state.jobs,
            user_id,
            ingest_request(account_id, ["m1", "m2"].map(String::from)),
        )
        .await
        .unwrap();
        assert_eq!((first.received, first.stored, first.skipped), (2, 2, 0));
        assert!(first.job_id.is_some());

        let second = ingest(
            &pool,
            &state.jobs,
            user_id,
            ingest_request(account_id, ["m2", "m3", "m3"].map(String::from)),
        )
        .await
        .unwrap();
        assert_eq!((second.received, second.stored, second.skipped), (3, 1, 2));

        let user = auth_service::find_user(&pool, user_id).await.unwrap();
        assert_eq!(user.emails_processed, 3);

        let total: i64 = sqlx::query_scalar("SELECT total_emails FROM email_accounts WHERE id = $1")
            .bind(account_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(total, 3);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn concurrent_ingests_stay_within_the_email_limit(pool: DbPool) {
        let (state, _rx) = test_support::state_with(pool.clone());
        let user_id = test_support::insert_user(&pool, SubscriptionTier::FreeTrial).await;
        let account_id = test_support::insert_account(&pool, user_id).await;
        sqlx::query("UPDATE users SET emails_processed = 400 WHERE id = $1")
            .bind(user_id)
            .execute(&pool)
            .await
            .unwrap();

        // Each batch fits on its own (400 + 500 <= 1000), both together do not
        let batch = |prefix: &str| {
            ingest_request(account_id, (0..500).map(|i| format!("{prefix}-{i}")))
        };
        let (a, b) = tokio::join!(
            ingest(&pool, &state.jobs, user_id, batch("a")),
            ingest(&pool, &state.jobs, user_id, batch("b")),
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert!(matches!(a.err().or(b.err()), Some(AppError::LimitExceeded(_))));

        let user = auth_service::find_user(&pool, user_id).await.unwrap();
        assert_eq!(user.emails_processed, 900);

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emails WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored, 500);
    }

    #[test]
    fn batch_duplicates_keep_the_first() {
        let mut first = message("a");
        first.subject = Some("first".into());
        let mut second = message("a");
        second.subject = Some("second".into());

        let batch = dedup_batch(vec![first, message("b"), second]);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].subject.as_deref(), Some("first"));
        assert_eq!(batch[1].message_id, "b");
    }

    #[test]
    fn snippet_prefers_explicit_value() {
        assert_eq!(
            derive_snippet(Some(" preview "), Some("body")).as_deref(),
            Some("preview")
        );
        assert_eq!(derive_snippet(Some(""), Some("body")).as_deref(), Some("body"));
        assert_eq!(derive_snippet(None, None), None);
    }

    #[test]
    fn snippet_is_cut_at_200_chars() {
        let body = "é".repeat(250);
        let snippet = derive_snippet(None, Some(&body)).unwrap();
        assert_eq!(snippet.chars().count(), 200);
    }

    #[test]
    fn response_time_is_in_minutes() {
        let received = Utc::now();
        let replied = received + Duration::minutes(90);

        assert_eq!(response_time_minutes(received, Some(replied)), Some(90.0));
        assert_eq!(response_time_minutes(received, None), None);
        assert_eq!(
            response_time_minutes(received, Some(received - Duration::minutes(1))),
            None
        );
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(like_pattern("invoice"), "%invoice%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn every_action_has_a_message() {
        assert_eq!(action_message(EmailAction::Archive), "Email archived");
        assert_eq!(action_message(EmailAction::Delete), "Email deleted");
    }
}

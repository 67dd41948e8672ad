//! The `AnalyzeEmails` job and its `analysis_jobs` bookkeeping.

use std::time::Duration;
use uuid::Uuid;

use crate::{
    ai::EmailContent,
    db::DbPool,
    error::AppError,
    models::email::Email,
    services::ai_service,
    state::AppState,
};

/// Analyze the still-unprocessed emails among `email_ids`.
///
/// Emails that are already processed count as done, so a retried job picks up
/// where the failed attempt stopped. A failure to store one email's analysis is
/// recorded on that email and does not stop the job.
pub async fn analyze_emails(
    state: &AppState,
    user_id: Uuid,
    email_ids: &[Uuid],
    job_id: Option<Uuid>,
) -> Result<(), AppError> {
    if let Some(job_id) = job_id {
        mark_job_processing(&state.pool, job_id).await?;
    }

    let emails = sqlx::query_as::<_, Email>(
        r#"
        SELECT * FROM emails
        WHERE user_id = $1 AND id = ANY($2) AND is_processed = FALSE
        ORDER BY received_date
        "#,
    )
    .bind(user_id)
    .bind(email_ids)
    .fetch_all(&state.pool)
    .await?;

    let pause = Duration::from_millis(state.config.ai_request_interval_ms);
    let mut processed = email_ids.len().saturating_sub(emails.len());
    let mut failed = 0usize;

    tracing::info!(
        %user_id,
        job_id = ?job_id,
        pending = emails.len(),
        provider = state.ai.provider_name(),
        "analyzing emails"
    );

    for (index, email) in emails.iter().enumerate() {
        if index > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        let analysis = state.ai.analyze_email(&EmailContent::from_email(email)).await;
        if let Err(e) = ai_service::persist_analysis(&state.pool, email.id, &analysis).await {
            tracing::warn!(email_id = %email.id, error = %e, "storing analysis failed");
            ai_service::record_processing_error(&state.pool, email.id, &e.to_string()).await?;
            failed += 1;
        }

        processed += 1;
        if let Some(job_id) = job_id {
            update_job_progress(&state.pool, job_id, processed as i32).await?;
        }
    }

    if let Some(job_id) = job_id {
        mark_job_completed(&state.pool, job_id, processed as i32, failure_summary(failed)).await?;
    }

    tracing::info!(%user_id, processed, failed, "email analysis finished");
    Ok(())
}

/// Error message stored on a completed job when some emails failed.
fn failure_summary(failed: usize) -> Option<String> {
    (failed > 0).then(|| format!("{failed} emails could not be analyzed"))
}

async fn mark_job_processing(pool: &DbPool, job_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'processing',
            attempts = attempts + 1,
            started_at = COALESCE(started_at, NOW())
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn update_job_progress(pool: &DbPool, job_id: Uuid, processed: i32) -> Result<(), AppError> {
    sqlx::query("UPDATE analysis_jobs SET processed_emails = $2 WHERE id = $1")
        .bind(job_id)
        .bind(processed)
        .execute(pool)
        .await?;
    Ok(())
}

async fn mark_job_completed(
    pool: &DbPool,
    job_id: Uuid,
    processed: i32,
    error_message: Option<String>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'completed',
            processed_emails = $2,
            error_message = $3,
            completed_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(processed)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_job_failed(pool: &DbPool, job_id: Uuid, message: &str) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'failed',
            error_message = $2,
            completed_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::plan::SubscriptionTier, test_support};

    #[derive(sqlx::FromRow)]
    struct JobRow {
        status: String,
        processed_emails: i32,
        attempts: i32,
        error_message: Option<String>,
        finished: bool,
    }

    async fn job_row(pool: &DbPool, job_id: Uuid) -> JobRow {
        sqlx::query_as(
            r#"
            SELECT status, processed_emails, attempts, error_message,
                   started_at IS NOT NULL AND completed_at IS NOT NULL AS finished
            FROM analysis_jobs WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn new_job(pool: &DbPool, user_id: Uuid, total: i32) -> Uuid {
        sqlx::query_scalar(
            "INSERT INTO analysis_jobs (user_id, kind, total_emails) VALUES ($1, 'batch_analysis', $2) RETURNING id",
        )
        .bind(user_id)
        .bind(total)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[test]
    fn failures_are_summarized() {
        assert_eq!(failure_summary(0), None);
        assert_eq!(
            failure_summary(3).as_deref(),
            Some("3 emails could not be analyzed")
        );
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn job_tracks_progress_to_completion(pool: DbPool) {
        let (state, _rx) = test_support::state_with(pool.clone());
        let user_id = test_support::insert_user(&pool, SubscriptionTier::Starter).await;
        let account_id = test_support::insert_account(&pool, user_id).await;
        let invoice = test_support::insert_email(
            &pool,
            user_id,
            account_id,
            "billing@vendor.com",
            "Invoice #42 payment due",
        )
        .await;
        let done = test_support::insert_email(&pool, user_id, account_id, "a@b.com", "hello").await;
        sqlx::query("UPDATE emails SET is_processed = TRUE WHERE id = $1")
            .bind(done)
            .execute(&pool)
            .await
            .unwrap();
        let job_id = new_job(&pool, user_id, 2).await;

        analyze_emails(&state, user_id, &[invoice, done], Some(job_id))
            .await
            .unwrap();

        let job = job_row(&pool, job_id).await;
        assert_eq!(job.status, "completed");
        assert_eq!(job.processed_emails, 2);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error_message, None);
        assert!(job.finished);

        let (processed, category): (bool, Option<String>) =
            sqlx::query_as("SELECT is_processed, ai_category FROM emails WHERE id = $1")
                .bind(invoice)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(processed);
        assert!(category.is_some());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn failed_jobs_keep_their_reason(pool: DbPool) {
        let user_id = test_support::insert_user(&pool, SubscriptionTier::Starter).await;
        let job_id = new_job(&pool, user_id, 5).await;

        mark_job_failed(&pool, job_id, "could not be queued").await.unwrap();

        let job = job_row(&pool, job_id).await;
        assert_eq!(job.status, "failed");
        assert_eq!(job.error_message.as_deref(), Some("could not be queued"));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn processing_errors_count_attempts(pool: DbPool) {
        let user_id = test_support::insert_user(&pool, SubscriptionTier::Starter).await;
        let account_id = test_support::insert_account(&pool, user_id).await;
        let email_id = test_support::insert_email(&pool, user_id, account_id, "a@b.com", "hi").await;

        ai_service::record_processing_error(&pool, email_id, "timeout").await.unwrap();
        ai_service::record_processing_error(&pool, email_id, "still failing").await.unwrap();

        let (error, attempts, processed): (Option<String>, i32, bool) = sqlx::query_as(
            "SELECT processing_error, processing_attempts, is_processed FROM emails WHERE id = $1",
        )
        .bind(email_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(error.as_deref(), Some("still failing"));
        assert_eq!(attempts, 2);
        assert!(!processed);
    }
}

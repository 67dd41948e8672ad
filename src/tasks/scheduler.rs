//! Periodic maintenance: daily rollups, re-analysis sweeps, insight refreshes and cleanup.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::{collections::BTreeMap, future::Future, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use uuid::Uuid;

use crate::{
    ai::patterns::last_complete_week,
    error::AppError,
    services::usage_service,
    state::AppState,
    tasks::Job,
};

/// Emails that failed this many times are left alone by the sweep.
const MAX_PROCESSING_ATTEMPTS: i32 = 3;
const JOB_RETENTION_DAYS: i64 = 30;
const STRIPE_EVENT_RETENTION_DAYS: i64 = 90;

/// Start the rollup, reprocess, insights and cleanup loops.
pub fn spawn_scheduler(state: AppState, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let config = state.config.clone();
    vec![
        spawn_periodic(
            "rollup",
            Duration::from_secs(config.rollup_interval_secs),
            state.clone(),
            shutdown.clone(),
            enqueue_daily_rollups,
        ),
        spawn_periodic(
            "reprocess",
            Duration::from_secs(config.reprocess_interval_secs),
            state.clone(),
            shutdown.clone(),
            reprocess_unprocessed,
        ),
        spawn_periodic(
            "insights",
            Duration::from_secs(config.insights_interval_secs),
            state.clone(),
            shutdown.clone(),
            enqueue_insight_jobs,
        ),
        spawn_periodic(
            "cleanup",
            Duration::from_secs(config.cleanup_interval_secs),
            state,
            shutdown,
            cleanup,
        ),
    ]
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
    task: F,
) -> JoinHandle<()>
where
    F: Fn(AppState) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = task(state.clone()).await {
                        tracing::error!(task = name, error = %e, "scheduled task failed");
                    }
                }
            }
        }

        tracing::info!(task = name, "scheduled task stopped");
    })
}

/// Queue yesterday's rollup for every active user.
async fn enqueue_daily_rollups(state: AppState) -> Result<(), AppError> {
    let date = (Utc::now() - ChronoDuration::days(1)).date_naive();
    let users: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE is_active = TRUE")
        .fetch_all(&state.pool)
        .await?;

    for user_id in &users {
        state
            .jobs
            .enqueue(Job::RollupDaily {
                user_id: *user_id,
                date,
            })
            .await?;
    }

    tracing::info!(users = users.len(), %date, "daily rollups queued");
    Ok(())
}

/// Queue conversation insights and last week's summary for every active user.
///
/// The weekly job skips weeks already summarized, so running this more than
/// once a week is harmless.
async fn enqueue_insight_jobs(state: AppState) -> Result<(), AppError> {
    let (week_start, _) = last_complete_week(Utc::now().date_naive());
    let users: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE is_active = TRUE")
        .fetch_all(&state.pool)
        .await?;

    for job in insight_jobs(&users, week_start) {
        state.jobs.enqueue(job).await?;
    }

    tracing::info!(users = users.len(), %week_start, "insight jobs queued");
    Ok(())
}

fn insight_jobs(users: &[Uuid], week_start: NaiveDate) -> Vec<Job> {
    users
        .iter()
        .flat_map(|&user_id| {
            [
                Job::WeeklyInsights {
                    user_id,
                    week_start,
                },
                Job::ConversationInsights { user_id },
            ]
        })
        .collect()
}

/// Re-queue recent emails whose analysis never landed.
async fn reprocess_unprocessed(state: AppState) -> Result<(), AppError> {
    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        r#"
        SELECT user_id, id FROM emails
        WHERE is_processed = FALSE
          AND processing_attempts < $1
          AND created_at >= NOW() - INTERVAL '24 hours'
        "#,
    )
    .bind(MAX_PROCESSING_ATTEMPTS)
    .fetch_all(&state.pool)
    .await?;

    let email_count = rows.len();
    let batches = group_by_user(rows);
    let user_count = batches.len();

    for (user_id, email_ids) in batches {
        state
            .jobs
            .enqueue(Job::AnalyzeEmails {
                user_id,
                email_ids,
                job_id: None,
            })
            .await?;
    }

    if email_count > 0 {
        tracing::info!(emails = email_count, users = user_count, "unprocessed emails re-queued");
    }
    Ok(())
}

fn group_by_user(rows: Vec<(Uuid, Uuid)>) -> BTreeMap<Uuid, Vec<Uuid>> {
    let mut grouped: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
    for (user_id, email_id) in rows {
        grouped.entry(user_id).or_default().push(email_id);
    }
    grouped
}

/// Drop old insights, finished jobs and webhook ids, and start new usage months.
async fn cleanup(state: AppState) -> Result<(), AppError> {
    let pool = &state.pool;

    let insights = sqlx::query(
        "DELETE FROM ai_insights WHERE generated_at < NOW() - make_interval(days => $1)",
    )
    .bind(state.config.insight_retention_days as i32)
    .execute(pool)
    .await?
    .rows_affected();

    let jobs = sqlx::query(
        r#"
        DELETE FROM analysis_jobs
        WHERE status IN ('completed', 'failed')
          AND created_at < NOW() - make_interval(days => $1)
        "#,
    )
    .bind(JOB_RETENTION_DAYS as i32)
    .execute(pool)
    .await?
    .rows_affected();

    let events = sqlx::query(
        "DELETE FROM stripe_events WHERE processed_at < NOW() - make_interval(days => $1)",
    )
    .bind(STRIPE_EVENT_RETENTION_DAYS as i32)
    .execute(pool)
    .await?
    .rows_affected();

    let reset = usage_service::reset_monthly_usage(pool).await?;

    tracing::info!(insights, jobs, events, usage_resets = reset, "cleanup finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_emails_per_user() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (e1, e2, e3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let grouped = group_by_user(vec![(alice, e1), (bob, e2), (alice, e3)]);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&alice], vec![e1, e3]);
        assert_eq!(grouped[&bob], vec![e2]);
    }

    #[test]
    fn empty_sweep_groups_nothing() {
        assert!(group_by_user(Vec::new()).is_empty());
    }

    #[test]
    fn every_user_gets_both_insight_jobs() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let week_start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();

        let jobs = insight_jobs(&[alice, bob], week_start);

        assert_eq!(jobs.len(), 4);
        assert_eq!(
            jobs[0],
            Job::WeeklyInsights {
                user_id: alice,
                week_start
            }
        );
        assert_eq!(jobs[3], Job::ConversationInsights { user_id: bob });
    }
}

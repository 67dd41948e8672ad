//! Background job processing.
//!
//! Handlers and the scheduler push `Job`s into a bounded mpsc queue. A single
//! dispatcher task pulls them off and runs each on its own task, holding one
//! semaphore permit per running job so at most `WORKER_CONCURRENCY` run at once.
//! Failed jobs are re-queued with exponential backoff until `JOB_MAX_RETRIES`.

pub mod analysis;
pub mod scheduler;

use chrono::NaiveDate;
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{Semaphore, mpsc, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    services::{ai_service, analytics_service},
    state::AppState,
};

/// Default capacity of the job queue.
pub const QUEUE_CAPACITY: usize = 1024;

const CONVERSATION_THREAD_DAYS: i64 = 7;
const CONVERSATION_SENDER_DAYS: i64 = 30;

/// Work the dispatcher knows how to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Analyze the unprocessed emails among `email_ids`.
    AnalyzeEmails {
        user_id: Uuid,
        email_ids: Vec<Uuid>,
        /// `analysis_jobs` row tracking progress, if any
        job_id: Option<Uuid>,
    },
    /// Recompute the `email_analytics` row of one user and day.
    RollupDaily { user_id: Uuid, date: NaiveDate },
    /// Store the weekly summary of the week starting on Monday `week_start`.
    WeeklyInsights { user_id: Uuid, week_start: NaiveDate },
    /// Refresh the thread and sender-relationship insights.
    ConversationInsights { user_id: Uuid },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::AnalyzeEmails { .. } => "analyze_emails",
            Job::RollupDaily { .. } => "rollup_daily",
            Job::WeeklyInsights { .. } => "weekly_insights",
            Job::ConversationInsights { .. } => "conversation_insights",
        }
    }

    fn tracking_id(&self) -> Option<Uuid> {
        match self {
            Job::AnalyzeEmails { job_id, .. } => *job_id,
            _ => None,
        }
    }
}

/// A queued job and the number of times it has already failed.
#[derive(Debug)]
pub struct Envelope {
    pub job: Job,
    pub attempt: u32,
}

/// Producer side of the job queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Envelope>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a job. Waits while the queue is full.
    pub async fn enqueue(&self, job: Job) -> Result<(), AppError> {
        let kind = job.kind();
        self.tx
            .send(Envelope { job, attempt: 0 })
            .await
            .map_err(|_| AppError::Internal("job queue is closed".to_string()))?;
        tracing::debug!(kind, "job enqueued");
        Ok(())
    }

    /// Put a failed job back on the queue after `delay`.
    fn retry_later(&self, envelope: Envelope, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(envelope).await.is_err() {
                tracing::warn!("job queue closed before retry");
            }
        });
    }
}

/// Backoff before retry number `attempt + 1`: `base * 2^attempt` plus up to 10% jitter.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let backoff = base.saturating_mul(2u32.saturating_pow(attempt.min(16)));
    let jitter = rand::rng().random_range(0.0..=0.1);
    backoff + backoff.mul_f64(jitter)
}

/// Start the dispatcher. It stops taking new jobs when `shutdown` flips and
/// returns once the jobs already running have finished.
pub fn spawn_dispatcher(
    state: AppState,
    mut rx: mpsc::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let concurrency = state.config.worker_concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        tracing::info!(concurrency, "job dispatcher started");

        loop {
            let envelope = tokio::select! {
                _ = shutdown.changed() => break,
                received = rx.recv() => match received {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let state = state.clone();
            tokio::spawn(async move {
                run_job(&state, envelope).await;
                drop(permit);
            });
        }

        // Every permit back means every running job is done
        let _ = permits.acquire_many(concurrency as u32).await;
        tracing::info!("job dispatcher stopped");
    })
}

async fn run_job(state: &AppState, envelope: Envelope) {
    let kind = envelope.job.kind();
    let result = match &envelope.job {
        Job::AnalyzeEmails {
            user_id,
            email_ids,
            job_id,
        } => analysis::analyze_emails(state, *user_id, email_ids, *job_id).await,
        Job::RollupDaily { user_id, date } => {
            analytics_service::upsert_daily_rollup(&state.pool, *user_id, *date).await
        }
        Job::WeeklyInsights {
            user_id,
            week_start,
        } => ai_service::weekly_summary(&state.pool, &state.ai, *user_id, *week_start)
            .await
            .map(|_| ()),
        Job::ConversationInsights { user_id } => conversation_insights(state, *user_id).await,
    };

    let Err(err) = result else {
        return;
    };

    if envelope.attempt < state.config.job_max_retries {
        let delay = retry_delay(
            Duration::from_secs(state.config.job_retry_base_secs),
            envelope.attempt,
        );
        tracing::warn!(
            kind,
            attempt = envelope.attempt + 1,
            ?delay,
            error = %err,
            "job failed, retrying"
        );
        state.jobs.retry_later(
            Envelope {
                job: envelope.job,
                attempt: envelope.attempt + 1,
            },
            delay,
        );
        return;
    }

    tracing::error!(kind, attempts = envelope.attempt + 1, error = %err, "job failed permanently");
    if let Some(job_id) = envelope.job.tracking_id() {
        if let Err(e) = analysis::mark_job_failed(&state.pool, job_id, &err.to_string()).await {
            tracing::error!(%job_id, error = %e, "could not mark job failed");
        }
    }
}

async fn conversation_insights(state: &AppState, user_id: Uuid) -> Result<(), AppError> {
    ai_service::thread_analysis(&state.pool, user_id, CONVERSATION_THREAD_DAYS).await?;
    ai_service::sender_relationships(&state.pool, user_id, CONVERSATION_SENDER_DAYS).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_with_bounded_jitter() {
        let base = Duration::from_secs(30);
        for attempt in 0..4 {
            let floor = base * 2u32.pow(attempt);
            let delay = retry_delay(base, attempt);
            assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
            assert!(
                delay <= floor.mul_f64(1.1) + Duration::from_millis(1),
                "attempt {attempt}: {delay:?} too long"
            );
        }
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let delay = retry_delay(Duration::from_secs(30), u32::MAX);
        assert!(delay >= Duration::from_secs(30 * 65_536));
    }

    #[tokio::test]
    async fn queue_delivers_in_order() {
        let (queue, mut rx) = JobQueue::new(4);
        let user_id = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

        queue
            .enqueue(Job::RollupDaily { user_id, date })
            .await
            .unwrap();
        queue
            .enqueue(Job::AnalyzeEmails {
                user_id,
                email_ids: vec![],
                job_id: None,
            })
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.job, Job::RollupDaily { user_id, date });
        assert_eq!(first.attempt, 0);
        assert_eq!(rx.recv().await.unwrap().job.kind(), "analyze_emails");
    }

    #[test]
    fn only_analysis_jobs_are_tracked() {
        let user_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();
        let week_start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();

        let analyze = Job::AnalyzeEmails {
            user_id,
            email_ids: vec![],
            job_id: Some(job_id),
        };
        assert_eq!(analyze.tracking_id(), Some(job_id));

        let weekly = Job::WeeklyInsights { user_id, week_start };
        assert_eq!(weekly.kind(), "weekly_insights");
        assert_eq!(weekly.tracking_id(), None);
        assert_eq!(Job::ConversationInsights { user_id }.tracking_id(), None);
    }

    #[tokio::test]
    async fn enqueue_fails_once_receiver_is_gone() {
        let (queue, rx) = JobQueue::new(1);
        drop(rx);

        let err = queue
            .enqueue(Job::RollupDaily {
                user_id: Uuid::new_v4(),
                date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn retries_arrive_after_the_delay() {
        let (queue, mut rx) = JobQueue::new(1);
        let job = Job::RollupDaily {
            user_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        };

        queue.retry_later(
            Envelope {
                job: job.clone(),
                attempt: 2,
            },
            Duration::from_millis(20),
        );

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.job, job);
        assert_eq!(envelope.attempt, 2);
    }
}

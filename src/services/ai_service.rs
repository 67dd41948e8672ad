//! AI service - analysis, classification and stored insights.
//!
//! Calls into `AiEngine` never fail; a broken provider degrades to the
//! heuristic analyzer. Handlers validate parameters with the checks exported
//! here before they count an API call, so a rejected request costs nothing.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::{
    ai::{
        AiEngine, EmailAnalysis, EmailContent, ExecutiveMetrics, InsightStats, TrendSummary,
        patterns::{self, ConversationFact, EngagementFact, TrendPrediction},
    },
    db::DbPool,
    error::AppError,
    models::{
        analytics::{EmailFact, SenderCount},
        email::Email,
        insight::{
            AiInsight, AnalysisJob, BatchAnalysisResponse, Classification, ClassificationError,
            ClassifyRequest, ClassifyResponse, EmailInsight, ExecutiveSummaryResponse,
            InsightJobStatus, InsightResponse, InsightSummary, InsightType,
            SenderRelationshipsResponse, SentimentAnalysisResponse, SentimentEntry,
            SentimentQuery, SmartSummary, SummaryPeriod, ThreadAnalysisResponse,
            TrendAnalysisResponse, UnsubscribeResponse, WeeklySummary,
        },
        plan::SubscriptionTier,
    },
    services::{analytics_service, email_service, ensure_range, round2},
    tasks::{Job, JobQueue},
};

pub const MAX_BATCH_EMAILS: usize = 200;
const MINUTES_PER_EMAIL: f64 = 0.5;
const SUMMARY_SAMPLE: i64 = 100;
const SENTIMENT_SAMPLE: i64 = 100;
const UNSUBSCRIBE_WINDOW_DAYS: i64 = 90;
const PREDICTION_WINDOW_DAYS: i64 = 30;

/// Store an analysis on its email and mark it processed.
pub async fn persist_analysis(
    pool: &DbPool,
    email_id: Uuid,
    analysis: &EmailAnalysis,
) -> Result<DateTime<Utc>, AppError> {
    let analyzed_at = Utc::now();

    sqlx::query(
        r#"
        UPDATE emails
        SET ai_category = $2,
            ai_priority = $3,
            ai_importance_score = $4,
            ai_sentiment = $5,
            ai_sentiment_score = $6,
            ai_summary = $7,
            ai_key_topics = $8,
            ai_action_required = $9,
            ai_suggested_action = $10,
            ai_confidence_score = $11,
            ai_analyzed_at = $12,
            is_processed = TRUE,
            processing_error = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(email_id)
    .bind(analysis.category.as_str())
    .bind(analysis.priority.as_str())
    .bind(analysis.importance_score)
    .bind(analysis.sentiment.as_str())
    .bind(analysis.sentiment_score)
    .bind(&analysis.summary)
    .bind(Json(&analysis.key_topics))
    .bind(analysis.requires_action)
    .bind(&analysis.action_type)
    .bind(analysis.confidence)
    .bind(analyzed_at)
    .execute(pool)
    .await?;

    Ok(analyzed_at)
}

pub async fn record_processing_error(
    pool: &DbPool,
    email_id: Uuid,
    error: &str,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE emails
        SET processing_error = $2,
            processing_attempts = processing_attempts + 1,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(email_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Analyze one email right away and store the result.
pub async fn analyze_single(
    pool: &DbPool,
    ai: &AiEngine,
    user_id: Uuid,
    email_id: Uuid,
) -> Result<EmailInsight, AppError> {
    let email = email_service::fetch_owned(pool, user_id, email_id).await?;
    let analysis = ai.analyze_email(&EmailContent::from_email(&email)).await;
    let analyzed_at = persist_analysis(pool, email.id, &analysis).await?;

    Ok(EmailInsight::new(email.id, analysis, analyzed_at))
}

/// Dedupe requested ids and check the batch size.
pub fn batch_email_ids(email_ids: Vec<Uuid>) -> Result<Vec<Uuid>, AppError> {
    let mut seen = HashSet::new();
    let email_ids: Vec<Uuid> = email_ids.into_iter().filter(|id| seen.insert(*id)).collect();

    if email_ids.is_empty() || email_ids.len() > MAX_BATCH_EMAILS {
        return Err(AppError::InvalidRequest(format!(
            "Between 1 and {MAX_BATCH_EMAILS} email ids are required"
        )));
    }
    Ok(email_ids)
}

/// Validate a batch request: size limits and ownership of every id.
pub async fn check_batch(
    pool: &DbPool,
    user_id: Uuid,
    email_ids: Vec<Uuid>,
) -> Result<Vec<Uuid>, AppError> {
    let email_ids = batch_email_ids(email_ids)?;

    let owned: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM emails WHERE user_id = $1 AND id = ANY($2)")
            .bind(user_id)
            .bind(&email_ids)
            .fetch_one(pool)
            .await?;
    if owned != email_ids.len() as i64 {
        return Err(AppError::InvalidRequest(
            "Some emails were not found or belong to another user".to_string(),
        ));
    }
    Ok(email_ids)
}

/// Create a batch job for ids that passed `check_batch` and queue it.
pub async fn queue_batch(
    pool: &DbPool,
    jobs: &JobQueue,
    user_id: Uuid,
    email_ids: Vec<Uuid>,
) -> Result<BatchAnalysisResponse, AppError> {
    let count = email_ids.len();
    let job_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO analysis_jobs (user_id, kind, total_emails)
        VALUES ($1, 'batch_analysis', $2)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(count as i32)
    .fetch_one(pool)
    .await?;

    if let Err(e) = jobs
        .enqueue(Job::AnalyzeEmails {
            user_id,
            email_ids,
            job_id: Some(job_id),
        })
        .await
    {
        crate::tasks::analysis::mark_job_failed(pool, job_id, "could not be queued").await?;
        return Err(e);
    }

    tracing::info!(%user_id, %job_id, count, "batch analysis queued");
    Ok(BatchAnalysisResponse {
        job_id,
        email_count: count,
        estimated_completion_minutes: count as f64 * MINUTES_PER_EMAIL,
        message: format!("Analysis started for {count} emails"),
    })
}

pub async fn job_status(
    pool: &DbPool,
    user_id: Uuid,
    job_id: Uuid,
) -> Result<InsightJobStatus, AppError> {
    sqlx::query_as::<_, AnalysisJob>("SELECT * FROM analysis_jobs WHERE id = $1 AND user_id = $2")
        .bind(job_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .map(Into::into)
        .ok_or(AppError::NotFound("Job"))
}

/// Analyzed emails received from `since`, and before `before` when given, newest first.
async fn fetch_analyzed_facts(
    pool: &DbPool,
    user_id: Uuid,
    since: DateTime<Utc>,
    before: Option<DateTime<Utc>>,
    limit: Option<i64>,
) -> Result<Vec<EmailFact>, AppError> {
    let sql = format!(
        "SELECT {} FROM emails \
         WHERE user_id = $1 AND received_date >= $2 AND is_processed = TRUE \
           AND ($3::TIMESTAMPTZ IS NULL OR received_date < $3) \
         ORDER BY received_date DESC \
         LIMIT $4",
        analytics_service::FACT_COLUMNS
    );

    let facts = sqlx::query_as::<_, EmailFact>(&sql)
        .bind(user_id)
        .bind(since)
        .bind(before)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(facts)
}

fn category_distribution(facts: &[EmailFact]) -> BTreeMap<String, i64> {
    let mut distribution = BTreeMap::new();
    for fact in facts {
        let category = fact.ai_category.as_deref().unwrap_or("uncategorized");
        *distribution.entry(category.to_string()).or_default() += 1;
    }
    distribution
}

fn average_sentiment(facts: &[EmailFact]) -> f64 {
    let scores: Vec<f64> = facts.iter().filter_map(|f| f.ai_sentiment_score).collect();
    if scores.is_empty() {
        return 0.0;
    }
    round2(scores.iter().sum::<f64>() / scores.len() as f64)
}

fn top_senders(facts: &[EmailFact], limit: usize) -> Vec<SenderCount> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for sender in facts.iter().filter_map(|f| f.sender_email.as_deref()) {
        *counts.entry(sender).or_default() += 1;
    }
    let mut senders: Vec<SenderCount> = counts
        .into_iter()
        .map(|(sender, count)| SenderCount {
            sender_email: sender.to_string(),
            count,
        })
        .collect();
    senders.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.sender_email.cmp(&b.sender_email)));
    senders.truncate(limit);
    senders
}

/// Build the aggregates handed to the insight generator.
pub fn insight_stats(facts: &[EmailFact], days: i64) -> InsightStats {
    InsightStats {
        period_days: days,
        total_emails: facts.len() as i64,
        action_required: facts.iter().filter(|f| f.ai_action_required).count() as i64,
        avg_sentiment: average_sentiment(facts),
        category_distribution: category_distribution(facts),
        top_senders: top_senders(facts, 5),
    }
}

/// Window accepted by the insight summary.
pub fn summary_days(days: i64) -> Result<i64, AppError> {
    ensure_range("days", days, 1, 30)
}

/// Window accepted by the trend analysis.
pub fn trend_days(days: i64) -> Result<i64, AppError> {
    ensure_range("days", days, 7, 90)
}

/// Summarize recent analyzed email and ask for actionable insights.
pub async fn insight_summary(
    pool: &DbPool,
    ai: &AiEngine,
    user_id: Uuid,
    days: i64,
) -> Result<InsightSummary, AppError> {
    let days = summary_days(days)?;
    let since = Utc::now() - Duration::days(days);
    let facts = fetch_analyzed_facts(pool, user_id, since, None, Some(SUMMARY_SAMPLE)).await?;
    if facts.is_empty() {
        return Err(AppError::NotFound("Analyzed emails"));
    }

    let stats = insight_stats(&facts, days);
    let actionable_insights = ai.actionable_insights(&stats).await;

    let summary = InsightSummary {
        period_days: days,
        total_emails_analyzed: stats.total_emails,
        emails_requiring_action: stats.action_required,
        average_sentiment_score: stats.avg_sentiment,
        category_distribution: stats.category_distribution,
        actionable_insights,
        generated_at: Utc::now(),
    };

    store_insight(pool, user_id, InsightType::EmailPatterns, Some(format!("{days}d")), &summary)
        .await?;
    Ok(summary)
}

/// Match a model answer against the requested categories, case-insensitively.
fn match_category<'a>(answer: &str, categories: &'a [String]) -> Option<&'a str> {
    let answer = answer.trim();
    categories
        .iter()
        .find(|c| c.eq_ignore_ascii_case(answer))
        .map(String::as_str)
}

/// Checked inputs of a classification request.
#[derive(Debug, PartialEq)]
pub struct ClassifyParams {
    /// Trimmed, non-blank category names
    pub categories: Vec<String>,
    pub days: i64,
    pub limit: i64,
}

pub fn classify_params(request: &ClassifyRequest) -> Result<ClassifyParams, AppError> {
    let categories: Vec<String> = request
        .categories
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if categories.is_empty() {
        return Err(AppError::InvalidRequest(
            "At least one category is required".to_string(),
        ));
    }

    Ok(ClassifyParams {
        categories,
        days: ensure_range("days", request.days, 1, 30)?,
        limit: ensure_range("limit", request.limit, 1, 200)?,
    })
}

/// Sort emails into user-defined categories.
///
/// `ai_category` is only overwritten when the answer is one of the requested
/// categories. Per-email storage failures are reported in `errors`.
pub async fn classify(
    pool: &DbPool,
    ai: &AiEngine,
    user_id: Uuid,
    request: ClassifyRequest,
) -> Result<ClassifyResponse, AppError> {
    let ClassifyParams {
        categories,
        days,
        limit,
    } = classify_params(&request)?;

    let emails = match request.email_ids {
        Some(ids) => {
            sqlx::query_as::<_, Email>(
                r#"
                SELECT * FROM emails
                WHERE user_id = $1 AND id = ANY($2)
                ORDER BY received_date DESC
                LIMIT $3
                "#,
            )
            .bind(user_id)
            .bind(ids)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Email>(
                r#"
                SELECT * FROM emails
                WHERE user_id = $1 AND received_date >= $2
                ORDER BY received_date DESC
                LIMIT $3
                "#,
            )
            .bind(user_id)
            .bind(Utc::now() - Duration::days(days))
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    let mut classifications = Vec::with_capacity(emails.len());
    let mut errors = Vec::new();

    for email in emails {
        let answer = ai.classify(&EmailContent::from_email(&email), &categories).await;
        let matched = match_category(&answer, &categories);

        if let Some(category) = matched {
            let stored = sqlx::query(
                "UPDATE emails SET ai_category = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(email.id)
            .bind(category)
            .execute(pool)
            .await;

            if let Err(e) = stored {
                tracing::warn!(email_id = %email.id, error = %e, "storing classification failed");
                errors.push(ClassificationError {
                    email_id: email.id,
                    error: "Classification could not be stored".to_string(),
                });
                continue;
            }
        }

        classifications.push(Classification {
            email_id: email.id,
            subject: email.subject.unwrap_or_default(),
            category: matched.map(str::to_string).unwrap_or(answer),
            applied: matched.is_some(),
        });
    }

    Ok(ClassifyResponse {
        total_classified: classifications.len(),
        classifications,
        errors,
    })
}

/// Sentiment of recent analyzed emails, optionally for matching senders only.
pub async fn sentiment_analysis(
    pool: &DbPool,
    user_id: Uuid,
    query: SentimentQuery,
) -> Result<SentimentAnalysisResponse, AppError> {
    let days = ensure_range("days", query.days, 1, 90)?;
    let sender_pattern = query
        .sender_filter
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(email_service::like_pattern);

    let emails = sqlx::query_as::<_, SentimentEntry>(
        r#"
        SELECT
            id AS email_id,
            COALESCE(sender_email, '') AS sender_email,
            COALESCE(subject, '') AS subject,
            ai_sentiment AS sentiment,
            ai_sentiment_score AS sentiment_score,
            COALESCE(ai_confidence_score, 0) AS confidence_score,
            received_date,
            COALESCE(ai_category, 'uncategorized') AS category
        FROM emails
        WHERE user_id = $1
          AND received_date >= $2
          AND ai_sentiment IS NOT NULL
          AND ai_sentiment_score IS NOT NULL
          AND ($3::TEXT IS NULL OR sender_email ILIKE $3)
        ORDER BY received_date DESC
        LIMIT $4
        "#,
    )
    .bind(user_id)
    .bind(Utc::now() - Duration::days(days))
    .bind(sender_pattern)
    .bind(SENTIMENT_SAMPLE)
    .fetch_all(pool)
    .await?;

    let mut distribution = BTreeMap::new();
    for entry in &emails {
        *distribution.entry(entry.sentiment.clone()).or_default() += 1;
    }
    let average = if emails.is_empty() {
        0.0
    } else {
        round2(emails.iter().map(|e| e.sentiment_score).sum::<f64>() / emails.len() as f64)
    };

    Ok(SentimentAnalysisResponse {
        period_days: days,
        total: emails.len(),
        average_sentiment_score: average,
        distribution,
        emails,
    })
}

/// Aggregates handed to the trend narrator.
pub fn trend_summary(facts: &[EmailFact], days: i64) -> TrendSummary {
    let mut sentiment_distribution = BTreeMap::new();
    let mut daily_volumes = BTreeMap::new();

    for fact in facts {
        if let Some(sentiment) = &fact.ai_sentiment {
            *sentiment_distribution.entry(sentiment.clone()).or_default() += 1;
        }
        let day = fact.received_date.date_naive().format("%Y-%m-%d").to_string();
        *daily_volumes.entry(day).or_default() += 1;
    }

    TrendSummary {
        period_days: days,
        data_points: facts.len() as i64,
        category_distribution: category_distribution(facts),
        sentiment_distribution,
        daily_volumes,
    }
}

pub async fn trend_analysis(
    pool: &DbPool,
    ai: &AiEngine,
    user_id: Uuid,
    days: i64,
) -> Result<TrendAnalysisResponse, AppError> {
    let days = trend_days(days)?;
    let since = Utc::now() - Duration::days(days);
    let facts = fetch_analyzed_facts(pool, user_id, since, None, None).await?;
    if facts.is_empty() {
        return Err(AppError::NotFound("Analyzed emails"));
    }

    let summary = trend_summary(&facts, days);
    let narrative = ai.trend_narrative(&summary).await;

    let response = TrendAnalysisResponse {
        analysis_period_days: days,
        data_points_analyzed: summary.data_points,
        narrative,
        generated_at: Utc::now(),
    };

    store_insight(pool, user_id, InsightType::TrendAnalysis, Some(format!("{days}d")), &response)
        .await?;
    Ok(response)
}

/// Bulk senders the user rarely opens. Paid tiers only.
pub async fn unsubscribe_recommendations(
    pool: &DbPool,
    user_id: Uuid,
    tier: SubscriptionTier,
) -> Result<UnsubscribeResponse, AppError> {
    if !tier.is_paid() {
        return Err(AppError::PlanRequired(
            "Unsubscribe recommendations require a paid plan".to_string(),
        ));
    }

    let facts = sqlx::query_as::<_, EngagementFact>(
        r#"
        SELECT sender_email, ai_category, is_read
        FROM emails
        WHERE user_id = $1
          AND received_date >= $2
          AND ai_category IN ('promotional', 'newsletter')
        "#,
    )
    .bind(user_id)
    .bind(Utc::now() - Duration::days(UNSUBSCRIBE_WINDOW_DAYS))
    .fetch_all(pool)
    .await?;

    let recommendations = patterns::unsubscribe_candidates(&facts);
    let response = UnsubscribeResponse {
        total_candidates: recommendations.len(),
        recommendations,
        generated_at: Utc::now(),
    };

    store_insight(
        pool,
        user_id,
        InsightType::Unsubscribe,
        Some(format!("{UNSUBSCRIBE_WINDOW_DAYS}d")),
        &response,
    )
    .await?;
    Ok(response)
}

/// Key metrics of a reporting period.
pub fn executive_metrics(facts: &[EmailFact], period: SummaryPeriod) -> ExecutiveMetrics {
    let total = facts.len() as i64;
    let replied = facts.iter().filter(|f| f.is_replied).count() as f64;
    let mut top_categories = analytics_service::category_counts(facts);
    top_categories.truncate(5);

    ExecutiveMetrics {
        period: period.as_str().to_string(),
        total_emails: total,
        important_emails: facts.iter().filter(|f| f.is_high_priority()).count() as i64,
        response_rate: round2(replied / total.max(1) as f64 * 100.0),
        avg_response_time_hours: analytics_service::avg_response_hours(facts),
        top_categories,
    }
}

pub fn ensure_executive_tier(tier: SubscriptionTier) -> Result<(), AppError> {
    if tier.has_executive_summary() {
        return Ok(());
    }
    Err(AppError::PlanRequired(
        "Executive summaries require a Professional or Enterprise plan".to_string(),
    ))
}

/// Executive summary for professional and enterprise users.
pub async fn executive_summary(
    pool: &DbPool,
    ai: &AiEngine,
    user_id: Uuid,
    tier: SubscriptionTier,
    period: SummaryPeriod,
) -> Result<ExecutiveSummaryResponse, AppError> {
    ensure_executive_tier(tier)?;

    let now = Utc::now();
    let facts = analytics_service::fetch_facts(
        pool,
        user_id,
        now - Duration::days(period.days()),
        analytics_service::Until::Through(now),
    )
    .await?;
    let key_metrics = executive_metrics(&facts, period);
    let narrative = ai.executive_summary(&key_metrics).await;

    let response = ExecutiveSummaryResponse {
        period: period.as_str(),
        key_metrics,
        narrative,
        generated_at: now,
    };

    store_insight(
        pool,
        user_id,
        InsightType::ExecutiveSummary,
        Some(period.as_str().to_string()),
        &response,
    )
    .await?;
    Ok(response)
}

/// Per-day counts from the first day with mail through `today`, gaps filled with zeros.
fn daily_series(rows: &[(NaiveDate, i64)], today: NaiveDate) -> Vec<i64> {
    let Some(&(first, _)) = rows.first() else {
        return Vec::new();
    };
    let counts: HashMap<NaiveDate, i64> = rows.iter().copied().collect();

    first
        .iter_days()
        .take_while(|day| *day <= today)
        .map(|day| counts.get(&day).copied().unwrap_or(0))
        .collect()
}

/// Forecast next week's volume from the last 30 days.
pub async fn predictions(pool: &DbPool, user_id: Uuid) -> Result<TrendPrediction, AppError> {
    let now = Utc::now();
    let rows: Vec<(NaiveDate, i64)> = sqlx::query_as(
        r#"
        SELECT (received_date AT TIME ZONE 'UTC')::date AS day, COUNT(*)
        FROM emails
        WHERE user_id = $1 AND received_date >= $2
        GROUP BY day
        ORDER BY day
        "#,
    )
    .bind(user_id)
    .bind(now - Duration::days(PREDICTION_WINDOW_DAYS))
    .fetch_all(pool)
    .await?;

    Ok(patterns::predict_trend(&daily_series(&rows, now.date_naive())))
}

/// Summary, key points and urgency of one email. Nothing is stored.
pub async fn smart_summary(ai: &AiEngine, email: &Email) -> SmartSummary {
    let analysis = ai.analyze_email(&EmailContent::from_email(email)).await;
    SmartSummary::new(email.id, analysis, Utc::now())
}

/// Window accepted by the thread and sender analyses.
pub fn conversation_days(days: i64) -> Result<i64, AppError> {
    ensure_range("days", days, 1, 90)
}

async fn fetch_conversation_facts(
    pool: &DbPool,
    user_id: Uuid,
    since: DateTime<Utc>,
) -> Result<Vec<ConversationFact>, AppError> {
    let facts = sqlx::query_as::<_, ConversationFact>(
        r#"
        SELECT thread_id, sender_email, received_date, is_read, is_replied,
               response_time_minutes, ai_sentiment_score, ai_importance_score
        FROM emails
        WHERE user_id = $1 AND received_date >= $2
        "#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(facts)
}

/// Conversations of the window, stored as a `thread_analysis` insight.
pub async fn thread_analysis(
    pool: &DbPool,
    user_id: Uuid,
    days: i64,
) -> Result<ThreadAnalysisResponse, AppError> {
    let days = conversation_days(days)?;
    let facts = fetch_conversation_facts(pool, user_id, Utc::now() - Duration::days(days)).await?;

    let threads = patterns::thread_summaries(&facts);
    let response = ThreadAnalysisResponse {
        period_days: days,
        total_threads: threads.len(),
        threads,
        generated_at: Utc::now(),
    };

    store_insight(pool, user_id, InsightType::ThreadAnalysis, Some(format!("{days}d")), &response)
        .await?;
    Ok(response)
}

pub async fn sender_relationships(
    pool: &DbPool,
    user_id: Uuid,
    days: i64,
) -> Result<SenderRelationshipsResponse, AppError> {
    let days = conversation_days(days)?;
    let facts = fetch_conversation_facts(pool, user_id, Utc::now() - Duration::days(days)).await?;

    let relationships = patterns::sender_relationships(&facts);
    let response = SenderRelationshipsResponse {
        period_days: days,
        total_senders: relationships.len(),
        relationships,
        generated_at: Utc::now(),
    };

    store_insight(
        pool,
        user_id,
        InsightType::SenderRelationships,
        Some(format!("{days}d")),
        &response,
    )
    .await?;
    Ok(response)
}

/// `time_period` label of a stored weekly summary.
pub fn week_label(week_start: NaiveDate) -> String {
    format!("{week_start}..{}", week_start + Duration::days(6))
}

/// Summarize the analyzed mail of the Monday-to-Sunday week starting at `week_start`.
///
/// Returns `None` when the week is already summarized or had no analyzed mail,
/// so a re-run stores nothing twice.
pub async fn weekly_summary(
    pool: &DbPool,
    ai: &AiEngine,
    user_id: Uuid,
    week_start: NaiveDate,
) -> Result<Option<WeeklySummary>, AppError> {
    let label = week_label(week_start);
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM ai_insights
            WHERE user_id = $1 AND insight_type = $2 AND time_period = $3
        )
        "#,
    )
    .bind(user_id)
    .bind(InsightType::WeeklySummary.as_str())
    .bind(&label)
    .fetch_one(pool)
    .await?;
    if exists {
        return Ok(None);
    }

    let from = week_start.and_time(NaiveTime::MIN).and_utc();
    let until = from + Duration::days(7);
    let facts = fetch_analyzed_facts(pool, user_id, from, Some(until), None).await?;
    if facts.is_empty() {
        tracing::debug!(%user_id, week = %label, "no analyzed email, weekly summary skipped");
        return Ok(None);
    }

    let stats = insight_stats(&facts, 7);
    let actionable_insights = ai.actionable_insights(&stats).await;
    let summary = WeeklySummary {
        week_start,
        week_end: week_start + Duration::days(6),
        stats,
        actionable_insights,
        generated_at: Utc::now(),
    };

    store_insight(pool, user_id, InsightType::WeeklySummary, Some(label), &summary).await?;
    Ok(Some(summary))
}

pub async fn insight_history(
    pool: &DbPool,
    user_id: Uuid,
    limit: i64,
) -> Result<Vec<InsightResponse>, AppError> {
    let limit = ensure_range("limit", limit, 1, 50)?;

    let insights = sqlx::query_as::<_, AiInsight>(
        "SELECT * FROM ai_insights WHERE user_id = $1 ORDER BY generated_at DESC LIMIT $2",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(insights.into_iter().map(Into::into).collect())
}

/// Persist a generated response as an `ai_insights` row.
pub async fn store_insight<T: Serialize>(
    pool: &DbPool,
    user_id: Uuid,
    insight_type: InsightType,
    time_period: Option<String>,
    data: &T,
) -> Result<Uuid, AppError> {
    let data = serde_json::to_value(data)
        .map_err(|e| AppError::Internal(format!("insight serialization failed: {e}")))?;

    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO ai_insights (user_id, insight_type, time_period, data)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(insight_type.as_str())
    .bind(time_period)
    .bind(data)
    .fetch_one(pool)
    .await?;

    tracing::debug!(%user_id, insight_type = insight_type.as_str(), "insight stored");
    Ok(id)
}

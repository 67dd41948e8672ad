//! Stored AI insights, analysis jobs, and the request/response types of the `/ai` API.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use uuid::Uuid;

use crate::ai::{
    ActionableInsight, EmailAnalysis, ExecutiveMetrics, ExecutiveNarrative, InsightStats,
    Priority, TrendNarrative,
    patterns::{SenderRelationship, ThreadSummary, UnsubscribeCandidate},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    EmailPatterns,
    ExecutiveSummary,
    TrendAnalysis,
    Unsubscribe,
    ThreadAnalysis,
    SenderRelationships,
    WeeklySummary,
}

impl InsightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::EmailPatterns => "email_patterns",
            InsightType::ExecutiveSummary => "executive_summary",
            InsightType::TrendAnalysis => "trend_analysis",
            InsightType::Unsubscribe => "unsubscribe",
            InsightType::ThreadAnalysis => "thread_analysis",
            InsightType::SenderRelationships => "sender_relationships",
            InsightType::WeeklySummary => "weekly_summary",
        }
    }
}

/// Stored AI output.
///
/// # Database Table
///
/// Maps to the `ai_insights` table. `data` holds the full response body that was
/// returned when the insight was generated.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AiInsight {
    pub id: Uuid,
    pub user_id: Uuid,
    pub insight_type: String,
    pub time_period: Option<String>,
    pub data: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct InsightResponse {
    pub id: Uuid,
    pub insight_type: String,
    pub time_period: Option<String>,
    pub data: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

impl From<AiInsight> for InsightResponse {
    fn from(insight: AiInsight) -> Self {
        Self {
            id: insight.id,
            insight_type: insight.insight_type,
            time_period: insight.time_period,
            data: insight.data,
            generated_at: insight.generated_at,
        }
    }
}

/// Lifecycle of an `analysis_jobs` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Background analysis job record.
///
/// # Database Table
///
/// Maps to the `analysis_jobs` table. `kind` is `batch_analysis` for user-requested
/// batches and `ingest_analysis` for jobs created by ingestion.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub status: String,
    pub total_emails: i32,
    pub processed_emails: i32,
    pub attempts: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Response of `GET /api/v1/ai/jobs/{id}`.
#[derive(Debug, Serialize)]
pub struct InsightJobStatus {
    pub job_id: Uuid,
    pub status: String,
    pub progress_percentage: i32,
    pub emails_processed: i32,
    pub total_emails: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl From<AnalysisJob> for InsightJobStatus {
    fn from(job: AnalysisJob) -> Self {
        let progress_percentage = if job.total_emails > 0 {
            (job.processed_emails.min(job.total_emails) * 100) / job.total_emails
        } else if job.status == JobStatus::Completed.as_str() {
            100
        } else {
            0
        };

        Self {
            job_id: job.id,
            status: job.status,
            progress_percentage,
            emails_processed: job.processed_emails,
            total_emails: job.total_emails,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_message: job.error_message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeSingleRequest {
    pub email_id: Uuid,
}

/// AI view of one email, returned by `POST /api/v1/ai/analyze/single`.
#[derive(Debug, Serialize)]
pub struct EmailInsight {
    pub email_id: Uuid,
    pub category: String,
    pub priority: String,
    pub sentiment: String,
    pub sentiment_score: f64,
    pub importance_score: f64,
    pub key_topics: Vec<String>,
    pub requires_action: bool,
    pub suggested_action: Option<String>,
    pub summary: String,
    pub confidence_score: f64,
    pub analysis_timestamp: DateTime<Utc>,
}

impl EmailInsight {
    pub fn new(email_id: Uuid, analysis: EmailAnalysis, analyzed_at: DateTime<Utc>) -> Self {
        Self {
            email_id,
            category: analysis.category.as_str().to_string(),
            priority: analysis.priority.as_str().to_string(),
            sentiment: analysis.sentiment.as_str().to_string(),
            sentiment_score: analysis.sentiment_score,
            importance_score: analysis.importance_score,
            key_topics: analysis.key_topics,
            requires_action: analysis.requires_action,
            suggested_action: analysis.action_type,
            summary: analysis.summary,
            confidence_score: analysis.confidence,
            analysis_timestamp: analyzed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeBatchRequest {
    pub email_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BatchAnalysisResponse {
    pub job_id: Uuid,
    pub email_count: usize,
    pub estimated_completion_minutes: f64,
    pub message: String,
}

fn default_summary_days() -> i64 {
    7
}

fn default_window_days() -> i64 {
    30
}

fn default_classify_limit() -> i64 {
    50
}

fn default_history_limit() -> i64 {
    10
}

fn default_period() -> String {
    "week".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(default = "default_summary_days")]
    pub days: i64,
}

/// Response of `GET /api/v1/ai/insights/summary`.
#[derive(Debug, Serialize)]
pub struct InsightSummary {
    pub period_days: i64,
    pub total_emails_analyzed: i64,
    pub emails_requiring_action: i64,
    pub average_sentiment_score: f64,
    pub category_distribution: BTreeMap<String, i64>,
    pub actionable_insights: Vec<ActionableInsight>,
    pub generated_at: DateTime<Utc>,
}

/// Request body for `POST /api/v1/ai/classify`.
///
/// ```json
/// {
///   "categories": ["billing", "hiring", "legal"],
///   "days": 7,
///   "limit": 50
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub email_ids: Option<Vec<Uuid>>,
    pub categories: Vec<String>,
    #[serde(default = "default_summary_days")]
    pub days: i64,
    #[serde(default = "default_classify_limit")]
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct Classification {
    pub email_id: Uuid,
    pub subject: String,
    pub category: String,
    /// Whether the answer was one of the requested categories and got stored
    pub applied: bool,
}

#[derive(Debug, Serialize)]
pub struct ClassificationError {
    pub email_id: Uuid,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub classifications: Vec<Classification>,
    pub total_classified: usize,
    pub errors: Vec<ClassificationError>,
}

#[derive(Debug, Deserialize)]
pub struct SentimentQuery {
    #[serde(default = "default_window_days")]
    pub days: i64,
    pub sender_filter: Option<String>,
}

/// One analyzed email in the sentiment report.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SentimentEntry {
    pub email_id: Uuid,
    pub sender_email: String,
    pub subject: String,
    pub sentiment: String,
    pub sentiment_score: f64,
    pub confidence_score: f64,
    pub received_date: DateTime<Utc>,
    pub category: String,
}

#[derive(Debug, Serialize)]
pub struct SentimentAnalysisResponse {
    pub period_days: i64,
    pub total: usize,
    pub average_sentiment_score: f64,
    pub distribution: BTreeMap<String, i64>,
    pub emails: Vec<SentimentEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    #[serde(default = "default_window_days")]
    pub days: i64,
}

/// Response of `GET /api/v1/ai/trends/analysis`.
#[derive(Debug, Serialize)]
pub struct TrendAnalysisResponse {
    pub analysis_period_days: i64,
    pub data_points_analyzed: i64,
    #[serde(flatten)]
    pub narrative: TrendNarrative,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UnsubscribeResponse {
    pub recommendations: Vec<UnsubscribeCandidate>,
    pub total_candidates: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutiveQuery {
    #[serde(default = "default_period")]
    pub period: String,
}

/// Reporting period of an executive summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryPeriod {
    Week,
    Month,
    Quarter,
}

impl SummaryPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryPeriod::Week => "week",
            SummaryPeriod::Month => "month",
            SummaryPeriod::Quarter => "quarter",
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            SummaryPeriod::Week => 7,
            SummaryPeriod::Month => 30,
            SummaryPeriod::Quarter => 90,
        }
    }
}

impl FromStr for SummaryPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "week" => Ok(SummaryPeriod::Week),
            "month" => Ok(SummaryPeriod::Month),
            "quarter" => Ok(SummaryPeriod::Quarter),
            other => Err(format!(
                "Invalid period '{other}', expected week, month or quarter"
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExecutiveSummaryResponse {
    pub period: &'static str,
    pub key_metrics: ExecutiveMetrics,
    #[serde(flatten)]
    pub narrative: ExecutiveNarrative,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl From<Priority> for Urgency {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Low => Urgency::Low,
            Priority::Medium => Urgency::Medium,
            Priority::High | Priority::Urgent => Urgency::High,
        }
    }
}

/// Response of `GET /api/v1/ai/emails/{id}/summary`.
#[derive(Debug, Serialize)]
pub struct SmartSummary {
    pub email_id: Uuid,
    pub summary: String,
    /// At most three
    pub key_points: Vec<String>,
    pub action_required: bool,
    pub suggested_action: Option<String>,
    pub urgency: Urgency,
    pub generated_at: DateTime<Utc>,
}

impl SmartSummary {
    pub fn new(email_id: Uuid, analysis: EmailAnalysis, generated_at: DateTime<Utc>) -> Self {
        let mut key_points = analysis.key_topics;
        key_points.truncate(3);

        Self {
            email_id,
            summary: analysis.summary,
            key_points,
            action_required: analysis.requires_action,
            suggested_action: analysis.action_type,
            urgency: analysis.priority.into(),
            generated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    #[serde(default = "default_window_days")]
    pub days: i64,
}

/// Response of `GET /api/v1/ai/threads`.
#[derive(Debug, Serialize)]
pub struct ThreadAnalysisResponse {
    pub period_days: i64,
    pub threads: Vec<ThreadSummary>,
    pub total_threads: usize,
    pub generated_at: DateTime<Utc>,
}

/// Response of `GET /api/v1/ai/senders/relationships`.
#[derive(Debug, Serialize)]
pub struct SenderRelationshipsResponse {
    pub period_days: i64,
    pub relationships: Vec<SenderRelationship>,
    pub total_senders: usize,
    pub generated_at: DateTime<Utc>,
}

/// Stored by the weekly job for the last Monday-to-Sunday week.
#[derive(Debug, Serialize)]
pub struct WeeklySummary {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    #[serde(flatten)]
    pub stats: InsightStats,
    pub actionable_insights: Vec<ActionableInsight>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: JobStatus, total: i32, processed: i32) -> AnalysisJob {
        AnalysisJob {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: "batch_analysis".into(),
            status: status.as_str().into(),
            total_emails: total,
            processed_emails: processed,
            attempts: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn progress_is_a_whole_percentage() {
        assert_eq!(InsightJobStatus::from(job(JobStatus::Processing, 3, 1)).progress_percentage, 33);
        assert_eq!(InsightJobStatus::from(job(JobStatus::Completed, 3, 3)).progress_percentage, 100);
        assert_eq!(InsightJobStatus::from(job(JobStatus::Completed, 0, 0)).progress_percentage, 100);
        assert_eq!(InsightJobStatus::from(job(JobStatus::Pending, 0, 0)).progress_percentage, 0);
    }

    #[test]
    fn periods_map_to_days() {
        assert_eq!("quarter".parse::<SummaryPeriod>().map(|p| p.days()), Ok(90));
        assert!("year".parse::<SummaryPeriod>().is_err());
    }

    #[test]
    fn classify_request_defaults() {
        let request: ClassifyRequest = serde_json::from_str(r#"{"categories":["a"]}"#).unwrap();
        assert_eq!(request.days, 7);
        assert_eq!(request.limit, 50);
        assert!(request.email_ids.is_none());
    }

    #[test]
    fn smart_summary_keeps_three_points() {
        let analysis = EmailAnalysis {
            category: crate::ai::EmailCategory::Work,
            priority: Priority::Urgent,
            sentiment: crate::ai::Sentiment::Neutral,
            sentiment_score: 0.0,
            importance_score: 0.9,
            key_topics: vec!["budget".into(), "deadline".into(), "review".into(), "q3".into()],
            requires_action: true,
            action_type: Some("reply".into()),
            summary: "Budget review due Friday".into(),
            confidence: 0.8,
        };

        let summary = SmartSummary::new(Uuid::nil(), analysis, Utc::now());
        assert_eq!(summary.key_points, vec!["budget", "deadline", "review"]);
        assert_eq!(summary.urgency, Urgency::High);
        assert_eq!(Urgency::from(Priority::Medium), Urgency::Medium);
    }
}

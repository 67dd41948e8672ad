//! AI analysis engine.
//!
//! `AiProvider` is the seam between the services and whatever produces the analysis.
//! Two providers exist:
//! - `OpenAiProvider`: chat-completions over HTTP, enabled by `OPENAI_API_KEY`
//! - `HeuristicAnalyzer`: deterministic keyword rules that need no network
//!
//! `AiEngine` owns both and never fails: when the remote provider errors the call is
//! logged and answered by the heuristic analyzer.

pub mod heuristic;
pub mod openai;
pub mod patterns;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    config::Config,
    models::{
        analytics::{CategoryCount, SenderCount},
        email::Email,
    },
};
use heuristic::HeuristicAnalyzer;
use openai::OpenAiProvider;

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("AI provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("AI provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("AI response could not be parsed: {0}")]
    Parse(String),

    #[error("invalid AI provider configuration: {0}")]
    Config(String),
}

/// The parts of an email the analyzers look at.
#[derive(Debug, Clone, Default)]
pub struct EmailContent {
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub has_attachments: bool,
}

impl EmailContent {
    pub fn from_email(email: &Email) -> Self {
        let body = email
            .body_text
            .clone()
            .filter(|b| !b.trim().is_empty())
            .or_else(|| email.snippet.clone())
            .unwrap_or_default();

        Self {
            subject: email.subject.clone().unwrap_or_default(),
            sender: email.sender_email.clone().unwrap_or_default(),
            body,
            has_attachments: email.has_attachments,
        }
    }

    /// Subject and body, lower-cased, for keyword matching.
    pub fn searchable_text(&self) -> String {
        format!("{}\n{}", self.subject, self.body).to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailCategory {
    Work,
    Personal,
    Promotional,
    Newsletter,
    Notification,
    Social,
    Support,
    Spam,
    Urgent,
    Uncategorized,
}

impl EmailCategory {
    /// Categories an analyzer may assign.
    pub const KNOWN: [EmailCategory; 9] = [
        EmailCategory::Work,
        EmailCategory::Personal,
        EmailCategory::Promotional,
        EmailCategory::Newsletter,
        EmailCategory::Notification,
        EmailCategory::Social,
        EmailCategory::Support,
        EmailCategory::Spam,
        EmailCategory::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmailCategory::Work => "work",
            EmailCategory::Personal => "personal",
            EmailCategory::Promotional => "promotional",
            EmailCategory::Newsletter => "newsletter",
            EmailCategory::Notification => "notification",
            EmailCategory::Social => "social",
            EmailCategory::Support => "support",
            EmailCategory::Spam => "spam",
            EmailCategory::Urgent => "urgent",
            EmailCategory::Uncategorized => "uncategorized",
        }
    }

    /// Map free-form model output to a category. Anything unknown is `Uncategorized`.
    pub fn parse_lenient(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        Self::KNOWN
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .unwrap_or(EmailCategory::Uncategorized)
    }

    pub fn is_bulk(&self) -> bool {
        matches!(self, EmailCategory::Promotional | EmailCategory::Newsletter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn from_importance(score: f64) -> Self {
        if score >= 0.8 {
            Priority::Urgent
        } else if score >= 0.6 {
            Priority::High
        } else if score >= 0.35 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    /// Label for a score in [-1, 1]. Scores within ±0.2 are neutral.
    pub fn from_score(score: f64) -> Self {
        if score > 0.2 {
            Sentiment::Positive
        } else if score < -0.2 {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        }
    }
}

/// Result of analyzing one email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailAnalysis {
    pub category: EmailCategory,
    pub priority: Priority,
    pub sentiment: Sentiment,
    /// -1.0 (negative) to 1.0 (positive)
    pub sentiment_score: f64,
    /// 0.0 to 1.0
    pub importance_score: f64,
    pub key_topics: Vec<String>,
    pub requires_action: bool,
    pub action_type: Option<String>,
    pub summary: String,
    /// 0.0 to 1.0
    pub confidence: f64,
}

impl EmailAnalysis {
    /// Force every score into its documented range.
    pub fn clamped(mut self) -> Self {
        self.sentiment_score = clamp_or(self.sentiment_score, -1.0, 1.0, 0.0);
        self.importance_score = clamp_or(self.importance_score, 0.0, 1.0, 0.5);
        self.confidence = clamp_or(self.confidence, 0.0, 1.0, 0.0);
        self
    }
}

pub(crate) fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionableInsight {
    #[serde(rename = "type")]
    pub insight_type: String,
    pub title: String,
    pub description: String,
    /// high, medium or low
    pub impact_level: String,
    #[serde(default)]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub estimated_time_saved: i64,
}

/// Aggregates handed to `actionable_insights`.
#[derive(Debug, Clone, Serialize)]
pub struct InsightStats {
    pub period_days: i64,
    pub total_emails: i64,
    pub action_required: i64,
    pub avg_sentiment: f64,
    pub category_distribution: BTreeMap<String, i64>,
    pub top_senders: Vec<SenderCount>,
}

/// Aggregates handed to `trend_narrative`.
#[derive(Debug, Clone, Serialize)]
pub struct TrendSummary {
    pub period_days: i64,
    pub data_points: i64,
    pub category_distribution: BTreeMap<String, i64>,
    pub sentiment_distribution: BTreeMap<String, i64>,
    /// `YYYY-MM-DD` to email count, ascending
    pub daily_volumes: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendNarrative {
    #[serde(default)]
    pub key_trends: Vec<String>,
    #[serde(default)]
    pub sentiment_trend: String,
    #[serde(default)]
    pub volume_trend: String,
    #[serde(default)]
    pub notable_patterns: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub risk_areas: Vec<String>,
    #[serde(default)]
    pub confidence_level: String,
}

/// Key metrics of an executive summary period.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutiveMetrics {
    pub period: String,
    pub total_emails: i64,
    pub important_emails: i64,
    /// Percentage of emails that received a reply
    pub response_rate: f64,
    pub avg_response_time_hours: Option<f64>,
    pub top_categories: Vec<CategoryCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveNarrative {
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Something that can analyze emails and narrate aggregates.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze_email(&self, content: &EmailContent) -> Result<EmailAnalysis, AiError>;

    /// Pick one of `categories` for the email. The answer may be outside the list.
    async fn classify(&self, content: &EmailContent, categories: &[String])
    -> Result<String, AiError>;

    async fn actionable_insights(
        &self,
        stats: &InsightStats,
    ) -> Result<Vec<ActionableInsight>, AiError>;

    async fn trend_narrative(&self, summary: &TrendSummary) -> Result<TrendNarrative, AiError>;

    async fn executive_summary(
        &self,
        metrics: &ExecutiveMetrics,
    ) -> Result<ExecutiveNarrative, AiError>;
}

/// Remote provider with a local fallback.
pub struct AiEngine {
    remote: Option<Arc<dyn AiProvider>>,
    local: HeuristicAnalyzer,
}

impl AiEngine {
    /// Build the engine from configuration. Without an OpenAI key only the
    /// heuristic analyzer is used.
    pub fn from_config(config: &Config) -> Result<Self, AiError> {
        let remote: Option<Arc<dyn AiProvider>> = match config.openai_key() {
            Some(key) => Some(Arc::new(OpenAiProvider::new(
                key,
                &config.openai_base_url,
                &config.openai_model,
            )?)),
            None => None,
        };

        match &remote {
            Some(provider) => tracing::info!(provider = provider.name(), "AI provider configured"),
            None => tracing::info!("no AI provider configured, using heuristic analyzer"),
        }

        Ok(Self {
            remote,
            local: HeuristicAnalyzer,
        })
    }

    pub fn heuristic_only() -> Self {
        Self {
            remote: None,
            local: HeuristicAnalyzer,
        }
    }

    pub fn with_provider(provider: Arc<dyn AiProvider>) -> Self {
        Self {
            remote: Some(provider),
            local: HeuristicAnalyzer,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.remote
            .as_ref()
            .map_or(self.local.name(), |remote| remote.name())
    }

    pub async fn analyze_email(&self, content: &EmailContent) -> EmailAnalysis {
        if let Some(remote) = &self.remote {
            match remote.analyze_email(content).await {
                Ok(analysis) => return analysis.clamped(),
                Err(e) => tracing::warn!(
                    provider = remote.name(),
                    error = %e,
                    "email analysis failed, falling back to heuristics"
                ),
            }
        }
        self.local.analyze(content)
    }

    pub async fn classify(&self, content: &EmailContent, categories: &[String]) -> String {
        if let Some(remote) = &self.remote {
            match remote.classify(content, categories).await {
                Ok(answer) => return answer,
                Err(e) => tracing::warn!(
                    provider = remote.name(),
                    error = %e,
                    "classification failed, falling back to heuristics"
                ),
            }
        }
        self.local.classify_into(content, categories)
    }

    pub async fn actionable_insights(&self, stats: &InsightStats) -> Vec<ActionableInsight> {
        if let Some(remote) = &self.remote {
            match remote.actionable_insights(stats).await {
                Ok(insights) if !insights.is_empty() => return insights,
                Ok(_) => tracing::warn!(provider = remote.name(), "provider returned no insights"),
                Err(e) => tracing::warn!(
                    provider = remote.name(),
                    error = %e,
                    "insight generation failed, falling back to heuristics"
                ),
            }
        }
        self.local.insights_for(stats)
    }

    pub async fn trend_narrative(&self, summary: &TrendSummary) -> TrendNarrative {
        if let Some(remote) = &self.remote {
            match remote.trend_narrative(summary).await {
                Ok(narrative) => return narrative,
                Err(e) => tracing::warn!(
                    provider = remote.name(),
                    error = %e,
                    "trend narrative failed, falling back to heuristics"
                ),
            }
        }
        self.local.narrate_trends(summary)
    }

    pub async fn executive_summary(&self, metrics: &ExecutiveMetrics) -> ExecutiveNarrative {
        if let Some(remote) = &self.remote {
            match remote.executive_summary(metrics).await {
                Ok(narrative) => return narrative,
                Err(e) => tracing::warn!(
                    provider = remote.name(),
                    error = %e,
                    "executive summary failed, falling back to heuristics"
                ),
            }
        }
        self.local.summarize_executive(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    #[async_trait]
    impl AiProvider for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        async fn analyze_email(&self, _: &EmailContent) -> Result<EmailAnalysis, AiError> {
            Err(AiError::Parse("no reply".into()))
        }

        async fn classify(&self, _: &EmailContent, _: &[String]) -> Result<String, AiError> {
            Err(AiError::Parse("no reply".into()))
        }

        async fn actionable_insights(
            &self,
            _: &InsightStats,
        ) -> Result<Vec<ActionableInsight>, AiError> {
            Err(AiError::Parse("no reply".into()))
        }

        async fn trend_narrative(&self, _: &TrendSummary) -> Result<TrendNarrative, AiError> {
            Err(AiError::Parse("no reply".into()))
        }

        async fn executive_summary(
            &self,
            _: &ExecutiveMetrics,
        ) -> Result<ExecutiveNarrative, AiError> {
            Err(AiError::Parse("no reply".into()))
        }
    }

    struct OutOfRange;

    #[async_trait]
    impl AiProvider for OutOfRange {
        fn name(&self) -> &'static str {
            "out-of-range"
        }

        async fn analyze_email(&self, _: &EmailContent) -> Result<EmailAnalysis, AiError> {
            Ok(EmailAnalysis {
                category: EmailCategory::Work,
                priority: Priority::High,
                sentiment: Sentiment::Positive,
                sentiment_score: 3.0,
                importance_score: -1.0,
                key_topics: vec![],
                requires_action: false,
                action_type: None,
                summary: String::new(),
                confidence: f64::NAN,
            })
        }

        async fn classify(&self, _: &EmailContent, _: &[String]) -> Result<String, AiError> {
            Ok("billing".into())
        }

        async fn actionable_insights(
            &self,
            _: &InsightStats,
        ) -> Result<Vec<ActionableInsight>, AiError> {
            Ok(vec![])
        }

        async fn trend_narrative(&self, _: &TrendSummary) -> Result<TrendNarrative, AiError> {
            Err(AiError::Parse("no reply".into()))
        }

        async fn executive_summary(
            &self,
            _: &ExecutiveMetrics,
        ) -> Result<ExecutiveNarrative, AiError> {
            Err(AiError::Parse("no reply".into()))
        }
    }

    fn sample() -> EmailContent {
        EmailContent {
            subject: "URGENT: contract review needed".into(),
            sender: "legal@example.com".into(),
            body: "Please review the attached contract before the deadline today.".into(),
            has_attachments: true,
        }
    }

    #[tokio::test]
    async fn failing_provider_falls_back_to_heuristics() {
        let engine = AiEngine::with_provider(Arc::new(Unreachable));
        let fallback = engine.analyze_email(&sample()).await;
        let local = HeuristicAnalyzer.analyze(&sample());
        assert_eq!(fallback, local);
    }

    #[tokio::test]
    async fn remote_scores_are_clamped() {
        let engine = AiEngine::with_provider(Arc::new(OutOfRange));
        let analysis = engine.analyze_email(&sample()).await;
        assert_eq!(analysis.sentiment_score, 1.0);
        assert_eq!(analysis.importance_score, 0.0);
        assert_eq!(analysis.confidence, 0.0);
    }

    #[tokio::test]
    async fn empty_remote_insights_use_local_rules() {
        let engine = AiEngine::with_provider(Arc::new(OutOfRange));
        let stats = InsightStats {
            period_days: 7,
            total_emails: 10,
            action_required: 4,
            avg_sentiment: 0.0,
            category_distribution: BTreeMap::new(),
            top_senders: vec![],
        };
        assert!(!engine.actionable_insights(&stats).await.is_empty());
    }

    #[test]
    fn unknown_categories_are_uncategorized() {
        assert_eq!(EmailCategory::parse_lenient(" Work "), EmailCategory::Work);
        assert_eq!(
            EmailCategory::parse_lenient("finance"),
            EmailCategory::Uncategorized
        );
    }

    #[test]
    fn priority_thresholds() {
        assert_eq!(Priority::from_importance(0.8), Priority::Urgent);
        assert_eq!(Priority::from_importance(0.6), Priority::High);
        assert_eq!(Priority::from_importance(0.35), Priority::Medium);
        assert_eq!(Priority::from_importance(0.34), Priority::Low);
    }

    #[test]
    fn sentiment_threshold_is_exclusive() {
        assert_eq!(Sentiment::from_score(0.2), Sentiment::Neutral);
        assert_eq!(Sentiment::from_score(0.21), Sentiment::Positive);
        assert_eq!(Sentiment::from_score(-0.21), Sentiment::Negative);
    }
}

//! Pattern detection that needs no model: unsubscribe candidates, volume
//! forecasts, conversation threads and sender relationships.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

const MIN_BULK_EMAILS: i64 = 5;
const MAX_OPEN_RATE: f64 = 0.1;
const MAX_CANDIDATES: usize = 10;
const MIN_TREND_DAYS: usize = 7;
const MIN_THREAD_EMAILS: usize = 2;
const MIN_RELATIONSHIP_EMAILS: usize = 3;
const MAX_REPORTED: usize = 20;

/// One bulk email as seen by the unsubscribe detector.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EngagementFact {
    pub sender_email: Option<String>,
    pub ai_category: Option<String>,
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnsubscribeCandidate {
    pub sender: String,
    pub email_count: i64,
    pub open_rate: f64,
    pub recommendation_reason: String,
    pub confidence: f64,
}

/// Senders of promotional or newsletter mail the user rarely opens.
///
/// A sender qualifies with more than 5 such emails and an open rate below 10%.
/// Results are ordered by confidence, highest first, and capped at 10.
pub fn unsubscribe_candidates(emails: &[EngagementFact]) -> Vec<UnsubscribeCandidate> {
    let mut by_sender: HashMap<&str, (i64, i64)> = HashMap::new();

    for email in emails {
        let bulk = matches!(
            email.ai_category.as_deref(),
            Some("promotional" | "newsletter")
        );
        let Some(sender) = email.sender_email.as_deref().filter(|s| !s.is_empty()) else {
            continue;
        };
        if !bulk {
            continue;
        }

        let entry = by_sender.entry(sender).or_default();
        entry.0 += 1;
        if email.is_read {
            entry.1 += 1;
        }
    }

    let mut candidates: Vec<UnsubscribeCandidate> = by_sender
        .into_iter()
        .filter_map(|(sender, (count, opened))| {
            let open_rate = opened as f64 / count as f64;
            (count > MIN_BULK_EMAILS && open_rate < MAX_OPEN_RATE).then(|| UnsubscribeCandidate {
                sender: sender.to_string(),
                email_count: count,
                open_rate,
                recommendation_reason: format!(
                    "Low engagement: {:.1}% open rate over {count} emails",
                    open_rate * 100.0
                ),
                confidence: f64::min(0.9, (1.0 - open_rate) * count as f64 / 20.0),
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.sender.cmp(&b.sender))
    });
    candidates.truncate(MAX_CANDIDATES);
    candidates
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrendPrediction {
    InsufficientData {
        days_available: usize,
        message: String,
    },
    Forecast {
        trend_direction: TrendDirection,
        trend_percentage: f64,
        predicted_next_week: i64,
        confidence: f64,
        recommendation: String,
    },
}

/// Forecast next week's volume from per-day counts, oldest first.
///
/// Compares the sum of the last 7 entries with the 7 before them. Needs at least 7 days.
pub fn predict_trend(daily_counts: &[i64]) -> TrendPrediction {
    let days = daily_counts.len();
    if days < MIN_TREND_DAYS {
        return TrendPrediction::InsufficientData {
            days_available: days,
            message: "Insufficient data for trend analysis".to_string(),
        };
    }

    let recent: i64 = daily_counts[days - 7..].iter().sum();
    let previous: i64 = daily_counts[days.saturating_sub(14)..days - 7].iter().sum();

    let direction = if recent > previous {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };
    let percentage = if previous > 0 {
        ((recent - previous) as f64 / previous as f64 * 100.0).abs()
    } else {
        0.0
    };
    let factor = match direction {
        TrendDirection::Increasing => 1.0 + percentage / 100.0,
        TrendDirection::Decreasing => 1.0 - percentage / 100.0,
    };

    TrendPrediction::Forecast {
        trend_direction: direction,
        trend_percentage: (percentage * 10.0).round() / 10.0,
        predicted_next_week: (recent as f64 * factor) as i64,
        confidence: f64::min(0.8, days as f64 / 30.0),
        recommendation: format!(
            "Email volume is {} by {percentage:.1}%",
            direction.as_str()
        ),
    }
}

/// One email as seen by the thread and sender analyses.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversationFact {
    pub thread_id: Option<String>,
    pub sender_email: Option<String>,
    pub received_date: DateTime<Utc>,
    pub is_read: bool,
    pub is_replied: bool,
    pub response_time_minutes: Option<f64>,
    pub ai_sentiment_score: Option<f64>,
    pub ai_importance_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub message_count: usize,
    pub participants: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub duration_hours: f64,
    pub replied_count: usize,
    pub avg_sentiment: Option<f64>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| round2(sum / n as f64))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Conversations with at least two emails, most recently active first, capped at 20.
pub fn thread_summaries(emails: &[ConversationFact]) -> Vec<ThreadSummary> {
    let mut threads: HashMap<&str, Vec<&ConversationFact>> = HashMap::new();
    for email in emails {
        if let Some(thread_id) = non_empty(&email.thread_id) {
            threads.entry(thread_id).or_default().push(email);
        }
    }

    let mut summaries: Vec<ThreadSummary> = threads
        .into_iter()
        .filter(|(_, messages)| messages.len() >= MIN_THREAD_EMAILS)
        .filter_map(|(thread_id, messages)| {
            let started_at = messages.iter().map(|m| m.received_date).min()?;
            let last_activity = messages.iter().map(|m| m.received_date).max()?;
            let participants: BTreeSet<&str> =
                messages.iter().filter_map(|m| non_empty(&m.sender_email)).collect();

            Some(ThreadSummary {
                thread_id: thread_id.to_string(),
                message_count: messages.len(),
                participants: participants.into_iter().map(str::to_string).collect(),
                started_at,
                last_activity,
                duration_hours: round2((last_activity - started_at).num_minutes() as f64 / 60.0),
                replied_count: messages.iter().filter(|m| m.is_replied).count(),
                avg_sentiment: mean(messages.iter().filter_map(|m| m.ai_sentiment_score)),
            })
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.thread_id.cmp(&b.thread_id))
    });
    summaries.truncate(MAX_REPORTED);
    summaries
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipStrength {
    /// The user answers at least half of this sender's mail
    Strong,
    /// Read at least half the time but rarely answered
    Regular,
    Weak,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SenderRelationship {
    pub sender: String,
    pub email_count: usize,
    pub read_rate: f64,
    pub reply_rate: f64,
    pub avg_response_time_hours: Option<f64>,
    pub avg_importance: Option<f64>,
    pub strength: RelationshipStrength,
}

/// How the user deals with each sender of at least three emails.
///
/// Ordered by volume, then sender, and capped at 20.
pub fn sender_relationships(emails: &[ConversationFact]) -> Vec<SenderRelationship> {
    let mut by_sender: HashMap<&str, Vec<&ConversationFact>> = HashMap::new();
    for email in emails {
        if let Some(sender) = non_empty(&email.sender_email) {
            by_sender.entry(sender).or_default().push(email);
        }
    }

    let mut relationships: Vec<SenderRelationship> = by_sender
        .into_iter()
        .filter(|(_, messages)| messages.len() >= MIN_RELATIONSHIP_EMAILS)
        .map(|(sender, messages)| {
            let count = messages.len() as f64;
            let read_rate = messages.iter().filter(|m| m.is_read).count() as f64 / count;
            let reply_rate = messages.iter().filter(|m| m.is_replied).count() as f64 / count;
            let strength = if reply_rate >= 0.5 {
                RelationshipStrength::Strong
            } else if read_rate >= 0.5 {
                RelationshipStrength::Regular
            } else {
                RelationshipStrength::Weak
            };

            SenderRelationship {
                sender: sender.to_string(),
                email_count: messages.len(),
                read_rate: round2(read_rate),
                reply_rate: round2(reply_rate),
                avg_response_time_hours: mean(
                    messages
                        .iter()
                        .filter_map(|m| m.response_time_minutes)
                        .map(|minutes| minutes / 60.0),
                ),
                avg_importance: mean(messages.iter().filter_map(|m| m.ai_importance_score)),
                strength,
            }
        })
        .collect();

    relationships.sort_by(|a, b| {
        b.email_count
            .cmp(&a.email_count)
            .then_with(|| a.sender.cmp(&b.sender))
    });
    relationships.truncate(MAX_REPORTED);
    relationships
}

/// Monday and Sunday of the last week that has fully ended before `today`.
pub fn last_complete_week(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let this_monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    (this_monday - Duration::days(7), this_monday - Duration::days(1))
}

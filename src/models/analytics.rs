//! Analytics query parameters, response types and the row projections they are computed from.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::{collections::BTreeMap, str::FromStr};
use uuid::Uuid;

/// Bucket width of the time-series endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Week,
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            other => Err(format!(
                "Invalid granularity '{other}', expected hour, day or week"
            )),
        }
    }
}

fn default_days() -> i64 {
    30
}

fn default_sender_limit() -> i64 {
    20
}

fn default_granularity() -> String {
    "day".to_string()
}

/// `?days=N` window shared by most analytics endpoints.
#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

#[derive(Debug, Deserialize)]
pub struct SendersQuery {
    #[serde(default = "default_days")]
    pub days: i64,
    #[serde(default = "default_sender_limit")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct TimeSeriesQuery {
    #[serde(default = "default_days")]
    pub days: i64,
    #[serde(default = "default_granularity")]
    pub granularity: String,
}

/// The columns of `emails` the analytics computations need.
///
/// Every analytics endpoint and the daily rollup fetch this projection for the
/// requested window and aggregate it in Rust.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailFact {
    pub received_date: DateTime<Utc>,
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
    pub is_read: bool,
    pub is_replied: bool,
    pub is_archived: bool,
    pub is_important: bool,
    pub ai_category: Option<String>,
    pub ai_priority: Option<String>,
    pub ai_sentiment: Option<String>,
    pub ai_sentiment_score: Option<f64>,
    pub ai_importance_score: Option<f64>,
    pub ai_action_required: bool,
    pub response_time_minutes: Option<f64>,
}

impl EmailFact {
    /// Flagged by the user or prioritised high/urgent by the analyzer.
    pub fn is_high_priority(&self) -> bool {
        self.is_important || matches!(self.ai_priority.as_deref(), Some("high" | "urgent"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

/// Response of `GET /api/v1/analytics/overview`.
#[derive(Debug, Serialize)]
pub struct AnalyticsOverview {
    pub total_emails: i64,
    pub unread_emails: i64,
    pub important_emails: i64,
    pub avg_response_time_hours: Option<f64>,
    pub top_categories: Vec<CategoryCount>,
    pub date_range_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SenderStats {
    pub sender_email: String,
    pub sender_name: String,
    pub total_emails: i64,
    pub unread_emails: i64,
    pub avg_sentiment: Option<f64>,
    pub last_email_date: DateTime<Utc>,
    pub primary_category: String,
}

#[derive(Debug, Serialize)]
pub struct SendersResponse {
    pub senders: Vec<SenderStats>,
    pub date_range_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub timestamp: String,
    pub total_emails: i64,
    pub unread_emails: i64,
    pub high_priority_emails: i64,
}

/// Response of `GET /api/v1/analytics/trends/time-series`.
#[derive(Debug, Serialize)]
pub struct TimeSeriesResponse {
    pub granularity: Granularity,
    pub data_points: Vec<TimeSeriesPoint>,
    /// Change of the last 7 buckets against the 7 before them, in percent
    pub volume_trend_percentage: f64,
    pub date_range_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTrend {
    pub category: String,
    pub email_count: i64,
    pub percentage: f64,
    pub trend_percentage: f64,
    pub avg_sentiment: Option<f64>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct CategoryTrendsResponse {
    pub categories: Vec<CategoryTrend>,
    pub date_range_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseTimeStats {
    pub average_minutes: f64,
    pub median_minutes: f64,
    pub min_minutes: f64,
    pub max_minutes: f64,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourCount {
    pub hour: u32,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekdayCount {
    pub day: &'static str,
    pub count: i64,
}

/// Response of `GET /api/v1/analytics/productivity`.
#[derive(Debug, Serialize)]
pub struct ProductivityResponse {
    /// `None` when no email in the window has a recorded response time
    pub response_time: Option<ResponseTimeStats>,
    pub hourly_distribution: Vec<HourCount>,
    pub weekday_distribution: Vec<WeekdayCount>,
    pub date_range_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderCount {
    pub sender_email: String,
    pub count: i64,
}

/// Aggregates for one user and one day, before they are persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DailyRollup {
    pub total_received: i64,
    pub unread_count: i64,
    pub emails_read: i64,
    pub emails_replied: i64,
    pub emails_archived: i64,
    pub category_counts: BTreeMap<String, i64>,
    pub peak_hour: Option<i32>,
    pub response_time_avg_minutes: Option<f64>,
    pub top_senders: Vec<SenderCount>,
    pub sentiment_positive: i64,
    pub sentiment_neutral: i64,
    pub sentiment_negative: i64,
    pub avg_importance_score: Option<f64>,
    pub total_action_items: i64,
}

/// Daily rollup row.
///
/// # Database Table
///
/// Maps to the `email_analytics` table, written by the `RollupDaily` background job.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailyAnalytics {
    pub id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub total_received: i64,
    pub unread_count: i64,
    pub emails_read: i64,
    pub emails_replied: i64,
    pub emails_archived: i64,
    pub category_counts: Json<BTreeMap<String, i64>>,
    pub peak_hour: Option<i32>,
    pub response_time_avg_minutes: Option<f64>,
    pub top_senders: Json<Vec<SenderCount>>,
    pub sentiment_positive: i64,
    pub sentiment_neutral: i64,
    pub sentiment_negative: i64,
    pub avg_importance_score: Option<f64>,
    pub total_action_items: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DailyAnalyticsResponse {
    pub date: NaiveDate,
    pub total_received: i64,
    pub unread_count: i64,
    pub emails_read: i64,
    pub emails_replied: i64,
    pub emails_archived: i64,
    pub category_counts: BTreeMap<String, i64>,
    pub peak_hour: Option<i32>,
    pub response_time_avg_minutes: Option<f64>,
    pub top_senders: Vec<SenderCount>,
    pub sentiment_positive: i64,
    pub sentiment_neutral: i64,
    pub sentiment_negative: i64,
    pub avg_importance_score: Option<f64>,
    pub total_action_items: i64,
}

impl From<DailyAnalytics> for DailyAnalyticsResponse {
    fn from(row: DailyAnalytics) -> Self {
        Self {
            date: row.date,
            total_received: row.total_received,
            unread_count: row.unread_count,
            emails_read: row.emails_read,
            emails_replied: row.emails_replied,
            emails_archived: row.emails_archived,
            category_counts: row.category_counts.0,
            peak_hour: row.peak_hour,
            response_time_avg_minutes: row.response_time_avg_minutes,
            top_senders: row.top_senders.0,
            sentiment_positive: row.sentiment_positive,
            sentiment_neutral: row.sentiment_neutral,
            sentiment_negative: row.sentiment_negative,
            avg_importance_score: row.avg_importance_score,
            total_action_items: row.total_action_items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granularity_parsing() {
        assert_eq!("hour".parse::<Granularity>(), Ok(Granularity::Hour));
        assert_eq!("week".parse::<Granularity>(), Ok(Granularity::Week));
        assert!("month".parse::<Granularity>().is_err());
    }
}

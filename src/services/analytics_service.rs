//! Analytics service - windowed aggregates over a user's emails.
//!
//! Every endpoint fetches the `EmailFact` projection for its window with one
//! query and aggregates it with the pure functions below, which are what the
//! unit tests exercise.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::analytics::{
        AnalyticsOverview, CategoryCount, CategoryTrend, CategoryTrendsResponse, DailyAnalytics,
        DailyAnalyticsResponse, DailyRollup, EmailFact, Granularity, HourCount,
        ProductivityResponse, ResponseTimeStats, SenderCount, SenderStats, SendersQuery,
        SendersResponse, TimeSeriesPoint, TimeSeriesQuery, TimeSeriesResponse, WeekdayCount,
    },
    services::round2,
};

pub const MAX_WINDOW_DAYS: i64 = 365;
const TOP_CATEGORIES: usize = 5;
const TOP_SENDERS: usize = 5;
const TREND_BUCKETS: usize = 7;
const UNCATEGORIZED: &str = "uncategorized";

pub(crate) const FACT_COLUMNS: &str = "received_date, sender_email, sender_name, is_read, \
     is_replied, is_archived, is_important, ai_category, ai_priority, ai_sentiment, \
     ai_sentiment_score, ai_importance_score, ai_action_required, response_time_minutes";

/// Validate `days` and return the window start.
pub fn window_start(days: i64, now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
    let days = super::ensure_range("days", days, 1, MAX_WINDOW_DAYS)?;
    Ok(now - Duration::days(days))
}

/// Upper edge of a fact window.
///
/// Report windows end `Through` now. Adjacent windows (the previous period of
/// a trend, one day of a rollup) end `Before` the next one starts so no email
/// is counted twice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Until {
    Before(DateTime<Utc>),
    Through(DateTime<Utc>),
}

impl Until {
    fn at(self) -> DateTime<Utc> {
        match self {
            Until::Before(at) | Until::Through(at) => at,
        }
    }

    fn operator(self) -> &'static str {
        match self {
            Until::Before(_) => "<",
            Until::Through(_) => "<=",
        }
    }
}

fn facts_sql(until: Until) -> String {
    format!(
        "SELECT {FACT_COLUMNS} FROM emails \
         WHERE user_id = $1 AND received_date >= $2 AND received_date {} $3 \
         ORDER BY received_date",
        until.operator()
    )
}

/// Facts of the user's emails received from `from` up to `until`.
pub async fn fetch_facts(
    pool: &DbPool,
    user_id: Uuid,
    from: DateTime<Utc>,
    until: Until,
) -> Result<Vec<EmailFact>, AppError> {
    let facts = sqlx::query_as::<_, EmailFact>(&facts_sql(until))
        .bind(user_id)
        .bind(from)
        .bind(until.at())
        .fetch_all(pool)
        .await?;
    Ok(facts)
}

/// Facts of the last `days` days, after validating the window.
async fn window_facts(
    pool: &DbPool,
    user_id: Uuid,
    days: i64,
) -> Result<(Vec<EmailFact>, DateTime<Utc>), AppError> {
    let now = Utc::now();
    let from = window_start(days, now)?;
    Ok((fetch_facts(pool, user_id, from, Until::Through(now)).await?, from))
}

pub async fn overview_report(
    pool: &DbPool,
    user_id: Uuid,
    days: i64,
) -> Result<AnalyticsOverview, AppError> {
    let (facts, _) = window_facts(pool, user_id, days).await?;
    Ok(overview(&facts, days))
}

pub async fn senders_report(
    pool: &DbPool,
    user_id: Uuid,
    query: SendersQuery,
) -> Result<SendersResponse, AppError> {
    let limit = super::ensure_range("limit", query.limit, 1, 100)?;
    let (facts, _) = window_facts(pool, user_id, query.days).await?;

    Ok(SendersResponse {
        senders: sender_stats(&facts, limit as usize),
        date_range_days: query.days,
    })
}

pub async fn time_series_report(
    pool: &DbPool,
    user_id: Uuid,
    query: TimeSeriesQuery,
) -> Result<TimeSeriesResponse, AppError> {
    let granularity: Granularity = query.granularity.parse().map_err(AppError::InvalidRequest)?;
    let (facts, _) = window_facts(pool, user_id, query.days).await?;
    let (data_points, volume_trend_percentage) = time_series(&facts, granularity);

    Ok(TimeSeriesResponse {
        granularity,
        data_points,
        volume_trend_percentage,
        date_range_days: query.days,
    })
}

/// Current window against the equally long window before it.
pub async fn category_trends_report(
    pool: &DbPool,
    user_id: Uuid,
    days: i64,
) -> Result<CategoryTrendsResponse, AppError> {
    let (current, from) = window_facts(pool, user_id, days).await?;
    let previous = fetch_facts(pool, user_id, from - Duration::days(days), Until::Before(from)).await?;

    Ok(CategoryTrendsResponse {
        categories: category_trends(&current, &previous),
        date_range_days: days,
    })
}

pub async fn productivity_report(
    pool: &DbPool,
    user_id: Uuid,
    days: i64,
) -> Result<ProductivityResponse, AppError> {
    let (facts, _) = window_facts(pool, user_id, days).await?;

    Ok(ProductivityResponse {
        response_time: response_time_stats(&facts),
        hourly_distribution: hourly_distribution(&facts),
        weekday_distribution: weekday_distribution(&facts),
        date_range_days: days,
    })
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Counts per non-null category, largest first, ties by name.
pub fn category_counts(facts: &[EmailFact]) -> Vec<CategoryCount> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for category in facts.iter().filter_map(|f| f.ai_category.as_deref()) {
        *counts.entry(category).or_default() += 1;
    }

    let mut sorted: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(category, count)| CategoryCount {
            category: category.to_string(),
            count,
        })
        .collect();
    sorted.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
    sorted
}

/// Average response time in hours, rounded to two places.
pub fn avg_response_hours(facts: &[EmailFact]) -> Option<f64> {
    mean(facts.iter().filter_map(|f| f.response_time_minutes)).map(|m| round2(m / 60.0))
}

pub fn overview(facts: &[EmailFact], days: i64) -> AnalyticsOverview {
    let mut top_categories = category_counts(facts);
    top_categories.truncate(TOP_CATEGORIES);

    AnalyticsOverview {
        total_emails: facts.len() as i64,
        unread_emails: facts.iter().filter(|f| !f.is_read).count() as i64,
        important_emails: facts.iter().filter(|f| f.is_high_priority()).count() as i64,
        avg_response_time_hours: avg_response_hours(facts),
        top_categories,
        date_range_days: days,
    }
}

/// Per-sender statistics, busiest senders first.
pub fn sender_stats(facts: &[EmailFact], limit: usize) -> Vec<SenderStats> {
    struct Acc<'a> {
        name: Option<&'a str>,
        total: i64,
        unread: i64,
        sentiments: Vec<f64>,
        last: DateTime<Utc>,
        categories: BTreeMap<&'a str, i64>,
    }

    let mut by_sender: HashMap<&str, Acc> = HashMap::new();
    for fact in facts {
        let Some(sender) = fact.sender_email.as_deref().filter(|s| !s.is_empty()) else {
            continue;
        };
        let acc = by_sender.entry(sender).or_insert_with(|| Acc {
            name: None,
            total: 0,
            unread: 0,
            sentiments: Vec::new(),
            last: fact.received_date,
            categories: BTreeMap::new(),
        });

        acc.total += 1;
        if !fact.is_read {
            acc.unread += 1;
        }
        if let Some(score) = fact.ai_sentiment_score {
            acc.sentiments.push(score);
        }
        if fact.received_date >= acc.last {
            acc.last = fact.received_date;
            if let Some(name) = fact.sender_name.as_deref().filter(|n| !n.trim().is_empty()) {
                acc.name = Some(name);
            }
        } else if acc.name.is_none() {
            acc.name = fact.sender_name.as_deref().filter(|n| !n.trim().is_empty());
        }
        if let Some(category) = fact.ai_category.as_deref() {
            *acc.categories.entry(category).or_default() += 1;
        }
    }

    let mut stats: Vec<SenderStats> = by_sender
        .into_iter()
        .map(|(sender, acc)| SenderStats {
            sender_email: sender.to_string(),
            sender_name: acc.name.unwrap_or(sender).to_string(),
            total_emails: acc.total,
            unread_emails: acc.unread,
            avg_sentiment: mean(acc.sentiments.into_iter()).map(round2),
            last_email_date: acc.last,
            primary_category: most_frequent(&acc.categories)
                .unwrap_or(UNCATEGORIZED)
                .to_string(),
        })
        .collect();

    stats.sort_by(|a, b| {
        b.total_emails
            .cmp(&a.total_emails)
            .then_with(|| a.sender_email.cmp(&b.sender_email))
    });
    stats.truncate(limit);
    stats
}

/// Key with the highest count. The map is ordered, so ties go to the smallest key.
fn most_frequent<'a>(counts: &BTreeMap<&'a str, i64>) -> Option<&'a str> {
    let mut best: Option<(&str, i64)> = None;
    for (&key, &count) in counts {
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((key, count));
        }
    }
    best.map(|(key, _)| key)
}

fn bucket_start(at: DateTime<Utc>, granularity: Granularity) -> NaiveDateTime {
    let date = at.date_naive();
    let day = match granularity {
        Granularity::Week => date - Duration::days(i64::from(at.weekday().num_days_from_monday())),
        Granularity::Hour | Granularity::Day => date,
    };
    let hour = match granularity {
        Granularity::Hour => at.hour(),
        Granularity::Day | Granularity::Week => 0,
    };
    day.and_hms_opt(hour, 0, 0).unwrap_or_default()
}

fn bucket_label(start: NaiveDateTime, granularity: Granularity) -> String {
    match granularity {
        Granularity::Hour => start.format("%Y-%m-%d %H:00").to_string(),
        Granularity::Day | Granularity::Week => start.format("%Y-%m-%d").to_string(),
    }
}

/// Bucketed volumes in ascending order plus the week-over-week volume trend.
pub fn time_series(facts: &[EmailFact], granularity: Granularity) -> (Vec<TimeSeriesPoint>, f64) {
    let mut buckets: BTreeMap<NaiveDateTime, TimeSeriesPoint> = BTreeMap::new();

    for fact in facts {
        let start = bucket_start(fact.received_date, granularity);
        let point = buckets.entry(start).or_insert_with(|| TimeSeriesPoint {
            timestamp: bucket_label(start, granularity),
            total_emails: 0,
            unread_emails: 0,
            high_priority_emails: 0,
        });
        point.total_emails += 1;
        if !fact.is_read {
            point.unread_emails += 1;
        }
        if fact.is_high_priority() {
            point.high_priority_emails += 1;
        }
    }

    let points: Vec<TimeSeriesPoint> = buckets.into_values().collect();
    let totals: Vec<i64> = points.iter().map(|p| p.total_emails).collect();
    let trend = volume_trend(&totals);
    (points, trend)
}

/// Percent change of the last 7 buckets against the 7 before them.
fn volume_trend(totals: &[i64]) -> f64 {
    if totals.len() < TREND_BUCKETS * 2 {
        return 0.0;
    }
    let recent: i64 = totals[totals.len() - TREND_BUCKETS..].iter().sum();
    let previous: i64 = totals[totals.len() - TREND_BUCKETS * 2..totals.len() - TREND_BUCKETS]
        .iter()
        .sum();
    if previous <= 0 {
        return 0.0;
    }
    round2((recent - previous) as f64 / previous as f64 * 100.0)
}

/// Category breakdown of `current` compared with the preceding window.
pub fn category_trends(current: &[EmailFact], previous: &[EmailFact]) -> Vec<CategoryTrend> {
    let previous_counts: HashMap<String, i64> = category_counts(previous)
        .into_iter()
        .map(|c| (c.category, c.count))
        .collect();
    let categorized = current.iter().filter(|f| f.ai_category.is_some()).count() as f64;

    let mut trends: Vec<CategoryTrend> = category_counts(current)
        .into_iter()
        .map(|CategoryCount { category, count }| {
            let name = category.as_str();
            let in_category = || {
                current
                    .iter()
                    .filter(move |f| f.ai_category.as_deref() == Some(name))
            };
            let before = previous_counts.get(&category).copied().unwrap_or(0);
            let trend_percentage = if before > 0 {
                round2((count - before) as f64 / before as f64 * 100.0)
            } else {
                0.0
            };

            CategoryTrend {
                email_count: count,
                percentage: round2(count as f64 / categorized * 100.0),
                trend_percentage,
                avg_sentiment: mean(in_category().filter_map(|f| f.ai_sentiment_score)).map(round2),
                unread_count: in_category().filter(|f| !f.is_read).count() as i64,
                category,
            }
        })
        .collect();

    trends.sort_by(|a, b| {
        b.email_count
            .cmp(&a.email_count)
            .then_with(|| a.category.cmp(&b.category))
    });
    trends
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub fn response_time_stats(facts: &[EmailFact]) -> Option<ResponseTimeStats> {
    let mut minutes: Vec<f64> = facts.iter().filter_map(|f| f.response_time_minutes).collect();
    if minutes.is_empty() {
        return None;
    }
    minutes.sort_by(f64::total_cmp);

    Some(ResponseTimeStats {
        average_minutes: round2(minutes.iter().sum::<f64>() / minutes.len() as f64),
        median_minutes: round2(median(&minutes)),
        min_minutes: round2(minutes[0]),
        max_minutes: round2(minutes[minutes.len() - 1]),
        count: minutes.len() as i64,
    })
}

/// Emails per hour of day, non-empty hours only.
pub fn hourly_distribution(facts: &[EmailFact]) -> Vec<HourCount> {
    let mut hours = [0i64; 24];
    for fact in facts {
        hours[fact.received_date.hour() as usize] += 1;
    }
    (0u32..)
        .zip(hours)
        .filter(|(_, count)| *count > 0)
        .map(|(hour, count)| HourCount { hour, count })
        .collect()
}

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Emails per weekday, Sunday first, non-empty days only.
pub fn weekday_distribution(facts: &[EmailFact]) -> Vec<WeekdayCount> {
    let mut days = [0i64; 7];
    for fact in facts {
        days[fact.received_date.weekday().num_days_from_sunday() as usize] += 1;
    }
    WEEKDAYS
        .into_iter()
        .zip(days)
        .filter(|(_, count)| *count > 0)
        .map(|(day, count)| WeekdayCount { day, count })
        .collect()
}

/// Aggregate one day of facts into a rollup row.
pub fn compute_rollup(facts: &[EmailFact]) -> DailyRollup {
    let mut rollup = DailyRollup {
        total_received: facts.len() as i64,
        ..DailyRollup::default()
    };

    let mut hours = [0i64; 24];
    let mut senders: HashMap<&str, i64> = HashMap::new();

    for fact in facts {
        if fact.is_read {
            rollup.emails_read += 1;
        } else {
            rollup.unread_count += 1;
        }
        if fact.is_replied {
            rollup.emails_replied += 1;
        }
        if fact.is_archived {
            rollup.emails_archived += 1;
        }
        if fact.ai_action_required {
            rollup.total_action_items += 1;
        }
        if let Some(category) = &fact.ai_category {
            *rollup.category_counts.entry(category.clone()).or_default() += 1;
        }
        match fact.ai_sentiment.as_deref() {
            Some("positive") => rollup.sentiment_positive += 1,
            Some("negative") => rollup.sentiment_negative += 1,
            Some(_) => rollup.sentiment_neutral += 1,
            None => {}
        }
        if let Some(sender) = fact.sender_email.as_deref().filter(|s| !s.is_empty()) {
            *senders.entry(sender).or_default() += 1;
        }
        hours[fact.received_date.hour() as usize] += 1;
    }

    rollup.peak_hour = (0i32..)
        .zip(hours)
        .filter(|(_, count)| *count > 0)
        .fold(None, |best: Option<(i32, i64)>, (hour, count)| match best {
            Some((_, top)) if top >= count => best,
            _ => Some((hour, count)),
        })
        .map(|(hour, _)| hour);
    rollup.response_time_avg_minutes =
        mean(facts.iter().filter_map(|f| f.response_time_minutes)).map(round2);
    rollup.avg_importance_score =
        mean(facts.iter().filter_map(|f| f.ai_importance_score)).map(round2);

    let mut top: Vec<SenderCount> = senders
        .into_iter()
        .map(|(sender, count)| SenderCount {
            sender_email: sender.to_string(),
            count,
        })
        .collect();
    top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.sender_email.cmp(&b.sender_email)));
    top.truncate(TOP_SENDERS);
    rollup.top_senders = top;

    rollup
}

/// Recompute and store the rollup of `user_id` for `date` (UTC).
pub async fn upsert_daily_rollup(
    pool: &DbPool,
    user_id: Uuid,
    date: NaiveDate,
) -> Result<(), AppError> {
    let start = date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
    let facts = fetch_facts(pool, user_id, start, Until::Before(start + Duration::days(1))).await?;
    let rollup = compute_rollup(&facts);

    sqlx::query(
        r#"
        INSERT INTO email_analytics (
            user_id, date, total_received, unread_count, emails_read, emails_replied,
            emails_archived, category_counts, peak_hour, response_time_avg_minutes,
            top_senders, sentiment_positive, sentiment_neutral, sentiment_negative,
            avg_importance_score, total_action_items
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (user_id, date) DO UPDATE SET
            total_received = EXCLUDED.total_received,
            unread_count = EXCLUDED.unread_count,
            emails_read = EXCLUDED.emails_read,
            emails_replied = EXCLUDED.emails_replied,
            emails_archived = EXCLUDED.emails_archived,
            category_counts = EXCLUDED.category_counts,
            peak_hour = EXCLUDED.peak_hour,
            response_time_avg_minutes = EXCLUDED.response_time_avg_minutes,
            top_senders = EXCLUDED.top_senders,
            sentiment_positive = EXCLUDED.sentiment_positive,
            sentiment_neutral = EXCLUDED.sentiment_neutral,
            sentiment_negative = EXCLUDED.sentiment_negative,
            avg_importance_score = EXCLUDED.avg_importance_score,
            total_action_items = EXCLUDED.total_action_items,
            updated_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(date)
    .bind(rollup.total_received)
    .bind(rollup.unread_count)
    .bind(rollup.emails_read)
    .bind(rollup.emails_replied)
    .bind(rollup.emails_archived)
    .bind(Json(&rollup.category_counts))
    .bind(rollup.peak_hour)
    .bind(rollup.response_time_avg_minutes)
    .bind(Json(&rollup.top_senders))
    .bind(rollup.sentiment_positive)
    .bind(rollup.sentiment_neutral)
    .bind(rollup.sentiment_negative)
    .bind(rollup.avg_importance_score)
    .bind(rollup.total_action_items)
    .execute(pool)
    .await?;

    tracing::debug!(%user_id, %date, emails = rollup.total_received, "daily rollup stored");
    Ok(())
}

/// Stored rollups of the last `days` days, newest first.
pub async fn daily_rollups(
    pool: &DbPool,
    user_id: Uuid,
    days: i64,
) -> Result<Vec<DailyAnalyticsResponse>, AppError> {
    let since = window_start(days, Utc::now())?.date_naive();

    let rows = sqlx::query_as::<_, DailyAnalytics>(
        "SELECT * FROM email_analytics WHERE user_id = $1 AND date >= $2 ORDER BY date DESC",
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

#[cfg(test)]
pub(crate) fn fact(received: DateTime<Utc>) -> EmailFact {
    EmailFact {
        received_date: received,
        sender_email: None,
        sender_name: None,
        is_read: false,
        is_replied: false,
        is_archived: false,
        is_important: false,
        ai_category: None,
        ai_priority: None,
        ai_sentiment: None,
        ai_sentiment_score: None,
        ai_importance_score: None,
        ai_action_required: false,
        response_time_minutes: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn report_windows_include_now() {
        let now = Utc::now();
        assert!(facts_sql(Until::Through(now)).contains("received_date <= $3"));
        assert!(facts_sql(Until::Before(now)).contains("received_date < $3"));
        assert_eq!(Until::Through(now).at(), now);
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn categorized(category: &str, received: DateTime<Utc>) -> EmailFact {
        EmailFact {
            ai_category: Some(category.to_string()),
            ..fact(received)
        }
    }

    #[test]
    fn window_rejects_out_of_range_days() {
        let now = Utc::now();
        assert_eq!(window_start(30, now).unwrap(), now - Duration::days(30));
        assert!(window_start(0, now).is_err());
        assert!(window_start(366, now).is_err());
    }

    #[test]
    fn overview_counts_and_ranks() {
        let day = at(2025, 3, 3, 9);
        let mut facts = vec![
            categorized("work", day),
            categorized("work", day),
            categorized("promotional", day),
            fact(day),
        ];
        facts[0].is_read = true;
        facts[1].ai_priority = Some("urgent".into());
        facts[2].is_important = true;
        facts[0].response_time_minutes = Some(30.0);
        facts[1].response_time_minutes = Some(60.0);

        let overview = overview(&facts, 30);

        assert_eq!(overview.total_emails, 4);
        assert_eq!(overview.unread_emails, 3);
        assert_eq!(overview.important_emails, 2);
        assert_eq!(overview.avg_response_time_hours, Some(0.75));
        assert_eq!(
            overview.top_categories,
            vec![
                CategoryCount { category: "work".into(), count: 2 },
                CategoryCount { category: "promotional".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn overview_of_nothing() {
        let overview = overview(&[], 7);
        assert_eq!(overview.total_emails, 0);
        assert_eq!(overview.avg_response_time_hours, None);
        assert!(overview.top_categories.is_empty());
    }

    #[test]
    fn sender_stats_group_and_sort() {
        let mut facts = Vec::new();
        for (sender, category, day) in [
            ("b@x.com", Some("work"), 1),
            ("b@x.com", Some("social"), 2),
            ("a@x.com", Some("work"), 3),
            ("a@x.com", None, 4),
            ("c@x.com", None, 5),
        ] {
            facts.push(EmailFact {
                sender_email: Some(sender.into()),
                ai_category: category.map(str::to_string),
                ai_sentiment_score: Some(0.5),
                ..fact(at(2025, 3, day, 12))
            });
        }
        facts[1].sender_name = Some("Bee".into());

        let stats = sender_stats(&facts, 20);

        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].sender_email, "a@x.com");
        assert_eq!(stats[0].sender_name, "a@x.com");
        assert_eq!(stats[0].primary_category, "work");
        assert_eq!(stats[0].last_email_date, at(2025, 3, 4, 12));
        assert_eq!(stats[1].sender_email, "b@x.com");
        assert_eq!(stats[1].sender_name, "Bee");
        // social and work tie, the smaller name wins
        assert_eq!(stats[1].primary_category, "social");
        assert_eq!(stats[1].avg_sentiment, Some(0.5));
        assert_eq!(stats[2].primary_category, "uncategorized");

        assert_eq!(sender_stats(&facts, 1).len(), 1);
    }

    #[test]
    fn hourly_buckets_are_labelled() {
        let facts = vec![
            fact(at(2025, 3, 3, 9)),
            EmailFact {
                is_read: true,
                ..fact(at(2025, 3, 3, 9))
            },
            EmailFact {
                is_important: true,
                ..fact(at(2025, 3, 3, 14))
            },
        ];

        let (points, trend) = time_series(&facts, Granularity::Hour);

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, "2025-03-03 09:00");
        assert_eq!(points[0].total_emails, 2);
        assert_eq!(points[0].unread_emails, 1);
        assert_eq!(points[1].high_priority_emails, 1);
        assert_eq!(trend, 0.0);
    }

    #[test]
    fn weekly_buckets_start_on_monday() {
        // 2025-03-05 is a Wednesday, 2025-03-09 a Sunday
        let facts = vec![fact(at(2025, 3, 5, 10)), fact(at(2025, 3, 9, 23))];
        let (points, _) = time_series(&facts, Granularity::Week);

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp, "2025-03-03");
        assert_eq!(points[0].total_emails, 2);
    }

    #[test]
    fn volume_trend_needs_two_weeks() {
        assert_eq!(volume_trend(&[5; 13]), 0.0);

        let mut totals = vec![1; 7];
        totals.extend([2; 7]);
        assert_eq!(volume_trend(&totals), 100.0);

        let mut totals = vec![0; 7];
        totals.extend([3; 7]);
        assert_eq!(volume_trend(&totals), 0.0);
    }

    #[test]
    fn category_trends_compare_windows() {
        let now = at(2025, 3, 10, 8);
        let mut current = vec![
            categorized("work", now),
            categorized("work", now),
            categorized("work", now),
            categorized("social", now),
            fact(now),
        ];
        current[0].is_read = true;
        current[0].ai_sentiment_score = Some(0.4);
        current[1].ai_sentiment_score = Some(-0.1);
        let previous = vec![categorized("work", now), categorized("work", now)];

        let trends = category_trends(&current, &previous);

        assert_eq!(trends.len(), 2);
        assert_eq!(trends[0].category, "work");
        assert_eq!(trends[0].email_count, 3);
        assert_eq!(trends[0].percentage, 75.0);
        assert_eq!(trends[0].trend_percentage, 50.0);
        assert_eq!(trends[0].avg_sentiment, Some(0.15));
        assert_eq!(trends[0].unread_count, 2);
        assert_eq!(trends[1].category, "social");
        assert_eq!(trends[1].trend_percentage, 0.0);
        assert_eq!(trends[1].avg_sentiment, None);
    }

    #[test]
    fn response_stats_use_median() {
        let day = at(2025, 3, 3, 9);
        let facts: Vec<EmailFact> = [10.0, 40.0, 20.0, 30.0]
            .into_iter()
            .map(|m| EmailFact {
                response_time_minutes: Some(m),
                ..fact(day)
            })
            .chain([fact(day)])
            .collect();

        let stats = response_time_stats(&facts).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.average_minutes, 25.0);
        assert_eq!(stats.median_minutes, 25.0);
        assert_eq!(stats.min_minutes, 10.0);
        assert_eq!(stats.max_minutes, 40.0);

        assert!(response_time_stats(&[fact(day)]).is_none());
    }

    #[test]
    fn distributions_skip_empty_buckets() {
        // 2025-03-02 is a Sunday, 2025-03-04 a Tuesday
        let facts = vec![
            fact(at(2025, 3, 2, 8)),
            fact(at(2025, 3, 4, 8)),
            fact(at(2025, 3, 4, 17)),
        ];

        assert_eq!(
            hourly_distribution(&facts),
            vec![HourCount { hour: 8, count: 2 }, HourCount { hour: 17, count: 1 }]
        );
        assert_eq!(
            weekday_distribution(&facts),
            vec![
                WeekdayCount { day: "Sunday", count: 1 },
                WeekdayCount { day: "Tuesday", count: 2 },
            ]
        );
    }

    #[test]
    fn rollup_summarizes_a_day() {
        let mut facts = vec![
            EmailFact {
                sender_email: Some("boss@x.com".into()),
                ai_category: Some("work".into()),
                ai_sentiment: Some("positive".into()),
                ai_importance_score: Some(0.8),
                ai_action_required: true,
                is_read: true,
                is_replied: true,
                response_time_minutes: Some(12.0),
                ..fact(at(2025, 3, 3, 9))
            },
            EmailFact {
                sender_email: Some("boss@x.com".into()),
                ai_sentiment: Some("neutral".into()),
                ai_importance_score: Some(0.4),
                ..fact(at(2025, 3, 3, 9))
            },
            EmailFact {
                sender_email: Some("news@x.com".into()),
                ai_category: Some("newsletter".into()),
                ai_sentiment: Some("negative".into()),
                is_archived: true,
                ..fact(at(2025, 3, 3, 15))
            },
        ];
        facts.push(fact(at(2025, 3, 3, 15)));

        let rollup = compute_rollup(&facts);

        assert_eq!(rollup.total_received, 4);
        assert_eq!(rollup.emails_read, 1);
        assert_eq!(rollup.unread_count, 3);
        assert_eq!(rollup.emails_replied, 1);
        assert_eq!(rollup.emails_archived, 1);
        assert_eq!(rollup.total_action_items, 1);
        assert_eq!(rollup.category_counts.get("work"), Some(&1));
        // 9h and 15h tie, the earlier hour wins
        assert_eq!(rollup.peak_hour, Some(9));
        assert_eq!(rollup.response_time_avg_minutes, Some(12.0));
        assert_eq!(rollup.avg_importance_score, Some(0.6));
        assert_eq!(
            (rollup.sentiment_positive, rollup.sentiment_neutral, rollup.sentiment_negative),
            (1, 1, 1)
        );
        assert_eq!(rollup.top_senders[0].sender_email, "boss@x.com");
        assert_eq!(rollup.top_senders[0].count, 2);
    }

    #[test]
    fn empty_day_rolls_up_to_zeroes() {
        let rollup = compute_rollup(&[]);
        assert_eq!(rollup, DailyRollup::default());
    }
}

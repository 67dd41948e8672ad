//! Analytics HTTP handlers.
//!
//! All endpoints take `?days=N` (1..=365, default 30) and report on emails
//! received in the last N days.

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::analytics::{
        AnalyticsOverview, CategoryTrendsResponse, DailyAnalyticsResponse, DaysQuery,
        ProductivityResponse, SendersQuery, SendersResponse, TimeSeriesQuery, TimeSeriesResponse,
    },
    services::analytics_service,
};
use axum::{
    Extension, Json,
    extract::{Query, State},
};

/// Totals, unread and important counts, average response time and top categories.
///
/// # Endpoint
///
/// `GET /api/v1/analytics/overview?days=30`
///
/// # Response
///
/// ```json
/// {
///   "total_emails": 412,
///   "unread_emails": 37,
///   "important_emails": 21,
///   "avg_response_time_hours": 3.25,
///   "top_categories": [{"category": "work", "count": 190}],
///   "date_range_days": 30
/// }
/// ```
pub async fn overview(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<AnalyticsOverview>, AppError> {
    Ok(Json(
        analytics_service::overview_report(&pool, auth.user_id, query.days).await?,
    ))
}

/// `GET /api/v1/analytics/senders?days=30&limit=20`
pub async fn senders(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SendersQuery>,
) -> Result<Json<SendersResponse>, AppError> {
    Ok(Json(
        analytics_service::senders_report(&pool, auth.user_id, query).await?,
    ))
}

/// Email volume bucketed by hour, day or ISO week.
///
/// # Endpoint
///
/// `GET /api/v1/analytics/trends/time-series?days=30&granularity=day`
///
/// # Response
///
/// - **Success (200 OK)**: Ascending data points and the week-over-week volume trend
/// - **Error (400)**: Unknown granularity or `days` out of range
pub async fn time_series(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<TimeSeriesQuery>,
) -> Result<Json<TimeSeriesResponse>, AppError> {
    Ok(Json(
        analytics_service::time_series_report(&pool, auth.user_id, query).await?,
    ))
}

/// `GET /api/v1/analytics/trends/categories?days=30`
pub async fn category_trends(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<CategoryTrendsResponse>, AppError> {
    Ok(Json(
        analytics_service::category_trends_report(&pool, auth.user_id, query.days).await?,
    ))
}

/// `GET /api/v1/analytics/productivity?days=30`
pub async fn productivity(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<ProductivityResponse>, AppError> {
    Ok(Json(
        analytics_service::productivity_report(&pool, auth.user_id, query.days).await?,
    ))
}

/// Stored daily rollups, newest first.
pub async fn daily(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<Vec<DailyAnalyticsResponse>>, AppError> {
    Ok(Json(
        analytics_service::daily_rollups(&pool, auth.user_id, query.days).await?,
    ))
}

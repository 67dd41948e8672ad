//! Tier quotas and the monthly API-call counter.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        plan::{SubscriptionTier, TierLimits},
        subscription::UsageResponse,
        user::User,
    },
};

/// Fail with 429 if storing `incoming` more emails would exceed the user's email limit.
pub fn check_email_quota(user: &User, incoming: i64) -> Result<(), AppError> {
    let limit = user.tier().limits().emails;
    if TierLimits::allows(limit, user.emails_processed, incoming) {
        return Ok(());
    }

    Err(AppError::LimitExceeded(format!(
        "Email limit of {} reached for the {} plan",
        limit.unwrap_or_default(),
        user.tier()
    )))
}

/// Add `count` stored emails to the user's total, failing with 429 if that
/// would pass the tier's email limit.
///
/// Runs on the caller's connection so it commits or rolls back with the
/// inserts it accounts for. The row lock taken by the update serializes
/// concurrent ingests of the same user.
pub async fn consume_email_quota(
    conn: &mut PgConnection,
    user_id: Uuid,
    tier: SubscriptionTier,
    count: i64,
) -> Result<i64, AppError> {
    let limit = tier.limits().emails;

    let total = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE users
        SET emails_processed = emails_processed + $2,
            updated_at = NOW()
        WHERE id = $1
          AND ($3::BIGINT IS NULL OR emails_processed + $2 <= $3)
        RETURNING emails_processed
        "#,
    )
    .bind(user_id)
    .bind(count)
    .bind(limit)
    .fetch_optional(conn)
    .await?;

    total.ok_or_else(|| {
        tracing::info!(%user_id, tier = %tier, count, "email limit reached");
        AppError::LimitExceeded(format!(
            "Email limit of {} reached for the {tier} plan",
            limit.unwrap_or_default()
        ))
    })
}

/// Count one AI/API call against the monthly quota.
///
/// The increment and the limit check are one statement, so concurrent requests
/// cannot push the counter past the limit. Nothing is incremented when the
/// quota is already used up.
pub async fn record_api_call(
    pool: &DbPool,
    user_id: Uuid,
    tier: SubscriptionTier,
) -> Result<i64, AppError> {
    let limit = tier.limits().api_calls;

    let used = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE users
        SET api_calls_this_month = api_calls_this_month + 1,
            updated_at = NOW()
        WHERE id = $1
          AND ($2::BIGINT IS NULL OR api_calls_this_month < $2)
        RETURNING api_calls_this_month
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_optional(pool)
    .await?;

    used.ok_or_else(|| {
        tracing::info!(%user_id, tier = %tier, "monthly API limit reached");
        AppError::LimitExceeded(format!(
            "Monthly API call limit of {} reached for the {tier} plan",
            limit.unwrap_or_default()
        ))
    })
}

/// Zero the API counters of users whose usage period started before this month.
pub async fn reset_monthly_usage(pool: &DbPool) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET api_calls_this_month = 0,
            usage_period_start = date_trunc('month', NOW()),
            updated_at = NOW()
        WHERE usage_period_start < date_trunc('month', NOW())
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub fn usage_response(user: &User) -> UsageResponse {
    let tier = user.tier();
    let limits = tier.limits();

    UsageResponse {
        tier,
        emails_processed: user.emails_processed,
        email_limit: limits.emails,
        api_calls_this_month: user.api_calls_this_month,
        api_call_limit: limits.api_calls,
        usage_period_start: user.usage_period_start,
    }
}

#[cfg(test)]
pub(crate) fn test_user(tier: SubscriptionTier) -> User {
    use chrono::Utc;

    User {
        id: Uuid::new_v4(),
        email: "user@example.com".to_string(),
        hashed_password: String::new(),
        full_name: Some("Test User".to_string()),
        is_active: true,
        is_verified: false,
        subscription_tier: tier.as_str().to_string(),
        stripe_customer_id: None,
        emails_processed: 0,
        api_calls_this_month: 0,
        usage_period_start: Utc::now(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_quota_blocks_overflow() {
        let mut user = test_user(SubscriptionTier::FreeTrial);
        user.emails_processed = 995;

        assert!(check_email_quota(&user, 5).is_ok());
        let err = check_email_quota(&user, 6).unwrap_err();
        assert!(matches!(err, AppError::LimitExceeded(msg) if msg.contains("1000")));
    }

    #[test]
    fn enterprise_has_no_email_quota() {
        let mut user = test_user(SubscriptionTier::Enterprise);
        user.emails_processed = 50_000_000;
        assert!(check_email_quota(&user, 500).is_ok());
    }

    #[test]
    fn usage_reports_tier_limits() {
        let mut user = test_user(SubscriptionTier::Starter);
        user.api_calls_this_month = 12;

        let usage = usage_response(&user);
        assert_eq!(usage.tier, SubscriptionTier::Starter);
        assert_eq!(usage.email_limit, Some(10_000));
        assert_eq!(usage.api_call_limit, Some(1_000));
        assert_eq!(usage.api_calls_this_month, 12);

        let usage = usage_response(&test_user(SubscriptionTier::Enterprise));
        assert_eq!(usage.email_limit, None);
        assert_eq!(usage.api_call_limit, None);
    }
}

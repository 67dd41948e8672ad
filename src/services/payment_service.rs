//! Payment service - subscriptions, invoices, payment methods and Stripe webhooks.
//!
//! All gateway calls go through `PaymentGateway`; this module owns the local
//! `subscriptions` rows and the user's tier.

use chrono::Utc;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    billing::{
        GatewaySubscription, PaymentGateway,
        stripe::{
            self, InvoiceEventObject, StripeEvent, SubscriptionEventObject,
            WEBHOOK_TOLERANCE_SECS,
        },
    },
    config::Config,
    db::DbPool,
    error::AppError,
    models::{
        plan::{BillingCycle, Plan, SubscriptionTier, find_plan},
        email::MessageResponse,
        subscription::{
            AddPaymentMethodRequest, AddPaymentMethodResponse, BillingAddressRequest,
            BillingHistoryResponse, ChangePlanRequest, CreateSubscriptionRequest,
            CreateSubscriptionResponse, CurrentSubscriptionResponse, PaymentMethodsResponse,
            Subscription, SubscriptionActionResponse, SubscriptionStatus, WebhookAck,
        },
        user::User,
    },
    services::{ensure_range, usage_service},
};

pub async fn find_subscription(
    pool: &DbPool,
    user_id: Uuid,
) -> Result<Option<Subscription>, AppError> {
    let subscription =
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(subscription)
}

pub async fn current_subscription(
    pool: &DbPool,
    user: &User,
) -> Result<CurrentSubscriptionResponse, AppError> {
    let subscription = find_subscription(pool, user.id).await?;
    let plan = user.tier();

    let status = subscription
        .as_ref()
        .map_or_else(|| "inactive".to_string(), |s| s.status.clone());

    Ok(CurrentSubscriptionResponse {
        subscription: subscription.map(Into::into),
        plan,
        plan_details: find_plan(plan),
        status,
        usage: usage_service::usage_response(user),
    })
}

/// Resolve a purchasable plan from its id.
fn parse_plan(plan_type: &str) -> Result<Plan, AppError> {
    plan_type
        .parse::<SubscriptionTier>()
        .ok()
        .and_then(find_plan)
        .ok_or_else(|| AppError::InvalidRequest(format!("Invalid plan type '{plan_type}'")))
}

fn parse_cycle(raw: &str) -> Result<BillingCycle, AppError> {
    raw.parse().map_err(AppError::InvalidRequest)
}

/// Stripe price configured for a tier.
fn price_id_for(config: &Config, tier: SubscriptionTier) -> Result<&str, AppError> {
    let price_id = match tier {
        SubscriptionTier::Starter => config.stripe_starter_price_id.as_deref(),
        SubscriptionTier::Professional => config.stripe_professional_price_id.as_deref(),
        SubscriptionTier::Enterprise => config.stripe_enterprise_price_id.as_deref(),
        SubscriptionTier::FreeTrial => None,
    };

    price_id.filter(|id| !id.trim().is_empty()).ok_or_else(|| {
        AppError::InvalidRequest(format!("No price is configured for the {tier} plan"))
    })
}

fn status_of(gateway: &GatewaySubscription) -> Option<SubscriptionStatus> {
    gateway.status.parse().ok()
}

async fn set_user_tier(
    conn: &mut PgConnection,
    user_id: Uuid,
    tier: SubscriptionTier,
) -> Result<(), AppError> {
    sqlx::query("UPDATE users SET subscription_tier = $2, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(tier.as_str())
        .execute(conn)
        .await?;
    Ok(())
}

/// The user's Stripe customer, created and stored on first use.
async fn ensure_customer(
    pool: &DbPool,
    gateway: &dyn PaymentGateway,
    user: &User,
) -> Result<String, AppError> {
    if let Some(id) = &user.stripe_customer_id {
        return Ok(id.clone());
    }

    let id = gateway
        .create_customer(user.id, &user.email, user.full_name.as_deref())
        .await?;
    sqlx::query("UPDATE users SET stripe_customer_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(user.id)
        .bind(&id)
        .execute(pool)
        .await?;

    tracing::info!(user_id = %user.id, "billing customer created");
    Ok(id)
}

/// Subscribe the user to a paid plan.
///
/// # Flow
///
/// 1. Validate plan, cycle and configured price
/// 2. Reject when a live subscription exists
/// 3. Create the Stripe customer on first purchase
/// 4. Attach the payment method and create the subscription
/// 5. Store the subscription; upgrade the tier if Stripe already reports it paid
pub async fn create_subscription(
    pool: &DbPool,
    gateway: &dyn PaymentGateway,
    config: &Config,
    user: &User,
    request: CreateSubscriptionRequest,
) -> Result<CreateSubscriptionResponse, AppError> {
    let plan = parse_plan(&request.plan_type)?;
    let cycle = parse_cycle(&request.billing_cycle)?;
    let price_id = price_id_for(config, plan.id)?;

    if request.payment_method_id.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "payment_method_id is required".to_string(),
        ));
    }

    if let Some(existing) = find_subscription(pool, user.id).await?
        && existing.status().is_live()
    {
        return Err(AppError::Conflict(
            "User already has an active subscription".to_string(),
        ));
    }

    let customer_id = ensure_customer(pool, gateway, user).await?;

    gateway
        .attach_payment_method(&customer_id, &request.payment_method_id)
        .await?;
    let remote = gateway
        .create_subscription(&customer_id, price_id, user.id, plan.id.as_str())
        .await?;

    let mut tx = pool.begin().await?;

    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (
            user_id, stripe_subscription_id, stripe_customer_id, stripe_price_id,
            status, tier, billing_cycle, amount_cents, currency,
            current_period_start, current_period_end, cancel_at_period_end
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'usd', $9, $10, $11)
        ON CONFLICT (user_id) DO UPDATE SET
            stripe_subscription_id = EXCLUDED.stripe_subscription_id,
            stripe_customer_id = EXCLUDED.stripe_customer_id,
            stripe_price_id = EXCLUDED.stripe_price_id,
            status = EXCLUDED.status,
            tier = EXCLUDED.tier,
            billing_cycle = EXCLUDED.billing_cycle,
            amount_cents = EXCLUDED.amount_cents,
            currency = EXCLUDED.currency,
            current_period_start = EXCLUDED.current_period_start,
            current_period_end = EXCLUDED.current_period_end,
            cancel_at_period_end = EXCLUDED.cancel_at_period_end,
            canceled_at = NULL,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(&remote.id)
    .bind(&remote.customer_id)
    .bind(remote.price_id.as_deref().unwrap_or(price_id))
    .bind(&remote.status)
    .bind(plan.id.as_str())
    .bind(cycle.as_str())
    .bind(plan.price_cents(cycle))
    .bind(remote.current_period_start)
    .bind(remote.current_period_end)
    .bind(remote.cancel_at_period_end)
    .fetch_one(&mut *tx)
    .await?;

    let paid = status_of(&remote).is_some_and(|s| s.grants_access());
    if paid {
        set_user_tier(&mut tx, user.id, plan.id).await?;
    }

    tx.commit().await?;

    tracing::info!(
        user_id = %user.id,
        tier = %plan.id,
        status = %remote.status,
        "subscription created"
    );

    let message = if paid {
        format!("Subscribed to the {} plan", plan.name)
    } else {
        "Subscription created, waiting for payment confirmation".to_string()
    };

    Ok(CreateSubscriptionResponse {
        subscription: subscription.into(),
        client_secret: remote.client_secret,
        message,
    })
}

/// Copy the gateway's view of a subscription onto the local row.
async fn sync_from_gateway(
    conn: &mut PgConnection,
    local_id: Uuid,
    remote: &GatewaySubscription,
) -> Result<Subscription, AppError> {
    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET status = $2,
            current_period_start = COALESCE($3, current_period_start),
            current_period_end = COALESCE($4, current_period_end),
            cancel_at_period_end = $5,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(local_id)
    .bind(&remote.status)
    .bind(remote.current_period_start)
    .bind(remote.current_period_end)
    .bind(remote.cancel_at_period_end)
    .fetch_one(conn)
    .await?;
    Ok(subscription)
}

/// The user's subscription if it currently grants paid access.
async fn active_subscription(pool: &DbPool, user_id: Uuid) -> Result<(Subscription, String), AppError> {
    find_subscription(pool, user_id)
        .await?
        .filter(|s| s.status().grants_access())
        .and_then(|s| s.stripe_subscription_id.clone().map(|id| (s, id)))
        .ok_or(AppError::NotFound("Active subscription"))
}

/// Move an active subscription to another plan, prorated by Stripe.
pub async fn change_plan(
    pool: &DbPool,
    gateway: &dyn PaymentGateway,
    config: &Config,
    user_id: Uuid,
    request: ChangePlanRequest,
) -> Result<SubscriptionActionResponse, AppError> {
    let plan = parse_plan(&request.plan_type)?;
    let (current, stripe_id) = active_subscription(pool, user_id).await?;
    let cycle = parse_cycle(request.billing_cycle.as_deref().unwrap_or(&current.billing_cycle))?;
    let price_id = price_id_for(config, plan.id)?;

    let remote = gateway.change_price(&stripe_id, price_id).await?;

    let mut tx = pool.begin().await?;
    sync_from_gateway(&mut tx, current.id, &remote).await?;

    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET tier = $2,
            stripe_price_id = $3,
            billing_cycle = $4,
            amount_cents = $5,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(current.id)
    .bind(plan.id.as_str())
    .bind(price_id)
    .bind(cycle.as_str())
    .bind(plan.price_cents(cycle))
    .fetch_one(&mut *tx)
    .await?;

    set_user_tier(&mut tx, user_id, plan.id).await?;
    tx.commit().await?;

    tracing::info!(%user_id, from = %current.tier(), to = %plan.id, "plan changed");

    Ok(SubscriptionActionResponse {
        subscription: subscription.into(),
        message: format!("Plan changed to {}", plan.name),
    })
}

/// Cancel at the end of the current period. Access continues until then.
pub async fn cancel(
    pool: &DbPool,
    gateway: &dyn PaymentGateway,
    user_id: Uuid,
) -> Result<SubscriptionActionResponse, AppError> {
    let (current, stripe_id) = active_subscription(pool, user_id).await?;

    let remote = gateway.set_cancel_at_period_end(&stripe_id, true).await?;
    let mut conn = pool.acquire().await?;
    let subscription = sync_from_gateway(&mut conn, current.id, &remote).await?;

    tracing::info!(%user_id, "subscription set to cancel at period end");

    let message = match subscription.current_period_end {
        Some(end) => format!("Subscription will cancel on {}", end.format("%Y-%m-%d")),
        None => "Subscription will cancel at the end of the billing period".to_string(),
    };
    Ok(SubscriptionActionResponse {
        subscription: subscription.into(),
        message,
    })
}

/// Undo a pending cancellation.
pub async fn reactivate(
    pool: &DbPool,
    gateway: &dyn PaymentGateway,
    user_id: Uuid,
) -> Result<SubscriptionActionResponse, AppError> {
    let (current, stripe_id) = find_subscription(pool, user_id)
        .await?
        .filter(|s| s.cancel_at_period_end && s.status().is_live())
        .and_then(|s| s.stripe_subscription_id.clone().map(|id| (s, id)))
        .ok_or(AppError::NotFound("Subscription pending cancellation"))?;

    let remote = gateway.set_cancel_at_period_end(&stripe_id, false).await?;
    let mut conn = pool.acquire().await?;
    let subscription = sync_from_gateway(&mut conn, current.id, &remote).await?;

    tracing::info!(%user_id, "subscription reactivated");

    Ok(SubscriptionActionResponse {
        subscription: subscription.into(),
        message: "Subscription reactivated".to_string(),
    })
}

pub fn history_limit(limit: i64) -> Result<u32, AppError> {
    ensure_range("limit", limit, 1, 100).map(|l| l as u32)
}

/// Past invoices, newest first. Users who never paid have none.
pub async fn billing_history(
    gateway: &dyn PaymentGateway,
    user: &User,
    limit: i64,
) -> Result<BillingHistoryResponse, AppError> {
    let limit = history_limit(limit)?;
    let Some(customer_id) = &user.stripe_customer_id else {
        return Ok(BillingHistoryResponse {
            invoices: Vec::new(),
        });
    };

    let invoices = gateway.list_invoices(customer_id, limit).await?;
    Ok(BillingHistoryResponse {
        invoices: invoices.into_iter().map(Into::into).collect(),
    })
}

pub async fn payment_methods(
    gateway: &dyn PaymentGateway,
    user: &User,
) -> Result<PaymentMethodsResponse, AppError> {
    let Some(customer_id) = &user.stripe_customer_id else {
        return Ok(PaymentMethodsResponse {
            payment_methods: Vec::new(),
        });
    };

    let cards = gateway.list_cards(customer_id).await?;
    Ok(PaymentMethodsResponse {
        payment_methods: cards.into_iter().map(Into::into).collect(),
    })
}

/// Attach a card to the user's customer, creating the customer if needed.
pub async fn add_payment_method(
    pool: &DbPool,
    gateway: &dyn PaymentGateway,
    user: &User,
    request: AddPaymentMethodRequest,
) -> Result<AddPaymentMethodResponse, AppError> {
    let payment_method_id = request.payment_method_id.trim();
    if payment_method_id.is_empty() {
        return Err(AppError::InvalidRequest(
            "payment_method_id is required".to_string(),
        ));
    }

    let customer_id = ensure_customer(pool, gateway, user).await?;
    let card = gateway
        .add_card(&customer_id, payment_method_id, request.set_default)
        .await?;

    tracing::info!(user_id = %user.id, default = request.set_default, "payment method added");

    Ok(AddPaymentMethodResponse {
        payment_method: card.into(),
        message: "Payment method added".to_string(),
    })
}

/// Detach one of the user's own cards.
///
/// The id must be among the customer's cards; other ids are 404 so a user
/// cannot detach someone else's method.
pub async fn remove_payment_method(
    gateway: &dyn PaymentGateway,
    user: &User,
    payment_method_id: &str,
) -> Result<(), AppError> {
    let customer_id = user
        .stripe_customer_id
        .as_deref()
        .ok_or(AppError::NotFound("Payment method"))?;

    let owned = gateway
        .list_cards(customer_id)
        .await?
        .iter()
        .any(|card| card.id == payment_method_id);
    if !owned {
        return Err(AppError::NotFound("Payment method"));
    }

    gateway.detach_payment_method(payment_method_id).await?;
    tracing::info!(user_id = %user.id, "payment method removed");
    Ok(())
}

pub async fn update_billing_address(
    gateway: &dyn PaymentGateway,
    user: &User,
    request: BillingAddressRequest,
) -> Result<MessageResponse, AppError> {
    let address = request.into_address().map_err(AppError::InvalidRequest)?;
    let customer_id = user
        .stripe_customer_id
        .as_deref()
        .ok_or(AppError::NotFound("Billing customer"))?;

    gateway.update_customer_address(customer_id, &address).await?;
    tracing::info!(user_id = %user.id, "billing address updated");

    Ok(MessageResponse {
        message: "Billing address updated".to_string(),
    })
}

/// Verify, deduplicate and apply a Stripe webhook event.
///
/// The event id is recorded in `stripe_events` in the same transaction as its
/// effects, so a redelivered event is acknowledged without being applied twice.
pub async fn handle_webhook(
    pool: &DbPool,
    config: &Config,
    payload: &[u8],
    signature: Option<&str>,
) -> Result<WebhookAck, AppError> {
    let secret = config
        .stripe_webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::InvalidRequest("Webhook secret is not configured".to_string()))?;
    let signature = signature.ok_or(AppError::InvalidSignature)?;

    stripe::verify_webhook_signature(
        payload,
        signature,
        secret,
        Utc::now().timestamp(),
        WEBHOOK_TOLERANCE_SECS,
    )?;

    let event: StripeEvent = serde_json::from_slice(payload)
        .map_err(|e| AppError::InvalidRequest(format!("Malformed webhook payload: {e}")))?;

    let mut tx = pool.begin().await?;

    let fresh = sqlx::query(
        "INSERT INTO stripe_events (id, event_type) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
    )
    .bind(&event.id)
    .bind(&event.event_type)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    if !fresh {
        tracing::debug!(event_id = %event.id, "duplicate webhook event ignored");
        return Ok(WebhookAck { received: true });
    }

    match webhook_effect(&event)? {
        WebhookEffect::SyncSubscription(object) => subscription_updated(&mut tx, &object).await?,
        WebhookEffect::EndSubscription(id) => subscription_deleted(&mut tx, &id).await?,
        WebhookEffect::PaymentSucceeded(id) => payment_succeeded(&mut tx, &id).await?,
        WebhookEffect::PaymentFailed(id) => {
            set_status(&mut tx, &id, SubscriptionStatus::PastDue).await?
        }
        WebhookEffect::Ignore => {
            tracing::debug!(event_type = %event.event_type, "unhandled webhook event")
        }
    }

    tx.commit().await?;
    tracing::info!(event_id = %event.id, event_type = %event.event_type, "webhook processed");

    Ok(WebhookAck { received: true })
}

/// Local change a verified webhook event asks for. Ids are Stripe subscription ids.
#[derive(Debug, PartialEq)]
enum WebhookEffect {
    SyncSubscription(SubscriptionEventObject),
    EndSubscription(String),
    PaymentSucceeded(String),
    PaymentFailed(String),
    Ignore,
}

fn webhook_effect(event: &StripeEvent) -> Result<WebhookEffect, AppError> {
    let effect = match event.event_type.as_str() {
        "customer.subscription.updated" => WebhookEffect::SyncSubscription(decode_object(event)?),
        "customer.subscription.deleted" => {
            let object: SubscriptionEventObject = decode_object(event)?;
            WebhookEffect::EndSubscription(object.id)
        }
        "invoice.payment_succeeded" => {
            let object: InvoiceEventObject = decode_object(event)?;
            object
                .subscription
                .map_or(WebhookEffect::Ignore, WebhookEffect::PaymentSucceeded)
        }
        "invoice.payment_failed" => {
            let object: InvoiceEventObject = decode_object(event)?;
            object
                .subscription
                .map_or(WebhookEffect::Ignore, WebhookEffect::PaymentFailed)
        }
        _ => WebhookEffect::Ignore,
    };
    Ok(effect)
}

/// Tier a paid invoice restores. Unknown stored tiers fall back to the free trial.
fn paid_tier(stored: &str) -> SubscriptionTier {
    stored.parse().unwrap_or(SubscriptionTier::FreeTrial)
}

fn decode_object<T: serde::de::DeserializeOwned>(event: &StripeEvent) -> Result<T, AppError> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        AppError::InvalidRequest(format!("Malformed {} payload: {e}", event.event_type))
    })
}

async fn subscription_updated(
    conn: &mut PgConnection,
    object: &SubscriptionEventObject,
) -> Result<(), AppError> {
    let updated = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = $2,
            current_period_start = COALESCE($3, current_period_start),
            current_period_end = COALESCE($4, current_period_end),
            cancel_at_period_end = $5,
            updated_at = NOW()
        WHERE stripe_subscription_id = $1
        "#,
    )
    .bind(&object.id)
    .bind(&object.status)
    .bind(object.current_period_start.and_then(stripe::from_unix))
    .bind(object.current_period_end.and_then(stripe::from_unix))
    .bind(object.cancel_at_period_end)
    .execute(conn)
    .await?
    .rows_affected();

    if updated == 0 {
        tracing::warn!(subscription = %object.id, "webhook for unknown subscription");
    }
    Ok(())
}

async fn subscription_deleted(conn: &mut PgConnection, stripe_id: &str) -> Result<(), AppError> {
    let user_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        UPDATE subscriptions
        SET status = 'canceled',
            canceled_at = NOW(),
            cancel_at_period_end = FALSE,
            updated_at = NOW()
        WHERE stripe_subscription_id = $1
        RETURNING user_id
        "#,
    )
    .bind(stripe_id)
    .fetch_optional(&mut *conn)
    .await?;

    match user_id {
        Some(user_id) => {
            set_user_tier(conn, user_id, SubscriptionTier::FreeTrial).await?;
            tracing::info!(%user_id, "subscription ended, user back on free trial");
        }
        None => tracing::warn!(subscription = %stripe_id, "webhook for unknown subscription"),
    }
    Ok(())
}

async fn payment_succeeded(conn: &mut PgConnection, stripe_id: &str) -> Result<(), AppError> {
    let row = sqlx::query_as::<_, (Uuid, String)>(
        r#"
        UPDATE subscriptions
        SET status = 'active', updated_at = NOW()
        WHERE stripe_subscription_id = $1
        RETURNING user_id, tier
        "#,
    )
    .bind(stripe_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some((user_id, tier)) => {
            set_user_tier(conn, user_id, paid_tier(&tier)).await?;
        }
        None => tracing::warn!(subscription = %stripe_id, "webhook for unknown subscription"),
    }
    Ok(())
}

async fn set_status(
    conn: &mut PgConnection,
    stripe_id: &str,
    status: SubscriptionStatus,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE subscriptions SET status = $2, updated_at = NOW() WHERE stripe_subscription_id = $1",
    )
    .bind(stripe_id)
    .bind(status.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        billing::{BillingAddress, BillingError, DisabledGateway, GatewayCard, GatewayInvoice},
        test_support,
    };
    use serde_json::json;
    use sqlx::postgres::PgPoolOptions;

    fn event(event_type: &str, object: serde_json::Value) -> StripeEvent {
        serde_json::from_value(json!({
            "id": "evt_1",
            "type": event_type,
            "data": { "object": object }
        }))
        .unwrap()
    }

    /// Body and a fresh `Stripe-Signature` header for the test secret.
    fn signed(body: serde_json::Value) -> (Vec<u8>, String) {
        let payload = serde_json::to_vec(&body).unwrap();
        let header = stripe::sign_webhook(&payload, "whsec_test", Utc::now().timestamp());
        (payload, header)
    }

    #[test]
    fn subscription_updates_carry_the_new_state() {
        let effect = webhook_effect(&event(
            "customer.subscription.updated",
            json!({
                "id": "sub_1",
                "status": "past_due",
                "current_period_end": 1_702_592_000,
                "cancel_at_period_end": true
            }),
        ))
        .unwrap();

        assert_eq!(
            effect,
            WebhookEffect::SyncSubscription(SubscriptionEventObject {
                id: "sub_1".to_string(),
                status: "past_due".to_string(),
                current_period_start: None,
                current_period_end: Some(1_702_592_000),
                cancel_at_period_end: true,
            })
        );
    }

    #[test]
    fn deleted_subscriptions_end_access() {
        let effect = webhook_effect(&event(
            "customer.subscription.deleted",
            json!({ "id": "sub_1", "status": "canceled" }),
        ))
        .unwrap();
        assert_eq!(effect, WebhookEffect::EndSubscription("sub_1".to_string()));
    }

    #[test]
    fn invoices_map_to_their_subscription() {
        let paid = event("invoice.payment_succeeded", json!({ "subscription": "sub_1" }));
        let failed = event("invoice.payment_failed", json!({ "subscription": "sub_1" }));

        assert_eq!(
            webhook_effect(&paid).unwrap(),
            WebhookEffect::PaymentSucceeded("sub_1".to_string())
        );
        assert_eq!(
            webhook_effect(&failed).unwrap(),
            WebhookEffect::PaymentFailed("sub_1".to_string())
        );
    }

    #[test]
    fn one_off_invoices_and_other_events_are_ignored() {
        let one_off = event("invoice.payment_succeeded", json!({ "customer": "cus_1" }));
        let other = event("customer.created", json!({ "id": "cus_1" }));

        assert_eq!(webhook_effect(&one_off).unwrap(), WebhookEffect::Ignore);
        assert_eq!(webhook_effect(&other).unwrap(), WebhookEffect::Ignore);
    }

    #[test]
    fn malformed_event_objects_are_bad_requests() {
        let err = webhook_effect(&event("customer.subscription.deleted", json!({ "status": 1 })))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(msg) if msg.contains("customer.subscription.deleted")));
    }

    #[test]
    fn paid_invoices_restore_the_stored_tier() {
        assert_eq!(paid_tier("professional"), SubscriptionTier::Professional);
        assert_eq!(paid_tier("starter"), SubscriptionTier::Starter);
        assert_eq!(paid_tier("platinum"), SubscriptionTier::FreeTrial);
    }

    async fn subscription_state(pool: &DbPool, user_id: Uuid) -> (String, bool, String) {
        sqlx::query_as(
            r#"
            SELECT s.status, s.canceled_at IS NOT NULL, u.subscription_tier
            FROM subscriptions s JOIN users u ON u.id = s.user_id
            WHERE s.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn redelivered_events_apply_once(pool: DbPool) {
        let config = Config::for_tests();
        let user_id = test_support::insert_user(&pool, SubscriptionTier::Starter).await;
        test_support::insert_subscription(&pool, user_id, "sub_1", "active", SubscriptionTier::Starter)
            .await;
        let (payload, header) = signed(json!({
            "id": "evt_failed",
            "type": "invoice.payment_failed",
            "data": { "object": { "subscription": "sub_1" } }
        }));

        handle_webhook(&pool, &config, &payload, Some(&header)).await.unwrap();
        assert_eq!(subscription_state(&pool, user_id).await.0, "past_due");

        sqlx::query("UPDATE subscriptions SET status = 'active' WHERE user_id = $1")
            .bind(user_id)
            .execute(&pool)
            .await
            .unwrap();

        let ack = handle_webhook(&pool, &config, &payload, Some(&header)).await.unwrap();
        assert!(ack.received);
        assert_eq!(subscription_state(&pool, user_id).await.0, "active");

        let recorded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stripe_events WHERE id = 'evt_failed'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(recorded, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn deleted_subscription_returns_user_to_free_trial(pool: DbPool) {
        let config = Config::for_tests();
        let user_id = test_support::insert_user(&pool, SubscriptionTier::Professional).await;
        test_support::insert_subscription(
            &pool,
            user_id,
            "sub_2",
            "active",
            SubscriptionTier::Professional,
        )
        .await;
        let (payload, header) = signed(json!({
            "id": "evt_deleted",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_2", "status": "canceled" } }
        }));

        handle_webhook(&pool, &config, &payload, Some(&header)).await.unwrap();

        assert_eq!(
            subscription_state(&pool, user_id).await,
            ("canceled".to_string(), true, "free_trial".to_string())
        );
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn paid_invoice_activates_the_subscription_tier(pool: DbPool) {
        let config = Config::for_tests();
        let user_id = test_support::insert_user(&pool, SubscriptionTier::FreeTrial).await;
        test_support::insert_subscription(
            &pool,
            user_id,
            "sub_3",
            "incomplete",
            SubscriptionTier::Professional,
        )
        .await;
        let (payload, header) = signed(json!({
            "id": "evt_paid",
            "type": "invoice.payment_succeeded",
            "data": { "object": { "subscription": "sub_3", "customer": "cus_3" } }
        }));

        handle_webhook(&pool, &config, &payload, Some(&header)).await.unwrap();

        assert_eq!(
            subscription_state(&pool, user_id).await,
            ("active".to_string(), false, "professional".to_string())
        );
    }

    fn lazy_pool(config: &Config) -> DbPool {
        PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(&config.database_url)
            .unwrap()
    }

    #[test]
    fn only_catalog_plans_are_purchasable() {
        assert_eq!(parse_plan("professional").unwrap().id, SubscriptionTier::Professional);
        assert!(matches!(parse_plan("free_trial"), Err(AppError::InvalidRequest(_))));
        assert!(matches!(parse_plan("platinum"), Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn missing_price_id_is_a_bad_request() {
        let config = Config::for_tests();
        assert_eq!(price_id_for(&config, SubscriptionTier::Starter).unwrap(), "price_starter");
        assert!(matches!(
            price_id_for(&config, SubscriptionTier::Enterprise),
            Err(AppError::InvalidRequest(msg)) if msg.contains("enterprise")
        ));
    }

    #[test]
    fn unknown_cycle_is_rejected() {
        assert_eq!(parse_cycle("yearly").unwrap(), BillingCycle::Yearly);
        assert!(parse_cycle("weekly").is_err());
    }

    #[tokio::test]
    async fn webhook_requires_signature() {
        let config = Config::for_tests();
        let pool = lazy_pool(&config);

        let err = handle_webhook(&pool, &config, b"{}", None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidSignature));

        let err = handle_webhook(&pool, &config, b"{}", Some("t=1,v1=00"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidSignature));
    }

    #[tokio::test]
    async fn webhook_without_secret_is_rejected() {
        let mut config = Config::for_tests();
        config.stripe_webhook_secret = None;
        let pool = lazy_pool(&config);

        let err = handle_webhook(&pool, &config, b"{}", Some("t=1,v1=00"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn signed_garbage_is_a_bad_request() {
        let config = Config::for_tests();
        let pool = lazy_pool(&config);
        let payload = b"not json";
        let header = stripe::sign_webhook(payload, "whsec_test", Utc::now().timestamp());

        let err = handle_webhook(&pool, &config, payload, Some(&header))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(msg) if msg.contains("Malformed")));
    }

    /// One customer's cards. Records every detach.
    #[derive(Default)]
    struct CardGateway {
        cards: Vec<&'static str>,
        detached: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl PaymentGateway for CardGateway {
        async fn create_customer(
            &self,
            _: Uuid,
            _: &str,
            _: Option<&str>,
        ) -> Result<String, BillingError> {
            Err(BillingError::Disabled)
        }

        async fn attach_payment_method(&self, _: &str, _: &str) -> Result<(), BillingError> {
            Err(BillingError::Disabled)
        }

        async fn create_subscription(
            &self,
            _: &str,
            _: &str,
            _: Uuid,
            _: &str,
        ) -> Result<GatewaySubscription, BillingError> {
            Err(BillingError::Disabled)
        }

        async fn change_price(&self, _: &str, _: &str) -> Result<GatewaySubscription, BillingError> {
            Err(BillingError::Disabled)
        }

        async fn set_cancel_at_period_end(
            &self,
            _: &str,
            _: bool,
        ) -> Result<GatewaySubscription, BillingError> {
            Err(BillingError::Disabled)
        }

        async fn list_invoices(&self, _: &str, _: u32) -> Result<Vec<GatewayInvoice>, BillingError> {
            Ok(Vec::new())
        }

        async fn list_cards(&self, _: &str) -> Result<Vec<GatewayCard>, BillingError> {
            Ok(self
                .cards
                .iter()
                .map(|id| GatewayCard {
                    id: id.to_string(),
                    brand: Some("visa".to_string()),
                    last4: Some("4242".to_string()),
                    exp_month: Some(12),
                    exp_year: Some(2030),
                })
                .collect())
        }

        async fn add_card(&self, _: &str, _: &str, _: bool) -> Result<GatewayCard, BillingError> {
            Err(BillingError::Disabled)
        }

        async fn detach_payment_method(&self, id: &str) -> Result<(), BillingError> {
            self.detached.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn update_customer_address(
            &self,
            _: &str,
            _: &BillingAddress,
        ) -> Result<(), BillingError> {
            Ok(())
        }
    }

    fn customer(tier: SubscriptionTier) -> User {
        let mut user = usage_service::test_user(tier);
        user.stripe_customer_id = Some("cus_1".to_string());
        user
    }

    fn address(country: &str) -> BillingAddressRequest {
        BillingAddressRequest {
            line1: "1 Main St".to_string(),
            line2: None,
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            postal_code: "62701".to_string(),
            country: country.to_string(),
        }
    }

    #[test]
    fn history_limit_is_bounded() {
        assert_eq!(history_limit(10).unwrap(), 10);
        assert_eq!(history_limit(100).unwrap(), 100);
        assert!(matches!(history_limit(0), Err(AppError::InvalidRequest(_))));
        assert!(matches!(history_limit(101), Err(AppError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn users_without_a_customer_have_no_billing_records() {
        let user = usage_service::test_user(SubscriptionTier::FreeTrial);
        let gateway = DisabledGateway;

        let history = billing_history(&gateway, &user, 10).await.unwrap();
        assert!(history.invoices.is_empty());
        let methods = payment_methods(&gateway, &user).await.unwrap();
        assert!(methods.payment_methods.is_empty());

        let err = remove_payment_method(&gateway, &user, "pm_1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Payment method")));
        let err = update_billing_address(&gateway, &user, address("US"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Billing customer")));
    }

    #[tokio::test]
    async fn customers_reach_the_gateway() {
        let user = customer(SubscriptionTier::Starter);
        let err = billing_history(&DisabledGateway, &user, 10).await.unwrap_err();
        assert!(matches!(err, AppError::PaymentProvider(_)));
    }

    #[tokio::test]
    async fn invalid_addresses_never_reach_the_gateway() {
        let user = customer(SubscriptionTier::Starter);
        let err = update_billing_address(&DisabledGateway, &user, address("United States"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(msg) if msg.contains("two-letter")));

        let ok = update_billing_address(&CardGateway::default(), &user, address("de"))
            .await
            .unwrap();
        assert_eq!(ok.message, "Billing address updated");
    }

    #[tokio::test]
    async fn only_own_cards_can_be_removed() {
        let gateway = CardGateway {
            cards: vec!["pm_1"],
            ..Default::default()
        };
        let user = customer(SubscriptionTier::Starter);

        let err = remove_payment_method(&gateway, &user, "pm_other")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Payment method")));
        assert!(gateway.detached.lock().unwrap().is_empty());

        remove_payment_method(&gateway, &user, "pm_1").await.unwrap();
        assert_eq!(*gateway.detached.lock().unwrap(), vec!["pm_1".to_string()]);
    }

    #[tokio::test]
    async fn blank_payment_method_is_rejected() {
        let config = Config::for_tests();
        let pool = lazy_pool(&config);
        let request = AddPaymentMethodRequest {
            payment_method_id: "  ".to_string(),
            set_default: true,
        };

        let user = customer(SubscriptionTier::Starter);
        let err = add_payment_method(&pool, &DisabledGateway, &user, request)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }
}

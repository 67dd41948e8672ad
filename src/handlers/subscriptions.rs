//! Subscription HTTP handlers.
//!
//! This module implements the billing API endpoints:
//! - GET /api/v1/subscriptions/plans - Public plan catalog
//! - GET /api/v1/subscriptions/current, /usage
//! - POST /api/v1/subscriptions/create, /cancel, /reactivate
//! - PUT /api/v1/subscriptions/change-plan, /billing-address
//! - GET /api/v1/subscriptions/billing-history
//! - GET, POST /api/v1/subscriptions/payment-methods
//! - DELETE /api/v1/subscriptions/payment-methods/{id}
//! - POST /api/v1/subscriptions/webhook - Stripe events (public, signature checked)

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        email::MessageResponse,
        plan::{PlansResponse, catalog},
        subscription::{
            AddPaymentMethodRequest, AddPaymentMethodResponse, BillingAddressRequest,
            BillingHistoryQuery, BillingHistoryResponse, ChangePlanRequest,
            CreateSubscriptionRequest, CreateSubscriptionResponse, CurrentSubscriptionResponse,
            PaymentMethodsResponse, SubscriptionActionResponse, UsageResponse, WebhookAck,
        },
    },
    services::{auth_service, payment_service, usage_service},
    state::AppState,
};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};

const STRIPE_SIGNATURE: &str = "stripe-signature";

/// `GET /api/v1/subscriptions/plans`
pub async fn list_plans() -> Json<PlansResponse> {
    Json(PlansResponse { plans: catalog() })
}

/// Current subscription, tier and usage.
///
/// # Endpoint
///
/// `GET /api/v1/subscriptions/current`
///
/// # Response
///
/// Users without a subscription get `"subscription": null` and `"status": "inactive"`.
///
/// ```json
/// {
///   "subscription": null,
///   "plan": "free_trial",
///   "plan_details": null,
///   "status": "inactive",
///   "usage": { "tier": "free_trial", "emails_processed": 120, "email_limit": 1000, ... }
/// }
/// ```
pub async fn current(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<CurrentSubscriptionResponse>, AppError> {
    let user = auth_service::find_user(&state.pool, auth.user_id).await?;
    Ok(Json(
        payment_service::current_subscription(&state.pool, &user).await?,
    ))
}

/// Subscribe to a paid plan.
///
/// # Endpoint
///
/// `POST /api/v1/subscriptions/create`
///
/// # Response
///
/// - **Success (201 Created)**: The subscription and, when the first payment needs
///   confirmation, the payment intent's `client_secret`
/// - **Error (400)**: Unknown plan or cycle, or no price configured
/// - **Error (409)**: A live subscription already exists
/// - **Error (502)**: Stripe rejected the call or billing is not configured
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<CreateSubscriptionResponse>), AppError> {
    let user = auth_service::find_user(&state.pool, auth.user_id).await?;
    let response = payment_service::create_subscription(
        &state.pool,
        state.billing.as_ref(),
        &state.config,
        &user,
        request,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `PUT /api/v1/subscriptions/change-plan`
pub async fn change_plan(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ChangePlanRequest>,
) -> Result<Json<SubscriptionActionResponse>, AppError> {
    Ok(Json(
        payment_service::change_plan(
            &state.pool,
            state.billing.as_ref(),
            &state.config,
            auth.user_id,
            request,
        )
        .await?,
    ))
}

/// Cancel at period end. The plan stays usable until Stripe ends the subscription.
pub async fn cancel(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<SubscriptionActionResponse>, AppError> {
    Ok(Json(
        payment_service::cancel(&state.pool, state.billing.as_ref(), auth.user_id).await?,
    ))
}

/// `POST /api/v1/subscriptions/reactivate`
pub async fn reactivate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<SubscriptionActionResponse>, AppError> {
    Ok(Json(
        payment_service::reactivate(&state.pool, state.billing.as_ref(), auth.user_id).await?,
    ))
}

/// `GET /api/v1/subscriptions/usage`
pub async fn usage(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UsageResponse>, AppError> {
    let user = auth_service::find_user(&state.pool, auth.user_id).await?;
    Ok(Json(usage_service::usage_response(&user)))
}

/// Past invoices from Stripe.
///
/// # Endpoint
///
/// `GET /api/v1/subscriptions/billing-history?limit=10`
///
/// # Response
///
/// - **Success (200 OK)**: `{"invoices": [...]}`, newest first. Empty for users
///   who were never billed
/// - **Error (400)**: `limit` outside 1..=100
///
/// ```json
/// {
///   "invoices": [{
///     "id": "in_1Nv...",
///     "amount_paid_cents": 2900,
///     "currency": "usd",
///     "status": "paid",
///     "created": "2024-03-01T00:00:00Z",
///     "period_start": "2024-02-01T00:00:00Z",
///     "period_end": "2024-03-01T00:00:00Z",
///     "invoice_pdf": "https://pay.stripe.com/invoice/..."
///   }]
/// }
/// ```
pub async fn billing_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<BillingHistoryQuery>,
) -> Result<Json<BillingHistoryResponse>, AppError> {
    let user = auth_service::find_user(&state.pool, auth.user_id).await?;
    Ok(Json(
        payment_service::billing_history(state.billing.as_ref(), &user, query.limit).await?,
    ))
}

/// `GET /api/v1/subscriptions/payment-methods`
pub async fn list_payment_methods(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<PaymentMethodsResponse>, AppError> {
    let user = auth_service::find_user(&state.pool, auth.user_id).await?;
    Ok(Json(
        payment_service::payment_methods(state.billing.as_ref(), &user).await?,
    ))
}

/// Attach a card, optionally as the default for future invoices.
///
/// # Endpoint
///
/// `POST /api/v1/subscriptions/payment-methods`
///
/// ```json
/// { "payment_method_id": "pm_1Nv...", "set_default": true }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: The card's brand, last four digits and expiry
/// - **Error (400)**: Blank `payment_method_id`
/// - **Error (502)**: Stripe rejected the method or billing is not configured
pub async fn add_payment_method(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<AddPaymentMethodRequest>,
) -> Result<(StatusCode, Json<AddPaymentMethodResponse>), AppError> {
    let user = auth_service::find_user(&state.pool, auth.user_id).await?;
    let response =
        payment_service::add_payment_method(&state.pool, state.billing.as_ref(), &user, request)
            .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `DELETE /api/v1/subscriptions/payment-methods/{id}`. 404 unless the card is the user's.
pub async fn remove_payment_method(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(payment_method_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user = auth_service::find_user(&state.pool, auth.user_id).await?;
    payment_service::remove_payment_method(state.billing.as_ref(), &user, &payment_method_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/v1/subscriptions/billing-address`
pub async fn update_billing_address(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<BillingAddressRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let user = auth_service::find_user(&state.pool, auth.user_id).await?;
    Ok(Json(
        payment_service::update_billing_address(state.billing.as_ref(), &user, request).await?,
    ))
}

/// Stripe webhook receiver.
///
/// # Endpoint
///
/// `POST /api/v1/subscriptions/webhook`
///
/// # Authentication
///
/// None. The raw body must carry a valid `Stripe-Signature` header; the body
/// is taken as bytes because the signature covers it exactly as sent.
///
/// # Response
///
/// - **Success (200 OK)**: `{"received": true}`, also for duplicate and ignored events
/// - **Error (400)**: Missing or invalid signature, malformed payload, or no webhook secret
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(STRIPE_SIGNATURE)
        .and_then(|value| value.to_str().ok());

    Ok(Json(
        payment_service::handle_webhook(&state.pool, &state.config, &body, signature).await?,
    ))
}

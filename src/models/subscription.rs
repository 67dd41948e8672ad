//! Subscription records and the request/response types of the subscriptions API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::{
    billing::{BillingAddress, GatewayCard, GatewayInvoice},
    models::plan::{Plan, SubscriptionTier},
};

/// Subscription status as reported by Stripe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Paused => "paused",
        }
    }

    /// A live subscription blocks creating another one.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active
                | SubscriptionStatus::Trialing
                | SubscriptionStatus::PastDue
                | SubscriptionStatus::Incomplete
        )
    }

    /// Paid features are unlocked only in these states.
    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incomplete" => Ok(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Ok(SubscriptionStatus::IncompleteExpired),
            "active" => Ok(SubscriptionStatus::Active),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "unpaid" => Ok(SubscriptionStatus::Unpaid),
            "paused" => Ok(SubscriptionStatus::Paused),
            other => Err(format!("unknown subscription status '{other}'")),
        }
    }
}

/// Represents a subscription record from the database.
///
/// # Database Table
///
/// Maps to the `subscriptions` table. A user has at most one row; cancelled
/// subscriptions are overwritten when the user subscribes again.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_price_id: Option<String>,
    pub status: String,
    pub tier: String,
    pub billing_cycle: String,
    pub amount_cents: i64,
    pub currency: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Unknown strings are treated as `incomplete`.
    pub fn status(&self) -> SubscriptionStatus {
        self.status.parse().unwrap_or(SubscriptionStatus::Incomplete)
    }

    pub fn tier(&self) -> SubscriptionTier {
        self.tier.parse().unwrap_or(SubscriptionTier::FreeTrial)
    }
}

/// Subscription as returned to clients.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub tier: SubscriptionTier,
    pub status: String,
    pub billing_cycle: String,
    pub amount_cents: i64,
    pub currency: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        Self {
            tier: sub.tier(),
            id: sub.id,
            status: sub.status,
            billing_cycle: sub.billing_cycle,
            amount_cents: sub.amount_cents,
            currency: sub.currency,
            current_period_start: sub.current_period_start,
            current_period_end: sub.current_period_end,
            cancel_at_period_end: sub.cancel_at_period_end,
            canceled_at: sub.canceled_at,
            created_at: sub.created_at,
        }
    }
}

fn default_billing_cycle() -> String {
    "monthly".to_string()
}

/// Request body for `POST /api/v1/subscriptions/create`.
///
/// ```json
/// {
///   "plan_type": "professional",
///   "billing_cycle": "yearly",
///   "payment_method_id": "pm_1Nv..."
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub plan_type: String,
    #[serde(default = "default_billing_cycle")]
    pub billing_cycle: String,
    pub payment_method_id: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSubscriptionResponse {
    pub subscription: SubscriptionResponse,
    /// Present when the first payment needs client-side confirmation
    pub client_secret: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_type: String,
    pub billing_cycle: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionActionResponse {
    pub subscription: SubscriptionResponse,
    pub message: String,
}

/// Usage counters against the user's tier limits. `None` limits are unlimited.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub tier: SubscriptionTier,
    pub emails_processed: i64,
    pub email_limit: Option<i64>,
    pub api_calls_this_month: i64,
    pub api_call_limit: Option<i64>,
    pub usage_period_start: DateTime<Utc>,
}

/// Response of `GET /api/v1/subscriptions/current`.
#[derive(Debug, Serialize)]
pub struct CurrentSubscriptionResponse {
    pub subscription: Option<SubscriptionResponse>,
    pub plan: SubscriptionTier,
    pub plan_details: Option<Plan>,
    pub status: String,
    pub usage: UsageResponse,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Deserialize)]
pub struct BillingHistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    10
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub id: String,
    pub amount_paid_cents: i64,
    pub currency: String,
    pub status: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub invoice_pdf: Option<String>,
}

impl From<GatewayInvoice> for InvoiceResponse {
    fn from(invoice: GatewayInvoice) -> Self {
        Self {
            id: invoice.id,
            amount_paid_cents: invoice.amount_paid_cents,
            currency: invoice.currency,
            status: invoice.status,
            created: invoice.created,
            period_start: invoice.period_start,
            period_end: invoice.period_end,
            invoice_pdf: invoice.invoice_pdf,
        }
    }
}

/// Response of `GET /api/v1/subscriptions/billing-history`.
#[derive(Debug, Serialize)]
pub struct BillingHistoryResponse {
    pub invoices: Vec<InvoiceResponse>,
}

#[derive(Debug, Serialize)]
pub struct PaymentMethodResponse {
    pub id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<i32>,
    pub exp_year: Option<i32>,
}

impl From<GatewayCard> for PaymentMethodResponse {
    fn from(card: GatewayCard) -> Self {
        Self {
            id: card.id,
            brand: card.brand,
            last4: card.last4,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentMethodsResponse {
    pub payment_methods: Vec<PaymentMethodResponse>,
}

/// Request body for `POST /api/v1/subscriptions/payment-methods`.
///
/// `payment_method_id` is the id the client-side card form returned.
#[derive(Debug, Deserialize)]
pub struct AddPaymentMethodRequest {
    pub payment_method_id: String,
    #[serde(default)]
    pub set_default: bool,
}

#[derive(Debug, Serialize)]
pub struct AddPaymentMethodResponse {
    pub payment_method: PaymentMethodResponse,
    pub message: String,
}

/// Request body for `PUT /api/v1/subscriptions/billing-address`.
#[derive(Debug, Deserialize)]
pub struct BillingAddressRequest {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl BillingAddressRequest {
    /// Trim every field and check the required ones. Blank `line2` is dropped
    /// and `country` must be a two-letter code.
    pub fn into_address(self) -> Result<BillingAddress, String> {
        fn required(field: &str, value: String) -> Result<String, String> {
            let value = value.trim().to_string();
            if value.is_empty() {
                return Err(format!("{field} is required"));
            }
            Ok(value)
        }

        let country = required("country", self.country)?.to_uppercase();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err("country must be a two-letter ISO code".to_string());
        }

        Ok(BillingAddress {
            line1: required("line1", self.line1)?,
            line2: self
                .line2
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            city: required("city", self.city)?,
            state: required("state", self.state)?,
            postal_code: required("postal_code", self.postal_code)?,
            country,
        })
    }
}

//! Stripe REST client and webhook verification.
//!
//! Only the endpoints used by the billing flows are implemented. Requests are
//! form-encoded as Stripe expects; responses are decoded into small local structs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use uuid::Uuid;

use super::{
    BillingAddress, BillingError, GatewayCard, GatewayInvoice, GatewaySubscription,
    PaymentGateway,
};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Maximum accepted age of a webhook signature, in seconds.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeCustomer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    customer: String,
    status: String,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    #[serde(default)]
    cancel_at_period_end: bool,
    items: StripeList<StripeSubscriptionItem>,
    latest_invoice: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    id: String,
    price: StripePrice,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeInvoice {
    id: String,
    #[serde(default)]
    amount_paid: i64,
    currency: String,
    status: Option<String>,
    created: Option<i64>,
    period_start: Option<i64>,
    period_end: Option<i64>,
    invoice_pdf: Option<String>,
}

impl From<StripeInvoice> for GatewayInvoice {
    fn from(invoice: StripeInvoice) -> Self {
        Self {
            id: invoice.id,
            amount_paid_cents: invoice.amount_paid,
            currency: invoice.currency,
            status: invoice.status,
            created: invoice.created.and_then(from_unix),
            period_start: invoice.period_start.and_then(from_unix),
            period_end: invoice.period_end.and_then(from_unix),
            invoice_pdf: invoice.invoice_pdf,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripePaymentMethod {
    id: String,
    card: Option<StripeCard>,
}

#[derive(Debug, Deserialize)]
struct StripeCard {
    brand: Option<String>,
    last4: Option<String>,
    exp_month: Option<i32>,
    exp_year: Option<i32>,
}

impl From<StripePaymentMethod> for GatewayCard {
    fn from(method: StripePaymentMethod) -> Self {
        let card = method.card;
        Self {
            id: method.id,
            brand: card.as_ref().and_then(|c| c.brand.clone()),
            last4: card.as_ref().and_then(|c| c.last4.clone()),
            exp_month: card.as_ref().and_then(|c| c.exp_month),
            exp_year: card.and_then(|c| c.exp_year),
        }
    }
}

/// Form fields of a customer address update. `line2` is sent only when present.
fn address_form(address: &BillingAddress) -> Vec<(&'static str, &str)> {
    let mut form = vec![
        ("address[line1]", address.line1.as_str()),
        ("address[city]", address.city.as_str()),
        ("address[state]", address.state.as_str()),
        ("address[postal_code]", address.postal_code.as_str()),
        ("address[country]", address.country.as_str()),
    ];
    if let Some(line2) = address.line2.as_deref() {
        form.push(("address[line2]", line2));
    }
    form
}

impl From<StripeSubscription> for GatewaySubscription {
    fn from(sub: StripeSubscription) -> Self {
        let item = sub.items.data.first();
        // Newer API versions report the billing period on the item
        let period_start = sub
            .current_period_start
            .or_else(|| item.and_then(|i| i.current_period_start));
        let period_end = sub
            .current_period_end
            .or_else(|| item.and_then(|i| i.current_period_end));

        let client_secret = sub
            .latest_invoice
            .as_ref()
            .and_then(|invoice| invoice.pointer("/payment_intent/client_secret"))
            .and_then(|secret| secret.as_str())
            .map(str::to_string);

        Self {
            price_id: item.map(|i| i.price.id.clone()),
            id: sub.id,
            customer_id: sub.customer,
            status: sub.status,
            current_period_start: period_start.and_then(from_unix),
            current_period_end: period_end.and_then(from_unix),
            cancel_at_period_end: sub.cancel_at_period_end,
            client_secret,
        }
    }
}

pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

impl StripeGateway {
    pub fn new(secret_key: &str) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            secret_key: secret_key.to_string(),
        })
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, BillingError> {
        let response = self
            .client
            .post(format!("{STRIPE_API_BASE}{path}"))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await?;
        decode(response).await
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, BillingError> {
        let response = self
            .client
            .get(format!("{STRIPE_API_BASE}{path}"))
            .basic_auth(&self.secret_key, None::<&str>)
            .query(query)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, BillingError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<StripeErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or_else(|| format!("Stripe returned status {}", status.as_u16()));
        tracing::warn!(status = status.as_u16(), %message, "Stripe request failed");
        return Err(BillingError::Provider(message));
    }

    serde_json::from_str(&body).map_err(|e| BillingError::Decode(e.to_string()))
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_customer(
        &self,
        user_id: Uuid,
        email: &str,
        name: Option<&str>,
    ) -> Result<String, BillingError> {
        let user_id = user_id.to_string();
        let mut form = vec![("email", email), ("metadata[user_id]", user_id.as_str())];
        if let Some(name) = name {
            form.push(("name", name));
        }

        let customer: StripeCustomer = self.post("/customers", &form).await?;
        Ok(customer.id)
    }

    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<(), BillingError> {
        self.add_card(customer_id, payment_method_id, true).await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        user_id: Uuid,
        tier: &str,
    ) -> Result<GatewaySubscription, BillingError> {
        let user_id = user_id.to_string();
        let subscription: StripeSubscription = self
            .post(
                "/subscriptions",
                &[
                    ("customer", customer_id),
                    ("items[0][price]", price_id),
                    ("payment_behavior", "default_incomplete"),
                    ("expand[]", "latest_invoice.payment_intent"),
                    ("metadata[user_id]", user_id.as_str()),
                    ("metadata[tier]", tier),
                ],
            )
            .await?;
        Ok(subscription.into())
    }

    async fn change_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> Result<GatewaySubscription, BillingError> {
        let current: StripeSubscription = self
            .get(&format!("/subscriptions/{subscription_id}"), &[])
            .await?;
        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.clone())
            .ok_or_else(|| BillingError::Decode("subscription has no items".into()))?;

        let updated: StripeSubscription = self
            .post(
                &format!("/subscriptions/{subscription_id}"),
                &[
                    ("items[0][id]", item_id.as_str()),
                    ("items[0][price]", price_id),
                    ("proration_behavior", "create_prorations"),
                ],
            )
            .await?;
        Ok(updated.into())
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
    ) -> Result<GatewaySubscription, BillingError> {
        let updated: StripeSubscription = self
            .post(
                &format!("/subscriptions/{subscription_id}"),
                &[("cancel_at_period_end", if cancel { "true" } else { "false" })],
            )
            .await?;
        Ok(updated.into())
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: u32,
    ) -> Result<Vec<GatewayInvoice>, BillingError> {
        let limit = limit.to_string();
        let invoices: StripeList<StripeInvoice> = self
            .get("/invoices", &[("customer", customer_id), ("limit", limit.as_str())])
            .await?;
        Ok(invoices.data.into_iter().map(Into::into).collect())
    }

    async fn list_cards(&self, customer_id: &str) -> Result<Vec<GatewayCard>, BillingError> {
        let methods: StripeList<StripePaymentMethod> = self
            .get(
                "/payment_methods",
                &[("customer", customer_id), ("type", "card")],
            )
            .await?;
        Ok(methods.data.into_iter().map(Into::into).collect())
    }

    async fn add_card(
        &self,
        customer_id: &str,
        payment_method_id: &str,
        make_default: bool,
    ) -> Result<GatewayCard, BillingError> {
        let method: StripePaymentMethod = self
            .post(
                &format!("/payment_methods/{payment_method_id}/attach"),
                &[("customer", customer_id)],
            )
            .await?;

        if make_default {
            let _: serde_json::Value = self
                .post(
                    &format!("/customers/{customer_id}"),
                    &[("invoice_settings[default_payment_method]", payment_method_id)],
                )
                .await?;
        }
        Ok(method.into())
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<(), BillingError> {
        let _: serde_json::Value = self
            .post(&format!("/payment_methods/{payment_method_id}/detach"), &[])
            .await?;
        Ok(())
    }

    async fn update_customer_address(
        &self,
        customer_id: &str,
        address: &BillingAddress,
    ) -> Result<(), BillingError> {
        let _: serde_json::Value = self
            .post(&format!("/customers/{customer_id}"), &address_form(address))
            .await?;
        Ok(())
    }
}

/// Envelope of a webhook event.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// The subscription fields webhook handlers read.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionEventObject {
    pub id: String,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

/// The invoice fields webhook handlers read.
#[derive(Debug, Deserialize)]
pub struct InvoiceEventObject {
    pub subscription: Option<String>,
    pub customer: Option<String>,
}

/// Verify a `Stripe-Signature` header against the raw request body.
///
/// The header looks like `t=1700000000,v1=<hex>,v1=<hex>`. The signed payload is
/// `"{t}.{body}"` under HMAC-SHA256 with the endpoint secret. Any `v1` entry may
/// match, and the timestamp must be within `tolerance_secs` of `now`.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), BillingError> {
    let mut timestamp: Option<(&str, i64)> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok().map(|t| (value, t)),
            "v1" => {
                if let Ok(sig) = hex::decode(value) {
                    signatures.push(sig);
                }
            }
            _ => {}
        }
    }

    let (raw_timestamp, timestamp) = timestamp.ok_or(BillingError::InvalidSignature)?;
    if signatures.is_empty() || now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(BillingError::InvalidSignature);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| BillingError::InvalidSignature)?;
    mac.update(raw_timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    // verify_slice compares in constant time
    if signatures
        .iter()
        .any(|sig| mac.clone().verify_slice(sig).is_ok())
    {
        Ok(())
    } else {
        Err(BillingError::InvalidSignature)
    }
}

/// Build a valid `Stripe-Signature` header.
#[cfg(test)]
pub(crate) fn sign_webhook(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

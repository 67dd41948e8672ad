//! Payment gateway seam.
//!
//! The subscription service talks to billing only through `PaymentGateway`.
//! `StripeGateway` implements it with the Stripe REST calls the subscription,
//! invoice and payment-method flows need; `DisabledGateway` is used when no
//! Stripe key is set.

pub mod stripe;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::{config::Config, error::AppError};

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("billing is not configured")]
    Disabled,

    #[error("payment provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Error message returned by the provider.
    #[error("{0}")]
    Provider(String),

    #[error("unexpected payment provider response: {0}")]
    Decode(String),

    #[error("invalid webhook signature")]
    InvalidSignature,
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidSignature => AppError::InvalidSignature,
            BillingError::Request(ref e) => {
                tracing::error!(error = %e, "payment provider unreachable");
                AppError::PaymentProvider("payment provider is unavailable".to_string())
            }
            other => AppError::PaymentProvider(other.to_string()),
        }
    }
}

/// Subscription state as the gateway reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySubscription {
    pub id: String,
    pub customer_id: String,
    pub price_id: Option<String>,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    /// Secret of the first payment intent, when it still needs confirmation
    pub client_secret: Option<String>,
}

/// A past invoice of a customer.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayInvoice {
    pub id: String,
    pub amount_paid_cents: i64,
    pub currency: String,
    pub status: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    /// Hosted PDF, once the invoice is finalized
    pub invoice_pdf: Option<String>,
}

/// A card payment method. Card fields are absent for other method types.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCard {
    pub id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<i32>,
    pub exp_year: Option<i32>,
}

/// Postal address stored on the customer for invoices and tax.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingAddress {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2, upper case
    pub country: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a customer and return its id.
    async fn create_customer(
        &self,
        user_id: Uuid,
        email: &str,
        name: Option<&str>,
    ) -> Result<String, BillingError>;

    /// Attach a payment method and make it the customer's default.
    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<(), BillingError>;

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        user_id: Uuid,
        tier: &str,
    ) -> Result<GatewaySubscription, BillingError>;

    /// Swap the subscription's price, prorating the difference.
    async fn change_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> Result<GatewaySubscription, BillingError>;

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
    ) -> Result<GatewaySubscription, BillingError>;

    /// Most recent invoices first.
    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: u32,
    ) -> Result<Vec<GatewayInvoice>, BillingError>;

    async fn list_cards(&self, customer_id: &str) -> Result<Vec<GatewayCard>, BillingError>;

    /// Attach a payment method, optionally making it the default, and return it.
    async fn add_card(
        &self,
        customer_id: &str,
        payment_method_id: &str,
        make_default: bool,
    ) -> Result<GatewayCard, BillingError>;

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<(), BillingError>;

    async fn update_customer_address(
        &self,
        customer_id: &str,
        address: &BillingAddress,
    ) -> Result<(), BillingError>;
}

/// Gateway used when `STRIPE_SECRET_KEY` is unset. Every call fails.
#[derive(Debug, Default)]
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn create_customer(
        &self,
        _user_id: Uuid,
        _email: &str,
        _name: Option<&str>,
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
        Err(BillingError::Disabled)
    }

    async fn list_cards(&self, _: &str) -> Result<Vec<GatewayCard>, BillingError> {
        Err(BillingError::Disabled)
    }

    async fn add_card(&self, _: &str, _: &str, _: bool) -> Result<GatewayCard, BillingError> {
        Err(BillingError::Disabled)
    }

    async fn detach_payment_method(&self, _: &str) -> Result<(), BillingError> {
        Err(BillingError::Disabled)
    }

    async fn update_customer_address(
        &self,
        _: &str,
        _: &BillingAddress,
    ) -> Result<(), BillingError> {
        Err(BillingError::Disabled)
    }
}

/// Pick the gateway for this configuration.
pub fn gateway_from_config(config: &Config) -> Result<Arc<dyn PaymentGateway>, BillingError> {
    match config.stripe_key() {
        Some(key) => {
            tracing::info!("Stripe billing enabled");
            Ok(Arc::new(stripe::StripeGateway::new(key)?))
        }
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set, billing endpoints are disabled");
            Ok(Arc::new(DisabledGateway))
        }
    }
}

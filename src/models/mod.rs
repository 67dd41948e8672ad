//! Data models representing database entities and API payloads.
//!
//! Row types derive `sqlx::FromRow`; request types derive `Deserialize`;
//! response types derive `Serialize` and are built from rows with `From`.

/// Daily rollups and analytics responses
pub mod analytics;
/// Mailboxes and stored emails
pub mod email;
/// AI insights and analysis jobs
pub mod insight;
/// Subscription tiers, limits and the plan catalog
pub mod plan;
/// Stripe-backed subscriptions
pub mod subscription;
/// User accounts and authentication payloads
pub mod user;

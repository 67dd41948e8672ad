//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Calls the matching service function
//! 3. Returns HTTP response (JSON, status code)
//!
//! Business rules live in `services`; handlers only extract, delegate and
//! choose the status code.

/// AI analysis and insight endpoints
pub mod ai_insights;
/// Email analytics endpoints
pub mod analytics;
/// Registration, login and profile endpoints
pub mod auth;
/// Mailbox, ingestion and email endpoints
pub mod emails;
/// Health check and root endpoints
pub mod health;
/// Plan, subscription and Stripe webhook endpoints
pub mod subscriptions;

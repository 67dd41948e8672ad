//! Shared application state handed to handlers, middleware and background workers.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::{
    ai::AiEngine, billing::PaymentGateway, config::Config, db::DbPool, tasks::JobQueue,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub ai: Arc<AiEngine>,
    pub billing: Arc<dyn PaymentGateway>,
    pub jobs: JobQueue,
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for JobQueue {
    fn from_ref(state: &AppState) -> Self {
        state.jobs.clone()
    }
}

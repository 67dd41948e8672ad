//! EmailMind API - Main Application Entry Point
//!
//! This is a REST API server for email analytics and AI insights. Users connect
//! mailboxes, push their messages in, and get categorization, sentiment,
//! analytics and summaries back. Paid plans are billed through Stripe.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: HS256 JWT bearer tokens, argon2id password hashes
//! - **AI**: OpenAI chat completions with a rule-based fallback
//! - **Background work**: tokio job queue and interval scheduler
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Build the AI engine and payment gateway
//! 4. Start the job dispatcher and scheduler
//! 5. Serve HTTP until Ctrl-C or SIGTERM, then stop the workers

mod ai;
mod billing;
mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;
mod tasks;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use tokio::{
    signal::{
        ctrl_c,
        unix::{SignalKind, signal},
    },
    sync::watch,
};
use tracing_subscriber::EnvFilter;

use crate::{config::Config, state::AppState, tasks::JobQueue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config);
    tracing::info!(environment = %config.environment, "Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let ai = ai::AiEngine::from_config(&config)?;
    let billing = billing::gateway_from_config(&config)?;
    let (jobs, job_rx) = JobQueue::new(tasks::QUEUE_CAPACITY);

    let state = AppState {
        pool,
        config: Arc::new(config),
        ai: Arc::new(ai),
        billing,
        jobs,
    };

    // Background workers stop when this flips to true
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = tasks::spawn_dispatcher(state.clone(), job_rx, shutdown_rx.clone());
    let scheduler = tasks::scheduler::spawn_scheduler(state.clone(), shutdown_rx);

    let addr = format!("0.0.0.0:{}", state.config.server_port);
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, waiting for background workers");
    let _ = shutdown_tx.send(true);
    for handle in scheduler {
        let _ = handle.await;
    }
    let _ = dispatcher.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Log to stdout, as JSON in production. Reads `RUST_LOG` (defaults to "info").
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if config.is_production() {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

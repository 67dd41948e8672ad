//! HTTP router: public and authenticated routes under `/api/v1`, plus the
//! tracing, CORS and compression layers.

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware as axum_middleware,
    routing::{delete, get, post, put},
};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{config::Config, handlers, middleware, state::AppState};

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/subscriptions/plans", get(handlers::subscriptions::list_plans))
        .route("/subscriptions/webhook", post(handlers::subscriptions::webhook));

    let protected = Router::new()
        .route("/auth/me", get(handlers::auth::me))
        // Emails
        .route(
            "/emails/accounts",
            post(handlers::emails::create_account).get(handlers::emails::list_accounts),
        )
        .route(
            "/emails/accounts/{id}",
            delete(handlers::emails::delete_account),
        )
        .route("/emails/ingest", post(handlers::emails::ingest))
        .route("/emails", get(handlers::emails::list_emails))
        .route("/emails/search", get(handlers::emails::search_emails))
        .route("/emails/stats/overview", get(handlers::emails::stats_overview))
        .route("/emails/{id}", get(handlers::emails::get_email))
        .route(
            "/emails/{id}/actions/{action}",
            post(handlers::emails::email_action),
        )
        // Analytics
        .route("/analytics/overview", get(handlers::analytics::overview))
        .route("/analytics/senders", get(handlers::analytics::senders))
        .route(
            "/analytics/trends/time-series",
            get(handlers::analytics::time_series),
        )
        .route(
            "/analytics/trends/categories",
            get(handlers::analytics::category_trends),
        )
        .route("/analytics/productivity", get(handlers::analytics::productivity))
        .route("/analytics/daily", get(handlers::analytics::daily))
        // AI insights
        .route("/ai/analyze/single", post(handlers::ai_insights::analyze_single))
        .route("/ai/analyze/batch", post(handlers::ai_insights::analyze_batch))
        .route("/ai/jobs/{id}", get(handlers::ai_insights::job_status))
        .route(
            "/ai/insights/summary",
            get(handlers::ai_insights::insight_summary),
        )
        .route("/ai/classify", post(handlers::ai_insights::classify))
        .route(
            "/ai/sentiment/analysis",
            get(handlers::ai_insights::sentiment_analysis),
        )
        .route(
            "/ai/trends/analysis",
            get(handlers::ai_insights::trend_analysis),
        )
        .route(
            "/ai/unsubscribe-recommendations",
            get(handlers::ai_insights::unsubscribe_recommendations),
        )
        .route(
            "/ai/executive-summary",
            get(handlers::ai_insights::executive_summary),
        )
        .route("/ai/predictions", get(handlers::ai_insights::predictions))
        .route(
            "/ai/emails/{id}/summary",
            get(handlers::ai_insights::smart_summary),
        )
        .route("/ai/threads", get(handlers::ai_insights::thread_analysis))
        .route(
            "/ai/senders/relationships",
            get(handlers::ai_insights::sender_relationships),
        )
        .route(
            "/ai/insights/history",
            get(handlers::ai_insights::insight_history),
        )
        // Subscriptions
        .route("/subscriptions/current", get(handlers::subscriptions::current))
        .route("/subscriptions/create", post(handlers::subscriptions::create))
        .route(
            "/subscriptions/change-plan",
            put(handlers::subscriptions::change_plan),
        )
        .route("/subscriptions/cancel", post(handlers::subscriptions::cancel))
        .route(
            "/subscriptions/reactivate",
            post(handlers::subscriptions::reactivate),
        )
        .route("/subscriptions/usage", get(handlers::subscriptions::usage))
        .route(
            "/subscriptions/billing-history",
            get(handlers::subscriptions::billing_history),
        )
        .route(
            "/subscriptions/payment-methods",
            get(handlers::subscriptions::list_payment_methods)
                .post(handlers::subscriptions::add_payment_method),
        )
        .route(
            "/subscriptions/payment-methods/{id}",
            delete(handlers::subscriptions::remove_payment_method),
        )
        .route(
            "/subscriptions/billing-address",
            put(handlers::subscriptions::update_billing_address),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", public.merge(protected))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(CompressionLayer::new())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .max_age(Duration::from_secs(60 * 60));

    match config.allowed_origins() {
        None => base.allow_origin(Any).allow_headers(Any),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(%origin, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();

            base.allow_origin(AllowOrigin::list(origins))
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ai::AiEngine,
        billing::DisabledGateway,
        tasks::{JobQueue, QUEUE_CAPACITY},
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = Config::for_tests();
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(&config.database_url)
            .unwrap();
        let (jobs, _rx) = JobQueue::new(QUEUE_CAPACITY);

        AppState {
            pool,
            config: Arc::new(config),
            ai: Arc::new(AiEngine::heuristic_only()),
            billing: Arc::new(DisabledGateway),
            jobs,
        }
    }

    async fn send(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = build_router(test_state()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() {
        let (status, body) = send(get_request("/api/v1/emails")).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "invalid_token");
    }

    #[tokio::test]
    async fn billing_routes_require_a_token() {
        let (status, _) = send(get_request("/api/v1/subscriptions/billing-history")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/api/v1/subscriptions/payment-methods/pm_1")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn garbage_tokens_are_rejected() {
        let request = Request::builder()
            .uri("/api/v1/auth/me")
            .header(AUTHORIZATION, "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "invalid_token");
    }

    #[tokio::test]
    async fn plans_are_public() {
        let (status, body) = send(get_request("/api/v1/subscriptions/plans")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plans"].as_array().map(Vec::len), Some(3));
        assert_eq!(body["plans"][0]["id"], "starter");
        assert_eq!(body["plans"][0]["price_monthly_cents"], 900);
    }

    #[tokio::test]
    async fn root_reports_version() {
        let (status, body) = send(get_request("/")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "EmailMind API");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn unsigned_webhooks_are_rejected() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/subscriptions/webhook")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"id":"evt_1","type":"invoice.payment_failed"}"#))
            .unwrap();

        let (status, body) = send(request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_signature");
    }

    #[tokio::test]
    async fn stale_signatures_are_rejected() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/subscriptions/webhook")
            .header("stripe-signature", "t=1,v1=deadbeef")
            .body(Body::from("{}"))
            .unwrap();

        let (status, _) = send(request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let (status, _) = send(get_request("/api/v2/emails")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

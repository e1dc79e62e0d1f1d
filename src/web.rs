use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::post,
};
use std::time::Instant;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use tracing::{error, info};

use crate::actions;
use crate::quota_store::QuotaStore;
use crate::stripe_client::StripeConfig;
use crate::usage_gate::UsageGate;

/// App state shared by every handler. All collaborators are injected here;
/// nothing is looked up through a process-wide global.
#[derive(Clone)]
pub struct AppState {
    /// Usage gate backed by the anon-key store client
    pub gate: UsageGate,
    /// Service-role store client for the webhook and checkout paths
    pub billing_store: Arc<dyn QuotaStore>,
    pub stripe: Option<StripeConfig>,
}

impl AppState {
    pub fn new(
        usage_store: Arc<dyn QuotaStore>,
        billing_store: Arc<dyn QuotaStore>,
        stripe: Option<StripeConfig>,
    ) -> Self {
        Self {
            gate: UsageGate::new(usage_store),
            billing_store,
            stripe,
        }
    }
}

// Middleware for request logging with correlation ID
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("Started {} {} [{}]", method, path, request_id);

    let response = next.run(request).await;
    let duration = start_time.elapsed();
    let status = response.status();

    info!(
        "Completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        status.as_u16(),
        duration.as_secs_f64() * 1000.0
    );

    response
}

// Middleware to capture HTTP errors to Sentry
async fn sentry_error_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    // Capture HTTP 5xx errors to Sentry
    if response.status().is_server_error() {
        let status = response.status();
        error!("HTTP {} error on {} {}", status.as_u16(), method, uri);

        sentry::configure_scope(|scope| {
            scope.set_tag("http.method", method.as_str());
            scope.set_tag("http.url", uri.to_string());
            scope.set_tag("http.status_code", status.as_u16().to_string());
        });

        sentry::capture_message(
            &format!("HTTP {} error on {} {}", status.as_u16(), method, uri),
            sentry::Level::Error,
        );
    }

    response
}

/// Build the application router. Separate from the server loop so tests
/// can drive it directly.
pub fn router(state: AppState) -> Router {
    let api_router = Router::new()
        // Usage gate routes
        .route("/check-usage", post(actions::check_usage))
        .route("/increment-usage", post(actions::increment_usage))
        .route("/usage", post(actions::usage_dispatch))
        // Billing routes
        .route("/create-checkout-session", post(actions::create_checkout_session))
        .route("/stripe-webhook", post(actions::handle_webhook))
        .with_state(state);

    Router::new()
        .nest("/api", api_router)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn(sentry_error_middleware))
        .layer(CorsLayer::permissive())
}

pub async fn start_web_server(interface: String, port: u16, state: AppState) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "web-server");
    });
    info!("Starting web server on {}:{}", interface, port);

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("{interface}:{port}")).await?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install ctrl-c handler: {}", e);
        return;
    }
    info!("Shutdown signal received, draining connections");
}

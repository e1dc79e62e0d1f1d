use axum::{Router, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Initialize Prometheus metrics exporter
/// Returns a handle that can be used to render metrics for scraping
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Serve `GET /metrics` on its own listener so scrapes never compete with
/// API traffic
pub async fn start_metrics_server(
    interface: String,
    port: u16,
    handle: PrometheusHandle,
) -> anyhow::Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render().into_response() }
        }),
    );

    let listener = tokio::net::TcpListener::bind(format!("{interface}:{port}")).await?;
    info!("Metrics server listening on http://{}:{}/metrics", interface, port);

    axum::serve(listener, app).await?;
    Ok(())
}

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use omi_usage::metrics::{init_metrics, start_metrics_server};
use omi_usage::stripe_client::StripeConfig;
use omi_usage::supabase_client::{SupabaseClient, SupabaseConfig};
use omi_usage::web::{AppState, start_web_server};

#[derive(Parser)]
#[command(name = "omi-usage", about = "Usage metering and billing API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Interface to bind
        #[arg(long, default_value = "0.0.0.0")]
        interface: String,
        /// Port for the API
        #[arg(long, default_value_t = 3000)]
        port: u16,
        /// Port for the Prometheus metrics endpoint
        #[arg(long, default_value_t = 9090)]
        metrics_port: u16,
    },
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Sentry must be initialized before the async runtime starts
    let _sentry_guard = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            interface,
            port,
            metrics_port,
        } => {
            let metrics_handle = init_metrics();

            let supabase_config = SupabaseConfig::from_env()?;
            let stripe_config = match StripeConfig::from_env() {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Stripe is not configured, billing routes disabled: {}", e);
                    None
                }
            };

            // One HTTP connection pool shared by both store clients
            let http_client = reqwest::Client::new();
            let usage_store = Arc::new(SupabaseClient::new(http_client.clone(), &supabase_config));
            let billing_store =
                Arc::new(SupabaseClient::new_admin(http_client, &supabase_config));

            let state = AppState::new(usage_store, billing_store, stripe_config);

            tokio::spawn(start_metrics_server(
                interface.clone(),
                metrics_port,
                metrics_handle,
            ));

            info!("Starting omi-usage API");
            start_web_server(interface, port, state).await
        }
    }
}

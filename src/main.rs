//! donation-ledger server entry point.
//!
//! Starts the Axum HTTP server with the payment, donation and campaign
//! endpoints.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use donation_ledger::api;
use donation_ledger::app_state::AppState;
use donation_ledger::config::{LedgerConfig, LogFormat};
use donation_ledger::domain::EventBus;
use donation_ledger::gateway::{StripeClient, ZaloPayClient};
use donation_ledger::persistence::LedgerBackend;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = LedgerConfig::from_env()?;
    init_tracing(config.log_format);
    tracing::info!(addr = %config.listen_addr, "starting donation-ledger");

    // Build persistence and gateway layers
    let store = LedgerBackend::from_config(&config).await?;
    let zalopay = ZaloPayClient::new(config.zalopay.clone())?;
    let stripe = config
        .stripe
        .clone()
        .map(StripeClient::new)
        .transpose()?;
    if stripe.is_none() {
        tracing::info!("card payments disabled, Stripe secrets not configured");
    }
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_API_TOKEN not set, operator routes are closed");
    }

    // Build service layer
    let event_bus = EventBus::new(config.event_bus_capacity);
    let event_log = spawn_event_log(&event_bus);
    let app_state = AppState::new(
        store,
        zalopay,
        stripe,
        event_bus,
        config.admin_token.clone(),
    );

    let app = api::app(app_state, config.request_timeout);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    event_log.abort();
    tracing::info!("server stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Logs every applied ledger transition.
fn spawn_event_log(event_bus: &EventBus) -> JoinHandle<()> {
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(target: "ledger_events", event = %json, "ledger event"),
                    Err(err) => tracing::warn!(error = %err, "unserializable ledger event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

//! statefeed server binary

use std::sync::Arc;

use tracing::{info, warn};

use statefeed::api::AppState;
use statefeed::config::Config;
use statefeed::gateway::{Ed25519Signer, GatewayClient, GatewayOptions, WsConnector};
use statefeed::logging;
use statefeed::metrics::MetricsAggregator;
use statefeed::repository::EventRepository;
use statefeed::store::EventStore;

#[tokio::main]
async fn main() -> statefeed::Result<()> {
    logging::init();
    let config = Config::from_env();

    let repository = match EventRepository::open(&config.data_dir, config.retention.clone()) {
        Ok(repo) => Some(Arc::new(repo)),
        Err(err) => {
            warn!(%err, "repository unavailable, running memory-only");
            None
        }
    };

    let store = match &repository {
        Some(repo) => Arc::new(EventStore::with_repository(
            config.retention.clone(),
            Arc::clone(repo),
        )),
        None => Arc::new(EventStore::new(config.retention.clone())),
    };

    let metrics = Arc::new(MetricsAggregator::new());
    metrics.seed(&store.snapshot());

    // Metrics observe before the API bridge forwards, so forwarded
    // messages carry counters that already include the event.
    let observer = Arc::clone(&metrics);
    store.subscribe(Arc::new(move |notification| {
        observer.observe(notification);
    }));

    let state = AppState::new(
        Arc::clone(&store),
        repository,
        Some(Arc::clone(&metrics)),
        config.stream_heartbeat,
    );

    let gateway = if config.signing_key.is_empty() {
        warn!("no signing key configured, gateway client disabled (API-only mode)");
        None
    } else {
        let signer = Arc::new(Ed25519Signer::from_hex(&config.signing_key)?);
        let client = GatewayClient::new(
            WsConnector::new(config.gateway_url.clone()),
            signer,
            GatewayOptions::from_config(&config),
            Arc::clone(&store),
        );
        info!(url = %config.gateway_url, "starting gateway client");
        Some(client.spawn())
    };

    let app = statefeed::api::create_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "serving API");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    if let Some(handle) = gateway {
        handle.disconnect().await;
    }
    info!("statefeed stopped");
    Ok(())
}

//! AOG server library.
//!
//! Provides a reusable server function to serve AOG either for the binary, or for the integration tests.

#![deny(missing_docs)]

mod admin;
mod engine;
mod health;

use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use axum::{Router, routing::get};
use config::Config;
use engine::OllamaEngines;
use flavor::FlavorRegistry;
use gateway::Gateway;
use registry::Registry;
use telemetry::{EventBus, EventData, EventKind};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Configuration for serving AOG.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized AOG TOML configuration.
    pub config: Config,
    /// Receives the lifecycle events of every request.
    pub events: EventBus,
    /// Stops the server gracefully once cancelled.
    pub shutdown: CancellationToken,
}

/// Starts and runs the AOG server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        events,
        shutdown,
    }: ServeConfig,
) -> anyhow::Result<()> {
    let flavors = FlavorRegistry::load(config.gateway.flavors_dir.as_deref())?;
    log::info!("loaded flavors: {}", flavors.names().collect::<Vec<_>>().join(", "));

    let store = registry::store::open(&config.store)?;
    let registry = Registry::new(store, Arc::new(flavors));
    registry.seed_default_services()?;

    let gateway = Gateway::new(&config.gateway, registry, events.clone())?;
    let engines = Arc::new(OllamaEngines::new()?);

    let prefix = format!("/aog/{}", gateway.api_version());

    let admin = admin::router(admin::AdminState {
        gateway: gateway.clone(),
        engines,
        import: config.import.clone(),
    })
    .route("/health", get(health::health));

    let mut app = Router::new()
        .route("/", get(health::banner))
        .nest(&prefix, admin)
        .merge(gateway.router());

    if config.server.health.enabled {
        if let Some(listen) = config.server.health.listen {
            tokio::spawn(health::serve_separately(
                listen,
                config.server.health.path.to_string(),
                shutdown.clone(),
            ));
        } else {
            app = app.route(&config.server.health.path, get(health::health));
        }
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    log::info!("AOG gateway listening on http://{listen_address}{prefix}");
    events.notify(EventKind::StartApp, EventData::Message(format!("http://{listen_address}")));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;

    log::info!("AOG gateway stopped");

    Ok(())
}

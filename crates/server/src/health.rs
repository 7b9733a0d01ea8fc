use std::net::SocketAddr;

use axum::{Json, Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Debug, serde::Serialize)]
#[serde(tag = "status")]
pub(crate) enum HealthState {
    #[serde(rename = "UP")]
    Up,
}

/// Liveness only: the gateway answers as long as the process serves HTTP.
pub(crate) async fn health() -> Json<HealthState> {
    Json(HealthState::Up)
}

pub(crate) async fn banner() -> &'static str {
    "AIPC Open Gateway"
}

/// Serves the health path on its own listener until shutdown. Failures are
/// logged, the main listener keeps running.
pub(super) async fn serve_separately(addr: SocketAddr, path: String, shutdown: CancellationToken) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            log::error!("cannot bind the health listener to {addr}: {error}");
            return;
        }
    };

    log::info!("health check served at http://{addr}{path}");

    let app = Router::new().route(&path, get(health));

    if let Err(error) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        log::error!("health listener on {addr} stopped: {error}");
    }
}

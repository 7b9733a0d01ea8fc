use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::bail;
use args::Args;
use clap::Parser;
use config::Config;
use pid::PidFile;
use server::ServeConfig;
use telemetry::{EventBus, LogListener};
use tokio_util::sync::CancellationToken;

mod args;
mod logger;
mod pid;

const DEFAULT_PORT: u16 = 16688;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.config()?;

    logger::init(&args)?;

    let serve_config = serve_config(&args, config)?;
    let pid_file = PidFile::create(&serve_config.config.store.data_dir)?;

    tokio::spawn(shutdown_on_ctrl_c(serve_config.shutdown.clone()));

    let result = server::serve(serve_config).await;
    drop(pid_file);

    if let Err(e) = result {
        log::error!("Server failed to start: {e}");
        std::process::exit(1);
    }

    Ok(())
}

fn serve_config(args: &Args, config: Config) -> anyhow::Result<ServeConfig> {
    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT)));

    if !listen_address.ip().is_loopback() {
        bail!("refusing to listen on {listen_address}: the gateway only serves loopback addresses");
    }

    Ok(ServeConfig {
        listen_address,
        config,
        events: EventBus::new().with_listener(LogListener),
        shutdown: CancellationToken::new(),
    })
}

async fn shutdown_on_ctrl_c(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("cannot listen for Ctrl-C: {e}");
        return;
    }

    log::info!("received Ctrl-C, shutting down");
    shutdown.cancel();
}

#![forbid(unsafe_code)]

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use webcast_gateway::media::{KurentoClient, MediaEngine};
use webcast_gateway::web::build_cors_layer;
use webcast_gateway::{router, AppState, Channel, Config, Peers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::parse();
    webcast_common::init_tracing_with_default(&config.log_level);

    let engine = KurentoClient::connect(&config.media_engine_url, config.kurento_options())
        .await
        .with_context(|| format!("media engine unreachable at {}", config.media_engine_url))?;
    let engine_lost = engine.closed();
    let engine: Arc<dyn MediaEngine> = Arc::new(engine);

    let peers = Peers::new();
    let channel = Arc::new(Channel::new(engine, peers.clone()));

    if !config.webroot.is_dir() {
        warn!(
            "webroot {} does not exist; only /ws and /health will answer",
            config.webroot.display()
        );
    }
    if config.cors_origins.is_empty() {
        info!("no CORS origins configured; cross-origin /health requests will be blocked");
    }
    let app = router(AppState { channel, peers }, &config.webroot)
        .layer(build_cors_layer(&config.cors_origins));

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!("HTTP  : http://{}", listener.local_addr()?);
    info!("WS    : {}", config.ws_url());

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .into_future();

    tokio::select! {
        served = server => served?,
        () = engine_lost => anyhow::bail!("media engine connection lost, exiting"),
    }

    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

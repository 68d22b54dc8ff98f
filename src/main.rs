use std::net::{Ipv4Addr, SocketAddr};

use dirauth::{app, initialize_state, telemetry};
use tokio::net::TcpListener;

const DEFAULT_PORT: u16 = 8081;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::setup_tracing();

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "prometheus recorder not installed");
            None
        },
    };

    let path = std::env::var_os("CONFIG_PATH").map(Into::into);
    let state = match initialize_state(path, metrics) {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "cannot start with this configuration");
            return Err(err);
        },
    };

    let port = match std::env::var("PORT") {
        Ok(port) => port.parse()?,
        Err(_) => DEFAULT_PORT,
    };
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

//! Gateway service entry point.
//!
//! Session gateway between TCP clients and the cluster's backend services.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use nats_client::NatsClient;
use session_gateway::{
    create_router, AppState, BrokerRpcClient, ClientListener, ControlPlaneListener, Gateway,
    GatewayConfig, GatewayStats, GatewayWorker,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting session gateway");

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };
    config.log();

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    let nats = NatsClient::connect_named(&config.broker_url, Some(&config.gate_name)).await?;
    info!("Connected to broker");

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(config.event_queue_size);
    let stats = Arc::new(GatewayStats::new());

    // Gateway core, driven by the worker
    let rpc = Arc::new(BrokerRpcClient::new(
        Arc::new(nats.clone()),
        events_tx.clone(),
        config.rpc_timeout,
    ));
    let gateway = Gateway::new(config.settings(), rpc, stats.clone());
    let worker_handle = tokio::spawn(GatewayWorker::new(gateway, events_rx).run(shutdown.clone()));

    // Control plane
    let control = ControlPlaneListener::new(nats.clone(), config.gate_name.clone(), events_tx.clone());
    let control_shutdown = shutdown.clone();
    let control_handle = tokio::spawn(async move {
        if let Err(e) = control.run(control_shutdown).await {
            error!("Control plane error: {:?}", e);
        }
    });

    // Client listener
    let client_listener = ClientListener::new(
        TcpListener::bind(&config.listen_addr).await?,
        events_tx,
        config.connection_settings(),
    );
    info!("Clients connect on {}", config.listen_addr);
    let listener_handle = tokio::spawn(client_listener.run(shutdown.clone()));

    // Health endpoint
    let state = Arc::new(AppState {
        gate_name: config.gate_name.clone(),
        stats,
    });
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Health endpoint listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down gateway...");
    shutdown.cancel();
    let _ = listener_handle.await;
    let _ = control_handle.await;
    let _ = worker_handle.await;
    if let Err(e) = nats.flush().await {
        warn!("Failed to flush broker connection: {}", e);
    }

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}

//! exchange-audit Server Entry Point

use anyhow::Context;
use clap::Parser;
use exchange_audit::cli::{serve, Cli, Commands};
use exchange_audit::dispatch::AuditDispatcher;
use exchange_audit::middleware::AuditState;
use exchange_audit::{config, logging, sink};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info};

/// 上流呼び出しのタイムアウト
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let _log_guard = logging::init().context("failed to initialize logging")?;
            run_server(args).await
        }
    }
}

async fn run_server(args: serve::ServeArgs) -> anyhow::Result<()> {
    let config = config::from_env().context("invalid audit configuration")?;
    let sink = sink::build_sink(&config).context("failed to configure audit sink")?;
    let dispatcher = AuditDispatcher::new(
        sink,
        config.dispatch_buffer_capacity,
        config.delivery_timeout(),
    );

    let http = reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .build()
        .context("failed to build upstream HTTP client")?;
    let state = AuditState::from_config(&config, dispatcher.clone());
    let app = serve::router(state, http, args.upstream.clone());

    let bind_addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;

    info!(
        addr = %bind_addr,
        upstream = %args.upstream,
        service = %config.service_name,
        sink = ?config.sink.kind,
        "Audit relay server listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("Draining pending audit sessions");
    dispatcher.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use zmqhub::cli::Cli;
use zmqhub::{logging, web, AppContext, EventBus, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let settings = Arc::new(cli.apply(settings));
    logging::init(&settings)?;

    let (bus, bus_task) =
        EventBus::new(settings.client_queue_size).spawn(settings.event_queue_size);
    let ctx = AppContext::new(Arc::clone(&settings), bus.clone());

    ctx.hub
        .start()
        .await
        .context("starting broker")?;
    tracing::info!(
        ingress = %settings.ingress_bind,
        egress = %settings.egress_bind,
        inject = %settings.inject_connect,
        "Hub started"
    );

    let hub = Arc::clone(&ctx.hub);
    let listener = match tokio::net::TcpListener::bind(settings.http_addr()).await {
        Ok(listener) => listener,
        Err(e) => {
            hub.stop().await;
            return Err(e).with_context(|| format!("binding HTTP on {}", settings.http_addr()));
        }
    };
    tracing::info!(addr = %settings.http_addr(), "HTTP server listening");

    let served = axum::serve(listener, web::router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    hub.stop().await;
    bus.shutdown().await;
    if let Err(e) = bus_task.await {
        tracing::warn!(error = %e, "Event bus task ended abnormally");
    }
    tracing::info!("Shut down");

    served.context("HTTP server")
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

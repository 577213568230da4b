//! ws-engine server binary.
//!
//! Serves an echo handler on the configured prefix until Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use http::header::{HeaderValue, CONTENT_TYPE};

use ws_engine::config::{load_config, EngineConfig};
use ws_engine::lifecycle::{spawn_signal_handler, Shutdown};
use ws_engine::observability::{logging, metrics};
use ws_engine::{Handler, HttpServer, RequestContext};

#[derive(Parser)]
#[command(name = "ws-engine")]
#[command(about = "HTTP/1.1 server engine with WebSocket session registries", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Prefix to listen on, e.g. `http://*:8080/` (overrides the config)
    #[arg(short, long)]
    url: Option<String>,
}

/// Answers every request with its method, path and body.
struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn handle(&self, ctx: &mut RequestContext<'_>) -> ws_engine::Result<()> {
        let body = ctx.body().read_to_end().await?;
        let mut reply = format!("{} {}\n", ctx.request().method(), ctx.request().url().path()).into_bytes();
        reply.extend_from_slice(&body);
        ctx.response_mut()
            .insert_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        ctx.send(&reply).await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    if let Some(url) = cli.url {
        config.server.url = url;
    }

    logging::init_logging(Some(config.observability.log_filter.as_str()));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ws-engine starting");

    tracing::info!(
        url = %config.server.url,
        max_connections = config.server.max_connections,
        first_request_timeout_secs = config.connection.first_request_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let server = HttpServer::from_config(&config)?;
    server.set_handler(Arc::new(Echo));
    server.start().await?;

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);
    shutdown.wait().await;

    server.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

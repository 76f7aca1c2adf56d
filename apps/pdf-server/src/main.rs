//! HTML to PDF server
//!
//! Accepts HTML over HTTP and renders it to PDF on a bounded pool of headless
//! Chrome workers. Provides:
//!
//! - `POST /pdf/generate` (and the legacy `POST /`) for rendering
//! - `GET /health` with worker pool statistics
//! - `GET /v3/api-docs` and a Swagger UI page at `GET /`
//!
//! ## Architecture
//!
//! Handlers never touch a browser directly. Each request becomes a job on the
//! `render_pool::WorkerPool`, which caps concurrent browsers, queues the rest in
//! arrival order, and replaces crashed workers. On shutdown the listener stops
//! first, then the pool drains so in-flight renders still get their response.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use render_pool::{ChromiumConfig, ChromiumFactory, PoolConfig, WorkerPool};
use tokio::signal;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod error;
#[cfg(test)]
mod tests;

use api::{handle_api_docs, handle_generate, handle_health, handle_swagger_ui};

/// Command-line arguments for the PDF server
#[derive(Parser, Debug)]
#[command(name = "pdf-server")]
#[command(about = "HTML to PDF rendering service backed by headless Chrome")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// TOML file with pool settings; flags below override it
    #[arg(short, long, env = "POOL_CONFIG")]
    config: Option<PathBuf>,

    /// Browsers started at launch and kept warm (default: 2)
    #[arg(long, env = "CONCURRENCY")]
    concurrency: Option<usize>,

    /// Maximum number of browsers (default: 5)
    #[arg(long, env = "MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Render timeout in milliseconds (default: 30000)
    #[arg(long, env = "RENDER_TIMEOUT_MS")]
    render_timeout_ms: Option<u64>,

    /// How long a request may wait for a free browser, in milliseconds
    #[arg(long, env = "QUEUE_TIMEOUT_MS")]
    queue_timeout_ms: Option<u64>,

    /// Maximum number of requests waiting for a browser
    #[arg(long, env = "MAX_QUEUE_DEPTH")]
    max_queue_depth: Option<usize>,

    /// Chrome/Chromium binary (auto-detected if omitted)
    #[arg(long, env = "CHROME_PATH")]
    chrome_path: Option<PathBuf>,

    /// Rate limit: requests per second per IP (0 disables)
    #[arg(long, env = "RATE_LIMIT", default_value = "10")]
    rate_limit: u32,

    /// Maximum request body size in megabytes
    #[arg(long, env = "BODY_LIMIT_MB", default_value = "10")]
    body_limit_mb: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Defaults, then the TOML file, then flags and environment
    fn pool_config(&self) -> anyhow::Result<PoolConfig> {
        let mut config = match &self.config {
            Some(path) => PoolConfig::from_file(path)?,
            None => PoolConfig::default(),
        };

        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max_concurrency) = self.max_concurrency {
            config.max_concurrency = max_concurrency;
        }
        if let Some(render_timeout_ms) = self.render_timeout_ms {
            config.render_timeout_ms = render_timeout_ms;
        }
        if self.queue_timeout_ms.is_some() {
            config.queue_timeout_ms = self.queue_timeout_ms;
        }
        if self.max_queue_depth.is_some() {
            config.max_queue_depth = self.max_queue_depth;
        }

        config.validate()?;
        Ok(config)
    }

    fn chromium_config(&self, pool: &PoolConfig) -> ChromiumConfig {
        ChromiumConfig {
            chrome_path: self.chrome_path.clone(),
            // The pool enforces the render bound; CDP requests only need to outlive it
            request_timeout: pool.render_timeout() + pool.health_check_timeout(),
            ..ChromiumConfig::default()
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: WorkerPool,
}

/// Routes and the middleware every deployment gets
pub fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(handle_swagger_ui).post(handle_generate))
        .route("/pdf/generate", post(handle_generate))
        .route("/health", get(handle_health))
        .route("/v3/api-docs", get(handle_api_docs))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting PDF server on {}:{}", args.host, args.port);

    let pool_config = args.pool_config().context("Invalid pool configuration")?;
    let factory = ChromiumFactory::new(args.chromium_config(&pool_config));
    info!(
        "Launching {} browser(s), up to {}",
        pool_config.concurrency, pool_config.max_concurrency
    );
    let pool = WorkerPool::launch(pool_config, factory)
        .await
        .context("Failed to start render workers")?;

    let state = AppState { pool: pool.clone() };
    let mut app = router(state, args.body_limit_mb * 1024 * 1024);

    if args.rate_limit > 0 {
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(args.rate_limit.into())
                .burst_size(args.rate_limit * 2)
                .finish()
                .context("Failed to create rate limiter config")?,
        );
        app = app.layer(GovernorLayer {
            config: governor_conf,
        });
        info!("Rate limit: {} requests/second per IP", args.rate_limit);
    } else {
        warn!("Rate limiting disabled");
    }

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped accepting connections, draining render pool");
    pool.drain().await;
    info!("Server shutdown complete");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}

//! Leadgate server — webhook frontend for the lead qualification core.
//!
//! Hosts the WhatsApp-gateway and Telegram webhook endpoints, wires them
//! into `leadgate-core`'s message pipeline, and runs the background queue
//! workers that deliver spreadsheet rows and operator notifications.

mod outbound;
mod routes;
mod state;
mod workers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use clap::Parser;
use leadgate_core::config::Config;
use leadgate_core::handler::MessageHandler;
use leadgate_core::kv::{KvStore, MemoryKv, RedisKv};
use leadgate_core::store::LeadStore;
use leadgate_core::templates::Templates;
use tower_http::trace::TraceLayer;
use tracing_subscriber::prelude::*;

use crate::outbound::{TelegramClient, WahaClient};
use crate::state::AppState;

/// Leadgate server — lead qualification webhook frontend
#[derive(Parser)]
#[command(name = "leadgate-server")]
struct Args {
    /// Path to a custom config file (overrides default search locations)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

/// Default tracing directives enabling info-level logs for this crate and leadgate-core.
const DEFAULT_DIRECTIVES: &[&str] = &["leadgate_server=info", "leadgate_core=info"];

/// Build the default `EnvFilter`: RUST_LOG (if set) plus our default directives.
fn default_env_filter() -> anyhow::Result<tracing_subscriber::EnvFilter> {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in DEFAULT_DIRECTIVES {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Initialize the tracing subscriber.
///
/// When `config.logging` is `Some`, creates a layered subscriber with both
/// stdout and rolling file output. When `None`, uses stdout-only.
///
/// Returns the non-blocking writer guard that must be held for the process lifetime.
fn init_tracing(
    config: &Config,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    if let Some(ref lc) = config.logging {
        // Attempt to create the log directory; fall back to stdout-only on failure.
        if let Err(e) = std::fs::create_dir_all(&lc.directory) {
            eprintln!(
                "Warning: Failed to create log directory '{}': {}. Falling back to stdout-only.",
                lc.directory, e
            );
            tracing_subscriber::fmt()
                .with_env_filter(default_env_filter()?)
                .init();
            return Ok(None);
        }

        // Map rotation string to the tracing-appender rotation type.
        let rotation = match lc.rotation.as_str() {
            "daily" => tracing_appender::rolling::Rotation::DAILY,
            "hourly" => tracing_appender::rolling::Rotation::HOURLY,
            "never" => tracing_appender::rolling::Rotation::NEVER,
            other => {
                eprintln!("Warning: Unknown rotation '{}', falling back to daily", other);
                tracing_appender::rolling::Rotation::DAILY
            }
        };

        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix("leadgate-server")
            .filename_suffix("log")
            .max_log_files(lc.max_files)
            .build(&lc.directory)
            .context("Failed to create rolling file appender")?;

        // Wrap in a non-blocking writer; guard must be kept alive for the process lifetime.
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let env_filter = default_env_filter()?;
        let stdout_layer = tracing_subscriber::fmt::layer();
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .with(file_layer)
            .init();

        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(default_env_filter()?)
            .init();
        Ok(None)
    }
}

/// Resolve the Telegram bot token: env var first, then config.
///
/// The token is **never** passed to any tracing macro.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN")
        && !token.is_empty()
    {
        return Some(token);
    }
    config.telegram.as_ref().and_then(|t| t.token.clone())
}

/// Resolve the gateway API key: env var first, then config.
pub fn resolve_waha_api_key(config: &Config) -> Option<String> {
    if let Ok(key) = std::env::var("WAHA_API_KEY")
        && !key.is_empty()
    {
        return Some(key);
    }
    config.waha.as_ref().and_then(|w| w.api_key.clone())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 1. Load application configuration FIRST (tracing init depends on config).
    let config = Config::load(args.config.as_deref()).context("Failed to load config")?;

    // 2. Initialize tracing (stdout-only or stdout+file based on config).
    let _guard = init_tracing(&config)?;

    tracing::info!("Starting Leadgate server");

    // 3. Open the lead store and run migrations.
    let store = Arc::new(
        LeadStore::new(&config.database.url)
            .await
            .context("Failed to initialize lead storage")?,
    );

    // 4. Connect the shared KV store; fall back to in-process when Redis is
    //    not configured (single-node deployments and local development).
    let (kv, kv_backend): (Arc<dyn KvStore>, &'static str) = match &config.redis.url {
        Some(url) => {
            let redis = RedisKv::connect(url)
                .await
                .context("Failed to connect to Redis")?;
            (Arc::new(redis), "redis")
        }
        None => {
            tracing::warn!(
                "no redis.url configured; using in-process store — \
                 per-user serialization only holds within this process"
            );
            (Arc::new(MemoryKv::new()), "memory")
        }
    };

    // 5. Build the message pipeline.
    let templates = Templates::new(config.templates.clone());
    let handler = Arc::new(MessageHandler::new(
        Arc::clone(&store),
        Arc::clone(&kv),
        templates,
        &config.pipeline,
    ));

    // 6. Outbound clients for the configured transports.
    let waha = config
        .waha
        .as_ref()
        .map(|w| {
            Arc::new(WahaClient::new(
                w.base_url.clone(),
                w.session.clone(),
                resolve_waha_api_key(&config),
            ))
        });
    let telegram = resolve_telegram_token(&config).map(|token| Arc::new(TelegramClient::new(&token)));
    if waha.is_none() && telegram.is_none() {
        tracing::warn!("no transport configured; webhooks will be accepted but replies dropped");
    }

    // 7. Start the queue workers.
    let (shutdown_tx, worker_handles) =
        workers::spawn_workers(Arc::clone(&kv), &config, telegram.clone());

    // 8. Assemble the HTTP surface.
    let app_state = AppState {
        handler,
        store,
        waha,
        telegram,
        kv_backend,
    };
    let app = Router::new()
        .route("/waha/webhook", post(routes::waha_webhook))
        .route("/telegram/webhook", post(routes::telegram_webhook))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // 9. Serve until ctrl-c.
    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;
    tracing::info!("Listening on {}", config.server.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("Server error")?;

    // 10. Drain the workers.
    tracing::info!("Server stopped — shutting down workers");
    shutdown_tx.send(true).ok();
    for handle in worker_handles {
        handle.await.ok();
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

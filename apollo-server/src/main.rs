//! Apollo Config Service
//!
//! Serves rendered namespace configuration and long-poll change
//! notifications to config clients.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use apollo_core::config::ConfigStore;
use apollo_core::events::dispatch_job_channel;
use apollo_core::framework::DatabaseProcessor;
use apollo_core::processors::{
    AppNamespaceCache, ConfigFileCache, GrayReleaseRulesHolder, NotificationDispatcher,
    NotificationService, ReleaseMessageCache, ReleaseMessageScanner, TokioClock,
};
use apollo_core::render::ReleaseConfigRenderer;
use apollo_core::watch_keys::{AppNamespaceMetadata, WatchKeyAssembler};
use clap::Parser;
use config::{ConfigLoader, get_database_url};
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Apollo config service - config delivery and change notification
#[derive(Parser, Debug)]
#[command(name = "apollo-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./apollo-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting apollo-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let db = DatabaseProcessor::new(db_pool.clone());

    // Metadata and gray rules must be loaded before the first request is
    // assembled into watch keys or rendered.
    let app_namespaces = Arc::new(AppNamespaceCache::new());
    let count = app_namespaces.rebuild(&db).await?;
    tracing::info!(count, "App namespaces loaded");

    let gray_rules = Arc::new(GrayReleaseRulesHolder::new());
    let count = gray_rules.reload(&db).await?;
    tracing::info!(count, "Gray release rules loaded");

    let release_messages = Arc::new(ReleaseMessageCache::new(Arc::new(db.clone())));
    release_messages.warm_up().await.map_err(|e| {
        tracing::error!(loaded = e.loaded, "Failed to warm up release message cache: {}", e);
        e
    })?;

    let metadata: Arc<dyn AppNamespaceMetadata> = app_namespaces.clone();
    let renderer = Arc::new(ReleaseConfigRenderer::new(
        Arc::new(db.clone()),
        metadata.clone(),
        gray_rules.clone(),
    ));
    let config_files = Arc::new(ConfigFileCache::new(
        WatchKeyAssembler::new(metadata.clone()),
        renderer,
        gray_rules.clone(),
        &config.config_file_cache,
    ));

    let long_poll = ConfigStore::new(config.long_poll.clone());
    let (dispatch_tx, dispatch_rx) = dispatch_job_channel();
    let notifications = Arc::new(NotificationService::new(
        WatchKeyAssembler::new(metadata),
        release_messages.clone(),
        long_poll.clone(),
        dispatch_tx,
    ));

    // Seeded from the warm cache so rows written after warm-up are pushed.
    let mut scanner = ReleaseMessageScanner::new(
        Arc::new(db.clone()),
        config.scan.release_message_scan_interval,
    );
    scanner.start_after(release_messages.max_id_scanned());
    scanner.add_listener(release_messages.clone());
    scanner.add_listener(config_files.clone());
    scanner.add_listener(notifications.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = vec![
        tokio::spawn(scanner.run(shutdown_rx.clone())),
        tokio::spawn(
            NotificationDispatcher::new(Arc::new(TokioClock), dispatch_rx, shutdown_rx.clone())
                .run(),
        ),
        tokio::spawn(release_messages.clone().run(
            config.scan.release_message_cache_scan_interval,
            shutdown_rx.clone(),
        )),
        tokio::spawn(app_namespaces.clone().run(
            db.clone(),
            config.scan.app_namespace_scan_interval,
            config.scan.app_namespace_rebuild_interval,
            shutdown_rx.clone(),
        )),
        tokio::spawn(gray_rules.clone().run(
            db.clone(),
            config.scan.gray_rule_scan_interval,
            shutdown_rx,
        )),
    ];

    let reload_notify = spawn_config_reload_handler(config_loader, long_poll);

    let state = AppState::new(notifications, config_files, release_messages);
    let router = build_router(state);

    let listen_addr = config.server.listen;
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr).await;

    reload_notify.notify_one();

    tracing::info!("Stopping background tasks...");
    let _ = shutdown_tx.send(true);
    for task in background {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

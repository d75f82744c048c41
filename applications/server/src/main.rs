/// Playlog Server - play progress ingestion with write-back buffering
use chrono::Utc;
use clap::{Parser, Subcommand};
use playlog_core::{KeyedStore, MemoryStore, PlayLogStore, UserId};
use playlog_server::{config::ServerConfig, create_router, AppState, BufferBackend, FlushScheduler};
use playlog_storage::{RedbStore, SqlitePlayLogStore};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "playlog-server")]
#[command(about = "Play progress server with write-back buffering", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and the flush scheduler
    Serve {
        /// Configuration file path
        #[arg(short, long, env = "PLAYLOG_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Run one flush pass against the configured stores
    Flush {
        /// Configuration file path
        #[arg(short, long, env = "PLAYLOG_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print a user's play history
    History {
        /// User ID
        #[arg(short, long)]
        user_id: i64,
        /// Configuration file path
        #[arg(short, long, env = "PLAYLOG_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "playlog_server=info,playlog_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            serve(config.as_deref()).await?;
        }
        Commands::Flush { config } => {
            flush_once(config.as_deref()).await?;
        }
        Commands::History { user_id, config } => {
            print_history(UserId::new(user_id), config.as_deref()).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    let config = ServerConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

/// Open the durable and buffer stores named by the configuration
async fn build_state(config: ServerConfig) -> anyhow::Result<AppState> {
    if let Some(db_path) = config.storage.database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
    }

    let pool = playlog_storage::create_pool(&config.storage.database_url).await?;
    playlog_storage::run_migrations(&pool).await?;
    let durable: Arc<dyn PlayLogStore> = Arc::new(SqlitePlayLogStore::new(pool));
    tracing::info!("Database connected");

    let store: Arc<dyn KeyedStore> = match config.buffer.backend {
        BufferBackend::Memory => Arc::new(MemoryStore::new()),
        BufferBackend::Redb => Arc::new(RedbStore::open(&config.buffer.path).await?),
    };
    tracing::info!(backend = ?config.buffer.backend, namespace = %config.buffer.namespace, "Buffer store ready");

    Ok(AppState::new(config, store, durable))
}

async fn serve(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    tracing::info!("Starting Playlog Server");
    tracing::info!("Host: {}", config.server.host);
    tracing::info!("Port: {}", config.server.port);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let app_state = build_state(config).await?;
    let flush = app_state.config.flush.clone();

    let scheduler = FlushScheduler::new(
        Arc::clone(&app_state.flusher),
        flush.interval(),
        flush.pass_timeout(),
    );
    if flush.enabled {
        scheduler.start();
    } else {
        tracing::warn!("Flush scheduler disabled; buffered progress is only flushed on demand");
    }

    let app = create_router(app_state.clone());

    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;

    if app_state.config.buffer.backend == BufferBackend::Memory {
        drain_buffer(&app_state).await;
    }

    tracing::info!("Server stopped");
    Ok(())
}

/// Flush everything still buffered, fresh records included
///
/// The in-process buffer does not survive the process.
async fn drain_buffer(app_state: &AppState) {
    let threshold = app_state.flusher.policy().staleness_threshold();
    let horizon = chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::zero());
    let limit = app_state.config.flush.pass_timeout();

    match tokio::time::timeout(limit, app_state.flusher.run_pass_at(Utc::now() + horizon)).await {
        Ok(Ok(report)) => {
            tracing::info!(flushed = report.flushed, failed = report.failed, "Drained buffer on shutdown");
        }
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to drain buffer on shutdown"),
        Err(_) => tracing::warn!("Draining buffer on shutdown timed out"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn flush_once(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    if config.buffer.backend == BufferBackend::Memory {
        tracing::warn!("Memory buffer backend is empty in a fresh process; nothing to flush");
    }

    let app_state = build_state(config).await?;
    let report = app_state
        .flusher
        .run_pass_with_timeout(app_state.config.flush.pass_timeout())
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn print_history(user_id: UserId, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let app_state = build_state(config).await?;
    let entries = app_state.history.recent(user_id).await?;

    println!("Play history for user {}:", user_id);
    for entry in entries {
        println!(
            "  {} - {} ({:.1}s / {:.1}s) at {}",
            entry.song_id,
            entry.song_name.as_deref().unwrap_or("<unknown>"),
            entry.position_seconds,
            entry.duration_seconds,
            entry.played_at.to_rfc3339(),
        );
    }

    Ok(())
}

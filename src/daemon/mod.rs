// Server bootstrap: config resolution, tracing, wiring of stores and
// services, HTTP serving and the shutdown sequence.

pub mod walltime;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;

use crate::archive::{FsArchive, MetricArchiver, MetricRepositories};
use crate::auth::{Authenticator, TokenAuthenticator};
use crate::coordinator::{CoordinatorSettings, JobCoordinator};
use crate::models::ServerConfig;
use crate::resolver::JobResolver;
use crate::server::{self, AppState};
use crate::storage::sqlite::{Database, SqliteJobStore, SqliteTagStore};
use crate::storage::{JobStore, TagStore};

const APP_DIR: &str = "cc-jobmon";

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

fn read_config(path: &Path, source: &str) -> Result<ServerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", source))?;
    let config: ServerConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", source))?;
    tracing::info!("Loaded config from: {}", path.display());
    Ok(config)
}

/// Load the ServerConfig, first match wins:
///   1. --config CLI flag (passed as config_path)
///   2. JOBMON_CONFIG_DIR environment variable
///   3. Platform config dir (dirs::config_dir()/cc-jobmon/config.json)
///   4. {data_dir}/config.json
///   5. ServerConfig::default()
pub fn load_config(config_path: Option<&Path>) -> Result<ServerConfig> {
    if let Some(path) = config_path {
        if path.exists() {
            return read_config(path, "config file");
        }
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    if let Ok(config_dir) = std::env::var("JOBMON_CONFIG_DIR") {
        let path = PathBuf::from(&config_dir).join("config.json");
        if path.exists() {
            return read_config(&path, "JOBMON_CONFIG_DIR");
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join(APP_DIR).join("config.json");
        if path.exists() {
            return read_config(&path, "platform config dir");
        }
    }

    let path = resolve_data_dir(None).join("config.json");
    if path.exists() {
        return read_config(&path, "data dir");
    }

    tracing::info!("No config file found, using defaults");
    Ok(ServerConfig::default())
}

/// Resolve the data directory: explicit override, then `JOBMON_DATA_DIR`,
/// then the platform data dir (`~/.local/share/cc-jobmon` on Linux).
pub fn resolve_data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }

    if let Ok(d) = std::env::var("JOBMON_DATA_DIR") {
        return PathBuf::from(d);
    }

    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Overrides given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub verbose: bool,
}

/// Load the config and apply CLI overrides. Returns the config with
/// `data_dir` filled in.
pub fn resolve_config(opts: &ServeOptions) -> Result<ServerConfig> {
    let mut config = load_config(opts.config_path.as_deref())?;
    config
        .walltime_grace_secs()
        .context("Invalid configuration")?;

    if let Some(ref h) = opts.host {
        config.host = h.clone();
    }
    if let Some(p) = opts.port {
        config.port = p;
    }

    let data_dir = if let Some(ref d) = opts.data_dir {
        d.clone()
    } else if let Some(ref d) = config.data_dir {
        d.clone()
    } else {
        resolve_data_dir(None)
    };
    config.data_dir = Some(data_dir);

    Ok(config)
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Always log to stderr; also to a daily rolling file when `log_dir` is set.
/// The returned guard must be held for the lifetime of the process.
pub fn init_tracing(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(log_dir) = log_dir else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init();
        return None;
    };

    if let Err(e) = std::fs::create_dir_all(log_dir) {
        let result = tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init();
        if result.is_ok() {
            tracing::warn!(
                "Could not create log dir {}: {}. Logging to stderr only.",
                log_dir.display(),
                e
            );
        }
        return None;
    }

    let appender = tracing_appender::rolling::daily(log_dir, "jobmon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    if result.is_ok() {
        tracing::info!("Logging to stderr and {}", log_dir.display());
    }
    Some(guard)
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Open the database at the configured location, running migrations.
pub fn open_database(config: &ServerConfig, data_dir: &Path) -> Result<Database> {
    let db_path = config.db_path(data_dir);
    Database::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))
}

/// Build the shared application state from a resolved config.
pub fn build_state(config: ServerConfig, db: Database) -> Result<Arc<AppState>> {
    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| resolve_data_dir(None));

    let job_store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(db.clone()));
    let tag_store: Arc<dyn TagStore> = Arc::new(SqliteTagStore::new(db));

    let repos = MetricRepositories::from_config(&config.clusters)
        .context("Failed to set up metric data repositories")?;
    if repos.is_empty() {
        tracing::warn!("No metric data repository configured; archiving will fail");
    }

    let archive_root = config.archive_path(&data_dir);
    tracing::info!("Job archive at {}", archive_root.display());
    let archiver: Arc<dyn MetricArchiver> =
        Arc::new(FsArchive::new(archive_root, repos.clone()));

    let coordinator = Arc::new(JobCoordinator::new(
        Arc::clone(&job_store),
        Arc::clone(&tag_store),
        Arc::clone(&archiver),
        CoordinatorSettings {
            disable_archive: config.disable_archive,
            clusters: config.clusters.clone(),
        },
    ));
    let resolver = Arc::new(JobResolver::new(job_store, tag_store, archiver, repos));

    let authenticator: Option<Arc<dyn Authenticator>> = if config.disable_authentication {
        tracing::warn!("Authentication is disabled");
        None
    } else {
        if config.api_tokens.is_empty() {
            tracing::warn!("No API tokens configured; every API request will be rejected");
        }
        Some(Arc::new(TokenAuthenticator::new(&config.api_tokens)))
    };

    Ok(Arc::new(AppState {
        coordinator,
        resolver,
        authenticator,
        config: Arc::new(config),
        start_time: Instant::now(),
    }))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Create or migrate the database, then exit.
pub fn init_db(opts: &ServeOptions) -> Result<PathBuf> {
    let config = resolve_config(opts)?;
    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| resolve_data_dir(None));
    let _db = open_database(&config, &data_dir)?;
    Ok(config.db_path(&data_dir))
}

/// Run the HTTP server until Ctrl+C or SIGTERM, then drain outstanding
/// archivings.
pub async fn start_server(opts: ServeOptions) -> Result<()> {
    let config = resolve_config(&opts)?;
    let _log_guard = init_tracing(opts.verbose, config.log_dir.as_deref());

    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| resolve_data_dir(None));
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;
    tracing::info!("Data directory: {}", data_dir.display());

    let db = open_database(&config, &data_dir)?;
    let drain_timeout = Duration::from_secs(config.archive_drain_timeout_secs);
    let walltime_grace = config
        .walltime_grace_secs()
        .context("Invalid configuration")?;
    let walltime_interval = Duration::from_secs(config.walltime_check_interval_secs.max(1));
    let bind_addr = format!("{}:{}", config.host, config.port);

    let state = build_state(config, db)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());

    let walltime_handle = if walltime_grace > 0 {
        tracing::info!(
            "Stopping jobs exceeding their walltime by {}s, checking every {:?}",
            walltime_grace,
            walltime_interval
        );
        Some(walltime::spawn(
            Arc::clone(&state.coordinator),
            walltime_grace,
            walltime_interval,
            shutdown_rx.clone(),
        ))
    } else {
        None
    };

    let router = server::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context(format!("Failed to bind to {}", bind_addr))?;
    tracing::info!("Listening on http://{}", bind_addr);

    let mut server_shutdown_rx = shutdown_rx;
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                server_shutdown_rx.changed().await.ok();
                tracing::info!("HTTP server received shutdown signal");
            })
            .await
            .ok();
    });

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM signal");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C signal");
    }

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;
    if let Some(handle) = walltime_handle {
        let _ = handle.await;
    }

    if !state.coordinator.tracker().drain(drain_timeout).await {
        tracing::warn!("Exiting with archivings still outstanding");
    }

    tracing::info!("Server exited cleanly.");
    Ok(())
}

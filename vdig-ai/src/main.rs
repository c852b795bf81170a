//! vdig-ai - Video transcript digest service
//!
//! Accepts video and collection references over HTTP, acquires a transcript
//! for every resolved video and generates learning artifacts from it.
//! Clients poll `/api/tasks` for progress.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vdig_common::config::{self as common_config, TomlConfig};
use vdig_common::events::TaskEvent;

use vdig_ai::config::{ensure_root_folder, EngineSettings, ModelRegistry};
use vdig_ai::services::{BilibiliClient, CommandTranscriber, DirectoryWorkspaces, OpenAiCompatClient};
use vdig_ai::{AppState, EngineDeps, TaskEngine};

/// Upper bound on waiting for in-flight tasks after the server stopped
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Command-line arguments for vdig-ai
#[derive(Parser, Debug)]
#[command(name = "vdig-ai")]
#[command(about = "Video transcript digest service")]
#[command(version)]
struct Args {
    /// Bootstrap TOML config file
    #[arg(short, long, env = "VDIG_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind (overrides [server] host)
    #[arg(long, env = "VDIG_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides [server] port)
    #[arg(short, long, env = "VDIG_PORT")]
    port: Option<u16>,

    /// Storage root holding the workspaces (overrides root_folder)
    #[arg(short, long, env = "VDIG_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = common_config::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(root) = &args.root_folder {
        config.root_folder = Some(root.clone());
    }
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config);

    if args.init_config {
        return write_default_config(&config, args.config);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("VDIG_GIT_HASH"),
        built = env!("VDIG_BUILD_TIMESTAMP"),
        profile = env!("VDIG_BUILD_PROFILE"),
        "Starting vdig-ai"
    );

    let root_folder = ensure_root_folder(&config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Root folder: {}", root_folder.display());

    let engine = build_engine(&config, root_folder)?;
    engine.start().await;
    spawn_event_logger(&engine);

    let app = vdig_ai::build_router(AppState::new(engine.clone()));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid [server] host/port")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if tokio::time::timeout(SHUTDOWN_GRACE, engine.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "In-flight tasks did not finish in time"
        );
    }

    info!("Server shutdown complete");
    Ok(())
}

/// RUST_LOG wins; otherwise the `[logging] level` from the config
fn init_tracing(config: &TomlConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "vdig_ai={level},vdig_common={level},tower_http=info",
            level = config.logging.level
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn write_default_config(config: &TomlConfig, cli_path: Option<PathBuf>) -> Result<()> {
    let path = common_config::resolve_config_path(cli_path.as_deref())
        .or_else(common_config::user_config_path)
        .context("No config path: pass --config or set VDIG_CONFIG")?;
    common_config::write_toml_config(config, &path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Configuration written to {}", path.display());
    Ok(())
}

fn build_engine(config: &TomlConfig, root_folder: PathBuf) -> Result<Arc<TaskEngine>> {
    let platform =
        BilibiliClient::new(&config.platform).context("Failed to create platform client")?;
    let generator = OpenAiCompatClient::new(&config.platform.user_agent)
        .context("Failed to create generation client")?;
    if config.asr.command.is_none() {
        tracing::warn!("No [asr] command configured, ASR fallback will fail");
    }

    let models = ModelRegistry::from_toml(config);
    if models.is_empty() {
        tracing::warn!("No [[models]] configured, every submission will be rejected");
    }

    let deps = EngineDeps {
        platform: Arc::new(platform),
        transcriber: Arc::new(CommandTranscriber::new(config.asr.command.clone())),
        generator: Arc::new(generator),
        workspaces: Arc::new(DirectoryWorkspaces::new(root_folder)),
        models,
    };

    Ok(TaskEngine::new(deps, EngineSettings::from_toml(config)))
}

/// Debug-level trace of every task event
fn spawn_event_logger(engine: &TaskEngine) {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TaskEvent::TasksSubmitted { task_ids, .. }) => {
                    tracing::debug!(count = task_ids.len(), "event: tasks submitted");
                }
                Ok(TaskEvent::StatusChanged {
                    task_id,
                    old_status,
                    new_status,
                    ..
                }) => {
                    tracing::debug!(%task_id, from = %old_status, to = %new_status, "event: status changed");
                }
                Ok(TaskEvent::RetryScheduled {
                    task_id,
                    retry_count,
                    ..
                }) => {
                    tracing::debug!(%task_id, retry_count, "event: retry scheduled");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

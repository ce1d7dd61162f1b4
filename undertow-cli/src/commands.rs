//! CLI command implementations

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand};
use undertow_core::watchdog::watch_parent;
use undertow_core::{
    MixpanelTelemetry, NoopTelemetry, RegistryHandle, ShutdownSignal, Telemetry, UndertowConfig,
    spawn_registry,
};
use undertow_sim::{LocalLibrary, LocalSwarmFactory, SwarmConfig};
use undertow_web::{AppState, run_server};

/// How long open streams get to finish once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the streaming server
    Serve(ServeArgs),
    /// Print magnet links for the videos in a directory
    Library {
        /// Directory to scan
        dir: PathBuf,
    },
}

/// Options for `undertow serve`. Unset options fall back to the environment,
/// then to built-in defaults.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind to
    #[arg(long)]
    host: Option<IpAddr>,

    /// Keep downloaded files when a session is removed
    #[arg(short, long)]
    keep: bool,

    /// Shut down when this process exits
    #[arg(short = 'i', long = "ppid")]
    parent_pid: Option<u32>,

    /// Seconds without connections before a session pauses
    #[arg(short = 'a', long, value_name = "SECONDS")]
    pause_timeout: Option<u64>,

    /// Seconds a paused session waits before it is removed
    #[arg(short = 'r', long, value_name = "SECONDS")]
    remove_timeout: Option<u64>,

    /// Mixpanel project token; telemetry is off without one
    #[arg(short = 't', long)]
    mixpanel_token: Option<String>,

    /// Base64 JSON object added to every telemetry event
    #[arg(short = 'd', long)]
    mixpanel_data: Option<String>,

    /// Directory used when a request names none
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Serve videos from this directory through the simulated swarm
    #[arg(long)]
    library: Option<PathBuf>,

    /// Simulated swarm throughput in KiB/s, 0 for unthrottled
    #[arg(long, default_value = "4096")]
    library_rate: u64,
}

impl ServeArgs {
    /// Layers the flags over `config`.
    pub fn apply(&self, mut config: UndertowConfig) -> UndertowConfig {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if self.keep {
            config.storage.keep_files = true;
        }
        if let Some(dir) = &self.download_dir {
            config.storage.default_download_dir = dir.clone();
        }
        if let Some(pid) = self.parent_pid {
            config.watchdog.parent_pid = Some(pid);
        }
        if let Some(seconds) = self.pause_timeout {
            config.lifecycle.pause_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = self.remove_timeout {
            config.lifecycle.remove_timeout = Duration::from_secs(seconds);
        }
        if let Some(token) = &self.mixpanel_token {
            config.telemetry.mixpanel_token = Some(token.clone());
        }
        if let Some(data) = &self.mixpanel_data {
            config.telemetry.mixpanel_data = Some(data.clone());
        }
        config
    }

    fn swarm_config(&self) -> SwarmConfig {
        SwarmConfig {
            bytes_per_second: self.library_rate.saturating_mul(1024),
            ..SwarmConfig::default()
        }
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of whichever command fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve(args) => serve(args).await,
        Commands::Library { dir } => list_library(dir).await,
    }
}

/// Runs the server until `/shutdown`, SIGINT or the parent process exits.
///
/// # Errors
/// - Library directory cannot be scanned
/// - Telemetry context is not base64 JSON
/// - HTTP server fails to bind or serve
pub async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.apply(UndertowConfig::from_env());

    let library = match &args.library {
        Some(dir) => LocalLibrary::scan(dir)
            .await
            .with_context(|| format!("Failed to scan library {}", dir.display()))?,
        None => LocalLibrary::new(),
    };
    let factory = Arc::new(LocalSwarmFactory::new(library, args.swarm_config()));
    let telemetry = build_telemetry(&config)?;

    let registry = spawn_registry(config.clone(), factory, telemetry);
    let shutdown = ShutdownSignal::new();

    spawn_interrupt_handler(shutdown.clone());
    if let Some(parent_pid) = config.watchdog.parent_pid {
        tokio::spawn(watch_parent(
            parent_pid,
            config.watchdog.poll_interval,
            shutdown.clone(),
        ));
    }

    let server = run_server(AppState::new(registry.clone(), config, shutdown.clone()));
    tokio::pin!(server);

    let early_exit = tokio::select! {
        biased;
        _ = shutdown.wait() => None,
        result = &mut server => Some(result),
    };

    stop_sessions(&registry).await;
    shutdown.trigger();

    match early_exit {
        Some(result) => result.map_err(|e| anyhow::anyhow!("HTTP server failed: {e}"))?,
        None => match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("HTTP server stopped with error: {e}"),
            Err(_) => tracing::warn!("Open streams did not finish, exiting anyway"),
        },
    }

    tracing::info!("Undertow stopped");
    Ok(())
}

fn build_telemetry(config: &UndertowConfig) -> anyhow::Result<Arc<dyn Telemetry>> {
    let token = match &config.telemetry.mixpanel_token {
        Some(token) if config.telemetry.is_enabled() => token.trim().to_string(),
        _ => {
            tracing::debug!("Telemetry disabled, no Mixpanel token");
            return Ok(Arc::new(NoopTelemetry));
        }
    };

    let telemetry = MixpanelTelemetry::new(token, config.telemetry.mixpanel_data.as_deref())
        .context("Invalid telemetry configuration")?;
    telemetry.people_set();
    Ok(Arc::new(telemetry))
}

fn spawn_interrupt_handler(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    tracing::info!("Interrupted, shutting down");
                    shutdown.trigger();
                }
                Err(e) => tracing::warn!("Cannot listen for interrupts: {e}"),
            },
            _ = shutdown.wait() => {}
        }
    });
}

async fn stop_sessions(registry: &RegistryHandle) {
    // Already stopped when shutdown came in over HTTP
    if let Err(e) = registry.shutdown().await {
        tracing::debug!("Registry shutdown skipped: {e}");
    }
}

/// Prints every video in `dir` with its magnet link.
///
/// # Errors
/// - Directory cannot be read
pub async fn list_library(dir: PathBuf) -> anyhow::Result<()> {
    let library = LocalLibrary::scan(&dir)
        .await
        .with_context(|| format!("Failed to scan library {}", dir.display()))?;

    if library.is_empty() {
        println!("No videos found in {}", dir.display());
        return Ok(());
    }

    let mut files: Vec<_> = library.files().collect();
    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    for file in files {
        println!("{} ({:.1} MiB)", file.file_name, file.size as f64 / 1_048_576.0);
        println!("  {}", file.magnet_link());
    }
    Ok(())
}

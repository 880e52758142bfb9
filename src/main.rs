//! LANCommander server supervisor
//!
//! Main entry point for the headless supervisor.
//!
//! # Overview
//!
//! This binary loads settings and server descriptors, starts the servers marked
//! for autostart and keeps them supervised until interrupted. It initializes:
//! - Logging infrastructure (file rotation + console output)
//! - Tokio async runtime
//! - Server registry ([`ServerRegistry`]) and its event stream
//! - Configuration loading ([`ConfigManager`])
//! - Local and Docker engines behind [`ServerService`]
//!
//! # Execution Flow
//!
//! 1. Load `Settings.yml` and `Servers.yml` from the config directory
//!    (first argument, default `Data`)
//! 2. Initialize logging → `<Logs>/lancommander.<date>`
//! 3. Build engines: one Docker API client per configured host
//! 4. Publish initial statuses and autostart servers
//! 5. Wait for ctrl-c, then stop every running server

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use lancommander::models::Settings;
use lancommander::server::{DockerApi, DockerServerEngine, LocalServerEngine};
use lancommander::services::{PathEnvironment, ShellScriptEngine};
use lancommander::{APP_NAME, ConfigManager, ServerEvent, ServerRegistry, ServerService, VERSION};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

fn main() -> Result<()> {
    let config_dir = std::env::args()
        .nth(1)
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| Utf8PathBuf::from("Data"));

    let config_manager = ConfigManager::new(&config_dir)?;
    let settings = config_manager.load_settings()?;

    let log_dir = config_dir.join(&settings.logging.directory);
    let _guard = lancommander::logging::setup_logging_with_console(
        &log_dir,
        &settings.logging.prefix,
        settings.logging.debug,
        settings.logging.console,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    // Settings load before the subscriber exists, so report their source again here.
    if config_manager.has_settings_file() {
        tracing::info!("Settings loaded from {}", config_manager.settings_path());
    } else {
        tracing::warn!(
            "Settings file not found at {}, using defaults",
            config_manager.settings_path()
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("lancommander-worker")
        .build()
        .context("Failed to create tokio runtime")?;

    let servers = config_manager.load_servers()?;
    let result = runtime.block_on(run(settings, servers));

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Supervisor shutdown complete");

    result
}

async fn run(settings: Settings, servers: Vec<lancommander::ServerDescriptor>) -> Result<()> {
    let registry = Arc::new(ServerRegistry::new());
    let scripts = Arc::new(ShellScriptEngine::from_settings(&settings.scripts));
    let environment = PathEnvironment::from_host();

    let local = LocalServerEngine::new(
        registry.clone(),
        scripts.clone(),
        environment.clone(),
        settings.servers.clone(),
    );

    let mut docker = DockerServerEngine::new(registry.clone(), scripts, environment, &settings.servers);
    for host in &settings.server_engine.docker_hosts {
        match DockerApi::from_host(host) {
            Ok(api) => {
                docker.add_runtime(host.name.clone(), api);
            }
            Err(e) => tracing::error!("Skipping Docker host {}: {}", host.name, e),
        }
    }

    tracing::info!(
        "Supervising {} servers ({} Docker hosts)",
        servers.len(),
        docker.runtime_count()
    );

    let service = Arc::new(
        ServerService::new(registry.clone(), local, docker, servers)
            .with_default_autostart_delay(Duration::from_secs(settings.servers.autostart_delay_secs)),
    );

    let events = tokio::spawn(log_events(registry.subscribe()));

    service.initialize().await;

    let autostart = {
        let service = service.clone();
        tokio::spawn(async move { service.autostart().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("Shutdown requested");

    autostart.abort();
    service.stop_all().await;
    events.abort();

    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<ServerEvent>) {
    loop {
        match events.recv().await {
            Ok(ServerEvent::StatusUpdate {
                server_id,
                status,
                error: Some(error),
            }) => tracing::warn!("[{}] {} ({})", server_id, status, error),
            Ok(ServerEvent::StatusUpdate { server_id, status, .. }) => {
                tracing::debug!("[{}] status {}", server_id, status)
            }
            Ok(ServerEvent::LogLine {
                server_id,
                line,
                console,
            }) => tracing::debug!("[{}:{}] {}", server_id, console.name, line),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Event log fell behind, skipped {} events", skipped)
            }
            Err(RecvError::Closed) => break,
        }
    }
}

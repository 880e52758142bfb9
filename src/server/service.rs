use super::{ContainerRuntime, DockerServerEngine, LocalServerEngine, ServerEngine, ServerError};
use crate::models::{AutostartMethod, ServerDescriptor, ServerEngineKind};
use crate::services::ScriptEngine;
use crate::state::{ServerEvent, ServerProcessState, ServerRegistry, ServerStatus};
use indexmap::IndexMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Outcome of an autostart pass
#[derive(Debug, Default)]
pub struct AutostartSummary {
    pub started: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

/// Entry point for server lifecycle requests.
///
/// Holds the known server descriptors and routes each request to the engine named
/// by [`ServerDescriptor::engine`]. Failures on one server are logged and
/// returned; they never affect other servers.
pub struct ServerService<S: ScriptEngine, R: ContainerRuntime> {
    registry: Arc<ServerRegistry>,
    local: LocalServerEngine<S>,
    docker: DockerServerEngine<S, R>,
    servers: RwLock<IndexMap<Uuid, ServerDescriptor>>,
    default_autostart_delay: Duration,
}

impl<S, R> ServerService<S, R>
where
    S: ScriptEngine + 'static,
    R: ContainerRuntime + 'static,
{
    pub fn new(
        registry: Arc<ServerRegistry>,
        local: LocalServerEngine<S>,
        docker: DockerServerEngine<S, R>,
        servers: impl IntoIterator<Item = ServerDescriptor>,
    ) -> Self {
        Self {
            registry,
            local,
            docker,
            servers: RwLock::new(servers.into_iter().map(|s| (s.id, s)).collect()),
            default_autostart_delay: Duration::ZERO,
        }
    }

    /// Delay used for autostart servers that don't set their own.
    pub fn with_default_autostart_delay(mut self, delay: Duration) -> Self {
        self.default_autostart_delay = delay;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.registry.subscribe()
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn servers(&self) -> Vec<ServerDescriptor> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn server(&self, server_id: Uuid) -> Option<ServerDescriptor> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&server_id)
            .cloned()
    }

    /// Add or replace a server descriptor.
    pub fn upsert(&self, server: ServerDescriptor) {
        self.servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(server.id, server);
    }

    fn require(&self, server_id: Uuid) -> Result<ServerDescriptor, ServerError> {
        self.server(server_id).ok_or(ServerError::NotFound(server_id))
    }

    /// Publish the status of every known server so subscribers start from a full picture.
    pub async fn initialize(&self) {
        for server in self.servers() {
            self.get_status(server.id).await;
            self.registry.publish_status(server.id);
        }
    }

    pub async fn start(&self, server_id: Uuid) -> Result<(), ServerError> {
        let server = self.require(server_id)?;
        tracing::info!("Starting server {} ({:?})", server.name, server.engine);

        let result = match server.engine {
            ServerEngineKind::Local => self.local.start(&server).await,
            ServerEngineKind::Docker => self.docker.start(&server).await,
        };

        if let Err(e) = &result {
            tracing::error!("Server {} failed to start: {}", server.name, e);
        }
        result
    }

    pub async fn stop(&self, server_id: Uuid) -> Result<(), ServerError> {
        let server = self.require(server_id)?;
        tracing::info!("Stopping server {}", server.name);

        let result = match server.engine {
            ServerEngineKind::Local => self.local.stop(&server).await,
            ServerEngineKind::Docker => self.docker.stop(&server).await,
        };

        if let Err(e) = &result {
            tracing::error!("Server {} failed to stop: {}", server.name, e);
        }
        result
    }

    /// Current status; unknown servers read as stopped.
    pub async fn get_status(&self, server_id: Uuid) -> ServerStatus {
        let Some(server) = self.server(server_id) else {
            return ServerStatus::Stopped;
        };

        match server.engine {
            ServerEngineKind::Local => self.local.get_status(&server).await,
            ServerEngineKind::Docker => self.docker.get_status(&server).await,
        }
    }

    pub async fn get_state(&self, server_id: Uuid) -> ServerProcessState {
        let Some(server) = self.server(server_id) else {
            return ServerProcessState::default();
        };

        match server.engine {
            ServerEngineKind::Local => self.local.get_state(&server).await,
            ServerEngineKind::Docker => self.docker.get_state(&server).await,
        }
    }

    /// Stop every server that is not already stopped.
    pub async fn stop_all(&self) {
        for server in self.servers() {
            if self.get_status(server.id).await == ServerStatus::Stopped {
                continue;
            }
            // Errors are logged by stop()
            let _ = self.stop(server.id).await;
        }
    }

    /// Start every server marked for autostart on application start.
    ///
    /// Each server waits for its own delay and starts independently of the others.
    pub async fn autostart(self: &Arc<Self>) -> AutostartSummary {
        let mut tasks = JoinSet::new();

        for server in self.servers() {
            if !server.autostart || server.autostart_method != AutostartMethod::OnApplicationStart {
                continue;
            }

            let delay = if server.autostart_delay > 0 {
                Duration::from_secs(server.autostart_delay)
            } else {
                self.default_autostart_delay
            };

            let service = Arc::clone(self);
            tasks.spawn(async move {
                if !delay.is_zero() {
                    tracing::debug!("Autostarting {} in {:.0}s", server.name, delay.as_secs_f32());
                    tokio::time::sleep(delay).await;
                }
                let result = service.start(server.id).await.map_err(|e| e.to_string());
                (server.id, result)
            });
        }

        let mut summary = AutostartSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(()))) => summary.started.push(id),
                Ok((id, Err(message))) => summary.failed.push((id, message)),
                Err(e) => tracing::error!("Autostart task panicked: {}", e),
            }
        }

        tracing::info!(
            "Autostart finished: {} started, {} failed",
            summary.started.len(),
            summary.failed.len()
        );
        summary
    }
}

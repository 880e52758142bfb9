use super::{ServerEngine, ServerError};
use crate::models::{DockerHost, ScriptType, ServerDescriptor, ServerSettings};
use crate::services::{LaunchRequest, PathEnvironment, ProcessExecutionContext, ScriptEngine};
use crate::state::{ServerProcessState, ServerRegistry, ServerStatus};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a container runtime
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Container {0} not found")]
    NotFound(String),

    #[error("Container API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unsupported Docker address {0}")]
    UnsupportedAddress(String),

    #[error("Container API request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Live state of a container as reported by inspect
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerState {
    pub status: String,
    pub running: bool,
    pub paused: bool,
    pub restarting: bool,
    pub dead: bool,
    pub pid: u32,
    pub exit_code: i64,
    pub error: String,
}

impl ContainerState {
    /// Server status for this container state; paused and dead containers count as stopped.
    pub fn server_status(&self) -> ServerStatus {
        if self.restarting {
            ServerStatus::Starting
        } else if self.paused || self.dead {
            ServerStatus::Stopped
        } else if self.running {
            ServerStatus::Running
        } else {
            ServerStatus::Stopped
        }
    }
}

/// One entry of a container listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
    pub status: String,
}

/// The container operations the Docker engine needs.
pub trait ContainerRuntime: Send + Sync {
    fn list(&self) -> impl Future<Output = Result<Vec<ContainerSummary>, ContainerError>> + Send;

    fn start(&self, container_id: &str) -> impl Future<Output = Result<(), ContainerError>> + Send;

    fn stop(
        &self,
        container_id: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), ContainerError>> + Send;

    fn inspect(&self, container_id: &str) -> impl Future<Output = Result<ContainerState, ContainerError>> + Send;
}

/// Docker Engine HTTP API client
#[derive(Debug, Clone)]
pub struct DockerApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    state: ContainerState,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

impl DockerApi {
    /// Client for `address` (`http://host:2375` or `tcp://host:2375`).
    pub fn new(address: &str) -> Result<Self, ContainerError> {
        let address = address.trim().trim_end_matches('/');
        let base_url = if let Some(rest) = address.strip_prefix("tcp://") {
            format!("http://{}", rest)
        } else if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            return Err(ContainerError::UnsupportedAddress(address.to_string()));
        };

        let client = reqwest::Client::builder()
            .user_agent(concat!("lancommander/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn from_host(host: &DockerHost) -> Result<Self, ContainerError> {
        Self::new(&host.address)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response, container_id: &str) -> Result<reqwest::Response, ContainerError> {
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ContainerError::NotFound(container_id.to_string()));
        }

        let message = response
            .json::<ApiMessage>()
            .await
            .map(|m| m.message)
            .unwrap_or_default();
        Err(ContainerError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

impl ContainerRuntime for DockerApi {
    async fn list(&self) -> Result<Vec<ContainerSummary>, ContainerError> {
        let response = self
            .client
            .get(self.url("/containers/json"))
            .query(&[("all", "true")])
            .send()
            .await?;
        Ok(Self::check(response, "").await?.json().await?)
    }

    async fn start(&self, container_id: &str) -> Result<(), ContainerError> {
        let response = self
            .client
            .post(self.url(&format!("/containers/{}/start", container_id)))
            .send()
            .await?;
        Self::check(response, container_id).await?;
        Ok(())
    }

    async fn stop(&self, container_id: &str, timeout: Duration) -> Result<(), ContainerError> {
        let response = self
            .client
            .post(self.url(&format!("/containers/{}/stop", container_id)))
            .query(&[("t", timeout.as_secs().to_string())])
            .send()
            .await?;
        Self::check(response, container_id).await?;
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerState, ContainerError> {
        let response = self
            .client
            .get(self.url(&format!("/containers/{}/json", container_id)))
            .send()
            .await?;
        let inspect: InspectResponse = Self::check(response, container_id).await?.json().await?;
        Ok(inspect.state)
    }
}

/// Runs servers as existing Docker containers.
///
/// Status comes from inspecting the live container. While a start or stop is
/// in flight, and after a failed one (`Error`), the registry's status is used.
pub struct DockerServerEngine<S: ScriptEngine, R: ContainerRuntime> {
    registry: Arc<ServerRegistry>,
    runtimes: HashMap<String, Arc<R>>,
    default_host: Option<String>,
    context: ProcessExecutionContext<S>,
    environment: PathEnvironment,
    stop_timeout: Duration,
}

impl<S: ScriptEngine, R: ContainerRuntime> DockerServerEngine<S, R> {
    pub fn new(
        registry: Arc<ServerRegistry>,
        scripts: Arc<S>,
        environment: PathEnvironment,
        settings: &ServerSettings,
    ) -> Self {
        Self {
            registry,
            runtimes: HashMap::new(),
            default_host: None,
            context: ProcessExecutionContext::new(scripts, Duration::from_secs(settings.termination_grace_secs)),
            environment,
            stop_timeout: Duration::from_secs(settings.container_stop_timeout_secs),
        }
    }

    /// Register the runtime for a named host. The first host added is the default.
    pub fn add_runtime(&mut self, host: impl Into<String>, runtime: R) -> &mut Self {
        let host = host.into().to_lowercase();
        if self.default_host.is_none() {
            self.default_host = Some(host.clone());
        }
        self.runtimes.insert(host, Arc::new(runtime));
        self
    }

    pub fn runtime_count(&self) -> usize {
        self.runtimes.len()
    }

    fn runtime_for(&self, server: &ServerDescriptor) -> Result<&Arc<R>, ServerError> {
        let host = server
            .docker_host
            .as_ref()
            .map(|h| h.to_lowercase())
            .or_else(|| self.default_host.clone())
            .ok_or_else(|| ServerError::UnknownDockerHost(server.name.clone()))?;

        self.runtimes
            .get(&host)
            .ok_or(ServerError::UnknownDockerHost(host))
    }

    fn container_id<'a>(&self, server: &'a ServerDescriptor) -> Result<&'a str, ServerError> {
        server
            .container_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ServerError::MissingContainerId(server.name.clone()))
    }

    fn context_for(&self, server: &ServerDescriptor) -> ProcessExecutionContext<S> {
        let mut context = self.context.clone();
        context.add_variable("ServerId", server.id.to_string());
        context.add_variable("ServerName", server.name.clone());
        if let Some(container_id) = &server.container_id {
            context.add_variable("ContainerId", container_id.clone());
        }
        context
    }

    async fn inspect_status(&self, server: &ServerDescriptor) -> Result<ContainerState, ServerError> {
        let runtime = self.runtime_for(server)?;
        let container_id = self.container_id(server)?;
        Ok(runtime.inspect(container_id).await?)
    }

    async fn start_container(&self, server: &ServerDescriptor) -> Result<ServerStatus, ServerError> {
        let runtime = self.runtime_for(server)?;
        let container_id = self.container_id(server)?;
        runtime.start(container_id).await?;

        let state = runtime.inspect(container_id).await?;
        Ok(match state.server_status() {
            ServerStatus::Starting => ServerStatus::Starting,
            _ => ServerStatus::Running,
        })
    }

    /// Inspect the container and record what it reports.
    async fn refresh_status(&self, server: &ServerDescriptor) -> ServerStatus {
        match self.inspect_status(server).await {
            Ok(state) => {
                let status = state.server_status();
                self.registry.update(server.id, |s| {
                    s.pid = (state.pid > 0).then_some(state.pid);
                    s.exit_code = i32::try_from(state.exit_code).ok();
                });
                // Surface changes made outside the supervisor (docker CLI, restarts).
                self.registry.set_status(server.id, status, None);
                status
            }
            Err(e) => {
                tracing::warn!("Failed to inspect container for {}: {}", server.name, e);
                self.registry.status(server.id)
            }
        }
    }

    fn fail(&self, server: &ServerDescriptor, error: ServerError) -> ServerError {
        tracing::error!("Container operation failed for {}: {}", server.name, error);
        self.registry
            .set_status(server.id, ServerStatus::Error, Some(error.to_string()));
        error
    }
}

impl<S: ScriptEngine, R: ContainerRuntime> ServerEngine for DockerServerEngine<S, R> {
    async fn start(&self, server: &ServerDescriptor) -> Result<(), ServerError> {
        let lock = self.registry.operation_lock(server.id);
        let _guard = lock.lock().await;

        let status = match self.registry.status(server.id) {
            ServerStatus::Error => ServerStatus::Error,
            _ => self.refresh_status(server).await,
        };
        if !status.can_start() {
            tracing::debug!("Ignoring start of {}: already {}", server.name, status);
            return Ok(());
        }

        self.registry.set_status(server.id, ServerStatus::Starting, None);

        let request = LaunchRequest::for_server(server, &self.environment);
        let failures = self
            .context_for(server)
            .run_scripts(&request, ScriptType::BeforeStart)
            .await;
        if failures > 0 {
            tracing::warn!("{} BeforeStart script(s) failed for {}; starting anyway", failures, server.name);
        }

        match self.start_container(server).await {
            Ok(status) => {
                self.registry.update(server.id, |state| state.started_at = Some(chrono::Utc::now()));
                self.registry.set_status(server.id, status, None);
                Ok(())
            }
            Err(e) => Err(self.fail(server, e)),
        }
    }

    async fn stop(&self, server: &ServerDescriptor) -> Result<(), ServerError> {
        let lock = self.registry.operation_lock(server.id);
        let _guard = lock.lock().await;

        self.registry.set_status(server.id, ServerStatus::Stopping, None);

        let runtime = match self.runtime_for(server) {
            Ok(runtime) => runtime,
            Err(e) => return Err(self.fail(server, e)),
        };
        let container_id = match self.container_id(server) {
            Ok(id) => id,
            Err(e) => return Err(self.fail(server, e)),
        };

        if let Err(e) = runtime.stop(container_id, self.stop_timeout).await {
            return Err(self.fail(server, e.into()));
        }

        let request = LaunchRequest::for_server(server, &self.environment);
        let failures = self
            .context_for(server)
            .run_scripts(&request, ScriptType::AfterStop)
            .await;
        if failures > 0 {
            tracing::warn!("{} AfterStop script(s) failed for {}", failures, server.name);
        }

        self.registry.set_status(server.id, ServerStatus::Stopped, None);
        Ok(())
    }

    async fn get_status(&self, server: &ServerDescriptor) -> ServerStatus {
        let stored = self.registry.status(server.id);
        if stored == ServerStatus::Error {
            return stored;
        }

        // A start or stop in flight owns the status until it finishes; holding the
        // lock keeps one from beginning while the inspect is outstanding.
        let lock = self.registry.operation_lock(server.id);
        let Ok(_guard) = lock.try_lock() else {
            return stored;
        };

        self.refresh_status(server).await
    }

    async fn get_state(&self, server: &ServerDescriptor) -> ServerProcessState {
        let status = self.get_status(server).await;
        let mut state = self.registry.get(server.id);
        state.status = status;
        state
    }
}

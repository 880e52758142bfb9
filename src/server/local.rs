use super::{ServerEngine, ServerError};
use crate::models::{ServerConsole, ServerConsoleType, ServerDescriptor, ServerSettings, ScriptType};
use crate::services::{
    LaunchRequest, LogFileMonitor, PathEnvironment, ProcessExecutionContext, ScriptEngine, ServerProcess,
};
use crate::state::{ServerProcessState, ServerRegistry, ServerStatus};
use camino::Utf8PathBuf;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct TrackedProcess {
    cancel: CancellationToken,
    /// Waits for the process and owns its log monitors
    task: JoinHandle<()>,
    pid: Option<u32>,
}

/// Runs servers as local OS processes.
///
/// Status is recomputed on every [`get_status`](ServerEngine::get_status) from the
/// cancellation token and whether the supervising task has finished; only the
/// transient `Starting` and `Error` states are read from the registry.
pub struct LocalServerEngine<S: ScriptEngine> {
    registry: Arc<ServerRegistry>,
    context: ProcessExecutionContext<S>,
    environment: PathEnvironment,
    settings: ServerSettings,
    tracked: Mutex<HashMap<Uuid, TrackedProcess>>,
    sampler: Mutex<System>,
}

impl<S: ScriptEngine + 'static> LocalServerEngine<S> {
    pub fn new(
        registry: Arc<ServerRegistry>,
        scripts: Arc<S>,
        environment: PathEnvironment,
        settings: ServerSettings,
    ) -> Self {
        let grace = Duration::from_secs(settings.termination_grace_secs);
        Self {
            registry,
            context: ProcessExecutionContext::new(scripts, grace),
            environment,
            settings,
            tracked: Mutex::new(HashMap::new()),
            sampler: Mutex::new(System::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    fn context_for(&self, server: &ServerDescriptor, request: &LaunchRequest) -> ProcessExecutionContext<S> {
        let mut context = self.context.clone();
        context.add_variable("ServerId", server.id.to_string());
        context.add_variable("ServerName", server.name.clone());
        if let Some(dir) = &request.working_directory {
            context.add_variable("ServerWorkingDirectory", dir.as_str());
        }
        context
    }

    fn lock_tracked(&self) -> MutexGuard<'_, HashMap<Uuid, TrackedProcess>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn untrack(&self, server_id: Uuid) -> Option<TrackedProcess> {
        self.lock_tracked().remove(&server_id)
    }

    fn spawn_log_monitors(&self, server: &ServerDescriptor, request: &LaunchRequest) -> Vec<LogFileMonitor> {
        let directory = request
            .working_directory
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        let poll_interval = Duration::from_millis(self.settings.log_poll_interval_ms);

        server
            .consoles
            .iter()
            .filter(|console| console.console_type == ServerConsoleType::LogFile && !console.path.trim().is_empty())
            .map(|console| {
                LogFileMonitor::spawn(
                    server.id,
                    console.clone(),
                    &directory,
                    poll_interval,
                    self.registry.sender(),
                )
            })
            .collect()
    }

    fn sample(&self, server_id: Uuid, pid: Option<u32>) {
        let Some(pid) = pid else {
            return;
        };

        let mut system = self.sampler.lock().unwrap_or_else(PoisonError::into_inner);
        let pid = Pid::from_u32(pid);
        if !system.refresh_process(pid) {
            return;
        }

        if let Some(process) = system.process(pid) {
            let cpu_load = process.cpu_usage();
            let memory_bytes = process.memory();
            self.registry.update(server_id, |state| {
                state.cpu_load = cpu_load;
                state.memory_bytes = memory_bytes;
            });
        }
    }

    fn current_status(&self, server_id: Uuid) -> ServerStatus {
        let stored = self.registry.status(server_id);
        if matches!(stored, ServerStatus::Starting | ServerStatus::Error) {
            return stored;
        }

        let (status, pid) = match self.lock_tracked().get(&server_id) {
            None => return stored,
            Some(tracked) if tracked.task.is_finished() => (ServerStatus::Stopped, None),
            Some(tracked) if tracked.cancel.is_cancelled() => (ServerStatus::Stopping, None),
            Some(tracked) => (ServerStatus::Running, tracked.pid),
        };

        match status {
            ServerStatus::Running => self.sample(server_id, pid),
            ServerStatus::Stopped => {
                self.registry
                    .transition(server_id, ServerStatus::Running, ServerStatus::Stopped);
            }
            _ => {}
        }

        status
    }
}

impl<S: ScriptEngine + 'static> ServerEngine for LocalServerEngine<S> {
    async fn start(&self, server: &ServerDescriptor) -> Result<(), ServerError> {
        let lock = self.registry.operation_lock(server.id);
        let _guard = lock.lock().await;

        let status = self.current_status(server.id);
        if !status.can_start() {
            tracing::debug!("Ignoring start of {}: already {}", server.name, status);
            return Ok(());
        }

        // A previous run that exited on its own
        drop(self.untrack(server.id));

        self.registry.set_status(server.id, ServerStatus::Starting, None);

        let request = LaunchRequest::for_server(server, &self.environment);
        let context = self.context_for(server, &request);

        let failures = context.run_scripts(&request, ScriptType::BeforeStart).await;
        if failures > 0 {
            tracing::warn!("{} BeforeStart script(s) failed for {}; starting anyway", failures, server.name);
        }

        let mut process = match context.start(&request) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!("Failed to start server {}: {}", server.name, e);
                self.registry
                    .set_status(server.id, ServerStatus::Error, Some(e.to_string()));
                return Err(e.into());
            }
        };

        let pid = process.pid();
        self.registry.update(server.id, |state| {
            state.pid = pid;
            state.started_at = Some(Utc::now());
            state.exit_code = None;
        });

        let registry = self.registry.clone();
        let server_id = server.id;
        let console = ServerConsole::standard_output();
        process.forward_output(move |line| registry.publish_log(server_id, line, &console));

        let monitors = self.spawn_log_monitors(server, &request);
        let cancel = CancellationToken::new();

        self.registry.set_status(server.id, ServerStatus::Running, None);

        let task = tokio::spawn(supervise(
            self.registry.clone(),
            server.id,
            process,
            monitors,
            cancel.clone(),
            request,
            self.context.termination_grace(),
        ));

        self.lock_tracked().insert(server.id, TrackedProcess { cancel, task, pid });

        Ok(())
    }

    async fn stop(&self, server: &ServerDescriptor) -> Result<(), ServerError> {
        let lock = self.registry.operation_lock(server.id);
        let _guard = lock.lock().await;

        let Some(tracked) = self.untrack(server.id) else {
            // Nothing running; clear a leftover Error so the server reads as stopped.
            self.registry.set_status(server.id, ServerStatus::Stopped, None);
            return Ok(());
        };

        self.registry.set_status(server.id, ServerStatus::Stopping, None);
        tracked.cancel.cancel();

        // The supervising task kills the process once the grace period is over.
        let deadline = self.context.termination_grace() + Duration::from_secs(1);
        match timeout(deadline, tracked.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Supervisor for {} ended abnormally: {}", server.name, e),
            Err(_) => tracing::warn!("{} did not exit within {:.1}s", server.name, deadline.as_secs_f32()),
        }

        let request = LaunchRequest::for_server(server, &self.environment);
        let context = self.context_for(server, &request);
        let failures = context.run_scripts(&request, ScriptType::AfterStop).await;
        if failures > 0 {
            tracing::warn!("{} AfterStop script(s) failed for {}", failures, server.name);
        }

        self.registry.set_status(server.id, ServerStatus::Stopped, None);
        Ok(())
    }

    async fn get_status(&self, server: &ServerDescriptor) -> ServerStatus {
        self.current_status(server.id)
    }

    async fn get_state(&self, server: &ServerDescriptor) -> ServerProcessState {
        let status = self.current_status(server.id);
        let mut state = self.registry.get(server.id);
        state.status = status;
        state
    }
}

/// Wait for the process, then release its log monitors.
///
/// An exit nobody asked for moves the server from Running to Stopped here; a
/// requested exit is finalized by `stop`.
async fn supervise(
    registry: Arc<ServerRegistry>,
    server_id: Uuid,
    mut process: ServerProcess,
    monitors: Vec<LogFileMonitor>,
    cancel: CancellationToken,
    request: LaunchRequest,
    grace: Duration,
) {
    let result = process.wait(&cancel, request.termination_method, grace).await;
    drop(process);

    for monitor in monitors {
        monitor.dispose().await;
    }

    match result {
        Ok(exit) => {
            registry.update(server_id, |state| state.exit_code = exit.code);

            if exit.requested {
                tracing::debug!("{} stopped on request with code {:?}", request.name, exit.code);
            } else {
                if exit.success() {
                    tracing::info!("{} exited", request.name);
                } else {
                    tracing::warn!("{} exited with code {:?}", request.name, exit.code);
                }
                registry.transition(server_id, ServerStatus::Running, ServerStatus::Stopped);
            }
        }
        Err(e) if cancel.is_cancelled() => {
            tracing::warn!("Error while stopping {}: {}", request.name, e);
        }
        Err(e) => {
            tracing::error!("Lost track of {}: {}", request.name, e);
            registry.set_status(server_id, ServerStatus::Error, Some(e.to_string()));
        }
    }
}

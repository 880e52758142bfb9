//! Integration tests for the server engines and ServerService
//!
//! These tests verify:
//! - Status events emitted by start/stop
//! - Start idempotence and Error handling
//! - BeforeStart/AfterStop script ordering
//! - Docker container state mapping through a fake runtime
//! - Autostart iterating servers independently

use lancommander::models::{
    AutostartMethod, Script, ScriptType, ServerConsole, ServerDescriptor, ServerSettings,
};
use lancommander::server::{
    ContainerError, ContainerRuntime, ContainerState, ContainerSummary, DockerServerEngine,
    LocalServerEngine, ServerEngine,
};
use lancommander::services::scripting::ScriptSource;
use lancommander::services::{PathEnvironment, ScriptEngine, ScriptError, ScriptOutput, ScriptRequest};
use lancommander::{ServerError, ServerEvent, ServerRegistry, ServerService, ServerStatus};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Script engine that records every inline script and fails those containing "fail".
#[derive(Default)]
struct RecordingScripts {
    runs: Mutex<Vec<String>>,
}

impl RecordingScripts {
    fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

impl ScriptEngine for RecordingScripts {
    async fn execute(&self, request: &ScriptRequest) -> Result<ScriptOutput, ScriptError> {
        let ScriptSource::Inline(contents) = request.source() else {
            return Err(ScriptError::Empty);
        };
        self.runs.lock().unwrap().push(contents.clone());

        if contents.contains("fail") {
            Err(ScriptError::Failed {
                exit_code: 1,
                stderr: "boom".to_string(),
            })
        } else {
            Ok(ScriptOutput::default())
        }
    }
}

/// Container runtime backed by one in-memory container; `None` means it doesn't exist.
#[derive(Clone, Default)]
struct FakeRuntime {
    state: Arc<Mutex<Option<ContainerState>>>,
    calls: Arc<Mutex<Vec<String>>>,
    /// Delay applied to the next inspect only.
    inspect_delay: Arc<Mutex<Option<Duration>>>,
}

impl FakeRuntime {
    fn with_container() -> Self {
        let runtime = Self::default();
        *runtime.state.lock().unwrap() = Some(ContainerState {
            status: "exited".to_string(),
            ..ContainerState::default()
        });
        runtime
    }

    fn set_state(&self, update: impl FnOnce(&mut ContainerState)) {
        if let Some(state) = self.state.lock().unwrap().as_mut() {
            update(state);
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ContainerRuntime for FakeRuntime {
    async fn list(&self) -> Result<Vec<ContainerSummary>, ContainerError> {
        Ok(Vec::new())
    }

    async fn start(&self, container_id: &str) -> Result<(), ContainerError> {
        self.calls.lock().unwrap().push(format!("start:{}", container_id));
        let mut state = self.state.lock().unwrap();
        let state = state
            .as_mut()
            .ok_or_else(|| ContainerError::NotFound(container_id.to_string()))?;
        state.running = true;
        state.pid = 4242;
        Ok(())
    }

    async fn stop(&self, container_id: &str, timeout: Duration) -> Result<(), ContainerError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("stop:{}:{}", container_id, timeout.as_secs()));
        let mut state = self.state.lock().unwrap();
        let state = state
            .as_mut()
            .ok_or_else(|| ContainerError::NotFound(container_id.to_string()))?;
        state.running = false;
        state.pid = 0;
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerState, ContainerError> {
        let snapshot = self.state.lock().unwrap().clone();
        let delay = self.inspect_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            return snapshot.ok_or_else(|| ContainerError::NotFound(container_id.to_string()));
        }

        self.state
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ContainerError::NotFound(container_id.to_string()))
    }
}

fn settings() -> ServerSettings {
    ServerSettings {
        termination_grace_secs: 2,
        container_stop_timeout_secs: 7,
        log_poll_interval_ms: 20,
        ..ServerSettings::default()
    }
}

fn docker_engine(
    registry: &Arc<ServerRegistry>,
    scripts: &Arc<RecordingScripts>,
    runtime: FakeRuntime,
) -> DockerServerEngine<RecordingScripts, FakeRuntime> {
    let mut engine = DockerServerEngine::new(
        registry.clone(),
        scripts.clone(),
        PathEnvironment::empty(),
        &settings(),
    );
    engine.add_runtime("Primary", runtime);
    engine
}

/// Status updates received so far for `server`.
fn drain_statuses(rx: &mut broadcast::Receiver<ServerEvent>, server: &ServerDescriptor) -> Vec<ServerStatus> {
    let mut statuses = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ServerEvent::StatusUpdate { server_id, status, .. } = event {
            if server_id == server.id {
                statuses.push(status);
            }
        }
    }
    statuses
}

#[tokio::test]
async fn test_docker_start_and_stop() {
    let registry = Arc::new(ServerRegistry::new());
    let scripts = Arc::new(RecordingScripts::default());
    let runtime = FakeRuntime::with_container();
    let engine = docker_engine(&registry, &scripts, runtime.clone());
    let mut rx = registry.subscribe();

    let server = ServerDescriptor::docker("Valheim", "valheim-1")
        .with_script(Script::new(ScriptType::BeforeStart, "echo before"))
        .with_script(Script::new(ScriptType::AfterStop, "echo after"));

    engine.start(&server).await.unwrap();
    assert_eq!(engine.get_status(&server).await, ServerStatus::Running);
    assert_eq!(engine.get_state(&server).await.pid, Some(4242));

    engine.stop(&server).await.unwrap();
    assert_eq!(engine.get_status(&server).await, ServerStatus::Stopped);

    assert_eq!(runtime.calls(), vec!["start:valheim-1", "stop:valheim-1:7"]);
    assert_eq!(scripts.runs(), vec!["echo before", "echo after"]);
    assert_eq!(
        drain_statuses(&mut rx, &server),
        vec![
            ServerStatus::Starting,
            ServerStatus::Running,
            ServerStatus::Stopping,
            ServerStatus::Stopped,
        ]
    );
}

#[tokio::test]
async fn test_docker_status_follows_container() {
    let registry = Arc::new(ServerRegistry::new());
    let scripts = Arc::new(RecordingScripts::default());
    let runtime = FakeRuntime::with_container();
    let engine = docker_engine(&registry, &scripts, runtime.clone());
    let server = ServerDescriptor::docker("Valheim", "valheim-1");

    assert_eq!(engine.get_status(&server).await, ServerStatus::Stopped);

    runtime.set_state(|s| {
        s.running = true;
        s.restarting = true;
    });
    assert_eq!(engine.get_status(&server).await, ServerStatus::Starting);

    runtime.set_state(|s| s.restarting = false);
    assert_eq!(engine.get_status(&server).await, ServerStatus::Running);

    runtime.set_state(|s| s.paused = true);
    assert_eq!(engine.get_status(&server).await, ServerStatus::Stopped);

    runtime.set_state(|s| {
        s.paused = false;
        s.running = false;
        s.dead = true;
    });
    assert_eq!(engine.get_status(&server).await, ServerStatus::Stopped);
}

#[tokio::test]
async fn test_docker_slow_status_poll_does_not_overwrite_start() {
    let registry = Arc::new(ServerRegistry::new());
    let scripts = Arc::new(RecordingScripts::default());
    let runtime = FakeRuntime::with_container();
    *runtime.inspect_delay.lock().unwrap() = Some(Duration::from_millis(200));
    let engine = docker_engine(&registry, &scripts, runtime.clone());
    let mut rx = registry.subscribe();
    let server = ServerDescriptor::docker("Valheim", "valheim-1");

    let (polled, started) = tokio::join!(engine.get_status(&server), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.start(&server).await
    });

    started.unwrap();
    assert_eq!(polled, ServerStatus::Stopped);
    assert_eq!(registry.status(server.id), ServerStatus::Running);
    assert_eq!(
        drain_statuses(&mut rx, &server),
        vec![ServerStatus::Starting, ServerStatus::Running]
    );
    assert_eq!(engine.get_status(&server).await, ServerStatus::Running);
}

#[tokio::test]
async fn test_docker_status_poll_during_start_reports_stored_status() {
    let registry = Arc::new(ServerRegistry::new());
    let scripts = Arc::new(RecordingScripts::default());
    let runtime = FakeRuntime::with_container();
    let engine = docker_engine(&registry, &scripts, runtime.clone());
    let server = ServerDescriptor::docker("Valheim", "valheim-1");

    let lock = registry.operation_lock(server.id);
    let guard = lock.lock().await;
    runtime.set_state(|s| s.running = true);
    assert_eq!(engine.get_status(&server).await, ServerStatus::Stopped);

    drop(guard);
    assert_eq!(engine.get_status(&server).await, ServerStatus::Running);
}

#[tokio::test]
async fn test_docker_start_of_running_container_is_noop() {
    let registry = Arc::new(ServerRegistry::new());
    let scripts = Arc::new(RecordingScripts::default());
    let runtime = FakeRuntime::with_container();
    runtime.set_state(|s| s.running = true);
    let engine = docker_engine(&registry, &scripts, runtime.clone());

    let server = ServerDescriptor::docker("Valheim", "valheim-1");
    engine.start(&server).await.unwrap();

    assert!(runtime.calls().is_empty());
    assert_eq!(registry.status(server.id), ServerStatus::Running);
}

#[tokio::test]
async fn test_docker_missing_container_sets_error() {
    let registry = Arc::new(ServerRegistry::new());
    let scripts = Arc::new(RecordingScripts::default());
    let engine = docker_engine(&registry, &scripts, FakeRuntime::default());
    let mut rx = registry.subscribe();

    let server = ServerDescriptor::docker("Valheim", "gone");
    let result = engine.start(&server).await;

    assert!(matches!(
        result,
        Err(ServerError::Container(ContainerError::NotFound(_)))
    ));
    assert_eq!(engine.get_status(&server).await, ServerStatus::Error);

    let error_event = std::iter::from_fn(|| rx.try_recv().ok()).find(|event| {
        matches!(event, ServerEvent::StatusUpdate { status: ServerStatus::Error, .. })
    });
    match error_event {
        Some(ServerEvent::StatusUpdate { error, .. }) => assert!(error.unwrap().contains("gone")),
        other => panic!("Expected an Error status update, got {:?}", other),
    }
}

#[tokio::test]
async fn test_docker_descriptor_errors() {
    let registry = Arc::new(ServerRegistry::new());
    let scripts = Arc::new(RecordingScripts::default());
    let engine = docker_engine(&registry, &scripts, FakeRuntime::with_container());

    let mut no_container = ServerDescriptor::docker("Valheim", "");
    no_container.container_id = None;
    assert!(matches!(
        engine.start(&no_container).await,
        Err(ServerError::MissingContainerId(_))
    ));

    let mut other_host = ServerDescriptor::docker("Valheim", "valheim-1");
    other_host.docker_host = Some("backup".to_string());
    assert!(matches!(
        engine.start(&other_host).await,
        Err(ServerError::UnknownDockerHost(_))
    ));

    let mut named_host = ServerDescriptor::docker("Valheim", "valheim-1");
    named_host.docker_host = Some("PRIMARY".to_string());
    engine.start(&named_host).await.unwrap();
    assert_eq!(registry.status(named_host.id), ServerStatus::Running);
}

#[tokio::test]
async fn test_service_autostart_is_independent() {
    let registry = Arc::new(ServerRegistry::new());
    let scripts = Arc::new(RecordingScripts::default());
    let runtime = FakeRuntime::with_container();

    let mut broken = ServerDescriptor::local("Broken", "/nonexistent/lancommander/server-binary");
    broken.autostart = true;

    let mut valheim = ServerDescriptor::docker("Valheim", "valheim-1");
    valheim.autostart = true;

    let mut on_demand = ServerDescriptor::docker("On Demand", "valheim-1");
    on_demand.autostart = true;
    on_demand.autostart_method = AutostartMethod::OnPlayerActivity;

    let manual = ServerDescriptor::docker("Manual", "valheim-1");

    let local = LocalServerEngine::new(
        registry.clone(),
        scripts.clone(),
        PathEnvironment::empty(),
        settings(),
    );
    let docker = docker_engine(&registry, &scripts, runtime.clone());
    let service = Arc::new(ServerService::new(
        registry.clone(),
        local,
        docker,
        vec![broken.clone(), valheim.clone(), on_demand.clone(), manual.clone()],
    ));

    let summary = service.autostart().await;

    assert_eq!(summary.started, vec![valheim.id]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, broken.id);
    assert_eq!(service.get_status(broken.id).await, ServerStatus::Error);
    assert_eq!(runtime.calls(), vec!["start:valheim-1"]);
}

#[tokio::test]
async fn test_service_unknown_server() {
    let registry = Arc::new(ServerRegistry::new());
    let scripts = Arc::new(RecordingScripts::default());
    let local = LocalServerEngine::new(
        registry.clone(),
        scripts.clone(),
        PathEnvironment::empty(),
        settings(),
    );
    let docker = docker_engine(&registry, &scripts, FakeRuntime::default());
    let service = ServerService::new(registry, local, docker, Vec::new());

    let id = uuid::Uuid::new_v4();
    assert!(matches!(service.start(id).await, Err(ServerError::NotFound(_))));
    assert_eq!(service.get_status(id).await, ServerStatus::Stopped);
}

#[tokio::test]
async fn test_service_initialize_publishes_every_server() {
    let registry = Arc::new(ServerRegistry::new());
    let scripts = Arc::new(RecordingScripts::default());
    let local = LocalServerEngine::new(
        registry.clone(),
        scripts.clone(),
        PathEnvironment::empty(),
        settings(),
    );
    let docker = docker_engine(&registry, &scripts, FakeRuntime::with_container());

    let quake = ServerDescriptor::local("Quake", "q3ded");
    let valheim = ServerDescriptor::docker("Valheim", "valheim-1");
    let service = ServerService::new(
        registry.clone(),
        local,
        docker,
        vec![quake.clone(), valheim.clone()],
    );
    let mut rx = service.subscribe();

    service.initialize().await;

    let ids: Vec<uuid::Uuid> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|event| event.server_id())
        .collect();
    assert!(ids.contains(&quake.id));
    assert!(ids.contains(&valheim.id));
}

#[cfg(unix)]
mod local {
    use super::*;
    use camino::Utf8PathBuf;
    use lancommander::services::ShellScriptEngine;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn engine(registry: &Arc<ServerRegistry>) -> LocalServerEngine<ShellScriptEngine> {
        LocalServerEngine::new(
            registry.clone(),
            Arc::new(ShellScriptEngine::new()),
            PathEnvironment::empty(),
            settings(),
        )
    }

    fn sleeper() -> ServerDescriptor {
        ServerDescriptor::local("Sleeper", "sleep").with_arguments("30")
    }

    async fn next_log_line(rx: &mut broadcast::Receiver<ServerEvent>) -> Option<(String, ServerConsole)> {
        loop {
            match timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Ok(ServerEvent::LogLine { line, console, .. })) => return Some((line, console)),
                Ok(Ok(_)) => continue,
                _ => return None,
            }
        }
    }

    #[tokio::test]
    async fn test_double_start_runs_once() {
        let registry = Arc::new(ServerRegistry::new());
        let engine = engine(&registry);
        let mut rx = registry.subscribe();
        let server = sleeper();

        let (first, second) = tokio::join!(engine.start(&server), engine.start(&server));
        first.unwrap();
        second.unwrap();

        assert_eq!(engine.get_status(&server).await, ServerStatus::Running);
        assert!(engine.get_state(&server).await.pid.is_some());

        engine.stop(&server).await.unwrap();

        let statuses = drain_statuses(&mut rx, &server);
        assert_eq!(
            statuses,
            vec![
                ServerStatus::Starting,
                ServerStatus::Running,
                ServerStatus::Stopping,
                ServerStatus::Stopped,
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_before_start_script_still_runs_server() {
        let registry = Arc::new(ServerRegistry::new());
        let engine = engine(&registry);
        let server = sleeper().with_script(Script::new(ScriptType::BeforeStart, "exit 3"));

        engine.start(&server).await.unwrap();
        assert_eq!(engine.get_status(&server).await, ServerStatus::Running);

        engine.stop(&server).await.unwrap();
        assert_eq!(engine.get_status(&server).await, ServerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_after_stop_runs_after_process_exit() {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let marker = dir.join("after-stop.txt");

        let registry = Arc::new(ServerRegistry::new());
        let engine = engine(&registry);
        let server = sleeper()
            .with_working_directory(dir.as_str())
            .with_script(Script::new(
                ScriptType::AfterStop,
                "echo \"$ServerName stopped\" > after-stop.txt",
            ));

        engine.start(&server).await.unwrap();
        let pid = engine.get_state(&server).await.pid.unwrap();
        assert!(!marker.exists());

        engine.stop(&server).await.unwrap();

        assert_eq!(registry.status(server.id), ServerStatus::Stopped);
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "Sleeper stopped");

        // The process is gone by the time AfterStop ran
        let alive = unsafe { libc::kill(pid as libc::pid_t, 0) } == 0;
        assert!(!alive);
    }

    #[tokio::test]
    async fn test_spawn_failure_sets_error_and_allows_restart() {
        let registry = Arc::new(ServerRegistry::new());
        let engine = engine(&registry);
        let server = ServerDescriptor::local("Missing", "/nonexistent/lancommander/server-binary");

        assert!(matches!(engine.start(&server).await, Err(ServerError::Process(_))));
        assert_eq!(engine.get_status(&server).await, ServerStatus::Error);
        assert!(registry.get(server.id).error.is_some());

        // Error is not sticky for start requests
        assert!(engine.start(&server).await.is_err());

        engine.stop(&server).await.unwrap();
        assert_eq!(engine.get_status(&server).await, ServerStatus::Stopped);
        assert!(registry.get(server.id).error.is_none());
    }

    #[tokio::test]
    async fn test_standard_output_is_forwarded() {
        let registry = Arc::new(ServerRegistry::new());
        let engine = engine(&registry);
        let mut rx = registry.subscribe();
        let server = ServerDescriptor::local("Echo", "sh").with_arguments("-c \"echo hello from server\"");

        engine.start(&server).await.unwrap();

        let (line, console) = next_log_line(&mut rx).await.expect("No log line received");
        assert_eq!(line, "hello from server");
        assert_eq!(console, ServerConsole::standard_output());
    }

    #[tokio::test]
    async fn test_log_file_console_is_tailed() {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        std::fs::write(dir.join("server.log"), "old line\n").unwrap();

        let registry = Arc::new(ServerRegistry::new());
        let engine = engine(&registry);
        let mut rx = registry.subscribe();
        let console = ServerConsole::log_file("Server Log", "server.log");
        let server = ServerDescriptor::local("Logger", "sh")
            .with_arguments("-c \"sleep 0.3; echo map loaded >> server.log; exec sleep 30\"")
            .with_working_directory(dir.as_str())
            .with_console(console.clone());

        engine.start(&server).await.unwrap();

        let (line, from) = next_log_line(&mut rx).await.expect("No log line received");
        assert_eq!(line, "map loaded");
        assert_eq!(from, console);

        engine.stop(&server).await.unwrap();
    }

    #[tokio::test]
    async fn test_natural_exit_emits_stopped() {
        let registry = Arc::new(ServerRegistry::new());
        let engine = engine(&registry);
        let mut rx = registry.subscribe();
        let server = ServerDescriptor::local("Crash", "sh").with_arguments("-c \"exit 4\"");

        engine.start(&server).await.unwrap();

        let stopped = timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(ServerEvent::StatusUpdate { status: ServerStatus::Stopped, .. }) => break,
                    Ok(_) => continue,
                    Err(e) => panic!("Event channel failed: {}", e),
                }
            }
        })
        .await;

        assert!(stopped.is_ok(), "Natural exit did not emit Stopped");
        assert_eq!(registry.get(server.id).exit_code, Some(4));
    }
}

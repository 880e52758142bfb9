//! Running one external command with lifecycle scripts around it.
//!
//! [`ProcessExecutionContext`] owns the variables exposed to scripts and the
//! script engine. [`ProcessExecutionContext::start`] spawns the target and
//! returns a [`ServerProcess`], which owns the child until it exits. Waiting on a
//! [`ServerProcess`] with a cancelled token terminates the child with the
//! configured [`ProcessTerminationMethod`] and kills it if it outlives the grace
//! period.

use super::paths::PathEnvironment;
use super::scripting::{ScriptEngine, ScriptRequest};
use crate::models::{Action, ProcessTerminationMethod, Script, ScriptType, ServerDescriptor};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Errors that can occur while running a process
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("No executable configured for {0}")]
    InvalidCommand(String),

    #[error("Failed to start {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Everything needed to launch one process.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub name: String,
    pub path: String,
    pub arguments: String,
    pub working_directory: Option<Utf8PathBuf>,
    pub use_shell_execute: bool,
    pub termination_method: ProcessTerminationMethod,
    pub scripts: Vec<Script>,
}

impl LaunchRequest {
    /// Launch request for a local server. `{InstallDir}` is the server's working directory.
    pub fn for_server(server: &ServerDescriptor, environment: &PathEnvironment) -> Self {
        let working_directory = server.working_directory.trim();
        let expand = |value: &str| environment.expand(value, working_directory);

        Self {
            name: server.name.clone(),
            path: expand(&server.path),
            arguments: expand(&server.arguments),
            working_directory: non_empty_dir(&expand(working_directory)),
            use_shell_execute: server.use_shell_execute,
            termination_method: server.termination_method,
            scripts: server.scripts.clone(),
        }
    }

    /// Launch request for a game action installed in `install_directory`.
    ///
    /// An empty action working directory defaults to the install directory.
    pub fn for_action(action: &Action, install_directory: &str, environment: &PathEnvironment) -> Self {
        let expand = |value: &str| environment.expand(value, install_directory);
        let working_directory = if action.working_directory.trim().is_empty() {
            install_directory.to_string()
        } else {
            expand(&action.working_directory)
        };

        Self {
            name: action.name.clone(),
            path: expand(&action.path),
            arguments: expand(&action.arguments),
            working_directory: non_empty_dir(&working_directory),
            use_shell_execute: false,
            termination_method: ProcessTerminationMethod::Close,
            scripts: Vec::new(),
        }
    }

    pub fn scripts_of(&self, script_type: ScriptType) -> impl Iterator<Item = &Script> {
        self.scripts.iter().filter(move |s| s.script_type == script_type)
    }

    /// The executable, resolved against the working directory when it exists there.
    fn program(&self) -> Utf8PathBuf {
        let path = Utf8Path::new(&self.path);
        match &self.working_directory {
            Some(dir) if path.is_relative() && dir.join(path).is_file() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn non_empty_dir(value: &str) -> Option<Utf8PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| Utf8PathBuf::from(value))
}

/// Split a command line into arguments.
///
/// Whitespace separates arguments except inside double quotes. A backslash
/// escapes a following quote; every other backslash is literal so Windows paths
/// survive intact.
pub fn split_arguments(arguments: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    let mut chars = arguments.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
                has_token = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if has_token {
        args.push(current);
    }

    args
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; `None` when the process died from a signal.
    pub code: Option<i32>,

    /// Whether the exit followed a cancellation request.
    pub requested: bool,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running child process.
///
/// Dropping it kills the child.
#[derive(Debug)]
pub struct ServerProcess {
    name: String,
    child: Child,
    pid: Option<u32>,
    started_at: Instant,
}

impl ServerProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Forward stdout and stderr line by line to `on_line` until they close.
    pub fn forward_output<F>(&mut self, on_line: F) -> Vec<JoinHandle<()>>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let on_line: Arc<dyn Fn(String) + Send + Sync> = Arc::new(on_line);
        let mut readers = Vec::new();

        if let Some(stdout) = self.child.stdout.take() {
            readers.push(spawn_line_reader(stdout, on_line.clone()));
        }
        if let Some(stderr) = self.child.stderr.take() {
            readers.push(spawn_line_reader(stderr, on_line));
        }

        readers
    }

    /// Wait for the process to exit, terminating it once `cancel` fires.
    pub async fn wait(
        &mut self,
        cancel: &CancellationToken,
        method: ProcessTerminationMethod,
        grace: Duration,
    ) -> Result<ProcessExit, ProcessError> {
        tokio::select! {
            status = self.child.wait() => {
                let status = status.map_err(ProcessError::Wait)?;
                Ok(ProcessExit { code: status.code(), requested: false })
            }
            _ = cancel.cancelled() => self.terminate(method, grace).await,
        }
    }

    /// Ask the process to exit, killing it if it is still alive after `grace`.
    pub async fn terminate(
        &mut self,
        method: ProcessTerminationMethod,
        grace: Duration,
    ) -> Result<ProcessExit, ProcessError> {
        if let Some(status) = self.child.try_wait().map_err(ProcessError::Wait)? {
            return Ok(ProcessExit { code: status.code(), requested: true });
        }

        tracing::info!("Stopping {} with {:?}", self.name, method);
        if let Err(e) = self.send_termination(method).await {
            tracing::warn!("Termination request for {} failed: {}", self.name, e);
        }

        let status = match timeout(grace, self.child.wait()).await {
            Ok(status) => status.map_err(ProcessError::Wait)?,
            Err(_) => {
                tracing::warn!(
                    "{} still running after {:.1}s, killing",
                    self.name,
                    grace.as_secs_f32()
                );
                self.child.kill().await.map_err(ProcessError::Wait)?;
                self.child.wait().await.map_err(ProcessError::Wait)?
            }
        };

        Ok(ProcessExit { code: status.code(), requested: true })
    }

    async fn send_termination(&mut self, method: ProcessTerminationMethod) -> Result<(), ProcessError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            let signal = match method {
                ProcessTerminationMethod::Close | ProcessTerminationMethod::SigTerm => libc::SIGTERM,
                ProcessTerminationMethod::Kill | ProcessTerminationMethod::SigKill => libc::SIGKILL,
                ProcessTerminationMethod::SigInt => libc::SIGINT,
                ProcessTerminationMethod::SigHup => libc::SIGHUP,
            };
            send_signal(pid, signal)
        }

        #[cfg(not(unix))]
        {
            match method {
                ProcessTerminationMethod::Kill | ProcessTerminationMethod::SigKill => self
                    .child
                    .start_kill()
                    .map_err(|source| ProcessError::Signal { pid, source }),
                _ => {
                    // Without /F this posts WM_CLOSE so the server can shut down cleanly.
                    let status = Command::new("taskkill")
                        .args(["/PID", &pid.to_string()])
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status()
                        .await
                        .map_err(|source| ProcessError::Signal { pid, source })?;
                    if !status.success() {
                        tracing::debug!("taskkill /PID {} returned {:?}", pid, status.code());
                    }
                    Ok(())
                }
            }
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> Result<(), ProcessError> {
    let target = libc::pid_t::try_from(pid).map_err(|_| ProcessError::Signal {
        pid,
        source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
    })?;

    // SAFETY: kill(2) takes plain integers; a stale pid only yields ESRCH.
    let result = unsafe { libc::kill(target, signal) };
    if result == 0 {
        Ok(())
    } else {
        Err(ProcessError::Signal {
            pid,
            source: std::io::Error::last_os_error(),
        })
    }
}

fn spawn_line_reader<Rd>(reader: Rd, on_line: Arc<dyn Fn(String) + Send + Sync>) -> JoinHandle<()>
where
    Rd: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => on_line(line),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Output stream closed with error: {}", e);
                    break;
                }
            }
        }
    })
}

/// Runs processes and their lifecycle scripts with a shared set of script variables.
#[derive(Debug)]
pub struct ProcessExecutionContext<S: ScriptEngine> {
    engine: Arc<S>,
    variables: IndexMap<String, String>,
    termination_grace: Duration,
}

impl<S: ScriptEngine> Clone for ProcessExecutionContext<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            variables: self.variables.clone(),
            termination_grace: self.termination_grace,
        }
    }
}

impl<S: ScriptEngine> ProcessExecutionContext<S> {
    pub fn new(engine: Arc<S>, termination_grace: Duration) -> Self {
        Self {
            engine,
            variables: IndexMap::new(),
            termination_grace,
        }
    }

    /// Expose `name` to every script run through this context. Last write wins.
    pub fn add_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn variables(&self) -> &IndexMap<String, String> {
        &self.variables
    }

    pub fn termination_grace(&self) -> Duration {
        self.termination_grace
    }

    /// Run every script of `script_type` in order. Failures are logged and skipped.
    ///
    /// Returns the number of scripts that failed.
    pub async fn run_scripts(&self, request: &LaunchRequest, script_type: ScriptType) -> usize {
        let mut failures = 0;

        for script in request.scripts_of(script_type) {
            let mut script_request = ScriptRequest::inline(script.contents.clone())
                .add_variables(&self.variables)
                .run_as_admin(script.requires_admin);
            if let Some(dir) = &request.working_directory {
                script_request = script_request.use_working_directory(dir.clone());
            }

            match self.engine.execute(&script_request).await {
                Ok(_) => tracing::debug!("{:?} script {} for {} finished", script_type, script.id, request.name),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        "{:?} script {} for {} failed: {}",
                        script_type,
                        script.id,
                        request.name,
                        e
                    );
                }
            }
        }

        failures
    }

    /// Spawn the request's main process.
    pub fn start(&self, request: &LaunchRequest) -> Result<ServerProcess, ProcessError> {
        if request.path.trim().is_empty() {
            return Err(ProcessError::InvalidCommand(request.name.clone()));
        }

        let program = request.program();
        let mut cmd = if request.use_shell_execute {
            shell_command(&program, &request.arguments)
        } else {
            let mut c = Command::new(program.as_str());
            c.args(split_arguments(&request.arguments));
            c
        };

        if let Some(dir) = &request.working_directory {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!("Starting {}: {} {}", request.name, program, request.arguments);

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            path: program.to_string(),
            source,
        })?;
        let pid = child.id();

        tracing::debug!("{} started with pid {:?}", request.name, pid);

        Ok(ServerProcess {
            name: request.name.clone(),
            child,
            pid,
            started_at: Instant::now(),
        })
    }

    /// Run BeforeStart scripts, the process itself until it exits or `cancel`
    /// fires, then AfterStop scripts.
    pub async fn execute(
        &self,
        request: &LaunchRequest,
        cancel: CancellationToken,
    ) -> Result<ProcessExit, ProcessError> {
        self.run_scripts(request, ScriptType::BeforeStart).await;

        let mut process = self.start(request)?;
        let name = request.name.clone();
        let readers = process.forward_output(move |line| tracing::debug!("[{}] {}", name, line));

        let exit = process
            .wait(&cancel, request.termination_method, self.termination_grace)
            .await;
        drop(process);
        for reader in readers {
            // A detached grandchild can hold the pipe open; don't wait on it forever.
            let _ = timeout(Duration::from_secs(1), reader).await;
        }

        self.run_scripts(request, ScriptType::AfterStop).await;

        let exit = exit?;
        if !exit.requested && !exit.success() {
            tracing::warn!("{} exited with code {:?}", request.name, exit.code);
        }
        Ok(exit)
    }
}

fn shell_command(program: &Utf8Path, arguments: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", &format!("\"{}\" {}", program, arguments)]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", &format!("exec \"{}\" {}", program, arguments)]);
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_arguments_plain() {
        assert_eq!(
            split_arguments("+set dedicated 2  +map q3dm17"),
            vec!["+set", "dedicated", "2", "+map", "q3dm17"]
        );
        assert!(split_arguments("   ").is_empty());
    }

    #[test]
    fn test_split_arguments_quotes() {
        assert_eq!(
            split_arguments(r#"-name "My Server" -motd "say \"hi\"" """#),
            vec!["-name", "My Server", "-motd", "say \"hi\"", ""]
        );
    }

    #[test]
    fn test_split_arguments_keeps_windows_paths() {
        assert_eq!(
            split_arguments(r#"-config "C:\Games\Quake\server.cfg" -log C:\Logs\server.log"#),
            vec!["-config", r"C:\Games\Quake\server.cfg", "-log", r"C:\Logs\server.log"]
        );
    }

    #[test]
    fn test_for_action_expands_install_dir() {
        let action = Action {
            name: "Play".to_string(),
            path: "{InstallDir}/quake3".to_string(),
            arguments: "+exec {InstallDir}/base/autoexec.cfg".to_string(),
            working_directory: String::new(),
            is_primary: true,
        };

        let request = LaunchRequest::for_action(&action, "/games/quake", &PathEnvironment::empty());
        assert_eq!(request.path, "/games/quake/quake3");
        assert_eq!(request.arguments, "+exec /games/quake/base/autoexec.cfg");
        assert_eq!(request.working_directory, Some(Utf8PathBuf::from("/games/quake")));
    }

    #[test]
    fn test_for_server_without_working_directory() {
        let server = ServerDescriptor::local("Quake", "q3ded").with_arguments("+map q3dm17");
        let request = LaunchRequest::for_server(&server, &PathEnvironment::empty());

        assert_eq!(request.path, "q3ded");
        assert_eq!(request.working_directory, None);
        assert_eq!(request.termination_method, ProcessTerminationMethod::Close);
    }

    #[cfg(unix)]
    mod execute {
        use super::*;
        use crate::services::ShellScriptEngine;
        use tempfile::TempDir;

        fn context() -> ProcessExecutionContext<ShellScriptEngine> {
            let mut context =
                ProcessExecutionContext::new(Arc::new(ShellScriptEngine::new()), Duration::from_secs(2));
            context.add_variable("ServerName", "Quake");
            context
        }

        fn temp_dir() -> (TempDir, Utf8PathBuf) {
            let temp_dir = TempDir::new().unwrap();
            let path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
            (temp_dir, path)
        }

        #[tokio::test]
        async fn test_cancelled_execute_terminates_and_runs_after_stop() {
            let (_temp_dir, dir) = temp_dir();
            let mut server = ServerDescriptor::local("Quake", "sleep")
                .with_arguments("30")
                .with_script(Script::new(ScriptType::BeforeStart, "echo before > before.txt; exit 3"))
                .with_script(Script::new(ScriptType::AfterStop, "echo \"$ServerName\" > after.txt"));
            server.working_directory = dir.to_string();
            let request = LaunchRequest::for_server(&server, &PathEnvironment::empty());

            let cancel = CancellationToken::new();
            cancel.cancel();

            let started = Instant::now();
            let exit = context().execute(&request, cancel).await.unwrap();

            assert!(exit.requested);
            assert!(!exit.success());
            assert!(started.elapsed() < Duration::from_secs(10));
            assert!(dir.join("before.txt").is_file());
            assert_eq!(std::fs::read_to_string(dir.join("after.txt")).unwrap(), "Quake\n");
        }

        #[tokio::test]
        async fn test_execute_action_reports_natural_exit() {
            let (_temp_dir, install) = temp_dir();
            let action = Action {
                name: "Benchmark".to_string(),
                path: "sh".to_string(),
                arguments: "-c \"touch ran.txt; exit 4\"".to_string(),
                working_directory: String::new(),
                is_primary: false,
            };
            let request = LaunchRequest::for_action(&action, install.as_str(), &PathEnvironment::empty());

            let exit = context()
                .execute(&request, CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(exit, ProcessExit { code: Some(4), requested: false });
            assert!(install.join("ran.txt").is_file());
        }

        #[tokio::test]
        async fn test_execute_missing_program_is_spawn_error() {
            let (_temp_dir, install) = temp_dir();
            let action = Action {
                name: "Broken".to_string(),
                path: "{InstallDir}/missing-binary".to_string(),
                arguments: String::new(),
                working_directory: String::new(),
                is_primary: false,
            };
            let request = LaunchRequest::for_action(&action, install.as_str(), &PathEnvironment::empty());

            let result = context().execute(&request, CancellationToken::new()).await;
            assert!(matches!(result, Err(ProcessError::Spawn { .. })));
        }
    }
}

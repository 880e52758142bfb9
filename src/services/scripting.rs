use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::future::Future;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;
use tokio::process::Command;

use crate::models::ScriptSettings;

/// Errors that can occur while running a script
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Script has no contents")]
    Empty,

    #[error("Failed to spawn script interpreter {interpreter}: {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Script exited with code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    #[error("Failed to parse script output {output:?}")]
    Parse { output: String },

    #[error("Script I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Inline(String),
    File(Utf8PathBuf),
}

/// A script to run plus everything it can see.
///
/// Built fluently:
///
/// ```
/// use lancommander::services::scripting::ScriptRequest;
///
/// let request = ScriptRequest::inline("echo $ServerName")
///     .add_variable("ServerName", "Quake")
///     .use_working_directory("/srv/quake");
/// assert_eq!(request.variables()["ServerName"], "Quake");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRequest {
    source: ScriptSource,
    variables: IndexMap<String, String>,
    working_directory: Option<Utf8PathBuf>,
    shell_execute: bool,
    debug: bool,
    run_as_admin: bool,
}

impl ScriptRequest {
    pub fn inline(contents: impl Into<String>) -> Self {
        Self::with_source(ScriptSource::Inline(contents.into()))
    }

    pub fn file(path: impl Into<Utf8PathBuf>) -> Self {
        Self::with_source(ScriptSource::File(path.into()))
    }

    fn with_source(source: ScriptSource) -> Self {
        Self {
            source,
            variables: IndexMap::new(),
            working_directory: None,
            shell_execute: false,
            debug: false,
            run_as_admin: false,
        }
    }

    /// Expose `name` to the script. Last write wins.
    pub fn add_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn add_variables<'a>(mut self, variables: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (name, value) in variables {
            self.variables.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn use_working_directory(mut self, directory: impl Into<Utf8PathBuf>) -> Self {
        self.working_directory = Some(directory.into());
        self
    }

    pub fn use_shell_execute(mut self, enabled: bool) -> Self {
        self.shell_execute = enabled;
        self
    }

    pub fn enable_debug(mut self) -> Self {
        self.debug = true;
        self
    }

    pub fn run_as_admin(mut self, enabled: bool) -> Self {
        self.run_as_admin = enabled;
        self
    }

    pub fn source(&self) -> &ScriptSource {
        &self.source
    }

    pub fn variables(&self) -> &IndexMap<String, String> {
        &self.variables
    }

    pub fn working_directory(&self) -> Option<&Utf8Path> {
        self.working_directory.as_deref()
    }

    pub fn is_shell_execute(&self) -> bool {
        self.shell_execute
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn requires_admin(&self) -> bool {
        self.run_as_admin
    }
}

/// Captured result of a finished script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub exit_code: i32,
    pub stdout: String,
}

impl ScriptOutput {
    /// Parse the trimmed standard output as `T`.
    pub fn parse<T: FromStr>(&self) -> Result<T, ScriptError> {
        let trimmed = self.stdout.trim();
        trimmed.parse().map_err(|_| ScriptError::Parse {
            output: trimmed.to_string(),
        })
    }
}

/// Runs lifecycle scripts.
pub trait ScriptEngine: Send + Sync {
    fn execute(
        &self,
        request: &ScriptRequest,
    ) -> impl Future<Output = Result<ScriptOutput, ScriptError>> + Send;
}

/// Script engine backed by the platform shell.
///
/// Inline scripts run through `sh -c` on Unix and
/// `powershell -NoProfile -ExecutionPolicy Bypass -Command` on Windows.
/// Variables are exported as environment variables.
#[derive(Debug, Clone)]
pub struct ShellScriptEngine {
    interpreter: String,
    debug: bool,
}

impl ShellScriptEngine {
    pub fn new() -> Self {
        Self {
            interpreter: default_interpreter().to_string(),
            debug: false,
        }
    }

    pub fn from_settings(settings: &ScriptSettings) -> Self {
        Self {
            interpreter: settings
                .shell
                .clone()
                .filter(|shell| !shell.trim().is_empty())
                .unwrap_or_else(|| default_interpreter().to_string()),
            debug: settings.debug,
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    fn build_command(&self, request: &ScriptRequest) -> Result<Command, ScriptError> {
        let mut cmd = Command::new(&self.interpreter);
        let is_powershell = self.interpreter.to_ascii_lowercase().contains("powershell")
            || self.interpreter.to_ascii_lowercase().contains("pwsh");

        if is_powershell {
            cmd.args(["-NoProfile", "-ExecutionPolicy", "Bypass"]);
        }

        match request.source() {
            ScriptSource::Inline(contents) => {
                if contents.trim().is_empty() {
                    return Err(ScriptError::Empty);
                }
                cmd.arg(if is_powershell { "-Command" } else { "-c" });
                cmd.arg(contents);
            }
            ScriptSource::File(path) => {
                if is_powershell {
                    cmd.arg("-File");
                }
                cmd.arg(path.as_str());
            }
        }

        if let Some(dir) = request.working_directory() {
            cmd.current_dir(dir);
        }

        cmd.envs(request.variables());

        if request.is_shell_execute() {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        Ok(cmd)
    }
}

impl Default for ShellScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for ShellScriptEngine {
    async fn execute(&self, request: &ScriptRequest) -> Result<ScriptOutput, ScriptError> {
        let mut cmd = self.build_command(request)?;

        if self.debug || request.is_debug() {
            tracing::debug!("Running script via {}: {:?}", self.interpreter, request.source());
        }

        if request.requires_admin() {
            // No elevation prompt from a headless supervisor; the script runs as the current user.
            tracing::warn!("Script requests elevation; running with current privileges");
        }

        let start = Instant::now();
        let output = cmd
            .spawn()
            .map_err(|source| ScriptError::Spawn {
                interpreter: self.interpreter.clone(),
                source,
            })?
            .wait_with_output()
            .await?;

        let exit_code = output.status.code().unwrap_or(-1);
        tracing::debug!(
            "Script completed in {:.2}s with exit code {}",
            start.elapsed().as_secs_f32(),
            exit_code
        );

        if !output.status.success() {
            return Err(ScriptError::Failed {
                exit_code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(ScriptOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

fn default_interpreter() -> &'static str {
    if cfg!(target_os = "windows") {
        "powershell"
    } else {
        "sh"
    }
}

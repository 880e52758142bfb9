use super::Script;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which engine supervises a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerEngineKind {
    #[default]
    Local,
    Docker,
}

/// How a local server process is asked to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessTerminationMethod {
    /// Graceful close request (`taskkill` without `/F` on Windows, `SIGTERM` elsewhere)
    #[default]
    Close,
    Kill,
    SigInt,
    SigTerm,
    SigKill,
    SigHup,
}

/// When an autostart-enabled server is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutostartMethod {
    #[default]
    OnApplicationStart,
    OnPlayerActivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerConsoleType {
    LogFile,
    Rcon,
}

/// A console attached to a server; log-file consoles are tailed while it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConsole {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub name: String,

    #[serde(rename = "type")]
    pub console_type: ServerConsoleType,

    /// Log file or directory, relative to the server's working directory unless absolute.
    #[serde(default)]
    pub path: String,
}

impl ServerConsole {
    pub fn log_file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            console_type: ServerConsoleType::LogFile,
            path: path.into(),
        }
    }

    /// Console used for a local process's own stdout/stderr.
    pub fn standard_output() -> Self {
        Self {
            id: Uuid::nil(),
            name: "Standard Output".to_string(),
            console_type: ServerConsoleType::LogFile,
            path: String::new(),
        }
    }
}

/// Hydrated server configuration handed to the engines by the data layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub id: Uuid,
    pub name: String,

    #[serde(default)]
    pub engine: ServerEngineKind,

    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub arguments: String,

    #[serde(default)]
    pub working_directory: String,

    #[serde(default)]
    pub use_shell_execute: bool,

    #[serde(default)]
    pub termination_method: ProcessTerminationMethod,

    #[serde(default)]
    pub autostart: bool,

    #[serde(default)]
    pub autostart_method: AutostartMethod,

    /// Seconds to wait before autostarting this server.
    #[serde(default)]
    pub autostart_delay: u64,

    #[serde(default)]
    pub container_id: Option<String>,

    /// Name of the Docker host from settings; the first configured host when absent.
    #[serde(default)]
    pub docker_host: Option<String>,

    #[serde(default)]
    pub scripts: Vec<Script>,

    #[serde(default)]
    pub consoles: Vec<ServerConsole>,
}

impl ServerDescriptor {
    pub fn local(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            engine: ServerEngineKind::Local,
            path: path.into(),
            arguments: String::new(),
            working_directory: String::new(),
            use_shell_execute: false,
            termination_method: ProcessTerminationMethod::default(),
            autostart: false,
            autostart_method: AutostartMethod::default(),
            autostart_delay: 0,
            container_id: None,
            docker_host: None,
            scripts: Vec::new(),
            consoles: Vec::new(),
        }
    }

    pub fn docker(name: impl Into<String>, container_id: impl Into<String>) -> Self {
        Self {
            engine: ServerEngineKind::Docker,
            container_id: Some(container_id.into()),
            ..Self::local(name, "")
        }
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }

    pub fn with_working_directory(mut self, working_directory: impl Into<String>) -> Self {
        self.working_directory = working_directory.into();
        self
    }

    pub fn with_script(mut self, script: Script) -> Self {
        self.scripts.push(script);
        self
    }

    pub fn with_console(mut self, console: ServerConsole) -> Self {
        self.consoles.push(console);
        self
    }

    pub fn scripts_of(&self, script_type: super::ScriptType) -> impl Iterator<Item = &Script> {
        self.scripts.iter().filter(move |s| s.script_type == script_type)
    }
}

/// A game launch action (primary "Play" entry or an auxiliary tool).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub path: String,

    #[serde(default)]
    pub arguments: String,

    #[serde(default)]
    pub working_directory: String,

    #[serde(default)]
    pub is_primary: bool,
}

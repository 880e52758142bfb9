use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Application settings from `Settings.yml`.
///
/// Loaded once at startup by [`ConfigManager`](crate::config::ConfigManager) and
/// handed to each component's constructor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub install_directories: Vec<Utf8PathBuf>,
    pub storage: StorageSettings,
    pub server_engine: ServerEngineSettings,
    pub servers: ServerSettings,
    pub scripts: ScriptSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub saves: Utf8PathBuf,
    pub servers: Utf8PathBuf,
    pub updates: Utf8PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            saves: Utf8PathBuf::from("Saves"),
            servers: Utf8PathBuf::from("Servers"),
            updates: Utf8PathBuf::from("Updates"),
        }
    }
}

/// A Docker Engine endpoint servers can be bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerHost {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEngineSettings {
    pub docker_hosts: Vec<DockerHost>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Seconds a stopping process gets before it is killed.
    pub termination_grace_secs: u64,

    /// Seconds a Docker container gets to stop.
    pub container_stop_timeout_secs: u64,

    pub log_poll_interval_ms: u64,

    /// Delay applied before autostarting servers that don't set their own.
    pub autostart_delay_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            termination_grace_secs: default_termination_grace(),
            container_stop_timeout_secs: 10,
            log_poll_interval_ms: 500,
            autostart_delay_secs: 0,
        }
    }
}

fn default_termination_grace() -> u64 {
    10
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Log script bodies before running them.
    pub debug: bool,

    /// Interpreter override; `sh` or `powershell` when empty.
    pub shell: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub directory: Utf8PathBuf,
    pub prefix: String,
    pub debug: bool,
    pub console: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: Utf8PathBuf::from("Logs"),
            prefix: "lancommander".to_string(),
            debug: false,
            console: true,
        }
    }
}

impl Settings {
    /// Look up a Docker host by name, falling back to the first configured host.
    pub fn docker_host(&self, name: Option<&str>) -> Option<&DockerHost> {
        match name {
            Some(name) => self
                .server_engine
                .docker_hosts
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name)),
            None => self.server_engine.docker_hosts.first(),
        }
    }
}

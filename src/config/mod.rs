use crate::models::{ServerDescriptor, Settings};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Prefix of environment variables overriding settings, e.g.
/// `LANCOMMANDER__SERVERS__TERMINATION_GRACE_SECS=30`.
pub const ENV_PREFIX: &str = "LANCOMMANDER";

/// Configuration manager for loading and saving YAML configuration files.
///
/// Manages two configuration files:
/// - Settings (`Settings.yml`): install directories, storage paths, server engine options
/// - Servers (`Servers.yml`): descriptors of the servers to supervise
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
    servers_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            settings_path: config_dir.join("Settings.yml"),
            servers_path: config_dir.join("Servers.yml"),
            config_dir,
        })
    }

    /// Load settings from defaults, then `Settings.yml`, then `LANCOMMANDER__*` variables.
    pub fn load_settings(&self) -> Result<Settings> {
        if !self.has_settings_file() {
            tracing::warn!("Settings file not found at {}, using defaults", self.settings_path);
        }

        let defaults = config::Config::try_from(&Settings::default())
            .context("Failed to build default settings")?;

        let settings: Settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(self.settings_path.as_std_path())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load settings: {}", self.settings_path))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        tracing::info!("Loaded settings from {}", self.config_dir);
        Ok(settings)
    }

    /// Whether `Settings.yml` exists; when it doesn't, settings come from defaults and env.
    pub fn has_settings_file(&self) -> bool {
        self.settings_path.is_file()
    }

    /// Save the settings file.
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    /// Load the server descriptors. A missing file means no servers.
    pub fn load_servers(&self) -> Result<Vec<ServerDescriptor>> {
        if !self.servers_path.exists() {
            tracing::debug!("No servers file at {}", self.servers_path);
            return Ok(Vec::new());
        }

        let file_contents = fs::read_to_string(&self.servers_path)
            .with_context(|| format!("Failed to read servers: {}", self.servers_path))?;

        if file_contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let servers: Vec<ServerDescriptor> = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse servers: {}", self.servers_path))?;

        tracing::info!("Loaded {} servers from {}", servers.len(), self.servers_path);
        Ok(servers)
    }

    /// Save the server descriptors.
    pub fn save_servers(&self, servers: &[ServerDescriptor]) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(servers).context("Failed to serialize servers to YAML")?;

        fs::write(&self.servers_path, yaml_string)
            .with_context(|| format!("Failed to write servers: {}", self.servers_path))?;

        tracing::info!("Saved {} servers to {}", servers.len(), self.servers_path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }

    pub fn servers_path(&self) -> &Utf8Path {
        &self.servers_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = Utf8PathBuf::try_from(temp_dir.path().join("Data").join("Config")).unwrap();

        let manager = ConfigManager::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(manager.config_dir(), nested);
    }

    #[test]
    fn test_missing_settings_are_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        let settings = manager.load_settings().unwrap();

        assert_eq!(settings.servers.termination_grace_secs, 10);
        assert_eq!(settings.storage.saves, Utf8PathBuf::from("Saves"));
    }

    #[test]
    fn test_load_save_settings() {
        let (manager, _temp_dir) = create_test_config_manager();

        let mut settings = Settings::default();
        settings.install_directories = vec![Utf8PathBuf::from("/games")];
        settings.servers.log_poll_interval_ms = 250;
        manager.save_settings(&settings).unwrap();

        let loaded = manager.load_settings().unwrap();
        assert_eq!(loaded.install_directories, vec![Utf8PathBuf::from("/games")]);
        assert_eq!(loaded.servers.log_poll_interval_ms, 250);
    }

    #[test]
    fn test_partial_settings_file_keeps_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(manager.settings_path(), "logging:\n  debug: true\n").unwrap();

        let loaded = manager.load_settings().unwrap();
        assert!(loaded.logging.debug);
        assert_eq!(loaded.logging.prefix, "lancommander");
    }

    #[test]
    fn test_missing_servers_file_is_empty() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert!(manager.load_servers().unwrap().is_empty());
    }

    #[test]
    fn test_load_save_servers() {
        let (manager, _temp_dir) = create_test_config_manager();

        let servers = vec![
            ServerDescriptor::local("Quake", "/opt/quake/q3ded").with_arguments("+map q3dm17"),
            ServerDescriptor::docker("Valheim", "valheim-1"),
        ];
        manager.save_servers(&servers).unwrap();

        let loaded = manager.load_servers().unwrap();
        assert_eq!(loaded, servers);
    }
}

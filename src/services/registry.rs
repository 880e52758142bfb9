//! Registry export/import capability for registry-type save paths.
//!
//! Only Windows has a registry; every other target gets [`NoopRegistry`]. The
//! implementation is chosen once by [`default_registry`] instead of checking the
//! OS at each call site.

use thiserror::Error;

/// Header every `.reg` export starts with.
pub const REGISTRY_HEADER: &str = "Windows Registry Editor Version 5.00";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry command failed for {key}: {message}")]
    CommandFailed { key: String, message: String },

    #[error("Registry I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exports registry keys to `.reg` text and replays such text back.
#[cfg_attr(test, mockall::automock)]
pub trait RegistryExporter: Send + Sync {
    /// Export `key` (and its subkeys) as `.reg` text. Empty when nothing was exported.
    fn export(&self, key: &str) -> Result<String, RegistryError>;

    /// Import `.reg` text previously produced by [`export`](Self::export).
    fn import(&self, contents: &str) -> Result<(), RegistryError>;
}

/// Registry stand-in for platforms without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRegistry;

impl RegistryExporter for NoopRegistry {
    fn export(&self, key: &str) -> Result<String, RegistryError> {
        tracing::debug!("Registry export skipped on this platform: {}", key);
        Ok(String::new())
    }

    fn import(&self, _contents: &str) -> Result<(), RegistryError> {
        tracing::debug!("Registry import skipped on this platform");
        Ok(())
    }
}

/// Registry access through `reg.exe export` / `reg.exe import`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegCommandRegistry;

impl RegistryExporter for RegCommandRegistry {
    fn export(&self, key: &str) -> Result<String, RegistryError> {
        let dir = std::env::temp_dir();
        let target = dir.join(format!("lancommander-{}.reg", uuid::Uuid::new_v4()));

        let output = std::process::Command::new("reg")
            .arg("export")
            .arg(key)
            .arg(&target)
            .arg("/y")
            .output()?;

        if !output.status.success() {
            let _ = std::fs::remove_file(&target);
            // A missing key is not an error; the rule just has nothing to save.
            tracing::debug!(
                "reg export returned {:?} for {}: {}",
                output.status.code(),
                key,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(String::new());
        }

        let bytes = std::fs::read(&target)?;
        let _ = std::fs::remove_file(&target);
        Ok(decode_reg_file(&bytes))
    }

    fn import(&self, contents: &str) -> Result<(), RegistryError> {
        let target = std::env::temp_dir().join(format!("lancommander-{}.reg", uuid::Uuid::new_v4()));
        std::fs::write(&target, contents)?;

        let output = std::process::Command::new("reg")
            .arg("import")
            .arg(&target)
            .output();
        let _ = std::fs::remove_file(&target);
        let output = output?;

        if !output.status.success() {
            return Err(RegistryError::CommandFailed {
                key: target.display().to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// The registry implementation for the compile target.
#[cfg(windows)]
pub fn default_registry() -> RegCommandRegistry {
    RegCommandRegistry
}

/// The registry implementation for the compile target.
#[cfg(not(windows))]
pub fn default_registry() -> NoopRegistry {
    NoopRegistry
}

/// `reg export` writes UTF-16LE with a BOM.
fn decode_reg_file(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFF, 0xFE]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Merge several `.reg` exports into one document with a single header.
pub fn merge_exports<'a>(exports: impl IntoIterator<Item = &'a str>) -> String {
    let mut merged = String::from(REGISTRY_HEADER);
    merged.push_str("\r\n");

    for export in exports {
        let body = export
            .trim_start_matches('\u{feff}')
            .trim_start()
            .strip_prefix(REGISTRY_HEADER)
            .unwrap_or(export);
        merged.push_str("\r\n");
        merged.push_str(body.trim());
        merged.push_str("\r\n");
    }

    merged
}

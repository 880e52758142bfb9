//! Restoring save archives onto the local machine.
//!
//! The manifest is read first to learn which rule owns each `Files/<id>/...`
//! entry. Each entry is written to the actual path the manifest recorded for it,
//! expanded for *this* machine. Manifests without recorded entries fall back to
//! the rule's working directory. One failing file does not abort the restore.

use super::registry::{RegistryError, RegistryExporter};
use super::save_packer::{FILES_PREFIX, MANIFEST_ENTRY, REGISTRY_ENTRY};
use super::save_path::SavePathResolver;
use crate::models::SaveManifest;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use std::io::{Read, Seek};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use zip::ZipArchive;

/// Errors that abort a restore
#[derive(Error, Debug)]
pub enum SaveUnpackError {
    #[error("Save archive has no {MANIFEST_ENTRY}")]
    MissingManifest,

    #[error("Save archive manifest is corrupt: {0}")]
    CorruptManifest(#[from] serde_yaml_ng::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to import registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("Unpacking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A file that could not be restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub entry: String,
    pub message: String,
}

/// Outcome of a restore.
#[derive(Debug, Clone, Default)]
pub struct UnpackReport {
    pub manifest: Option<SaveManifest>,
    pub restored: Vec<Utf8PathBuf>,
    pub failed: Vec<FailedEntry>,
    pub skipped: Vec<String>,
    pub registry_imported: bool,
}

impl UnpackReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Extracts save archives for one install directory.
pub struct SaveUnpacker<R: RegistryExporter> {
    resolver: SavePathResolver,
    registry: Arc<R>,
}

impl<R: RegistryExporter + 'static> SaveUnpacker<R> {
    pub fn new(resolver: SavePathResolver, registry: R) -> Self {
        Self {
            resolver,
            registry: Arc::new(registry),
        }
    }

    /// Restore every entry of the archive in `reader`.
    pub async fn unpack<Rd>(&self, reader: Rd) -> Result<UnpackReport, SaveUnpackError>
    where
        Rd: Read + Seek + Send + 'static,
    {
        let resolver = self.resolver.clone();
        let (mut report, registry) =
            tokio::task::spawn_blocking(move || extract_archive(reader, &resolver)).await??;

        if let Some(contents) = registry {
            let registry = Arc::clone(&self.registry);
            tokio::task::spawn_blocking(move || registry.import(&contents)).await??;
            report.registry_imported = true;
        }

        tracing::info!(
            "Restored {} save files ({} failed, {} skipped)",
            report.restored.len(),
            report.failed.len(),
            report.skipped.len()
        );

        Ok(report)
    }

    /// Read only the manifest of a save archive.
    pub fn read_manifest<Rd: Read + Seek>(reader: Rd) -> Result<SaveManifest, SaveUnpackError> {
        let mut archive = ZipArchive::new(reader)?;
        read_manifest(&mut archive)
    }
}

fn extract_archive<Rd: Read + Seek>(
    reader: Rd,
    resolver: &SavePathResolver,
) -> Result<(UnpackReport, Option<String>), SaveUnpackError> {
    let mut archive = ZipArchive::new(reader)?;
    let manifest = read_manifest(&mut archive)?;

    let mut report = UnpackReport::default();
    let mut registry = None;

    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        if file.is_dir() {
            continue;
        }

        let name = file.name().to_string();

        if name.eq_ignore_ascii_case(MANIFEST_ENTRY) {
            continue;
        }

        if name.eq_ignore_ascii_case(REGISTRY_ENTRY) {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            registry = Some(contents);
            continue;
        }

        let Some((id, relative)) = split_file_entry(&name) else {
            tracing::warn!("Skipping unrecognized save entry {}", name);
            report.skipped.push(name);
            continue;
        };

        let Some(save_path) = manifest.save_path(id) else {
            tracing::warn!("Skipping save entry {} with no matching save path", name);
            report.skipped.push(name);
            continue;
        };

        let target = match save_path
            .entries
            .iter()
            .find(|entry| entry.archive_path.trim_start_matches('/') == relative.as_str())
        {
            Some(entry) => resolver.get_local_path(&entry.actual_path),
            None => resolver
                .get_local_path(&save_path.working_directory)
                .join(relative),
        };

        match write_entry(&mut file, &target) {
            Ok(()) => {
                tracing::debug!("Restored {} to {}", name, target);
                report.restored.push(target);
            }
            Err(e) => {
                tracing::warn!("Failed to restore {} to {}: {}", name, target, e);
                report.failed.push(FailedEntry {
                    entry: name,
                    message: e.to_string(),
                });
            }
        }
    }

    report.manifest = Some(manifest);
    Ok((report, registry))
}

fn read_manifest<Rd: Read + Seek>(
    archive: &mut ZipArchive<Rd>,
) -> Result<SaveManifest, SaveUnpackError> {
    let index = (0..archive.len())
        .find(|&i| {
            archive
                .name_for_index(i)
                .is_some_and(|name| name.eq_ignore_ascii_case(MANIFEST_ENTRY))
        })
        .ok_or(SaveUnpackError::MissingManifest)?;

    let mut contents = String::new();
    archive.by_index(index)?.read_to_string(&mut contents)?;
    Ok(serde_yaml_ng::from_str(&contents)?)
}

/// Split `Files/<id>/<relative>` into its rule id and a safe relative path.
fn split_file_entry(name: &str) -> Option<(Uuid, &Utf8Path)> {
    let rest = name.strip_prefix(FILES_PREFIX)?.strip_prefix('/')?;
    let (id, relative) = rest.split_once('/')?;
    let id = Uuid::parse_str(id).ok()?;
    let relative = Utf8Path::new(relative);

    let is_safe = relative
        .components()
        .all(|component| matches!(component, Utf8Component::Normal(_)));

    if relative.as_str().is_empty() || !is_safe {
        return None;
    }

    Some((id, relative))
}

fn write_entry(file: &mut impl Read, target: &Utf8Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut output = std::fs::File::create(target)?;
    std::io::copy(file, &mut output)?;
    Ok(())
}

//! Building save archives.
//!
//! A save archive is a zip with:
//! - `Manifest.yml` at the root (YAML [`SaveManifest`](crate::models::SaveManifest))
//! - `Files/<SavePathId>/<relative path>` for every file a rule resolved to
//! - `_registry.reg` holding every exported registry key (Windows saves only)
//!
//! Entries are staged with the `add_*` methods and written in staging order by
//! [`SavePacker::pack`].

use super::registry::{self, RegistryError, RegistryExporter};
use super::save_path::{SavePathError, SavePathResolver};
use crate::models::{SavePath, SavePathType};
use camino::Utf8PathBuf;
use serde::Serialize;
use std::io::{Cursor, Seek, Write};
use thiserror::Error;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Name of the manifest entry at the archive root.
pub const MANIFEST_ENTRY: &str = "Manifest.yml";

/// Name of the merged registry export entry.
pub const REGISTRY_ENTRY: &str = "_registry.reg";

/// Top-level directory holding save files.
pub const FILES_PREFIX: &str = "Files";

/// Errors that can occur while packing a save
#[derive(Error, Debug)]
pub enum SavePackError {
    #[error("Unsupported save path type {path_type:?} for save path {id}")]
    UnsupportedSavePathType { id: uuid::Uuid, path_type: SavePathType },

    #[error("Failed to resolve save path: {0}")]
    SavePath(#[from] SavePathError),

    #[error("Failed to serialize manifest: {0}")]
    Manifest(#[from] serde_yaml_ng::Error),

    #[error("Failed to export registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Packing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
enum StagedEntry {
    Manifest(String),
    File { name: String, source: Utf8PathBuf },
    /// Position of the merged registry entry; content lives in `registry_exports`.
    Registry,
}

/// Stages manifest, file and registry entries and writes them into a zip.
pub struct SavePacker<R: RegistryExporter> {
    resolver: SavePathResolver,
    registry: R,
    staged: Vec<StagedEntry>,
    registry_exports: Vec<String>,
}

impl<R: RegistryExporter> SavePacker<R> {
    pub fn new(resolver: SavePathResolver, registry: R) -> Self {
        Self {
            resolver,
            registry,
            staged: Vec::new(),
            registry_exports: Vec::new(),
        }
    }

    pub fn has_manifest(&self) -> bool {
        self.staged
            .iter()
            .any(|entry| matches!(entry, StagedEntry::Manifest(_)))
    }

    pub fn has_entries(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Names of the staged entries in write order.
    pub fn entry_names(&self) -> Vec<String> {
        self.staged
            .iter()
            .map(|entry| match entry {
                StagedEntry::Manifest(_) => MANIFEST_ENTRY.to_string(),
                StagedEntry::File { name, .. } => name.clone(),
                StagedEntry::Registry => REGISTRY_ENTRY.to_string(),
            })
            .collect()
    }

    /// Serialize `manifest` to YAML and stage it as `Manifest.yml`.
    pub fn add_manifest<T: Serialize>(&mut self, manifest: &T) -> Result<&mut Self, SavePackError> {
        let yaml = serde_yaml_ng::to_string(manifest)?;
        self.staged
            .retain(|entry| !matches!(entry, StagedEntry::Manifest(_)));
        self.staged.push(StagedEntry::Manifest(yaml));
        Ok(self)
    }

    /// Resolve `save_path` and stage every entry it yields.
    pub fn add_path(&mut self, save_path: &SavePath) -> Result<&mut Self, SavePackError> {
        match save_path.path_type {
            SavePathType::File => {
                for (source, entry) in self.resolver.resolve_files(save_path)? {
                    self.staged.push(StagedEntry::File {
                        name: file_entry_name(save_path.id, &entry.archive_path),
                        source,
                    });
                }
                Ok(self)
            }
            SavePathType::Registry => self.add_registry_path(save_path),
            path_type => Err(SavePackError::UnsupportedSavePathType {
                id: save_path.id,
                path_type,
            }),
        }
    }

    pub fn add_paths<'a>(
        &mut self,
        save_paths: impl IntoIterator<Item = &'a SavePath>,
    ) -> Result<&mut Self, SavePackError> {
        for save_path in save_paths {
            self.add_path(save_path)?;
        }
        Ok(self)
    }

    /// Export a registry rule's key. Rules of any other type add nothing.
    pub fn add_registry_path(&mut self, save_path: &SavePath) -> Result<&mut Self, SavePackError> {
        if save_path.path_type != SavePathType::Registry {
            return Ok(self);
        }

        let export = self.registry.export(&save_path.path)?;
        if export.trim().is_empty() {
            tracing::debug!("Registry key {} exported nothing", save_path.path);
            return Ok(self);
        }

        if self.registry_exports.is_empty() {
            self.staged.push(StagedEntry::Registry);
        }
        self.registry_exports.push(export);
        Ok(self)
    }

    /// Write every staged entry into an in-memory zip positioned at offset 0.
    pub async fn pack(&mut self) -> Result<Cursor<Vec<u8>>, SavePackError> {
        let staged = self.staged.clone();
        let registry = self.merged_registry();

        let mut cursor = tokio::task::spawn_blocking(move || {
            write_archive(Cursor::new(Vec::new()), &staged, registry.as_deref())
        })
        .await??;

        cursor.set_position(0);
        Ok(cursor)
    }

    /// Write every staged entry into `writer`, returning it rewound to the start.
    pub fn pack_to<W: Write + Seek>(&mut self, writer: W) -> Result<W, SavePackError> {
        let registry = self.merged_registry();
        let mut writer = write_archive(writer, &self.staged, registry.as_deref())?;
        writer.rewind()?;
        Ok(writer)
    }

    /// Drop all staged entries. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        self.staged.clear();
        self.registry_exports.clear();
    }

    fn merged_registry(&self) -> Option<String> {
        if self.registry_exports.is_empty() {
            None
        } else {
            Some(registry::merge_exports(
                self.registry_exports.iter().map(String::as_str),
            ))
        }
    }
}

/// Archive entry name for a file resolved by the rule `id`.
pub fn file_entry_name(id: uuid::Uuid, archive_path: &str) -> String {
    format!("{}/{}/{}", FILES_PREFIX, id, archive_path.trim_start_matches('/'))
}

fn write_archive<W: Write + Seek>(
    writer: W,
    staged: &[StagedEntry],
    registry: Option<&str>,
) -> Result<W, SavePackError> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in staged {
        match entry {
            StagedEntry::Manifest(yaml) => {
                zip.start_file(MANIFEST_ENTRY, options)?;
                zip.write_all(yaml.as_bytes())?;
            }
            StagedEntry::File { name, source } => {
                // Files can vanish between resolution and packing (games delete temp saves).
                let mut input = match std::fs::File::open(source) {
                    Ok(file) => file,
                    Err(e) => {
                        tracing::warn!("Skipping save file {}: {}", source, e);
                        continue;
                    }
                };
                zip.start_file(name.as_str(), options)?;
                std::io::copy(&mut input, &mut zip)?;
                tracing::debug!("Packed {} as {}", source, name);
            }
            StagedEntry::Registry => {
                if let Some(contents) = registry {
                    zip.start_file(REGISTRY_ENTRY, options)?;
                    zip.write_all(contents.as_bytes())?;
                }
            }
        }
    }

    Ok(zip.finish()?)
}

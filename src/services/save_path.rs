//! Resolution of declarative [`SavePath`] rules into concrete archive entries.
//!
//! A rule names a file, a directory or a regex relative to a placeholder-bearing
//! working directory. Resolving it against an install directory yields one
//! [`SavePathEntry`] per file found on disk. Rules that match nothing resolve to
//! an empty list; optional per-OS save locations rely on that.

use super::paths::{self, PathEnvironment};
use crate::models::{SavePath, SavePathEntry, SavePathType};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use thiserror::Error;
use walkdir::WalkDir;

/// Errors that can occur while resolving save paths
#[derive(Error, Debug)]
pub enum SavePathError {
    #[error("Invalid save path pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to enumerate {path}: {source}")]
    Walk {
        path: Utf8PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
}

/// Resolves save path rules against one install directory.
#[derive(Debug, Clone)]
pub struct SavePathResolver {
    install_directory: Utf8PathBuf,
    environment: PathEnvironment,
}

impl SavePathResolver {
    pub fn new(install_directory: impl Into<Utf8PathBuf>, environment: PathEnvironment) -> Self {
        Self {
            install_directory: install_directory.into(),
            environment,
        }
    }

    pub fn install_directory(&self) -> &Utf8Path {
        &self.install_directory
    }

    pub fn environment(&self) -> &PathEnvironment {
        &self.environment
    }

    /// Expand a placeholder path into a real filesystem path with `/` separators.
    pub fn get_local_path(&self, placeholder_path: &str) -> Utf8PathBuf {
        let expanded = self
            .environment
            .expand(placeholder_path, self.install_directory.as_str());
        Utf8PathBuf::from(paths::normalize_separators(&expanded))
    }

    /// Deflate an absolute path into its portable placeholder form.
    ///
    /// Always returns the fully deflated value with `/` separators.
    pub fn get_actual_path(&self, absolute_path: &str) -> String {
        let deflated = self
            .environment
            .deflate(absolute_path, self.install_directory.as_str());
        paths::normalize_separators(&deflated)
    }

    /// Compute the archive entry name of `absolute_path` relative to `working_directory`.
    ///
    /// The result never starts with `/` and never contains `\`, whether or not
    /// `working_directory` carries a trailing separator.
    pub fn get_archive_path(&self, absolute_path: &str, working_directory: &str) -> String {
        let working_directory = self.get_local_path(working_directory);
        let absolute_path = paths::normalize_separators(absolute_path);

        match paths::strip_path_prefix(&absolute_path, working_directory.as_str()) {
            Some(relative) => relative.trim_start_matches('/').to_string(),
            None => outside_archive_path(&absolute_path),
        }
    }

    /// Resolve a file rule into the entries currently present on disk.
    pub fn get_file_save_path_entries(
        &self,
        save_path: &SavePath,
    ) -> Result<Vec<SavePathEntry>, SavePathError> {
        Ok(self
            .resolve_files(save_path)?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }

    /// Like [`get_file_save_path_entries`](Self::get_file_save_path_entries), keeping
    /// the local file each entry came from.
    pub fn resolve_files(
        &self,
        save_path: &SavePath,
    ) -> Result<Vec<(Utf8PathBuf, SavePathEntry)>, SavePathError> {
        if save_path.path_type != SavePathType::File {
            return Ok(Vec::new());
        }

        let working_directory = self.get_local_path(&save_path.working_directory);
        let files = if save_path.is_regex {
            self.find_regex_matches(save_path, &working_directory)?
        } else {
            self.find_literal_files(save_path, &working_directory)?
        };

        let resolved: Vec<(Utf8PathBuf, SavePathEntry)> = files
            .into_iter()
            .map(|file| {
                let entry = SavePathEntry {
                    archive_path: self.get_archive_path(file.as_str(), &save_path.working_directory),
                    actual_path: self.get_actual_path(file.as_str()),
                };
                (file, entry)
            })
            .collect();

        tracing::debug!(
            "Save path {} ({}) resolved to {} entries",
            save_path.id,
            save_path.path,
            resolved.len()
        );

        Ok(resolved)
    }

    /// Clone `save_paths`, attaching the entries each rule currently resolves to.
    pub fn resolve(&self, save_paths: &[SavePath]) -> Result<Vec<SavePath>, SavePathError> {
        save_paths
            .iter()
            .map(|save_path| {
                let mut resolved = save_path.clone();
                resolved.entries = self.get_file_save_path_entries(save_path)?;
                Ok(resolved)
            })
            .collect()
    }

    fn find_literal_files(
        &self,
        save_path: &SavePath,
        working_directory: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, SavePathError> {
        let target = working_directory.join(self.get_local_path(&save_path.path));

        if target.is_file() {
            return Ok(vec![target]);
        }

        if target.is_dir() {
            return walk_files(&target);
        }

        tracing::debug!("Save path target does not exist: {}", target);
        Ok(Vec::new())
    }

    fn find_regex_matches(
        &self,
        save_path: &SavePath,
        working_directory: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, SavePathError> {
        let pattern = Regex::new(&save_path.path).map_err(|source| SavePathError::InvalidPattern {
            pattern: save_path.path.clone(),
            source,
        })?;

        let root = match literal_prefix(&save_path.path) {
            Some(prefix) => working_directory.join(prefix),
            None => working_directory.to_path_buf(),
        };

        if !root.is_dir() {
            tracing::debug!("Save path search root does not exist: {}", root);
            return Ok(Vec::new());
        }

        let matches = walk_files(&root)?
            .into_iter()
            .filter(|file| {
                let relative = file
                    .strip_prefix(working_directory)
                    .map(|p| paths::normalize_separators(p.as_str()))
                    .unwrap_or_else(|_| paths::normalize_separators(file.as_str()));
                pattern.is_match(&relative)
            })
            .collect();

        Ok(matches)
    }
}

/// Archive name for a file outside its rule's working directory: the absolute
/// path with the root and any drive colon removed (`C:/Users/x` -> `C/Users/x`).
fn outside_archive_path(absolute_path: &str) -> String {
    let bytes = absolute_path.as_bytes();
    let without_drive = if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        format!("{}{}", &absolute_path[..1], &absolute_path[2..])
    } else {
        absolute_path.to_string()
    };

    without_drive.trim_start_matches('/').to_string()
}

/// Leading directory segments of a regex that contain no metacharacters.
fn literal_prefix(pattern: &str) -> Option<String> {
    const META: &[char] = &[
        '.', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '^', '$', '\\',
    ];

    let segments: Vec<&str> = pattern.split('/').collect();
    let literal: Vec<&str> = segments[..segments.len().saturating_sub(1)]
        .iter()
        .take_while(|segment| !segment.is_empty() && !segment.contains(META))
        .copied()
        .collect();

    if literal.is_empty() {
        None
    } else {
        Some(literal.join("/"))
    }
}

fn walk_files(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, SavePathError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|source| SavePathError::Walk {
            path: root.to_path_buf(),
            source,
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = Utf8PathBuf::from_path_buf(entry.into_path())
            .map_err(|p| SavePathError::NonUtf8Path(p.to_string_lossy().into_owned()))?;
        files.push(path);
    }

    Ok(files)
}

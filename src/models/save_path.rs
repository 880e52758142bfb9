use crate::services::paths;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Kind of data a [`SavePath`] rule captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SavePathType {
    File,
    Registry,
    /// Any type this build does not understand (e.g. written by a newer server).
    #[serde(other)]
    Unsupported,
}

/// A declarative rule describing which files or registry keys belong to a game's saves.
///
/// File rules store `path` and `working_directory` with `/` as the only separator;
/// both are normalized on construction and on deserialization. Registry rules keep
/// their key path verbatim since `\` is meaningful there.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SavePath {
    pub id: Uuid,

    #[serde(rename = "Type")]
    pub path_type: SavePathType,

    pub path: String,

    pub working_directory: String,

    #[serde(default)]
    pub is_regex: bool,

    /// Entries resolved at pack time. Only populated inside a save manifest.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<SavePathEntry>,
}

/// A resolved `(ArchivePath, ActualPath)` pair produced by the save path resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SavePathEntry {
    /// Forward-slash path relative to the rule's working directory.
    pub archive_path: String,

    /// Placeholder-bearing path, portable across install locations.
    pub actual_path: String,
}

impl SavePath {
    /// Create a file rule with a fresh id.
    pub fn file(path: impl AsRef<str>, working_directory: impl AsRef<str>) -> Self {
        Self::new(Uuid::new_v4(), SavePathType::File, path, working_directory, false)
    }

    /// Create a regex file rule with a fresh id.
    pub fn regex(pattern: impl AsRef<str>, working_directory: impl AsRef<str>) -> Self {
        Self::new(Uuid::new_v4(), SavePathType::File, pattern, working_directory, true)
    }

    /// Create a registry rule with a fresh id.
    pub fn registry(key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            path_type: SavePathType::Registry,
            path: key.into(),
            working_directory: String::new(),
            is_regex: false,
            entries: Vec::new(),
        }
    }

    pub fn new(
        id: Uuid,
        path_type: SavePathType,
        path: impl AsRef<str>,
        working_directory: impl AsRef<str>,
        is_regex: bool,
    ) -> Self {
        let mut save_path = Self {
            id,
            path_type,
            path: path.as_ref().to_string(),
            working_directory: working_directory.as_ref().to_string(),
            is_regex: is_regex && path_type == SavePathType::File,
            entries: Vec::new(),
        };
        save_path.normalize();
        save_path
    }

    fn normalize(&mut self) {
        if self.path_type == SavePathType::File {
            self.path = if self.is_regex {
                paths::normalize_regex_separators(&self.path)
            } else {
                paths::normalize_separators(&self.path)
            };
            self.working_directory = paths::normalize_separators(&self.working_directory);
        } else {
            self.is_regex = false;
        }
    }
}

impl<'de> Deserialize<'de> for SavePath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Raw {
            id: Uuid,
            #[serde(rename = "Type")]
            path_type: SavePathType,
            path: String,
            #[serde(default)]
            working_directory: String,
            #[serde(default)]
            is_regex: bool,
            #[serde(default)]
            entries: Vec<SavePathEntry>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let mut save_path = SavePath {
            id: raw.id,
            path_type: raw.path_type,
            path: raw.path,
            working_directory: raw.working_directory,
            is_regex: raw.is_regex,
            entries: raw.entries,
        };
        save_path.normalize();
        Ok(save_path)
    }
}

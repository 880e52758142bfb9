use super::SavePath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Manifest written as `Manifest.yml` at the root of every save archive.
///
/// Carries the rules the save was built from so an unpacker on another machine
/// knows which rule owns each `Files/<id>/...` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SaveManifest {
    pub id: Uuid,
    pub game_id: Uuid,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,

    #[serde(default)]
    pub save_paths: Vec<SavePath>,
}

impl SaveManifest {
    pub fn new(game_id: Uuid, save_paths: Vec<SavePath>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            game_id,
            created_on: now,
            updated_on: now,
            save_paths,
        }
    }

    /// Find the rule that owns archive entries namespaced under `id`.
    pub fn save_path(&self, id: Uuid) -> Option<&SavePath> {
        self.save_paths.iter().find(|p| p.id == id)
    }
}

/// Manifest for a packaged game archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveManifest {
    pub id: Uuid,
    pub game_id: Uuid,
    pub version: String,

    #[serde(default)]
    pub changelog: String,

    pub created_on: DateTime<Utc>,
}

impl ArchiveManifest {
    pub fn new(game_id: Uuid, version: impl Into<String>, changelog: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            game_id,
            version: version.into(),
            changelog: changelog.into(),
            created_on: Utc::now(),
        }
    }
}

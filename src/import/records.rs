use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kinds of records a game import touches, in enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImportRecordType {
    Collection,
    Developer,
    Engine,
    Genre,
    Media,
    MultiplayerMode,
    Platform,
    Publisher,
    Tag,
    Game,
}

impl ImportRecordType {
    /// Dependencies first, the game itself last.
    pub const ORDER: [ImportRecordType; 10] = [
        ImportRecordType::Collection,
        ImportRecordType::Developer,
        ImportRecordType::Engine,
        ImportRecordType::Genre,
        ImportRecordType::Media,
        ImportRecordType::MultiplayerMode,
        ImportRecordType::Platform,
        ImportRecordType::Publisher,
        ImportRecordType::Tag,
        ImportRecordType::Game,
    ];
}

impl fmt::Display for ImportRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaRecord {
    pub id: Uuid,
    pub file_id: Uuid,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "Type")]
    pub media_type: String,

    #[serde(default)]
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MultiplayerModeRecord {
    /// `Local`, `Lan` or `Online`
    #[serde(rename = "Type")]
    pub mode_type: String,

    pub min_players: u32,
    pub max_players: u32,

    #[serde(default)]
    pub description: String,
}

/// A game and everything it references, as exported by another server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameImportManifest {
    pub id: Uuid,
    pub title: String,

    #[serde(default)]
    pub sort_title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub engine: Option<String>,

    #[serde(default)]
    pub collections: Vec<String>,

    #[serde(default)]
    pub developers: Vec<String>,

    #[serde(default)]
    pub genres: Vec<String>,

    #[serde(default)]
    pub media: Vec<MediaRecord>,

    #[serde(default)]
    pub multiplayer_modes: Vec<MultiplayerModeRecord>,

    #[serde(default)]
    pub platforms: Vec<String>,

    #[serde(default)]
    pub publishers: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl GameImportManifest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            sort_title: String::new(),
            description: String::new(),
            engine: None,
            collections: Vec::new(),
            developers: Vec::new(),
            genres: Vec::new(),
            media: Vec::new(),
            multiplayer_modes: Vec::new(),
            platforms: Vec::new(),
            publishers: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Every record this manifest imports, grouped by type in enqueue order.
    pub fn records(&self) -> Vec<ImportRecord> {
        fn named(names: &[String], make: fn(String) -> ImportRecord) -> Vec<ImportRecord> {
            names.iter().cloned().map(make).collect()
        }

        let mut records = Vec::new();
        for record_type in ImportRecordType::ORDER {
            match record_type {
                ImportRecordType::Collection => records.extend(named(&self.collections, ImportRecord::Collection)),
                ImportRecordType::Developer => records.extend(named(&self.developers, ImportRecord::Developer)),
                ImportRecordType::Engine => records.extend(self.engine.clone().map(ImportRecord::Engine)),
                ImportRecordType::Genre => records.extend(named(&self.genres, ImportRecord::Genre)),
                ImportRecordType::Media => {
                    records.extend(self.media.iter().cloned().map(ImportRecord::Media))
                }
                ImportRecordType::MultiplayerMode => records.extend(
                    self.multiplayer_modes
                        .iter()
                        .cloned()
                        .map(ImportRecord::MultiplayerMode),
                ),
                ImportRecordType::Platform => records.extend(named(&self.platforms, ImportRecord::Platform)),
                ImportRecordType::Publisher => records.extend(named(&self.publishers, ImportRecord::Publisher)),
                ImportRecordType::Tag => records.extend(named(&self.tags, ImportRecord::Tag)),
                ImportRecordType::Game => records.push(ImportRecord::Game(Box::new(self.clone()))),
            }
        }
        records
    }
}

/// One record to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportRecord {
    Collection(String),
    Developer(String),
    Engine(String),
    Genre(String),
    Media(MediaRecord),
    MultiplayerMode(MultiplayerModeRecord),
    Platform(String),
    Publisher(String),
    Tag(String),
    Game(Box<GameImportManifest>),
}

impl ImportRecord {
    pub fn record_type(&self) -> ImportRecordType {
        match self {
            ImportRecord::Collection(_) => ImportRecordType::Collection,
            ImportRecord::Developer(_) => ImportRecordType::Developer,
            ImportRecord::Engine(_) => ImportRecordType::Engine,
            ImportRecord::Genre(_) => ImportRecordType::Genre,
            ImportRecord::Media(_) => ImportRecordType::Media,
            ImportRecord::MultiplayerMode(_) => ImportRecordType::MultiplayerMode,
            ImportRecord::Platform(_) => ImportRecordType::Platform,
            ImportRecord::Publisher(_) => ImportRecordType::Publisher,
            ImportRecord::Tag(_) => ImportRecordType::Tag,
            ImportRecord::Game(_) => ImportRecordType::Game,
        }
    }

    /// Identity used to avoid queueing the same record twice.
    ///
    /// Named records are keyed by name, media by file id, multiplayer modes by
    /// `type:min-max` and games by id.
    pub fn key(&self) -> String {
        match self {
            ImportRecord::Collection(name)
            | ImportRecord::Developer(name)
            | ImportRecord::Engine(name)
            | ImportRecord::Genre(name)
            | ImportRecord::Platform(name)
            | ImportRecord::Publisher(name)
            | ImportRecord::Tag(name) => name.clone(),
            ImportRecord::Media(media) => media.file_id.to_string(),
            ImportRecord::MultiplayerMode(mode) => {
                format!("{}:{}-{}", mode.mode_type, mode.min_players, mode.max_players)
            }
            ImportRecord::Game(game) => game.id.to_string(),
        }
    }

    /// Human-readable label for progress events.
    pub fn display_name(&self) -> String {
        match self {
            ImportRecord::Media(media) if !media.name.is_empty() => media.name.clone(),
            ImportRecord::Media(media) => format!("{} {}", media.media_type, media.file_id),
            ImportRecord::Game(game) => game.title.clone(),
            _ => self.key(),
        }
    }
}

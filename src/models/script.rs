use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle hook a script is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptType {
    BeforeStart,
    AfterStop,
}

/// A lifecycle script attached to a server or game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub script_type: ScriptType,

    pub contents: String,

    #[serde(default)]
    pub requires_admin: bool,
}

impl Script {
    pub fn new(script_type: ScriptType, contents: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            script_type,
            contents: contents.into(),
            requires_admin: false,
        }
    }
}

//! Data models for LANCommander's save and server core.
//!
//! These are plain value records holding only the fields the core reads:
//! - [`SavePath`] / [`SavePathEntry`]: declarative save rules and their resolved entries
//! - [`SaveManifest`] / [`ArchiveManifest`]: the `Manifest.yml` payloads of packed archives
//! - [`ServerDescriptor`], [`Script`], [`ServerConsole`]: hydrated server configuration
//! - [`Settings`]: application settings loaded from `Settings.yml`
//!
//! The persistence layer owns these records; the core only borrows them per operation.

pub mod manifest;
pub mod save_path;
pub mod script;
pub mod server;
pub mod settings;

pub use manifest::{ArchiveManifest, SaveManifest};
pub use save_path::{SavePath, SavePathEntry, SavePathType};
pub use script::{Script, ScriptType};
pub use server::{
    Action, AutostartMethod, ProcessTerminationMethod, ServerConsole, ServerConsoleType,
    ServerDescriptor, ServerEngineKind,
};
pub use settings::{
    DockerHost, LoggingSettings, ScriptSettings, ServerEngineSettings, ServerSettings, Settings,
    StorageSettings,
};

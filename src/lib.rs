// LANCommander core - save packaging, server supervision and catalog import
//
// This is the library crate containing the core business logic and data structures.
// The binary crate (main.rs) runs the server supervisor.

pub mod config;
pub mod import;
pub mod logging;
pub mod models;
pub mod server;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use models::{SaveManifest, SavePath, SavePathEntry, SavePathType, ServerDescriptor, Settings};
pub use server::{ServerError, ServerService};
pub use services::{PathEnvironment, SavePacker, SavePathResolver, SaveUnpacker};
pub use state::{ServerEvent, ServerRegistry, ServerStatus};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

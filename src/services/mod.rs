//! Services module - save packaging and process execution.
//!
//! The services are plain building blocks with no knowledge of which server or
//! game they act for; the engines in [`crate::server`] compose them.
//!
//! # Components
//!
//! - [`PathEnvironment`]: expands `{InstallDir}`/`%APPDATA%`-style placeholders and
//!   deflates absolute paths back into them
//! - [`SavePathResolver`]: turns [`SavePath`](crate::models::SavePath) rules into the
//!   files currently on disk
//! - [`SavePacker`] / [`SaveUnpacker`]: build and restore save archives:
//!   - `Manifest.yml` at the root
//!   - `Files/<SavePathId>/<relative path>` per file
//!   - `_registry.reg` for registry rules (Windows only, see [`RegistryExporter`])
//! - [`ScriptEngine`] / [`ShellScriptEngine`]: run lifecycle scripts
//! - [`ProcessExecutionContext`]: launch a process with BeforeStart/AfterStop scripts
//!   around it and terminate it on cancellation
//! - [`LogFileMonitor`]: tail a server's log-file consoles
//!
//! # Usage Example
//!
//! ```ignore
//! use lancommander::services::{PathEnvironment, SavePacker, SavePathResolver, default_registry};
//!
//! let resolver = SavePathResolver::new("C:\\Games\\Quake", PathEnvironment::from_host());
//! let mut packer = SavePacker::new(resolver, default_registry());
//! packer.add_manifest(&manifest)?.add_paths(&manifest.save_paths)?;
//! let archive = packer.pack().await?;
//! ```

pub mod log_monitor;
pub mod paths;
pub mod process;
pub mod registry;
pub mod save_packer;
pub mod save_path;
pub mod save_unpacker;
pub mod scripting;

pub use log_monitor::LogFileMonitor;
pub use paths::PathEnvironment;
pub use process::{
    LaunchRequest, ProcessError, ProcessExecutionContext, ProcessExit, ServerProcess, split_arguments,
};
pub use registry::{NoopRegistry, RegCommandRegistry, RegistryError, RegistryExporter, default_registry};
pub use save_packer::{SavePackError, SavePacker};
pub use save_path::{SavePathError, SavePathResolver};
pub use save_unpacker::{FailedEntry, SaveUnpackError, SaveUnpacker, UnpackReport};
pub use scripting::{ScriptEngine, ScriptError, ScriptOutput, ScriptRequest, ShellScriptEngine};

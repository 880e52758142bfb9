//! Dependency-ordered import of a game and its related records.
//!
//! A [`GameImportManifest`] expands into collections, developers, the engine,
//! genres, media, multiplayer modes, platforms, publishers, tags and finally the
//! game itself. The [`Importer`] does not sort them topologically: records that
//! fail because a dependency is missing are retried after the rest of the queue,
//! and the run fails with [`ImportError::Deadlocked`] once a full pass makes no
//! progress.

pub mod importer;
pub mod queue;
pub mod records;

pub use importer::{ImportStatus, ImportSummary, ImportTarget, Importer};
pub use queue::{ImportItem, ImportQueue};
pub use records::{GameImportManifest, ImportRecord, ImportRecordType, MediaRecord, MultiplayerModeRecord};

use thiserror::Error;

/// Errors that abort an import run
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Import deadlocked: {remaining} records cannot be imported ({processed} imported); last error: {last_error}")]
    Deadlocked {
        remaining: usize,
        processed: usize,
        last_error: String,
    },
}

//! Server engines - supervision of dedicated game servers.
//!
//! Both engines share one state machine:
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!               |           |
//!               +-> Error <-+
//! ```
//!
//! - [`LocalServerEngine`]: an OS process launched through
//!   [`ProcessExecutionContext`](crate::services::ProcessExecutionContext)
//! - [`DockerServerEngine`]: an existing container driven through a [`ContainerRuntime`]
//! - [`ServerService`]: dispatches each server to its engine and handles autostart
//!
//! Status lives in the shared [`ServerRegistry`](crate::state::ServerRegistry), which
//! also publishes every change as a [`ServerEvent`](crate::state::ServerEvent).

pub mod docker;
pub mod local;
pub mod service;

pub use docker::{
    ContainerError, ContainerRuntime, ContainerState, ContainerSummary, DockerApi, DockerServerEngine,
};
pub use local::LocalServerEngine;
pub use service::ServerService;

use crate::models::ServerDescriptor;
use crate::services::ProcessError;
use crate::state::{ServerProcessState, ServerStatus};
use std::future::Future;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while managing a server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Server {0} not found")]
    NotFound(Uuid),

    #[error("Failed to start server process: {0}")]
    Process(#[from] ProcessError),

    #[error("Container runtime error: {0}")]
    Container(#[from] ContainerError),

    #[error("Server {0} has no container id")]
    MissingContainerId(String),

    #[error("No Docker host configured for {0}")]
    UnknownDockerHost(String),
}

/// Lifecycle operations shared by the local and Docker engines.
pub trait ServerEngine: Send + Sync {
    /// Start `server` unless it is already past `Stopped`.
    fn start(&self, server: &ServerDescriptor) -> impl Future<Output = Result<(), ServerError>> + Send;

    /// Stop `server`, running its AfterStop scripts.
    fn stop(&self, server: &ServerDescriptor) -> impl Future<Output = Result<(), ServerError>> + Send;

    fn get_status(&self, server: &ServerDescriptor) -> impl Future<Output = ServerStatus> + Send;

    fn get_state(&self, server: &ServerDescriptor) -> impl Future<Output = ServerProcessState> + Send;
}

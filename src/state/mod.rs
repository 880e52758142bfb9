// Server runtime state
//
// This module provides the ServerRegistry which holds the per-server runtime state
// behind a mutex and publishes status and log events on a broadcast channel.

use crate::models::ServerConsole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Lifecycle status of a managed server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServerStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ServerStatus {
    /// Whether a start request may proceed from this status.
    pub fn can_start(self) -> bool {
        matches!(self, ServerStatus::Stopped | ServerStatus::Error)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerStatus::Stopped => "Stopped",
            ServerStatus::Starting => "Starting",
            ServerStatus::Running => "Running",
            ServerStatus::Stopping => "Stopping",
            ServerStatus::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Runtime state of one server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerProcessState {
    pub status: ServerStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,

    /// CPU usage in percent of one core
    pub cpu_load: f32,
    pub memory_bytes: u64,

    /// Message of the error that moved the server to [`ServerStatus::Error`]
    pub error: Option<String>,
    pub exit_code: Option<i32>,
}

/// Events published outward by the server engines
///
/// These are the only channel through which a transport layer learns about
/// server status and console output.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    StatusUpdate {
        server_id: Uuid,
        status: ServerStatus,
        error: Option<String>,
    },

    LogLine {
        server_id: Uuid,
        line: String,
        console: ServerConsole,
    },
}

impl ServerEvent {
    pub fn server_id(&self) -> Uuid {
        match self {
            ServerEvent::StatusUpdate { server_id, .. } | ServerEvent::LogLine { server_id, .. } => {
                *server_id
            }
        }
    }
}

/// Shared runtime state of every managed server
///
/// - A server with no entry reads as [`ServerStatus::Stopped`].
/// - [`set_status()`](Self::set_status) emits a [`ServerEvent::StatusUpdate`] only
///   when the status actually changes.
/// - [`operation_lock()`](Self::operation_lock) serializes start/stop requests per
///   server id.
pub struct ServerRegistry {
    states: Mutex<HashMap<Uuid, ServerProcessState>>,
    operations: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    events: broadcast::Sender<ServerEvent>,
}

impl ServerRegistry {
    /// Create a registry with a broadcast buffer of 256 events
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            states: Mutex::new(HashMap::new()),
            operations: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Sender for components that publish their own events (log monitors).
    pub fn sender(&self) -> broadcast::Sender<ServerEvent> {
        self.events.clone()
    }

    /// Snapshot of one server's state
    pub fn get(&self, server_id: Uuid) -> ServerProcessState {
        self.lock_states()
            .get(&server_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn status(&self, server_id: Uuid) -> ServerStatus {
        self.lock_states()
            .get(&server_id)
            .map(|state| state.status)
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<Uuid, ServerProcessState> {
        self.lock_states().clone()
    }

    /// Set the status and publish it if it changed.
    ///
    /// Returns whether the status changed.
    pub fn set_status(&self, server_id: Uuid, status: ServerStatus, error: Option<String>) -> bool {
        let changed = {
            let mut states = self.lock_states();
            let state = states.entry(server_id).or_default();
            let changed = state.status != status;

            state.status = status;
            state.error = if status == ServerStatus::Error { error.clone() } else { None };
            if matches!(status, ServerStatus::Stopped | ServerStatus::Error) {
                state.pid = None;
                state.cpu_load = 0.0;
                state.memory_bytes = 0;
            }
            changed
        };

        if changed {
            tracing::info!("Server {} is now {}", server_id, status);
            self.publish(ServerEvent::StatusUpdate {
                server_id,
                status,
                error,
            });
        }

        changed
    }

    /// Move from `from` to `to`; does nothing when the server is in any other status.
    pub fn transition(&self, server_id: Uuid, from: ServerStatus, to: ServerStatus) -> bool {
        if self.status(server_id) != from {
            return false;
        }
        self.set_status(server_id, to, None)
    }

    /// Publish the current status even if it did not change.
    pub fn publish_status(&self, server_id: Uuid) {
        let state = self.get(server_id);
        self.publish(ServerEvent::StatusUpdate {
            server_id,
            status: state.status,
            error: state.error,
        });
    }

    /// Mutate a server's state without emitting events (samples, pid).
    pub fn update<F>(&self, server_id: Uuid, update_fn: F)
    where
        F: FnOnce(&mut ServerProcessState),
    {
        let mut states = self.lock_states();
        update_fn(states.entry(server_id).or_default());
    }

    pub fn publish_log(&self, server_id: Uuid, line: impl Into<String>, console: &ServerConsole) {
        self.publish(ServerEvent::LogLine {
            server_id,
            line: line.into(),
            console: console.clone(),
        });
    }

    /// Lock serializing lifecycle operations on one server.
    pub fn operation_lock(&self, server_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(server_id)
            .or_default()
            .clone()
    }

    fn publish(&self, event: ServerEvent) {
        // Ignore send errors - it's OK if no one is listening
        let _ = self.events.send(event);
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<Uuid, ServerProcessState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

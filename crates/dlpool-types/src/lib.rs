//! Shared types for dlpool
//!
//! This crate contains the plain data structures shared between the
//! engine and the CLI.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Task Types
// ============================================================================

/// Lifecycle of a single transfer task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Connecting,
    Transferring,
    /// Sub-state of `Transferring`: the worker is parked between chunks
    Paused,
    Completed,
    Cancelled,
    /// The transfer failed (connect, protocol or I/O error)
    Interrupted,
}

impl TaskStatus {
    /// Whether the task will never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Interrupted
        )
    }
}

/// Credentials attached to a task and turned into an `Authorization` header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum Credential {
    Basic { username: String, password: String },
    Bearer { token: String },
}

impl Credential {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Credential::Bearer {
            token: token.into(),
        }
    }
}

// ============================================================================
// Engine Types
// ============================================================================

/// Lifecycle of the engine itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Running,
    ShutDown,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker threads spawned by `start`
    pub pool_size: usize,
    /// Size of one read/write chunk in bytes
    pub buffer_size: usize,
    pub connect_timeout_ms: u64,
    /// Default whole-transfer timeout for new tasks
    pub read_timeout_ms: u64,
    /// Proxy URL applied to every connection
    pub proxy: Option<String>,
    pub request_method: String,
    /// Static headers sent with every request
    pub headers: BTreeMap<String, String>,
    pub user_agent: String,
}

impl EngineConfig {
    pub const DEFAULT_POOL_SIZE: usize = 3;
    pub const DEFAULT_BUFFER_SIZE: usize = 2048;
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 13_000;
    pub const DEFAULT_READ_TIMEOUT_MS: u64 = 15_000;

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: Self::DEFAULT_POOL_SIZE,
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            connect_timeout_ms: Self::DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: Self::DEFAULT_READ_TIMEOUT_MS,
            proxy: None,
            request_method: "GET".to_string(),
            headers: BTreeMap::new(),
            user_agent: format!("dlpool/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Progress events, one per listener callback, tagged with the task id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ProgressEvent {
    Started {
        id: Uuid,
        filename: String,
        /// `None` when the server did not announce a length
        size: Option<u64>,
    },
    Progress {
        id: Uuid,
        chunk: usize,
        total: u64,
    },
    Completed {
        id: Uuid,
    },
    Cancelled {
        id: Uuid,
    },
    Failed {
        id: Uuid,
        error: String,
    },
}

impl ProgressEvent {
    pub fn id(&self) -> Uuid {
        match self {
            ProgressEvent::Started { id, .. }
            | ProgressEvent::Progress { id, .. }
            | ProgressEvent::Completed { id }
            | ProgressEvent::Cancelled { id }
            | ProgressEvent::Failed { id, .. } => *id,
        }
    }

    /// Whether this is the last event a task will produce
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed { .. }
                | ProgressEvent::Cancelled { .. }
                | ProgressEvent::Failed { .. }
        )
    }
}

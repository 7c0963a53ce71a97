//! Logical messages exchanged between the controller and the worker
//! harness. They travel over an in-process channel today; the serde shapes
//! keep the protocol transport-agnostic and feed the debug event log.

use serde::{Deserialize, Serialize};

use crate::engine::Program;

/// Controller → harness requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMsg {
    /// One-time interpreter bootstrap.
    Init { id: u64 },
    /// Start a run. Ids are unique for the lifetime of the controller.
    Execute { id: u64, program: Program },
    /// Orderly worker teardown.
    Shutdown,
}

/// Harness → controller lifecycle notices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMsg {
    InitSuccess {
        id: u64,
    },
    InitError {
        id: u64,
        error: String,
    },
    /// The run is blocked on the input channel until the controller submits
    /// a line.
    InputRequest {
        prompt: String,
    },
    ExecuteSuccess {
        id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        return_value: Option<String>,
    },
    ExecuteError {
        id: u64,
        error: String,
        /// Distinguishes explicit cancellation from a program bug so the
        /// caller can avoid presenting an interrupt as an error in the code.
        interrupted: bool,
    },
}

impl WorkerMsg {
    /// Request id the message settles, if any.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            WorkerMsg::InitSuccess { id }
            | WorkerMsg::InitError { id, .. }
            | WorkerMsg::ExecuteSuccess { id, .. }
            | WorkerMsg::ExecuteError { id, .. } => Some(*id),
            WorkerMsg::InputRequest { .. } => None,
        }
    }
}

use std::time::Duration;

/// Errors resolved at the controller boundary. Interpreter-level failures
/// (runtime errors, interrupts) are not errors of the bridge itself; they
/// surface as the terminal [`RunOutcome`](crate::controller::RunOutcome) of a
/// run instead.
#[derive(Debug)]
pub enum BridgeError {
    /// `execute` called while uninitialized or while a run is in flight.
    NotReady(&'static str),
    /// Configuration rejected at construction, such as a zero channel
    /// capacity.
    InvalidConfig(&'static str),
    /// The requested entry file is not present in the submitted file set.
    EntrypointNotFound(String),
    /// Submitted input exceeds the input channel capacity. The run keeps
    /// awaiting a shorter input.
    InputTooLarge { submitted: usize, capacity: usize },
    /// Interpreter bootstrap failed. Sticky until the worker is respawned.
    Initialization(String),
    /// The worker thread is gone and cannot take requests.
    Disconnected(String),
    /// A wait on a ticket or watch did not settle in time.
    Timeout(Duration),
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::NotReady(reason) => write!(f, "bridge is not ready: {reason}"),
            BridgeError::InvalidConfig(reason) => {
                write!(f, "invalid configuration: {reason}")
            }
            BridgeError::EntrypointNotFound(name) => {
                write!(f, "entry file {name:?} not found in submitted files")
            }
            BridgeError::InputTooLarge {
                submitted,
                capacity,
            } => write!(
                f,
                "input of {submitted} bytes exceeds channel capacity of {capacity} bytes"
            ),
            BridgeError::Initialization(message) => {
                write!(f, "interpreter initialization failed: {message}")
            }
            BridgeError::Disconnected(message) => write!(f, "worker unavailable: {message}"),
            BridgeError::Timeout(duration) => {
                write!(f, "timed out after {}ms", duration.as_millis())
            }
        }
    }
}

impl std::error::Error for BridgeError {}

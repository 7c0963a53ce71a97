//! Interactive execution bridge for an embedded script interpreter.
//!
//! A single-threaded interpreter runs on a dedicated worker thread and
//! behaves as an interactive console: it blocks on read-input requests,
//! streams partial output as it is produced, and honors an out-of-band
//! interrupt — while the controlling thread stays responsive. The two sides
//! share only the fixed-capacity channels in [`channel`] and talk through
//! the messages in [`protocol`].
//!
//! Typical use:
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//! use console_bridge::{BridgeConfig, BridgeController, MiniScript};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut bridge = BridgeController::new(
//!     Box::new(|| Box::new(MiniScript::new())),
//!     BridgeConfig::default(),
//! )?;
//! bridge.initialize().wait_ready(Duration::from_secs(30))?;
//!
//! let mut files = BTreeMap::new();
//! files.insert("main".to_string(), "print('hi')".to_string());
//! let ticket = bridge.execute(files, "main")?;
//! let outcome = ticket.wait(Duration::from_secs(5))?;
//! assert!(outcome.is_completed());
//! assert_eq!(bridge.output(), "hi\n");
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod controller;
pub mod engine;
pub mod error;
mod event_log;
mod harness;
pub mod lifecycle;
pub mod miniscript;
pub mod protocol;

pub use controller::{
    BridgeConfig, BridgeController, ExecTicket, FailureReason, InitWatch, RunOutcome,
};
pub use engine::{Engine, EngineConsole, EngineError, IoAbort, Program};
pub use error::BridgeError;
pub use event_log::DEBUG_EVENTS_DIR_ENV;
pub use lifecycle::LifecycleState;
pub use miniscript::MiniScript;

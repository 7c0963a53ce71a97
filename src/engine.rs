use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Why an engine-visible I/O operation refused to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoAbort {
    /// The interrupt flag was observed at a poll point.
    Interrupted,
    /// The input channel was closed; no more input will ever arrive.
    EndOfInput,
}

/// The console surface the harness hands to an engine for one run.
///
/// `write_stdout`/`write_stderr` are the pluggable write hooks; they poll the
/// interrupt flag on every flush. `read_line` is the pluggable blocking read
/// hook: it genuinely blocks the worker thread until the controller supplies
/// a line, the channel closes, or an interrupt arrives.
pub trait EngineConsole {
    fn write_stdout(&mut self, bytes: &[u8]) -> Result<(), IoAbort>;
    fn write_stderr(&mut self, bytes: &[u8]) -> Result<(), IoAbort>;
    fn read_line(&mut self, prompt: &str) -> Result<String, IoAbort>;

    /// Cooperative interrupt check for engines that can poll between
    /// instructions even when no I/O happens.
    fn interrupted(&self) -> bool;
}

/// One program submission: a file namespace plus the designated entry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub files: BTreeMap<String, String>,
    pub entry: String,
}

impl Program {
    pub fn new(files: BTreeMap<String, String>, entry: impl Into<String>) -> Self {
        Self {
            files,
            entry: entry.into(),
        }
    }

    pub fn entry_source(&self) -> Option<&str> {
        self.files.get(&self.entry).map(String::as_str)
    }
}

#[derive(Debug)]
pub enum EngineError {
    /// One-time bootstrap failed; the harness instance is unusable.
    Boot(String),
    /// The interpreted program raised or terminated abnormally.
    Runtime(String),
    /// The run observed the interrupt flag and unwound.
    Interrupted,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Boot(message) => write!(f, "engine bootstrap failed: {message}"),
            EngineError::Runtime(message) => f.write_str(message),
            EngineError::Interrupted => f.write_str("execution interrupted"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<IoAbort> for EngineError {
    fn from(abort: IoAbort) -> Self {
        match abort {
            IoAbort::Interrupted => EngineError::Interrupted,
            IoAbort::EndOfInput => EngineError::Runtime("end of input while reading line".into()),
        }
    }
}

/// The opaque interpreter seam. The bridge treats implementations as black
/// boxes: run a source tree to completion or error, with console I/O going
/// through the hooks it was handed.
pub trait Engine: Send {
    /// One-time interpreter bootstrap. May be slow (seconds). Called once
    /// per harness instance, before any `run`.
    fn boot(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Runs the program's entry file in a fresh namespace. Returns the
    /// rendering of the program's final value, if it produced one.
    fn run(
        &mut self,
        program: &Program,
        console: &mut dyn EngineConsole,
    ) -> Result<Option<String>, EngineError>;
}

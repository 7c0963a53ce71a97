use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Controller-visible lifecycle of the bridge.
///
/// The harness drives transitions into `AwaitingInput`, `Completed` and
/// `Failed` via worker messages; the controller drives transitions out of
/// `Idle` (`execute`) and back into `Executing` (`submit_input`). The
/// terminal states double as accept-states for the next `execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Loading,
    Executing,
    AwaitingInput,
    Completed,
    Failed,
}

impl LifecycleState {
    pub fn is_running(self) -> bool {
        matches!(self, LifecycleState::Executing | LifecycleState::AwaitingInput)
    }

    pub fn accepts_execute(self) -> bool {
        matches!(
            self,
            LifecycleState::Idle | LifecycleState::Completed | LifecycleState::Failed
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Loading => "loading",
            LifecycleState::Executing => "executing",
            LifecycleState::AwaitingInput => "awaiting_input",
            LifecycleState::Completed => "completed",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Shared lifecycle mirror. The pump thread writes it, callers observe it,
/// tests wait on it.
#[derive(Debug)]
pub struct StateCell {
    inner: Mutex<LifecycleState>,
    cvar: Condvar,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LifecycleState::Idle),
            cvar: Condvar::new(),
        }
    }

    pub fn get(&self) -> LifecycleState {
        *self.inner.lock().unwrap()
    }

    pub fn set(&self, next: LifecycleState) {
        let mut guard = self.inner.lock().unwrap();
        *guard = next;
        self.cvar.notify_all();
    }

    /// Transitions to `next` only when the current state satisfies `from`.
    /// Returns whether the transition happened.
    pub fn set_if(&self, from: impl Fn(LifecycleState) -> bool, next: LifecycleState) -> bool {
        let mut guard = self.inner.lock().unwrap();
        if !from(*guard) {
            return false;
        }
        *guard = next;
        self.cvar.notify_all();
        true
    }

    /// Blocks until `pred` holds or the timeout elapses. Returns the state
    /// that satisfied `pred`, or `None` on timeout.
    pub fn wait_for(
        &self,
        timeout: Duration,
        pred: impl Fn(LifecycleState) -> bool,
    ) -> Option<LifecycleState> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock().unwrap();
        loop {
            if pred(*guard) {
                return Some(*guard);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, result) = self.cvar.wait_timeout(guard, deadline - now).unwrap();
            guard = next;
            if result.timed_out() && !pred(*guard) {
                return None;
            }
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

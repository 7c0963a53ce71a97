//! Worker-side of the bridge: owns the engine instance, services controller
//! requests, and wires the engine's I/O hooks to the shared channels.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use crate::channel::SharedConsole;
use crate::engine::{Engine, EngineConsole, EngineError, IoAbort, Program};
use crate::protocol::{ControllerMsg, WorkerMsg};

/// Harness-local phase. `Running`/`AwaitingInput` are not stored here: the
/// request loop is single-threaded, so during a run the phase is implied by
/// control flow and surfaced to the controller via messages.
enum HarnessPhase {
    Uninitialized,
    Ready,
    Failed(String),
}

pub(crate) struct ExecutionWorkerHarness {
    engine: Box<dyn Engine>,
    shared: Arc<SharedConsole>,
    events: Sender<WorkerMsg>,
    phase: HarnessPhase,
}

/// Worker thread entry point. Returns when the controller shuts the
/// request channel down or sends `Shutdown`.
pub(crate) fn run_worker(
    engine: Box<dyn Engine>,
    shared: Arc<SharedConsole>,
    requests: Receiver<ControllerMsg>,
    events: Sender<WorkerMsg>,
) {
    let mut harness = ExecutionWorkerHarness {
        engine,
        shared,
        events,
        phase: HarnessPhase::Uninitialized,
    };
    for msg in requests {
        match msg {
            ControllerMsg::Init { id } => harness.handle_init(id),
            ControllerMsg::Execute { id, program } => harness.handle_execute(id, program),
            ControllerMsg::Shutdown => break,
        }
    }
}

impl ExecutionWorkerHarness {
    fn handle_init(&mut self, id: u64) {
        match &self.phase {
            HarnessPhase::Ready => {
                // Repeated init is idempotent once bootstrapped.
                let _ = self.events.send(WorkerMsg::InitSuccess { id });
                return;
            }
            HarnessPhase::Failed(message) => {
                let error = message.clone();
                let _ = self.events.send(WorkerMsg::InitError { id, error });
                return;
            }
            HarnessPhase::Uninitialized => {}
        }
        match self.engine.boot() {
            Ok(()) => {
                self.phase = HarnessPhase::Ready;
                let _ = self.events.send(WorkerMsg::InitSuccess { id });
            }
            Err(err) => {
                let message = err.to_string();
                // Sticky: every later request fails with the stored error
                // until the controller respawns this harness.
                self.phase = HarnessPhase::Failed(message.clone());
                let _ = self.events.send(WorkerMsg::InitError { id, error: message });
            }
        }
    }

    fn handle_execute(&mut self, id: u64, program: Program) {
        match &self.phase {
            HarnessPhase::Ready => {}
            HarnessPhase::Failed(message) => {
                self.send_error(id, format!("interpreter failed to initialize: {message}"), false);
                return;
            }
            HarnessPhase::Uninitialized => {
                self.send_error(id, "interpreter is not initialized".to_string(), false);
                return;
            }
        }
        // The controller pre-checks this; the harness still fails fast
        // rather than handing the engine a program it cannot start.
        if program.entry_source().is_none() {
            self.send_error(id, format!("entry file {:?} not found", program.entry), false);
            return;
        }

        self.shared.output.reset();
        self.shared.input.clear();

        let mut console = HarnessConsole {
            shared: &self.shared,
            events: &self.events,
        };
        let result = self.engine.run(&program, &mut console);
        match result {
            Ok(return_value) => {
                let _ = self.events.send(WorkerMsg::ExecuteSuccess { id, return_value });
            }
            Err(EngineError::Interrupted) => {
                self.send_error(id, "execution interrupted".to_string(), true);
            }
            Err(err) => self.send_error(id, err.to_string(), false),
        }
    }

    fn send_error(&self, id: u64, error: String, interrupted: bool) {
        let _ = self.events.send(WorkerMsg::ExecuteError {
            id,
            error,
            interrupted,
        });
    }
}

/// The console handed to the engine for one run: stdout/stderr flush into
/// the output ring, `read_line` posts an input-request notice and then
/// genuinely blocks on the input channel.
struct HarnessConsole<'a> {
    shared: &'a SharedConsole,
    events: &'a Sender<WorkerMsg>,
}

impl HarnessConsole<'_> {
    fn flush(&self, bytes: &[u8]) -> Result<(), IoAbort> {
        // Poll point: an interrupt observed during a flush aborts the run.
        if self.shared.interrupt.is_requested() {
            return Err(IoAbort::Interrupted);
        }
        // Chunks the write so a single huge line cannot exceed the channel
        // capacity; each chunk may trigger the ring's lossy reset policy.
        let capacity = self.shared.output.capacity();
        for chunk in bytes.chunks(capacity.max(1)) {
            // Cannot fail: chunks are capacity-bounded.
            let _ = self.shared.output.append(chunk);
        }
        Ok(())
    }
}

impl EngineConsole for HarnessConsole<'_> {
    fn write_stdout(&mut self, bytes: &[u8]) -> Result<(), IoAbort> {
        self.flush(bytes)
    }

    fn write_stderr(&mut self, bytes: &[u8]) -> Result<(), IoAbort> {
        // Both streams share one capture; readers see interleaved order.
        self.flush(bytes)
    }

    fn read_line(&mut self, prompt: &str) -> Result<String, IoAbort> {
        self.flush(prompt.as_bytes())?;
        let _ = self.events.send(WorkerMsg::InputRequest {
            prompt: prompt.to_string(),
        });
        let bytes = self.shared.input.blocking_read(&self.shared.interrupt)?;
        let mut line = String::from_utf8_lossy(&bytes).into_owned();
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(line)
    }

    fn interrupted(&self) -> bool {
        self.shared.interrupt.is_requested()
    }
}

//! Host-side of the bridge: hides the message-passing and polling mechanics
//! behind request/response calls. The application thread never blocks here;
//! a pump thread drains the output channel on a short interval and settles
//! tickets when terminal messages arrive.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;

use crate::channel::{DrainCursor, SharedConsole};
use crate::engine::{Engine, Program};
use crate::error::BridgeError;
use crate::event_log::{self, EventLog};
use crate::harness;
use crate::lifecycle::{LifecycleState, StateCell};
use crate::protocol::{ControllerMsg, WorkerMsg};

const OVERFLOW_NOTICE: &str = "\n[output overflowed; earlier bytes dropped]\n";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub input_capacity: usize,
    pub output_capacity: usize,
    /// Output drain granularity. Sub-10ms keeps streamed output snappy.
    pub poll_interval: Duration,
    /// How long `force_terminate` waits for the cooperative interrupt
    /// before abandoning and respawning the worker.
    pub force_terminate_grace: Duration,
    /// Debug event log directory; `None` defers to the env var.
    pub debug_events_dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            input_capacity: crate::channel::DEFAULT_CHANNEL_CAPACITY,
            output_capacity: crate::channel::DEFAULT_CHANNEL_CAPACITY,
            poll_interval: Duration::from_millis(5),
            force_terminate_grace: Duration::from_secs(2),
            debug_events_dir: None,
        }
    }
}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    RuntimeError,
    Interrupted,
}

/// Terminal outcome of one `execute`.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed { return_value: Option<String> },
    Failed { reason: FailureReason, message: String },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            RunOutcome::Failed {
                reason: FailureReason::Interrupted,
                ..
            }
        )
    }
}

#[derive(Debug, Clone)]
enum InitState {
    NotStarted,
    Pending,
    Ready,
    Failed(String),
}

#[derive(Debug)]
struct InitCell {
    state: Mutex<InitState>,
    cvar: Condvar,
}

impl InitCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(InitState::NotStarted),
            cvar: Condvar::new(),
        }
    }

    fn snapshot(&self) -> InitState {
        self.state.lock().unwrap().clone()
    }

    fn store(&self, next: InitState) {
        let mut guard = self.state.lock().unwrap();
        *guard = next;
        self.cvar.notify_all();
    }

    fn wait_settled(&self, timeout: Duration) -> Result<(), BridgeError> {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.state.lock().unwrap();
        loop {
            match &*guard {
                InitState::Ready => return Ok(()),
                InitState::Failed(message) => {
                    return Err(BridgeError::Initialization(message.clone()))
                }
                InitState::NotStarted | InitState::Pending => {}
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(BridgeError::Timeout(timeout));
            }
            let (next, _) = self.cvar.wait_timeout(guard, deadline - now).unwrap();
            guard = next;
        }
    }
}

/// Cloneable handle to the (idempotent) initialization outcome.
#[derive(Clone)]
pub struct InitWatch {
    cell: Arc<InitCell>,
}

impl InitWatch {
    /// Blocks the calling thread until init settles or the timeout elapses.
    pub fn wait_ready(&self, timeout: Duration) -> Result<(), BridgeError> {
        self.cell.wait_settled(timeout)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.cell.snapshot(), InitState::Ready)
    }
}

/// Handle to one in-flight run. The outcome arrives asynchronously; waiting
/// on it is the caller's choice, never the bridge's.
#[derive(Debug)]
pub struct ExecTicket {
    id: u64,
    rx: Receiver<RunOutcome>,
}

impl ExecTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn wait(&self, timeout: Duration) -> Result<RunOutcome, BridgeError> {
        self.rx
            .recv_timeout(timeout)
            .map_err(|_| BridgeError::Timeout(timeout))
    }

    /// Non-blocking probe for a settled outcome.
    pub fn try_outcome(&self) -> Option<RunOutcome> {
        self.rx.try_recv().ok()
    }
}

#[derive(Default)]
struct OutputLog {
    text: String,
    cursor: DrainCursor,
    seen_overflows: u64,
}

type PendingMap = Arc<Mutex<HashMap<u64, Sender<RunOutcome>>>>;

struct WorkerLink {
    requests: Sender<ControllerMsg>,
    shared: Arc<SharedConsole>,
    live: Arc<AtomicBool>,
    /// Set by the pump when the worker thread is gone (exit or panic).
    defunct: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    pump: Option<thread::JoinHandle<()>>,
}

struct PumpCtx {
    events: Receiver<WorkerMsg>,
    shared: Arc<SharedConsole>,
    live: Arc<AtomicBool>,
    defunct: Arc<AtomicBool>,
    state: Arc<StateCell>,
    output: Arc<Mutex<OutputLog>>,
    pending: PendingMap,
    init: Arc<InitCell>,
    log: Option<Arc<EventLog>>,
    poll_interval: Duration,
}

pub struct BridgeController {
    config: BridgeConfig,
    engine_factory: Box<dyn Fn() -> Box<dyn Engine> + Send>,
    link: WorkerLink,
    state: Arc<StateCell>,
    output: Arc<Mutex<OutputLog>>,
    pending: PendingMap,
    init: Arc<InitCell>,
    next_id: AtomicU64,
    log: Option<Arc<EventLog>>,
}

impl BridgeController {
    /// Spawns the worker and pump threads. The interpreter is not booted
    /// until [`initialize`](Self::initialize) is called.
    pub fn new(
        engine_factory: Box<dyn Fn() -> Box<dyn Engine> + Send>,
        config: BridgeConfig,
    ) -> Result<Self, BridgeError> {
        if config.input_capacity == 0 || config.output_capacity == 0 {
            return Err(BridgeError::InvalidConfig(
                "channel capacities must be nonzero",
            ));
        }
        let log = EventLog::from_config(config.debug_events_dir.as_deref());
        let state = Arc::new(StateCell::new());
        let output = Arc::new(Mutex::new(OutputLog::default()));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let init = Arc::new(InitCell::new());
        let link = spawn_link(
            &config,
            engine_factory(),
            state.clone(),
            output.clone(),
            pending.clone(),
            init.clone(),
            log.clone(),
        )?;
        Ok(Self {
            config,
            engine_factory,
            link,
            state,
            output,
            pending,
            init,
            next_id: AtomicU64::new(0),
            log,
        })
    }

    /// Requests interpreter bootstrap. Idempotent: later calls return a
    /// watch on the same pending or settled outcome.
    pub fn initialize(&mut self) -> InitWatch {
        let send_init = {
            let mut guard = self.init.state.lock().unwrap();
            match &*guard {
                InitState::NotStarted => {
                    *guard = InitState::Pending;
                    true
                }
                _ => false,
            }
        };
        if send_init {
            self.state.set(LifecycleState::Loading);
            let id = self.next_request_id();
            event_log::log(&self.log, "init_begin", json!({ "id": id }));
            if self.link.requests.send(ControllerMsg::Init { id }).is_err() {
                self.init
                    .store(InitState::Failed("worker thread is gone".into()));
                self.state.set(LifecycleState::Idle);
            }
        }
        InitWatch {
            cell: self.init.clone(),
        }
    }

    /// Starts a run. Protocol-level preconditions are resolved here and
    /// never reach the worker.
    pub fn execute(
        &mut self,
        files: BTreeMap<String, String>,
        entry: &str,
    ) -> Result<ExecTicket, BridgeError> {
        match self.init.snapshot() {
            InitState::Ready => {}
            InitState::Failed(message) => return Err(BridgeError::Initialization(message)),
            InitState::NotStarted | InitState::Pending => {
                return Err(BridgeError::NotReady("interpreter is not initialized"))
            }
        }
        if !self.state.get().accepts_execute() {
            return Err(BridgeError::NotReady("a run is already in flight"));
        }
        if !files.contains_key(entry) {
            return Err(BridgeError::EntrypointNotFound(entry.to_string()));
        }

        self.link.shared.interrupt.clear();
        {
            let mut log = self.output.lock().unwrap();
            log.text.clear();
            log.cursor = DrainCursor::new();
            log.seen_overflows = self.link.shared.output.overflow_resets();
        }

        let id = self.next_request_id();
        let (tx, rx) = mpsc::channel();
        self.pending.lock().unwrap().insert(id, tx);
        self.state.set(LifecycleState::Executing);
        event_log::log(
            &self.log,
            "execute_begin",
            json!({ "id": id, "entry": entry, "files": files.len() }),
        );

        let program = Program::new(files, entry);
        if self
            .link
            .requests
            .send(ControllerMsg::Execute { id, program })
            .is_err()
        {
            self.pending.lock().unwrap().remove(&id);
            self.state.set(LifecycleState::Failed);
            return Err(BridgeError::Disconnected("worker thread is gone".into()));
        }
        Ok(ExecTicket { id, rx })
    }

    /// Supplies one line of input to a run blocked in `AwaitingInput`.
    /// Outside that state this is a silent no-op: the bridge favors
    /// ignoring stray input over crashing the caller.
    pub fn submit_input(&self, text: &str) -> Result<(), BridgeError> {
        if self.state.get() != LifecycleState::AwaitingInput {
            event_log::log(&self.log, "input_ignored", json!({ "state": self.state.get() }));
            return Ok(());
        }
        let mut line = text.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        if line.len() > self.link.shared.input.capacity() {
            // Rejected locally; the run keeps awaiting a shorter input.
            return Err(BridgeError::InputTooLarge {
                submitted: line.len(),
                capacity: self.link.shared.input.capacity(),
            });
        }
        self.link
            .shared
            .input
            .write(line.as_bytes())
            .map_err(|_| BridgeError::InputTooLarge {
                submitted: line.len(),
                capacity: self.link.shared.input.capacity(),
            })?;
        self.state
            .set_if(|s| s == LifecycleState::AwaitingInput, LifecycleState::Executing);
        event_log::log(&self.log, "input_submitted", json!({ "bytes": line.len() }));
        Ok(())
    }

    /// Cooperative cancellation: sets the interrupt flag and wakes a blocked
    /// reader. Termination is observed asynchronously when the worker hits
    /// its next poll point; the mirrored state does not change until then.
    pub fn interrupt(&self) {
        self.link.shared.interrupt.request();
        self.link.shared.input.wake_waiters();
        event_log::log(&self.log, "interrupt_requested", json!({}));
    }

    /// Harsher fallback for runs that never reach a poll point: interrupt,
    /// wait out the configured grace, then abandon the wedged worker and
    /// respawn a fresh one. Worker threads cannot be killed, so a truly
    /// wedged engine is detached and left to finish on its own. Also the
    /// recovery path for a worker that died outright (engine panic): a
    /// defunct link is replaced immediately, without the grace wait.
    pub fn force_terminate(&mut self) -> Result<(), BridgeError> {
        let grace = self.config.force_terminate_grace;
        if !self.link.defunct.load(Ordering::Acquire) {
            if !self.state.get().is_running() {
                return Err(BridgeError::NotReady("no run is in flight"));
            }
            self.interrupt();
            let settled = self.state.wait_for(grace, |s| !s.is_running()).is_some();
            if settled && !self.link.defunct.load(Ordering::Acquire) {
                // The cooperative interrupt won; the ticket settles normally.
                return Ok(());
            }
        }
        event_log::log(&self.log, "force_terminate", json!({ "grace_ms": grace.as_millis() }));

        // Fail the outstanding run before tearing the link down.
        let drained: Vec<(u64, Sender<RunOutcome>)> =
            self.pending.lock().unwrap().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(RunOutcome::Failed {
                reason: FailureReason::Interrupted,
                message: "run force-terminated; worker respawned".into(),
            });
        }
        {
            let mut log = self.output.lock().unwrap();
            log.text.push_str("\n[run force-terminated]\n");
        }
        self.state.set(LifecycleState::Failed);

        self.teardown_link();
        self.link = spawn_link(
            &self.config,
            (self.engine_factory)(),
            self.state.clone(),
            self.output.clone(),
            self.pending.clone(),
            self.init.clone(),
            self.log.clone(),
        )?;
        // The fresh worker needs a fresh bootstrap.
        self.init.store(InitState::Pending);
        let id = self.next_request_id();
        event_log::log(&self.log, "init_begin", json!({ "id": id, "respawn": true }));
        if self.link.requests.send(ControllerMsg::Init { id }).is_err() {
            self.init
                .store(InitState::Failed("worker thread is gone".into()));
            return Err(BridgeError::Disconnected("worker thread is gone".into()));
        }
        Ok(())
    }

    /// Orderly teardown: close the input stream, stop the pump, and let an
    /// idle worker exit. A worker wedged mid-run is detached, not joined.
    pub fn shutdown(&mut self) {
        event_log::log(&self.log, "shutdown", json!({}));
        let wedged = self.state.get().is_running();
        self.teardown_link();
        if let Some(pump) = self.link.pump.take() {
            let _ = pump.join();
        }
        if !wedged {
            if let Some(worker) = self.link.worker.take() {
                let _ = worker.join();
            }
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// Blocks until the lifecycle satisfies `pred` or the timeout elapses.
    pub fn wait_for_state(
        &self,
        timeout: Duration,
        pred: impl Fn(LifecycleState) -> bool,
    ) -> Option<LifecycleState> {
        self.state.wait_for(timeout, pred)
    }

    /// Snapshot of the output streamed so far in the current (or last) run.
    pub fn output(&self) -> String {
        self.output.lock().unwrap().text.clone()
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn teardown_link(&mut self) {
        self.link.live.store(false, Ordering::Release);
        let _ = self.link.requests.send(ControllerMsg::Shutdown);
        self.link.shared.interrupt.request();
        self.link.shared.input.close();
    }
}

impl Drop for BridgeController {
    fn drop(&mut self) {
        self.link.live.store(false, Ordering::Release);
        let _ = self.link.requests.send(ControllerMsg::Shutdown);
        self.link.shared.interrupt.request();
        self.link.shared.input.close();
    }
}

fn spawn_link(
    config: &BridgeConfig,
    engine: Box<dyn Engine>,
    state: Arc<StateCell>,
    output: Arc<Mutex<OutputLog>>,
    pending: PendingMap,
    init: Arc<InitCell>,
    log: Option<Arc<EventLog>>,
) -> Result<WorkerLink, BridgeError> {
    let shared = Arc::new(SharedConsole::new(
        config.input_capacity,
        config.output_capacity,
    ));
    let live = Arc::new(AtomicBool::new(true));
    let defunct = Arc::new(AtomicBool::new(false));
    let (req_tx, req_rx) = mpsc::channel();
    let (ev_tx, ev_rx) = mpsc::channel();

    let worker_shared = shared.clone();
    let worker = thread::Builder::new()
        .name("bridge-worker".to_string())
        .spawn(move || harness::run_worker(engine, worker_shared, req_rx, ev_tx))
        .map_err(|err| BridgeError::Initialization(format!("failed to spawn worker: {err}")))?;

    let ctx = PumpCtx {
        events: ev_rx,
        shared: shared.clone(),
        live: live.clone(),
        defunct: defunct.clone(),
        state,
        output,
        pending,
        init,
        log,
        poll_interval: config.poll_interval,
    };
    let pump = thread::Builder::new()
        .name("bridge-pump".to_string())
        .spawn(move || pump_loop(ctx))
        .map_err(|err| BridgeError::Initialization(format!("failed to spawn pump: {err}")))?;

    Ok(WorkerLink {
        requests: req_tx,
        shared,
        live,
        defunct,
        worker: Some(worker),
        pump: Some(pump),
    })
}

fn pump_loop(ctx: PumpCtx) {
    loop {
        if !ctx.live.load(Ordering::Acquire) {
            break;
        }
        drain_output(&ctx);
        match ctx.events.recv_timeout(ctx.poll_interval) {
            Ok(msg) => handle_worker_msg(&ctx, msg),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                handle_disconnect(&ctx);
                break;
            }
        }
    }
}

fn drain_output(ctx: &PumpCtx) {
    let mut log = ctx.output.lock().unwrap();
    let resets = ctx.shared.output.overflow_resets();
    if resets > log.seen_overflows {
        log.seen_overflows = resets;
        log.text.push_str(OVERFLOW_NOTICE);
        event_log::log(&ctx.log, "output_overflow", json!({ "resets": resets }));
    }
    if let Some(bytes) = ctx.shared.output.drain(&mut log.cursor) {
        log.text.push_str(&String::from_utf8_lossy(&bytes));
    }
}

fn handle_worker_msg(ctx: &PumpCtx, msg: WorkerMsg) {
    event_log::log(
        &ctx.log,
        "worker_msg",
        serde_json::to_value(&msg).unwrap_or_else(|_| json!("unserializable")),
    );
    match msg {
        WorkerMsg::InitSuccess { .. } => {
            ctx.init.store(InitState::Ready);
            ctx.state
                .set_if(|s| s == LifecycleState::Loading, LifecycleState::Idle);
        }
        WorkerMsg::InitError { error, .. } => {
            ctx.init.store(InitState::Failed(error));
            ctx.state
                .set_if(|s| s == LifecycleState::Loading, LifecycleState::Idle);
        }
        WorkerMsg::InputRequest { .. } => {
            ctx.state
                .set_if(|s| s == LifecycleState::Executing, LifecycleState::AwaitingInput);
        }
        WorkerMsg::ExecuteSuccess { id, return_value } => {
            drain_output(ctx);
            ctx.state.set(LifecycleState::Completed);
            settle(ctx, id, RunOutcome::Completed { return_value });
        }
        WorkerMsg::ExecuteError {
            id,
            error,
            interrupted,
        } => {
            drain_output(ctx);
            {
                // Mirror the diagnostic into the stream so a caller that
                // only watches output still sees why the run ended.
                let mut log = ctx.output.lock().unwrap();
                if !log.text.is_empty() && !log.text.ends_with('\n') {
                    log.text.push('\n');
                }
                log.text.push_str(&error);
                log.text.push('\n');
            }
            ctx.state.set(LifecycleState::Failed);
            let reason = if interrupted {
                FailureReason::Interrupted
            } else {
                FailureReason::RuntimeError
            };
            settle(
                ctx,
                id,
                RunOutcome::Failed {
                    reason,
                    message: error,
                },
            );
        }
    }
}

fn settle(ctx: &PumpCtx, id: u64, outcome: RunOutcome) {
    let sender = ctx.pending.lock().unwrap().remove(&id);
    match sender {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        // A message for a request this controller never issued (or one
        // already settled by force_terminate) is dropped, not fatal.
        None => event_log::log(&ctx.log, "unknown_request", json!({ "id": id })),
    }
}

fn handle_disconnect(ctx: &PumpCtx) {
    ctx.defunct.store(true, Ordering::Release);
    event_log::log(&ctx.log, "worker_disconnected", json!({}));
    {
        let mut guard = ctx.init.state.lock().unwrap();
        if matches!(*guard, InitState::Pending | InitState::NotStarted) {
            *guard = InitState::Failed("worker exited before initializing".into());
            ctx.init.cvar.notify_all();
        }
    }
    let drained: Vec<(u64, Sender<RunOutcome>)> = ctx.pending.lock().unwrap().drain().collect();
    for (_, tx) in drained {
        let _ = tx.send(RunOutcome::Failed {
            reason: FailureReason::RuntimeError,
            message: "worker disconnected".into(),
        });
    }
    ctx.state
        .set_if(LifecycleState::is_running, LifecycleState::Failed);
}

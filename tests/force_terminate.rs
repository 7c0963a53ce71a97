mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use common::{files, ready_bridge, test_config, TestResult, INIT_WAIT, STATE_WAIT, TICKET_WAIT};
use console_bridge::{
    BridgeController, BridgeError, Engine, EngineConsole, EngineError, LifecycleState, Program,
    RunOutcome,
};

/// Engine that never checks the interrupt flag. A program whose entry is
/// named `wedge` spins for a few seconds; anything else completes at once.
/// The spin is bounded so an abandoned worker thread still winds down.
struct Stubborn;

impl Engine for Stubborn {
    fn run(
        &mut self,
        program: &Program,
        console: &mut dyn EngineConsole,
    ) -> Result<Option<String>, EngineError> {
        if program.entry == "wedge" {
            for _ in 0..200 {
                thread::sleep(Duration::from_millis(20));
            }
            return Err(EngineError::Runtime("wedge timed out".into()));
        }
        console
            .write_stdout(b"prompt reply\n")
            .map_err(EngineError::from)?;
        Ok(None)
    }
}

fn stubborn_bridge() -> TestResult<BridgeController> {
    let mut bridge = BridgeController::new(Box::new(|| Box::new(Stubborn)), test_config())?;
    bridge.initialize().wait_ready(INIT_WAIT)?;
    Ok(bridge)
}

#[test]
fn force_terminate_replaces_a_wedged_worker() -> TestResult<()> {
    let mut bridge = stubborn_bridge()?;
    let ticket = bridge.execute(files(&[("wedge", "")]), "wedge")?;
    bridge
        .wait_for_state(STATE_WAIT, |s| s == LifecycleState::Executing)
        .ok_or("run never started")?;

    bridge.force_terminate()?;

    match ticket.wait(TICKET_WAIT)? {
        RunOutcome::Failed { message, .. } => {
            assert!(message.contains("force-terminated"), "got: {message}")
        }
        other => panic!("expected a forced failure, got: {other:?}"),
    }
    assert_eq!(bridge.state(), LifecycleState::Failed);
    assert!(bridge.output().contains("[run force-terminated]"));

    // The respawned worker re-initializes and serves the next run.
    bridge.initialize().wait_ready(INIT_WAIT)?;
    let ticket = bridge.execute(files(&[("main", "")]), "main")?;
    assert!(ticket.wait(TICKET_WAIT)?.is_completed());
    assert_eq!(bridge.output(), "prompt reply\n");
    Ok(())
}

#[test]
fn cooperative_interrupt_wins_within_the_grace_period() -> TestResult<()> {
    let mut bridge = ready_bridge()?;
    let ticket = bridge.execute(files(&[("main", "while True: pass")]), "main")?;
    bridge
        .wait_for_state(STATE_WAIT, |s| s == LifecycleState::Executing)
        .ok_or("run never started")?;

    // The built-in engine polls the flag, so no respawn is needed.
    bridge.force_terminate()?;
    match ticket.wait(TICKET_WAIT)? {
        RunOutcome::Failed { message, .. } => {
            assert!(message.contains("interrupted"), "got: {message}");
            assert!(!message.contains("force-terminated"), "got: {message}");
        }
        other => panic!("expected an interrupted failure, got: {other:?}"),
    }

    let ticket = bridge.execute(files(&[("main", "print('still here')")]), "main")?;
    assert!(ticket.wait(TICKET_WAIT)?.is_completed());
    assert_eq!(bridge.output(), "still here\n");
    Ok(())
}

struct Panicking;

impl Engine for Panicking {
    fn run(
        &mut self,
        _program: &Program,
        _console: &mut dyn EngineConsole,
    ) -> Result<Option<String>, EngineError> {
        panic!("engine defect");
    }
}

#[test]
fn force_terminate_revives_a_bridge_whose_worker_died() -> TestResult<()> {
    let swapped = AtomicBool::new(false);
    let mut bridge = BridgeController::new(
        Box::new(move || {
            if swapped.swap(true, Ordering::SeqCst) {
                Box::new(Stubborn) as Box<dyn Engine>
            } else {
                Box::new(Panicking)
            }
        }),
        test_config(),
    )?;
    bridge.initialize().wait_ready(INIT_WAIT)?;

    // The engine panic unwinds the worker thread; the run fails as a
    // disconnect rather than hanging the ticket.
    let ticket = bridge.execute(files(&[("main", "")]), "main")?;
    match ticket.wait(TICKET_WAIT)? {
        RunOutcome::Failed { message, .. } => {
            assert!(message.contains("disconnected"), "got: {message}")
        }
        other => panic!("expected a disconnect failure, got: {other:?}"),
    }
    assert_eq!(bridge.state(), LifecycleState::Failed);

    // Even though no run is in flight anymore, the dead link is replaced.
    bridge.force_terminate()?;
    bridge.initialize().wait_ready(INIT_WAIT)?;
    let ticket = bridge.execute(files(&[("main", "")]), "main")?;
    assert!(ticket.wait(TICKET_WAIT)?.is_completed());
    assert_eq!(bridge.output(), "prompt reply\n");
    Ok(())
}

#[test]
fn force_terminate_without_a_run_is_rejected() -> TestResult<()> {
    let mut bridge = ready_bridge()?;
    let err = bridge.force_terminate().unwrap_err();
    assert!(matches!(err, BridgeError::NotReady(_)), "got: {err}");
    assert_eq!(bridge.state(), LifecycleState::Idle);
    Ok(())
}

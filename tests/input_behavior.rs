mod common;

use common::{files, ready_bridge, TestResult, STATE_WAIT, TICKET_WAIT};
use console_bridge::{BridgeError, LifecycleState};

const GREETER: &str = "x = input('name: ')\nprint('hello ' + x)";

#[test]
fn input_request_blocks_until_submit_then_completes() -> TestResult<()> {
    let mut bridge = ready_bridge()?;
    let ticket = bridge.execute(files(&[("main", GREETER)]), "main")?;

    // The run must report awaiting_input before any submit happens.
    let state = bridge
        .wait_for_state(STATE_WAIT, |s| s == LifecycleState::AwaitingInput)
        .ok_or("run never reached awaiting_input")?;
    assert_eq!(state, LifecycleState::AwaitingInput);

    bridge.submit_input("Ada")?;
    assert!(ticket.wait(TICKET_WAIT)?.is_completed());
    assert_eq!(bridge.state(), LifecycleState::Completed);
    assert_eq!(bridge.output(), "name: hello Ada\n");
    Ok(())
}

#[test]
fn submit_appends_the_missing_line_terminator_only() -> TestResult<()> {
    let mut bridge = ready_bridge()?;
    let ticket = bridge.execute(files(&[("main", GREETER)]), "main")?;
    bridge
        .wait_for_state(STATE_WAIT, |s| s == LifecycleState::AwaitingInput)
        .ok_or("run never reached awaiting_input")?;

    // Already-terminated input must not grow a second newline.
    bridge.submit_input("Grace\n")?;
    assert!(ticket.wait(TICKET_WAIT)?.is_completed());
    assert_eq!(bridge.output(), "name: hello Grace\n");
    Ok(())
}

#[test]
fn stray_submit_while_idle_has_no_effect_on_the_next_run() -> TestResult<()> {
    let mut bridge = ready_bridge()?;
    assert!(bridge.submit_input("stray line").is_ok());

    let ticket = bridge.execute(files(&[("main", "print('hi')")]), "main")?;
    assert!(ticket.wait(TICKET_WAIT)?.is_completed());
    assert_eq!(bridge.output(), "hi\n");
    Ok(())
}

#[test]
fn stray_submit_while_executing_is_a_silent_noop() -> TestResult<()> {
    let mut bridge = ready_bridge()?;
    let ticket = bridge.execute(files(&[("main", "while True: pass")]), "main")?;
    bridge
        .wait_for_state(STATE_WAIT, |s| s == LifecycleState::Executing)
        .ok_or("run never started")?;

    assert!(bridge.submit_input("ignored").is_ok());
    assert_eq!(bridge.state(), LifecycleState::Executing);

    bridge.interrupt();
    let outcome = ticket.wait(TICKET_WAIT)?;
    assert!(outcome.is_interrupted(), "unexpected outcome: {outcome:?}");
    assert!(!bridge.output().contains("ignored"));
    Ok(())
}

#[test]
fn oversized_input_is_rejected_and_the_run_keeps_awaiting() -> TestResult<()> {
    let mut bridge = ready_bridge()?;
    let ticket = bridge.execute(files(&[("main", GREETER)]), "main")?;
    bridge
        .wait_for_state(STATE_WAIT, |s| s == LifecycleState::AwaitingInput)
        .ok_or("run never reached awaiting_input")?;

    let huge = "x".repeat(20 * 1024);
    let err = bridge.submit_input(&huge).unwrap_err();
    assert!(matches!(err, BridgeError::InputTooLarge { .. }), "got: {err}");
    assert_eq!(bridge.state(), LifecycleState::AwaitingInput);

    bridge.submit_input("Ada")?;
    assert!(ticket.wait(TICKET_WAIT)?.is_completed());
    assert_eq!(bridge.output(), "name: hello Ada\n");
    Ok(())
}

#[test]
fn consecutive_input_requests_round_trip() -> TestResult<()> {
    let mut bridge = ready_bridge()?;
    let source = "a = input('first: ')\nb = input('second: ')\nprint(a + ' ' + b)";
    let ticket = bridge.execute(files(&[("main", source)]), "main")?;

    bridge
        .wait_for_state(STATE_WAIT, |s| s == LifecycleState::AwaitingInput)
        .ok_or("first input request missing")?;
    bridge.submit_input("hello")?;

    bridge
        .wait_for_state(STATE_WAIT, |s| s == LifecycleState::AwaitingInput)
        .ok_or("second input request missing")?;
    bridge.submit_input("world")?;

    assert!(ticket.wait(TICKET_WAIT)?.is_completed());
    assert_eq!(bridge.output(), "first: second: hello world\n");
    Ok(())
}

//! Debug console for the execution bridge: runs a lesson script through the
//! built-in engine and forwards terminal input while the run awaits it.
//!
//! Usage: `lesson-console FILE [FILE...]` — the first file is the entry.
//! Commands while a run awaits input: any line is submitted as input;
//! `INTERRUPT` requests cooperative cancellation; `TERMINATE` forces the
//! worker down.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use console_bridge::{BridgeConfig, BridgeController, LifecycleState, MiniScript, RunOutcome};

const INIT_TIMEOUT: Duration = Duration::from_secs(30);
const RENDER_INTERVAL: Duration = Duration::from_millis(10);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: lesson-console FILE [FILE...]");
        std::process::exit(2);
    }

    let mut files = BTreeMap::new();
    let mut entry = None;
    for path in &paths {
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("invalid file name: {path}"))?
            .to_string();
        let content = std::fs::read_to_string(path)?;
        if entry.is_none() {
            entry = Some(name.clone());
        }
        files.insert(name, content);
    }
    let entry = entry.expect("at least one file");

    let mut bridge = BridgeController::new(
        Box::new(|| Box::new(MiniScript::new())),
        BridgeConfig::default(),
    )?;
    bridge.initialize().wait_ready(INIT_TIMEOUT)?;
    let ticket = bridge.execute(files, &entry)?;

    let stdin = io::stdin();
    let mut stdin = stdin.lock();
    let mut stdout = io::stdout();
    let mut rendered = 0usize;

    let outcome = loop {
        render_new_output(&bridge, &mut rendered, &mut stdout)?;
        if let Some(outcome) = ticket.try_outcome() {
            render_new_output(&bridge, &mut rendered, &mut stdout)?;
            break outcome;
        }
        if bridge.state() == LifecycleState::AwaitingInput {
            let mut line = String::new();
            if stdin.read_line(&mut line)? == 0 {
                // Terminal EOF: nothing more to feed the run.
                bridge.interrupt();
                continue;
            }
            match line.trim_end() {
                "INTERRUPT" => bridge.interrupt(),
                "TERMINATE" => bridge.force_terminate()?,
                _ => bridge.submit_input(&line)?,
            }
            continue;
        }
        thread::sleep(RENDER_INTERVAL);
    };

    match outcome {
        RunOutcome::Completed { return_value } => {
            if let Some(value) = return_value {
                println!("=> {value}");
            }
            Ok(())
        }
        RunOutcome::Failed { message, .. } => {
            eprintln!("run failed: {message}");
            std::process::exit(1);
        }
    }
}

fn render_new_output(
    bridge: &BridgeController,
    rendered: &mut usize,
    stdout: &mut impl Write,
) -> io::Result<()> {
    let output = bridge.output();
    if output.len() > *rendered {
        stdout.write_all(output[*rendered..].as_bytes())?;
        stdout.flush()?;
        *rendered = output.len();
    } else if output.len() < *rendered {
        // Output log was reset (force-terminate notice path).
        *rendered = output.len();
    }
    Ok(())
}

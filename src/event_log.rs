//! Optional JSON-lines debug event log. One file per controller instance,
//! enabled by configuration or the `CONSOLE_BRIDGE_DEBUG_EVENTS_DIR` env
//! var; a disabled log costs one `Option` check per event.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value as JsonValue};

pub const DEBUG_EVENTS_DIR_ENV: &str = "CONSOLE_BRIDGE_DEBUG_EVENTS_DIR";

#[derive(Debug)]
pub(crate) struct EventLog {
    file: Mutex<File>,
    file_path: PathBuf,
    startup_epoch: Instant,
    instance_id: String,
    seq: AtomicU64,
}

impl EventLog {
    /// Builds a logger from an explicit directory or the environment.
    /// Returns `None` when neither is configured; a directory that cannot
    /// be prepared also disables logging rather than failing the bridge.
    pub(crate) fn from_config(debug_events_dir: Option<&Path>) -> Option<Arc<EventLog>> {
        let dir = match debug_events_dir {
            Some(path) if !path.as_os_str().is_empty() => path.to_path_buf(),
            Some(_) => return None,
            None => PathBuf::from(
                std::env::var_os(DEBUG_EVENTS_DIR_ENV).filter(|raw| !raw.is_empty())?,
            ),
        };
        EventLog::create_in(&dir).ok().map(Arc::new)
    }

    fn create_in(dir: &Path) -> Result<EventLog, std::io::Error> {
        fs::create_dir_all(dir)?;
        let unix_ms = unix_ms_now();
        let pid = std::process::id();
        let (file, file_path) = create_unique_log_file(dir, unix_ms, pid)?;
        Ok(EventLog {
            file: Mutex::new(file),
            file_path,
            startup_epoch: Instant::now(),
            instance_id: format!("{unix_ms}-{pid}"),
            seq: AtomicU64::new(0),
        })
    }

    /// Appends one event record. Best-effort: I/O failures are swallowed so
    /// diagnostics can never take down the bridge.
    pub(crate) fn log(&self, event: &str, payload: JsonValue) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let line = json!({
            "ts_unix_ms": unix_ms_now(),
            "uptime_ms": self.startup_epoch.elapsed().as_millis(),
            "seq": seq,
            "instance_id": self.instance_id,
            "event": event,
            "payload": payload,
        });
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
            let _ = file.flush();
        }
    }

    #[cfg(test)]
    fn file_path(&self) -> &Path {
        &self.file_path
    }
}

/// Convenience for `Option<Arc<EventLog>>` holders.
pub(crate) fn log(log: &Option<Arc<EventLog>>, event: &str, payload: JsonValue) {
    if let Some(log) = log {
        log.log(event, payload);
    }
}

fn create_unique_log_file(
    dir: &Path,
    unix_ms: u128,
    pid: u32,
) -> Result<(File, PathBuf), std::io::Error> {
    for suffix in 0u32..1_000 {
        let name = if suffix == 0 {
            format!("console-bridge-{unix_ms}-{pid}.jsonl")
        } else {
            format!("console-bridge-{unix_ms}-{pid}-{suffix}.jsonl")
        };
        let path = dir.join(name);
        match OpenOptions::new().create_new(true).append(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(std::io::Error::other(
        "failed to allocate a unique event log filename",
    ))
}

fn unix_ms_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

//! Fixed-capacity shared memory channels and the interrupt flag.
//!
//! Each channel is a payload region plus three control words: `flag`
//! (idle / data-ready / end-of-stream), `length` (valid payload bytes) and
//! `cursor` (next write offset, used by the output ring). Control words are
//! atomics with release/acquire pairing: a reader that observes
//! `flag == FLAG_READY` is guaranteed to see the payload bytes the writer
//! stored before publishing the flag. The payload itself sits behind a mutex
//! that doubles as the wait/notify anchor for the input channel's blocking
//! read, so flag stores and notifications cannot race into a lost wakeup.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex};

use crate::engine::IoAbort;

pub const FLAG_IDLE: u32 = 0;
pub const FLAG_READY: u32 = 1;
pub const FLAG_EOS: u32 = 2;

const INTERRUPT_NONE: u8 = 0;
// Value 1 is reserved in the wire protocol; the bridge never stores it.
const INTERRUPT_REQUESTED: u8 = 2;

/// Default capacity of each channel. 10 KiB holds a generous burst of
/// lesson output between two drain ticks.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10 * 1024;

#[derive(Debug)]
pub enum ChannelWriteError {
    /// The chunk cannot ever fit; capacity must exceed the largest single
    /// write the interpreter may produce.
    TooLarge { submitted: usize, capacity: usize },
}

impl std::fmt::Display for ChannelWriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelWriteError::TooLarge {
                submitted,
                capacity,
            } => write!(
                f,
                "chunk of {submitted} bytes exceeds channel capacity of {capacity} bytes"
            ),
        }
    }
}

impl std::error::Error for ChannelWriteError {}

/// One-directional byte handoff region shared by the controller and the
/// worker. The input channel uses `write`/`blocking_read`; the output
/// channel uses `append`/`drain` with ring-style accumulation.
pub struct ByteChannel {
    capacity: usize,
    flag: AtomicU32,
    length: AtomicU32,
    cursor: AtomicU32,
    overflow_resets: AtomicU64,
    payload: Mutex<Box<[u8]>>,
    readable: Condvar,
}

impl ByteChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            flag: AtomicU32::new(FLAG_IDLE),
            length: AtomicU32::new(0),
            cursor: AtomicU32::new(0),
            overflow_resets: AtomicU64::new(0),
            payload: Mutex::new(vec![0u8; capacity].into_boxed_slice()),
            readable: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Input-side write: latest write wins, since at most one input is ever
    /// pending. Publishes `length` then `flag`, then wakes the waiter.
    pub fn write(&self, bytes: &[u8]) -> Result<(), ChannelWriteError> {
        if bytes.len() > self.capacity {
            return Err(ChannelWriteError::TooLarge {
                submitted: bytes.len(),
                capacity: self.capacity,
            });
        }
        let mut payload = self.payload.lock().unwrap();
        payload[..bytes.len()].copy_from_slice(bytes);
        self.length.store(bytes.len() as u32, Ordering::Release);
        self.flag.store(FLAG_READY, Ordering::Release);
        self.readable.notify_all();
        Ok(())
    }

    /// Marks the channel end-of-stream. A blocked reader returns
    /// `EndOfInput`; later reads do too.
    pub fn close(&self) {
        let _payload = self.payload.lock().unwrap();
        self.flag.store(FLAG_EOS, Ordering::Release);
        self.readable.notify_all();
    }

    /// Discards any pending, unconsumed input. Used at the start of a run so
    /// a line submitted during a previous run cannot leak into this one.
    pub fn clear(&self) {
        let _payload = self.payload.lock().unwrap();
        self.length.store(0, Ordering::Release);
        self.flag.store(FLAG_IDLE, Ordering::Release);
    }

    /// Wakes a blocked reader without writing. The interrupt path uses this
    /// so the post-wakeup poll point runs promptly.
    pub fn wake_waiters(&self) {
        let _payload = self.payload.lock().unwrap();
        self.readable.notify_all();
    }

    /// Worker-side blocking read. The only place the worker thread blocks.
    /// Polls the interrupt flag immediately before entering the wait and
    /// immediately after every wakeup.
    pub fn blocking_read(&self, interrupt: &InterruptFlag) -> Result<Vec<u8>, IoAbort> {
        if interrupt.is_requested() {
            return Err(IoAbort::Interrupted);
        }
        let mut payload = self.payload.lock().unwrap();
        loop {
            match self.flag.load(Ordering::Acquire) {
                FLAG_READY => {
                    let len = self.length.load(Ordering::Acquire) as usize;
                    let bytes = payload[..len].to_vec();
                    self.flag.store(FLAG_IDLE, Ordering::Release);
                    return Ok(bytes);
                }
                FLAG_EOS => return Err(IoAbort::EndOfInput),
                _ => {}
            }
            payload = self.readable.wait(payload).unwrap();
            if interrupt.is_requested() {
                return Err(IoAbort::Interrupted);
            }
        }
    }

    /// Output-side write: appends at `cursor`. When the chunk does not fit
    /// in the remaining region the buffer resets to offset 0 and the
    /// overflow counter records the loss; unread pre-reset bytes are gone
    /// but old and new data are never spliced. A zero-byte write is a legal
    /// flush marker.
    pub fn append(&self, bytes: &[u8]) -> Result<(), ChannelWriteError> {
        if bytes.len() > self.capacity {
            return Err(ChannelWriteError::TooLarge {
                submitted: bytes.len(),
                capacity: self.capacity,
            });
        }
        let mut payload = self.payload.lock().unwrap();
        let mut cursor = self.cursor.load(Ordering::Relaxed) as usize;
        if cursor + bytes.len() > self.capacity {
            cursor = 0;
            self.overflow_resets.fetch_add(1, Ordering::Relaxed);
        }
        payload[cursor..cursor + bytes.len()].copy_from_slice(bytes);
        cursor += bytes.len();
        self.cursor.store(cursor as u32, Ordering::Relaxed);
        self.length.store(cursor as u32, Ordering::Release);
        self.flag.store(FLAG_READY, Ordering::Release);
        Ok(())
    }

    /// Host-side drain. New bytes are re-derived from the `length` delta
    /// past the cursor's offset, so nothing is ever re-delivered. A ring
    /// reset restarts the reader at offset 0 no matter where `length` lands
    /// afterwards: the reset count is compared, not the offsets, so a
    /// post-reset chunk is delivered whole and never front-truncated or
    /// skipped when it happens to reach past the stale offset.
    pub fn drain(&self, cursor: &mut DrainCursor) -> Option<Vec<u8>> {
        if self.flag.load(Ordering::Acquire) != FLAG_READY {
            return None;
        }
        let payload = self.payload.lock().unwrap();
        // `append` bumps the counter under this lock, so the reset count
        // and `length` are observed together.
        let resets = self.overflow_resets.load(Ordering::Relaxed);
        if resets != cursor.resets {
            cursor.resets = resets;
            cursor.offset = 0;
        }
        let len = self.length.load(Ordering::Acquire) as usize;
        if len < cursor.offset {
            // `reset` rewinds without counting an overflow.
            cursor.offset = 0;
        }
        if len > cursor.offset {
            let bytes = payload[cursor.offset..len].to_vec();
            cursor.offset = len;
            self.flag.store(FLAG_IDLE, Ordering::Release);
            return Some(bytes);
        }
        // Empty flush marker: acknowledge it so repeated drains stay cheap.
        self.flag.store(FLAG_IDLE, Ordering::Release);
        None
    }

    /// Resets all control state. Run start only; the writer owns the channel
    /// at that point.
    pub fn reset(&self) {
        let _payload = self.payload.lock().unwrap();
        self.cursor.store(0, Ordering::Relaxed);
        self.length.store(0, Ordering::Release);
        self.flag.store(FLAG_IDLE, Ordering::Release);
    }

    /// Number of lossy ring resets since construction.
    pub fn overflow_resets(&self) -> u64 {
        self.overflow_resets.load(Ordering::Relaxed)
    }
}

/// Reader-side position for [`ByteChannel::drain`]: the byte offset of the
/// next unread byte plus the last-seen ring reset count.
#[derive(Debug, Default)]
pub struct DrainCursor {
    offset: usize,
    resets: u64,
}

impl DrainCursor {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One shared byte the controller may set at any time. The worker reads it
/// at poll points and never clears it; the controller clears it at the start
/// of each execute.
pub struct InterruptFlag {
    value: AtomicU8,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self {
            value: AtomicU8::new(INTERRUPT_NONE),
        }
    }

    pub fn request(&self) {
        self.value.store(INTERRUPT_REQUESTED, Ordering::Release);
    }

    pub fn clear(&self) {
        self.value.store(INTERRUPT_NONE, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.value.load(Ordering::Acquire) == INTERRUPT_REQUESTED
    }
}

impl Default for InterruptFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// The complete region visible to both sides: stdin handoff, stdout/stderr
/// ring and the interrupt byte.
pub struct SharedConsole {
    pub input: ByteChannel,
    pub output: ByteChannel,
    pub interrupt: InterruptFlag,
}

impl SharedConsole {
    pub fn new(input_capacity: usize, output_capacity: usize) -> Self {
        Self {
            input: ByteChannel::new(input_capacity),
            output: ByteChannel::new(output_capacity),
            interrupt: InterruptFlag::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn write_then_drain_round_trips() {
        let channel = ByteChannel::new(64);
        channel.append(b"hello").unwrap();
        let mut cursor = DrainCursor::new();
        assert_eq!(channel.drain(&mut cursor).as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn drain_without_new_write_is_idempotent() {
        let channel = ByteChannel::new(64);
        channel.append(b"once").unwrap();
        let mut cursor = DrainCursor::new();
        assert!(channel.drain(&mut cursor).is_some());
        assert!(channel.drain(&mut cursor).is_none());
        assert!(channel.drain(&mut cursor).is_none());
    }

    #[test]
    fn zero_byte_write_is_a_flush_marker_not_data() {
        let channel = ByteChannel::new(64);
        channel.append(b"").unwrap();
        let mut cursor = DrainCursor::new();
        assert!(channel.drain(&mut cursor).is_none());
    }

    #[test]
    fn write_larger_than_capacity_is_rejected() {
        let channel = ByteChannel::new(8);
        let err = channel.append(&[0u8; 9]).unwrap_err();
        assert!(matches!(
            err,
            ChannelWriteError::TooLarge {
                submitted: 9,
                capacity: 8
            }
        ));
    }

    #[test]
    fn overflow_resets_and_never_splices_old_bytes() {
        let channel = ByteChannel::new(8);
        channel.append(b"aaaaaa").unwrap();
        // Reader lags: nothing drained yet. The next chunk does not fit,
        // so the ring resets and the unread "aaaaaa" is dropped.
        channel.append(b"bbbb").unwrap();
        assert_eq!(channel.overflow_resets(), 1);

        let mut cursor = DrainCursor::new();
        assert_eq!(channel.drain(&mut cursor).as_deref(), Some(&b"bbbb"[..]));
        assert!(channel.drain(&mut cursor).is_none());
    }

    #[test]
    fn drain_detects_reset_from_stale_cursor() {
        let channel = ByteChannel::new(8);
        channel.append(b"aaaaaa").unwrap();
        let mut cursor = DrainCursor::new();
        assert!(channel.drain(&mut cursor).is_some());
        assert_eq!(cursor.offset, 6);

        channel.append(b"cc").unwrap();
        assert!(channel.drain(&mut cursor).is_some());
        channel.append(b"dddd").unwrap(); // forces a reset past capacity
        let drained = channel.drain(&mut cursor).unwrap();
        assert_eq!(drained, b"dddd");
    }

    #[test]
    fn reset_chunk_reaching_past_the_stale_offset_is_delivered_whole() {
        let channel = ByteChannel::new(8);
        channel.append(b"aa").unwrap();
        let mut cursor = DrainCursor::new();
        assert_eq!(channel.drain(&mut cursor).as_deref(), Some(&b"aa"[..]));

        // 2 + 7 > 8: the ring resets and the new chunk spans offsets the
        // reader already consumed. It must come back whole, not sliced at
        // the stale offset.
        channel.append(b"bcdefgh").unwrap();
        assert_eq!(channel.drain(&mut cursor).as_deref(), Some(&b"bcdefgh"[..]));
    }

    #[test]
    fn reset_chunk_landing_exactly_on_the_stale_offset_is_not_dropped() {
        let channel = ByteChannel::new(8);
        channel.append(b"aaaaaa").unwrap();
        let mut cursor = DrainCursor::new();
        assert!(channel.drain(&mut cursor).is_some());

        // Post-reset length equals the stale offset; the chunk must still
        // be delivered rather than mistaken for already-read bytes.
        channel.append(b"bbbbbb").unwrap();
        assert_eq!(channel.drain(&mut cursor).as_deref(), Some(&b"bbbbbb"[..]));
    }

    #[test]
    fn blocking_read_wakes_on_write() {
        let shared = Arc::new(SharedConsole::new(64, 64));
        let reader = shared.clone();
        let handle = thread::spawn(move || reader.input.blocking_read(&reader.interrupt));
        thread::sleep(Duration::from_millis(20));
        shared.input.write(b"line\n").unwrap();
        let bytes = handle.join().unwrap().unwrap();
        assert_eq!(bytes, b"line\n");
    }

    #[test]
    fn blocking_read_returns_pending_input_immediately() {
        let shared = SharedConsole::new(64, 64);
        shared.input.write(b"ready\n").unwrap();
        let bytes = shared.input.blocking_read(&shared.interrupt).unwrap();
        assert_eq!(bytes, b"ready\n");
    }

    #[test]
    fn blocking_read_aborts_on_interrupt_wakeup() {
        let shared = Arc::new(SharedConsole::new(64, 64));
        let reader = shared.clone();
        let handle = thread::spawn(move || reader.input.blocking_read(&reader.interrupt));
        thread::sleep(Duration::from_millis(20));
        shared.interrupt.request();
        shared.input.wake_waiters();
        assert_eq!(handle.join().unwrap(), Err(IoAbort::Interrupted));
    }

    #[test]
    fn blocking_read_checks_interrupt_before_waiting() {
        let shared = SharedConsole::new(64, 64);
        shared.interrupt.request();
        assert_eq!(
            shared.input.blocking_read(&shared.interrupt),
            Err(IoAbort::Interrupted)
        );
    }

    #[test]
    fn closed_channel_reports_end_of_input() {
        let shared = SharedConsole::new(64, 64);
        shared.input.close();
        assert_eq!(
            shared.input.blocking_read(&shared.interrupt),
            Err(IoAbort::EndOfInput)
        );
    }

    #[test]
    fn input_write_overwrites_previous_pending_line() {
        let shared = SharedConsole::new(64, 64);
        shared.input.write(b"first\n").unwrap();
        shared.input.write(b"second\n").unwrap();
        let bytes = shared.input.blocking_read(&shared.interrupt).unwrap();
        assert_eq!(bytes, b"second\n");
    }
}

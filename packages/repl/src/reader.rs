//! Cancellable line reads over a blocking source.
//!
//! A blocking `read_line` cannot be aborted once it has started. The
//! [`LineReader`] therefore runs the read on one long-lived worker thread
//! and lets the caller stop *waiting* for it instead. The worker's result is
//! never thrown away: a read abandoned by [`LineReader::cancel`] completes
//! in the background, and its line becomes the outcome of the next
//! [`LineReader::read_line`] call.
//!
//! ```text
//! caller                       worker
//!   read_line ── start ──────▶ read_line on source (blocks)
//!   ◀── Interrupted ◀─ cancel
//!                               ... line arrives ──▶ slot
//!   read_line ◀── Line ◀─────── slot
//! ```

use std::io::{self, BufRead};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, trace};

/// The resolved result of one read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A line of input, without its line terminator.
    Line(String),
    /// The source is exhausted, or the reader was closed.
    EndOfInput,
    /// The read was cancelled before a line arrived.
    Interrupted,
}

/// Errors from [`LineReader::read_line`].
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    #[error("a read is already outstanding")]
    Busy,
}

/// What the worker produced for one read: a line, end of input, or an error.
type Slot = io::Result<Option<String>>;

#[derive(Default)]
struct State {
    /// A start notification the worker has not picked up yet.
    start: bool,
    /// The worker owes a result (it was started and has not filled the slot).
    in_flight: bool,
    /// Single-slot handoff from the worker.
    slot: Option<Slot>,
    /// A cancellation no caller has collected yet.
    cancel: bool,
    /// A caller is inside `read_line`.
    waiting: bool,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Line reader whose reads can be abandoned from another thread.
///
/// All methods take `&self`; share the reader behind an `Arc` to cancel
/// from a signal handler while the session thread is blocked reading.
pub struct LineReader {
    shared: Arc<Shared>,
}

impl LineReader {
    /// Start the worker thread over `source`.
    ///
    /// The worker lives until the reader is closed (or dropped) and it is
    /// not blocked in a read.
    pub fn spawn<R>(source: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name("line-reader".into())
            .spawn(move || run_worker(&worker, source))?;
        Ok(Self { shared })
    }

    /// Wait for the next line.
    ///
    /// Resolves with [`ReadOutcome::Interrupted`] as soon as [`cancel`] is
    /// called, even though the underlying read keeps running. Only one call
    /// may be outstanding at a time; a concurrent second call fails with
    /// [`ReadError::Busy`].
    ///
    /// [`cancel`]: LineReader::cancel
    pub fn read_line(&self) -> Result<ReadOutcome, ReadError> {
        let mut state = self.shared.lock();
        if state.waiting {
            return Err(ReadError::Busy);
        }
        if state.closed {
            return Ok(ReadOutcome::EndOfInput);
        }
        state.waiting = true;

        let outcome = loop {
            if state.cancel {
                state.cancel = false;
                break Ok(ReadOutcome::Interrupted);
            }
            if let Some(result) = state.slot.take() {
                break into_outcome(result);
            }
            if state.closed {
                break Ok(ReadOutcome::EndOfInput);
            }
            if !state.in_flight {
                state.in_flight = true;
                state.start = true;
                self.shared.changed.notify_all();
            }
            state = self.shared.wait(state);
        };

        state.waiting = false;
        trace!(?outcome, "read resolved");
        outcome
    }

    /// Abandon the outstanding read, or the next one if none is outstanding.
    pub fn cancel(&self) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        state.cancel = true;
        self.shared.changed.notify_all();
    }

    /// Abandon the outstanding read only. Returns whether there was one.
    pub fn cancel_if_pending(&self) -> bool {
        let mut state = self.shared.lock();
        if state.closed || !state.waiting {
            return false;
        }
        state.cancel = true;
        self.shared.changed.notify_all();
        true
    }

    /// Whether a caller is currently blocked in [`LineReader::read_line`].
    pub fn is_pending(&self) -> bool {
        self.shared.lock().waiting
    }

    /// Stop the reader. Outstanding and later reads resolve with
    /// [`ReadOutcome::EndOfInput`]. Closing twice is a no-op.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.cancel = false;
        self.shared.changed.notify_all();
        debug!("line reader closed");
    }
}

impl Drop for LineReader {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker<R: BufRead>(shared: &Shared, mut source: R) {
    debug!("line reader worker started");
    loop {
        {
            let mut state = shared.lock();
            while !state.start && !state.closed {
                state = shared.wait(state);
            }
            if state.closed {
                break;
            }
            state.start = false;
        }

        let mut line = String::new();
        let result = match source.read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line)),
            Err(e) => Err(e),
        };

        let mut state = shared.lock();
        state.in_flight = false;
        state.slot = Some(result);
        shared.changed.notify_all();
    }
    debug!("line reader worker exiting");
}

fn into_outcome(result: Slot) -> Result<ReadOutcome, ReadError> {
    match result? {
        None => Ok(ReadOutcome::EndOfInput),
        Some(mut line) => {
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            Ok(ReadOutcome::Line(line))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::Duration;

    /// A source that blocks until the test sends it text, like a terminal
    /// waiting for the user. Dropping the sender ends the input.
    pub(crate) struct ChannelSource {
        rx: Receiver<String>,
        pending: Vec<u8>,
    }

    impl ChannelSource {
        pub(crate) fn new() -> (Sender<String>, io::BufReader<Self>) {
            let (tx, rx) = mpsc::channel();
            let source = Self {
                rx,
                pending: Vec::new(),
            };
            (tx, io::BufReader::new(source))
        }
    }

    impl Read for ChannelSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending.is_empty() {
                match self.rx.recv() {
                    Ok(text) => self.pending = text.into_bytes(),
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    struct FailingSource;

    impl Read for FailingSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal went away"))
        }
    }

    pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_lines_in_order_then_end_of_input() {
        let reader = LineReader::spawn(Cursor::new("first\nsecond\r\nthird")).unwrap();

        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Line("first".into()));
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Line("second".into()));
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Line("third".into()));
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::EndOfInput);
    }

    #[test]
    fn test_cancel_resolves_pending_read_and_keeps_typed_line() {
        let (tx, source) = ChannelSource::new();
        let reader = Arc::new(LineReader::spawn(source).unwrap());

        let pending = {
            let reader = Arc::clone(&reader);
            thread::spawn(move || reader.read_line().unwrap())
        };
        wait_until(|| reader.is_pending());
        reader.cancel();
        assert_eq!(pending.join().unwrap(), ReadOutcome::Interrupted);

        // Typed while nobody was waiting; delivered to the next read.
        tx.send("(+ 1 2)\n".into()).unwrap();
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Line("(+ 1 2)".into()));

        drop(tx);
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::EndOfInput);
    }

    #[test]
    fn test_cancel_with_no_read_outstanding_interrupts_next_read() {
        let reader = LineReader::spawn(Cursor::new("line\n")).unwrap();

        reader.cancel();

        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Interrupted);
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Line("line".into()));
    }

    #[test]
    fn test_cancel_if_pending_leaves_idle_reader_alone() {
        let reader = LineReader::spawn(Cursor::new("line\n")).unwrap();

        assert!(!reader.cancel_if_pending());

        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Line("line".into()));
    }

    #[test]
    fn test_cancel_if_pending_interrupts_waiting_read() {
        let (tx, source) = ChannelSource::new();
        let reader = Arc::new(LineReader::spawn(source).unwrap());

        let pending = {
            let reader = Arc::clone(&reader);
            thread::spawn(move || reader.read_line().unwrap())
        };
        wait_until(|| reader.is_pending());

        assert!(reader.cancel_if_pending());
        assert_eq!(pending.join().unwrap(), ReadOutcome::Interrupted);

        // Nothing left over for the next read.
        tx.send("after\n".into()).unwrap();
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::Line("after".into()));
    }

    #[test]
    fn test_second_concurrent_read_is_busy() {
        let (tx, source) = ChannelSource::new();
        let reader = Arc::new(LineReader::spawn(source).unwrap());

        let pending = {
            let reader = Arc::clone(&reader);
            thread::spawn(move || reader.read_line().unwrap())
        };
        wait_until(|| reader.is_pending());

        assert!(matches!(reader.read_line(), Err(ReadError::Busy)));

        tx.send("ok\n".into()).unwrap();
        assert_eq!(pending.join().unwrap(), ReadOutcome::Line("ok".into()));
    }

    #[test]
    fn test_close_resolves_pending_and_future_reads() {
        let (_tx, source) = ChannelSource::new();
        let reader = Arc::new(LineReader::spawn(source).unwrap());

        let pending = {
            let reader = Arc::clone(&reader);
            thread::spawn(move || reader.read_line().unwrap())
        };
        wait_until(|| reader.is_pending());

        reader.close();

        assert_eq!(pending.join().unwrap(), ReadOutcome::EndOfInput);
        assert_eq!(reader.read_line().unwrap(), ReadOutcome::EndOfInput);
    }

    #[test]
    fn test_close_twice_is_noop() {
        let reader = LineReader::spawn(Cursor::new("unused\n")).unwrap();

        reader.close();
        reader.close();
        reader.cancel();

        assert_eq!(reader.read_line().unwrap(), ReadOutcome::EndOfInput);
    }

    #[test]
    fn test_read_error_is_reported() {
        let reader = LineReader::spawn(io::BufReader::new(FailingSource)).unwrap();

        let err = reader.read_line().unwrap_err();

        assert!(matches!(err, ReadError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    }
}

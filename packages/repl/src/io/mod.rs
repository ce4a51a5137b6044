//! The session's side of the I/O boundary.
//!
//! [`SessionIo`] owns everything the session shares with other threads: the
//! line reader, the "currently reading" flag the interrupt path consults, and
//! the output sinks. It is also the [`Host`] handed to the backend client, so
//! input the evaluator asks for and output it pushes go through the same
//! reader and sinks as the main loop.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use trench_client::Host;

use crate::host::{Printer, Style};
use crate::reader::{LineReader, ReadError, ReadOutcome};

#[cfg(test)]
pub mod test_client;

#[cfg(test)]
pub use test_client::{Scripted, SharedBuf, TestClient};

/// Destination for rendered output.
pub type Sink = Box<dyn Write + Send>;

/// Called with the message of a fatal report, after it has been written.
pub type FatalHook = Box<dyn Fn(&str) + Send + Sync>;

/// Exit status used when a fatal report ends the process.
pub const FATAL_EXIT_CODE: i32 = 1;

/// The default [`FatalHook`]: terminate the process.
pub fn exit_on_fatal() -> FatalHook {
    Box::new(|_| std::process::exit(FATAL_EXIT_CODE))
}

pub struct SessionIo {
    reader: LineReader,
    reading: AtomicBool,
    printer: Printer,
    out: Mutex<Sink>,
    err: Mutex<Sink>,
    on_fatal: FatalHook,
}

impl SessionIo {
    pub fn new(reader: LineReader, printer: Printer, out: Sink, err: Sink, on_fatal: FatalHook) -> Self {
        Self {
            reader,
            reading: AtomicBool::new(false),
            printer,
            out: Mutex::new(out),
            err: Mutex::new(err),
            on_fatal,
        }
    }

    /// Read a line, holding the "currently reading" flag for the duration.
    ///
    /// The flag doubles as the guard against two readers: the main loop and
    /// an evaluator asking for input never wait on the reader together.
    pub fn read_line(&self) -> Result<ReadOutcome, ReadError> {
        if self.reading.swap(true, Ordering::SeqCst) {
            return Err(ReadError::Busy);
        }
        let outcome = self.reader.read_line();
        self.reading.store(false, Ordering::SeqCst);
        outcome
    }

    /// Whether someone is blocked waiting for a line.
    pub fn is_reading(&self) -> bool {
        self.reading.load(Ordering::SeqCst) && self.reader.is_pending()
    }

    /// Abandon the pending read, if there is one. The reader checks for a
    /// waiting caller under its own lock, so a read that has just finished
    /// leaves no cancellation behind for the next one.
    ///
    /// Returns whether a read was cancelled.
    pub fn interrupt_read(&self) -> bool {
        self.reading.load(Ordering::SeqCst) && self.reader.cancel_if_pending()
    }

    pub fn close_reader(&self) {
        self.reader.close();
    }

    pub fn prompt(&self, label: &str) -> io::Result<()> {
        let mut out = lock(&self.out);
        write!(out, "{label}=> ")?;
        out.flush()
    }

    /// Write styled text to standard output.
    pub fn write_out(&self, style: Style, text: &str, newline: bool) -> io::Result<()> {
        write_styled(&mut lock(&self.out), self.printer, style, text, newline)
    }

    /// Write styled text to the error sink.
    pub fn write_err(&self, text: &str) -> io::Result<()> {
        write_styled(&mut lock(&self.err), self.printer, Style::Error, text, false)
    }

    pub fn flush(&self) -> io::Result<()> {
        lock(&self.out).flush()?;
        lock(&self.err).flush()
    }
}

impl Host for SessionIo {
    fn request_line(&self) -> Option<String> {
        match self.read_line() {
            Ok(ReadOutcome::Line(line)) => Some(line),
            Ok(ReadOutcome::Interrupted | ReadOutcome::EndOfInput) => None,
            Err(ReadError::Busy) => {
                warn!("backend asked for input while a read is already outstanding");
                None
            }
            Err(e) => {
                self.report_error(&format!("failed to read input: {e}\n"), true);
                None
            }
        }
    }

    fn push_output(&self, text: &str) {
        if let Err(e) = self.write_out(Style::Out, text, false) {
            warn!("failed to write backend output: {e}");
        }
    }

    fn report_error(&self, text: &str, fatal: bool) {
        if let Err(e) = self.write_err(text) {
            warn!("failed to write backend error: {e}");
        }
        if fatal {
            debug!("fatal report from backend");
            let _ = self.flush();
            (self.on_fatal)(text);
        }
    }
}

fn write_styled(
    sink: &mut Sink,
    printer: Printer,
    style: Style,
    text: &str,
    newline: bool,
) -> io::Result<()> {
    write!(sink, "{}", printer.paint(style, text))?;
    if newline {
        writeln!(sink)?;
    }
    sink.flush()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

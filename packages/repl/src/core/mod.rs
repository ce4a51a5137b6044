//! Platform-independent session core.
//!
//! This module contains the main read-evaluate-print loop and the one-shot
//! entry points that share its rendering.

use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};
use trench_client::{Client, Fragment, Fragments, Host, INTERRUPT};

use crate::error::SessionError;
use crate::host::{Printer, Style};
use crate::io::{exit_on_fatal, FatalHook, SessionIo, Sink};
use crate::reader::{LineReader, ReadOutcome};

/// Printed value hidden when hide-nil is on.
const NIL: &str = "nil";

/// One interactive session against one backend connection.
pub struct Session {
    io: Arc<SessionIo>,
    client: Arc<dyn Client>,
    hides_nil: bool,
    closed: AtomicBool,
}

/// Configures and connects a [`Session`].
pub struct SessionBuilder {
    input: Box<dyn BufRead + Send>,
    out: Sink,
    err: Sink,
    printer: Printer,
    hides_nil: bool,
    on_fatal: FatalHook,
}

impl SessionBuilder {
    /// Start from an input source, writing to the process's stdout and
    /// stderr without colors.
    pub fn new(input: impl BufRead + Send + 'static) -> Self {
        Self {
            input: Box::new(input),
            out: Box::new(std::io::stdout()),
            err: Box::new(std::io::stderr()),
            printer: Printer::plain(),
            hides_nil: false,
            on_fatal: exit_on_fatal(),
        }
    }

    pub fn output(mut self, out: impl std::io::Write + Send + 'static) -> Self {
        self.out = Box::new(out);
        self
    }

    pub fn error_output(mut self, err: impl std::io::Write + Send + 'static) -> Self {
        self.err = Box::new(err);
        self
    }

    pub fn printer(mut self, printer: Printer) -> Self {
        self.printer = printer;
        self
    }

    /// Suppress printing a `nil` result.
    pub fn hides_nil(mut self, hides_nil: bool) -> Self {
        self.hides_nil = hides_nil;
        self
    }

    /// Replace what happens after a fatal report has been written. The
    /// default exits the process.
    pub fn on_fatal(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_fatal = Box::new(hook);
        self
    }

    /// Start the reader and connect the backend.
    ///
    /// `connect` receives the session's [`Host`] so the client can ask for
    /// input and push output of its own.
    pub fn connect<C, F>(self, connect: F) -> Result<Session, SessionError>
    where
        C: Client + 'static,
        F: FnOnce(Arc<dyn Host>) -> Result<C, trench_client::Error>,
    {
        let reader = LineReader::spawn(self.input)?;
        let io = Arc::new(SessionIo::new(
            reader,
            self.printer,
            self.out,
            self.err,
            self.on_fatal,
        ));
        let host: Arc<dyn Host> = io.clone();
        let client = match connect(host) {
            Ok(client) => client,
            Err(e) => {
                io.close_reader();
                return Err(e.into());
            }
        };

        Ok(Session {
            io,
            client: Arc::new(client),
            hides_nil: self.hides_nil,
            closed: AtomicBool::new(false),
        })
    }
}

impl Session {
    pub fn builder(input: impl BufRead + Send + 'static) -> SessionBuilder {
        SessionBuilder::new(input)
    }

    /// Run the interactive loop until input ends.
    pub fn run(&self) -> Result<(), SessionError> {
        loop {
            self.io.prompt(&self.client.context_label())?;

            let line = match self.io.read_line()? {
                ReadOutcome::Line(line) => line,
                ReadOutcome::Interrupted => {
                    debug!("read interrupted, prompting again");
                    continue;
                }
                ReadOutcome::EndOfInput => {
                    debug!("end of input");
                    return Ok(());
                }
            };

            let code = line.trim();
            if code.is_empty() {
                continue;
            }
            self.eval(code)?;
        }
    }

    /// Evaluate `code` and render its output.
    pub fn eval(&self, code: &str) -> Result<(), SessionError> {
        trace!(code, "evaluating");
        let fragments = self.client.evaluate(code)?;
        self.render(fragments)
    }

    /// Load a source file and render its output.
    pub fn load_file(&self, path: &Path) -> Result<(), SessionError> {
        debug!(path = %path.display(), "loading file");
        let fragments = self.client.load_file(path)?;
        self.render(fragments)
    }

    fn render(&self, fragments: Fragments) -> Result<(), SessionError> {
        for fragment in fragments {
            match fragment.map_err(SessionError::BackendFault)? {
                Fragment::Out(text) => self.io.write_out(Style::Out, &text, false)?,
                Fragment::Value(value) => {
                    if !(self.hides_nil && value == NIL) {
                        self.io.write_out(Style::Value, &value, true)?;
                    }
                }
                Fragment::Error(text) => self.io.write_err(&text)?,
            }
        }
        self.io.flush()?;
        Ok(())
    }

    /// Whether the backend can cancel evaluations, i.e. whether interrupt
    /// handling is worth arming.
    pub fn supports_interrupt(&self) -> bool {
        self.client.supports(INTERRUPT)
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            io: Arc::clone(&self.io),
            client: Arc::clone(&self.client),
        }
    }

    /// Whether the session is waiting for a line of input.
    pub fn is_reading(&self) -> bool {
        self.io.is_reading()
    }

    /// Stop reading and release the backend. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.io.close_reader();
        self.client.close()?;
        Ok(())
    }
}

/// Delivers interrupts into a running session from any thread.
#[derive(Clone)]
pub struct InterruptHandle {
    io: Arc<SessionIo>,
    client: Arc<dyn Client>,
}

impl InterruptHandle {
    /// Cancel the backend's current evaluation and, if the session is
    /// blocked reading, the pending read too.
    pub fn interrupt(&self) {
        self.client.interrupt();
        let cancelled_read = self.io.interrupt_read();
        debug!(cancelled_read, "interrupt delivered");
    }
}

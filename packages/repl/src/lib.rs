//! # trench-repl
//!
//! An interactive session driver for nREPL servers.
//!
//! The session reads lines from standard input, evaluates them on the
//! server and prints what comes back. Ctrl+C interrupts the running
//! evaluation, or abandons the pending read and shows a fresh prompt. A line
//! typed while a read was being abandoned is not lost: it becomes the input
//! of the next prompt.
//!
//! ## Usage
//!
//! ```bash
//! # Connect using ./.nrepl-port
//! trench
//!
//! # Explicit server, one-shot evaluation
//! trench -s nrepl://localhost:7888 -e '(+ 1 2)'
//!
//! # Run a namespace's -main
//! trench -p 7888 -m app.core
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod host;
pub mod interrupt;
pub mod io;
pub mod reader;
pub mod repl;

pub use config::{Config, Mode, Options};
pub use error::{Error, SessionError};
pub use repl::run;

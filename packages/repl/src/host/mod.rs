//! Terminal rendering for session output.
//!
//! The session core decides *what* to write and where; this module decides
//! how it looks on a terminal.

pub mod printer;

pub use printer::{ColorMode, Printer, Style};

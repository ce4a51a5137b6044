//! # trench-client
//!
//! The seam between an interactive session and the evaluator it drives.
//!
//! A session talks to its backend only through [`Client`], and a backend
//! talks back to the session only through [`Host`]. The direction of the
//! second trait is inverted: the session implements it and hands it to the
//! backend when the connection is made, so the backend can ask for a line of
//! input or push output that arrives outside of any evaluation.
//!
//! ```rust
//! use trench_client::{Fragment, Fragments};
//!
//! fn values(fragments: Fragments) -> Vec<String> {
//!     fragments
//!         .filter_map(|f| match f {
//!             Ok(Fragment::Value(v)) => Some(v),
//!             _ => None,
//!         })
//!         .collect()
//! }
//! ```

use std::path::Path;

mod error;

pub use error::Error;

/// Capability name a client advertises when it can cancel evaluations.
pub const INTERRUPT: &str = "interrupt";

/// One unit of evaluator output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Text the evaluated code wrote to its standard output.
    Out(String),
    /// The printed result of an evaluated form.
    Value(String),
    /// An error reported by the evaluator.
    Error(String),
}

/// Lazily produced output of a single evaluation, in the order the backend
/// produced it. An `Err` item means the backend sent something the client
/// could not interpret.
pub type Fragments = Box<dyn Iterator<Item = Result<Fragment, Error>> + Send>;

/// A connection to an evaluator.
///
/// All methods take `&self`: [`Client::interrupt`] is called from a signal
/// thread while the session thread is blocked consuming [`Fragments`].
pub trait Client: Send + Sync {
    /// Submit code for evaluation.
    fn evaluate(&self, code: &str) -> Result<Fragments, Error>;

    /// Ask the evaluator to load a source file.
    fn load_file(&self, path: &Path) -> Result<Fragments, Error>;

    /// Label of the current evaluation context, used for the prompt.
    fn context_label(&self) -> String;

    /// Best-effort request to cancel the most recent evaluation.
    ///
    /// Must be a no-op when nothing is running.
    fn interrupt(&self);

    /// Whether the backend advertises the named capability.
    fn supports(&self, capability: &str) -> bool;

    /// Release the connection. Repeated calls have no effect.
    fn close(&self) -> Result<(), Error>;
}

/// Host I/O capability a session exposes to its client.
pub trait Host: Send + Sync {
    /// Read one line of user input on behalf of the evaluator.
    ///
    /// Returns `None` when no line can be had: the read was interrupted,
    /// input has ended, or the session is already reading for itself.
    /// Clients should treat `None` as end of input.
    fn request_line(&self) -> Option<String>;

    /// Write output that arrived outside of any evaluation.
    fn push_output(&self, text: &str);

    /// Report an error. A fatal report terminates the process after the
    /// message is flushed.
    fn report_error(&self, text: &str, fatal: bool);
}

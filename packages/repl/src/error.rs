//! Errors that end a session.

use crate::reader::ReadError;

/// A fatal session error. Interrupts and end of input are not errors; they
/// are handled inside the loop.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("failed to read input: {0}")]
    ReadFailure(#[from] ReadError),

    #[error("unexpected response from backend: {0}")]
    BackendFault(trench_client::Error),

    #[error("backend error: {0}")]
    Backend(#[from] trench_client::Error),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Anything that stops the `trench` binary.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Interrupt(#[from] crate::interrupt::InstallError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

//! Ctrl+C wiring.
//!
//! The handler runs on ctrlc's own thread and never touches the terminal;
//! all it does is hand the interrupt to the session.

use tracing::debug;

use crate::core::InterruptHandle;

/// Installing the process-wide handler failed, usually because one is
/// already installed.
#[derive(Debug, thiserror::Error)]
#[error("failed to install interrupt handler: {0}")]
pub struct InstallError(#[from] ctrlc::Error);

/// Route Ctrl+C to `handle` for the rest of the process.
pub fn install(handle: InterruptHandle) -> Result<(), InstallError> {
    ctrlc::set_handler(move || {
        debug!("interrupt signal received");
        handle.interrupt();
    })?;
    Ok(())
}

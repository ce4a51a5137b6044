//! Error type shared by backend client implementations.

/// Errors raised by a backend client.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("unexpected response: {message}")]
    UnexpectedResponse { message: String },

    #[error("connection closed")]
    Closed,
}

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Error::UnexpectedResponse {
            message: message.into(),
        }
    }
}

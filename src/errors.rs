use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelloError {
    /// A command was issued while no command socket is open.
    #[error("not connected")]
    NotConnected,

    #[error("failed to write command: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The session was closed while the command was waiting.
    #[error("cancelled")]
    Cancelled,

    #[error("invalid response {response:?}: {reason}")]
    InvalidResponse { response: String, reason: String },

    #[error("malformed telemetry at field {field:?}: {reason}")]
    MalformedTelemetry { field: &'static str, reason: String },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TelloError>;

/// Crate-wide result type for socket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed errors for the session socket and its sidecar transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The socket's transport is gone (closed or never established).
    #[error("session socket is not connected")]
    NotConnected,

    /// An operation did not complete in time.
    #[error("{operation} timed out")]
    Timeout { operation: String },

    /// The sidecar reported a failure.
    #[error("sidecar error: {message}")]
    Sidecar { message: String },

    /// WebSocket transport failure.
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame (de)serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    #[must_use]
    pub fn sidecar(message: impl Into<String>) -> Self {
        Self::Sidecar {
            message: message.into(),
        }
    }
}

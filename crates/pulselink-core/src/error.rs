use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Caller errors, returned synchronously from lifecycle operations
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Port {active} is already active, cannot start {requested}")]
    Conflict { active: String, requested: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Pulse client has been disposed")]
    Disposed,

    // Transport errors
    #[error("Failed to open {port}: {message}")]
    Open { port: String, message: String },

    // Protocol errors
    #[error("Invalid message format: {message}")]
    InvalidMessageFormat { message: String },

    #[error("Invalid unique id length: {length} (expected 10)")]
    InvalidUniqueId { length: usize },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new conflict error between the active and requested ports.
    pub fn conflict(active: impl Into<String>, requested: impl Into<String>) -> Self {
        Self::Conflict {
            active: active.into(),
            requested: requested.into(),
        }
    }

    /// Create a new open failure for `port`.
    pub fn open(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Open {
            port: port.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

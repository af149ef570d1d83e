//! Error types and handling for the EVSE engine
//!
//! Two layers live here. `EvseError` covers the ambient failures of the
//! process (configuration, I/O, persistence, timers). `CommandError` is the
//! status a cluster command or hardware call reports back to its caller; it
//! never carries a message because the host framework maps it onto a fixed
//! status code.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EvseError>;

/// Result of a cluster command, attribute write or hardware call.
///
/// `Ok(())` is the "Success" status.
pub type CommandResult<T = ()> = std::result::Result<T, CommandError>;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum EvseError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Persistent attribute storage errors
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Timer service errors
    #[error("Timer error: {message}")]
    Timer { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// A command was rejected by the engine
    #[error("Command rejected: {status}")]
    Command { status: CommandError },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl EvseError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        EvseError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        EvseError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        EvseError::Io {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        EvseError::Persistence {
            message: message.into(),
        }
    }

    /// Create a new timer error
    pub fn timer<S: Into<String>>(message: S) -> Self {
        EvseError::Timer {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        EvseError::Generic {
            message: message.into(),
        }
    }
}

/// Status returned by a rejected command.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CommandError {
    /// An argument is outside its allowed range. Nothing was changed.
    #[error("constraint error")]
    ConstraintError,

    /// A precondition does not hold (fault active, diagnostics running,
    /// nothing to restore, handler already registered, ...).
    #[error("failure")]
    Failure,

    /// A bounded store is full.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// The command payload is malformed.
    #[error("invalid command")]
    InvalidCommand,

    /// The command is not part of the enabled feature set.
    #[error("unsupported command")]
    UnsupportedCommand,

    /// The attribute is not part of the enabled feature set or is read-only.
    #[error("unsupported attribute")]
    UnsupportedAttribute,
}

/// Outcome of a successful attribute write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The stored value changed and was reported
    Written,
    /// The written value equals the stored one; nothing was reported
    NoOp,
}

impl From<CommandError> for EvseError {
    fn from(status: CommandError) -> Self {
        EvseError::Command { status }
    }
}

impl From<std::io::Error> for EvseError {
    fn from(err: std::io::Error) -> Self {
        EvseError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for EvseError {
    fn from(err: serde_yaml::Error) -> Self {
        EvseError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EvseError {
    fn from(err: serde_json::Error) -> Self {
        EvseError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for EvseError {
    fn from(err: chrono::ParseError) -> Self {
        EvseError::validation("datetime".to_string(), err.to_string())
    }
}

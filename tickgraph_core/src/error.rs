//! Unified error handling for tickgraph
//!
//! Every fallible operation in the engine returns [`TickResult`]. Errors fall
//! into four families: configuration errors (always raised by `Model` building
//! or `Engine::load`, never mid-run), link errors, runtime workload faults, and
//! engine lifecycle misuse.

use thiserror::Error;

/// Main error type for tickgraph operations
#[derive(Debug, Error)]
pub enum TickError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ---------------------------------------------------------------------
    // Configuration errors (fatal at build or load time)
    // ---------------------------------------------------------------------
    /// Two seeds share an instance name within one model
    #[error("Duplicate workload name '{name}'")]
    DuplicateName { name: String },

    /// Two remote models share a tag
    #[error("Duplicate remote model tag '{tag}'")]
    DuplicateTag { tag: String },

    /// Workload type name missing from the registry
    #[error("Unknown workload type '{type_name}'")]
    UnknownType { type_name: String },

    /// `set_root` was never called on the model
    #[error("Model '{model}' has no root workload")]
    NoRoot { model: String },

    /// Workload instance name or remote tag is malformed
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Tick rate violates the parent/child rate rules
    #[error("Invalid tick rate for '{workload}': {message}")]
    InvalidRate { workload: String, message: String },

    /// Port path could not be parsed
    #[error("Invalid port path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Transport address could not be parsed
    #[error("Invalid transport address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Port path parsed but does not name an existing port
    #[error("Unresolved port '{path}': {reason}")]
    UnresolvedPort { path: String, reason: String },

    /// Connection source is not an output, or destination is not an input
    #[error("Port '{path}' has the wrong direction: expected {expected}")]
    DirectionMismatch { path: String, expected: String },

    /// Connection endpoints carry incompatible types
    #[error("Type mismatch connecting '{src}' ({src_type}) to '{dst}' ({dst_type})")]
    TypeMismatch {
        src: String,
        dst: String,
        src_type: String,
        dst_type: String,
    },

    /// An input port is bound to more than one writer
    #[error("Input port '{path}' has more than one writer")]
    MultipleWriters { path: String },

    /// Structural problem in the workload tree
    #[error("Topology error: {0}")]
    Topology(String),

    /// Same type name registered twice with different port schemas
    #[error("Conflicting registration for workload type '{type_name}'")]
    ConflictingRegistration { type_name: String },

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    // ---------------------------------------------------------------------
    // Link errors
    // ---------------------------------------------------------------------
    /// Remote link failure
    #[error("Link '{tag}' error: {message}")]
    Link { tag: String, message: String },

    /// Remote side refused or never completed the handshake
    #[error("Handshake with '{tag}' failed: {message}")]
    Handshake { tag: String, message: String },

    /// Transport-level errors (open, read, write)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ---------------------------------------------------------------------
    // Runtime workload faults
    // ---------------------------------------------------------------------
    /// A workload reported a failure from one of its lifecycle calls
    #[error("Workload '{workload}' error: {message}")]
    Workload { workload: String, message: String },

    /// A workload failed too many consecutive ticks
    #[error("Workload '{workload}' failed {failures} consecutive ticks")]
    FaultThreshold { workload: String, failures: u32 },

    // ---------------------------------------------------------------------
    // Lifecycle / ambient
    // ---------------------------------------------------------------------
    /// Engine operation called in the wrong state
    #[error("Engine state error: {0}")]
    EngineState(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Feature not compiled in
    #[error("Feature not available: {0}")]
    FeatureNotAvailable(String),

    /// Catch-all for other error types
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using TickError
pub type TickResult<T> = Result<T, TickError>;

impl From<serde_json::Error> for TickError {
    fn from(err: serde_json::Error) -> Self {
        TickError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for TickError {
    fn from(err: serde_yaml::Error) -> Self {
        TickError::Config(format!("YAML parse error: {}", err))
    }
}

impl From<toml::de::Error> for TickError {
    fn from(err: toml::de::Error) -> Self {
        TickError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<bincode::Error> for TickError {
    fn from(err: bincode::Error) -> Self {
        TickError::Serialization(format!("bincode: {}", err))
    }
}

impl From<&str> for TickError {
    fn from(msg: &str) -> Self {
        TickError::Other(msg.to_string())
    }
}

impl From<String> for TickError {
    fn from(msg: String) -> Self {
        TickError::Other(msg)
    }
}

// Helper methods
impl TickError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        TickError::Config(msg.into())
    }

    /// Create a workload error with instance name and message
    pub fn workload<S: Into<String>, T: Into<String>>(workload: S, message: T) -> Self {
        TickError::Workload {
            workload: workload.into(),
            message: message.into(),
        }
    }

    /// Create a link error for a remote tag
    pub fn link<S: Into<String>, T: Into<String>>(tag: S, message: T) -> Self {
        TickError::Link {
            tag: tag.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        TickError::Transport(msg.into())
    }

    /// Create a topology error
    pub fn topology<S: Into<String>>(msg: S) -> Self {
        TickError::Topology(msg.into())
    }

    /// True for errors that describe a broken topology or configuration.
    ///
    /// These are only ever produced before the first tick.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TickError::DuplicateName { .. }
                | TickError::DuplicateTag { .. }
                | TickError::UnknownType { .. }
                | TickError::NoRoot { .. }
                | TickError::InvalidName { .. }
                | TickError::InvalidRate { .. }
                | TickError::InvalidPath { .. }
                | TickError::InvalidAddress { .. }
                | TickError::UnresolvedPort { .. }
                | TickError::DirectionMismatch { .. }
                | TickError::TypeMismatch { .. }
                | TickError::MultipleWriters { .. }
                | TickError::Topology(_)
                | TickError::ConflictingRegistration { .. }
                | TickError::Config(_)
        )
    }

    /// True when the error must stop the engine instead of being contained
    /// at the nearest group.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TickError::FaultThreshold { .. })
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, TickError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(TickError::NoRoot {
            model: "m".into()
        }
        .is_configuration());
        assert!(TickError::config("bad").is_configuration());
        assert!(!TickError::workload("w", "boom").is_configuration());
        assert!(!TickError::link("spine", "down").is_configuration());
    }

    #[test]
    fn test_fatal_classification() {
        let err = TickError::FaultThreshold {
            workload: "mixer".into(),
            failures: 5,
        };
        assert!(err.is_fatal());
        assert!(!TickError::workload("mixer", "boom").is_fatal());
    }

    #[test]
    fn test_display_includes_context() {
        let err = TickError::TypeMismatch {
            src: "a.outputs.x".into(),
            dst: "b.inputs.y".into(),
            src_type: "f64".into(),
            dst_type: "bool".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("a.outputs.x"));
        assert!(msg.contains("b.inputs.y"));
    }
}

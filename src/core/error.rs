//! Error types for the logger system
//!
//! Logging calls themselves never return these errors; they surface from
//! configuration, sink, and spool operations only.

pub type Result<T> = std::result::Result<T, LoggerError>;

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// IO error with context
    #[error("IO error while {operation}: {message}")]
    IoOperation {
        operation: String,
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Queue full with buffer details
    #[error("Log queue full: {current}/{max} events buffered")]
    QueueFull { current: usize, max: usize },

    /// Sink no longer accepts events
    #[error("Sink '{sink}' is closed")]
    SinkClosed { sink: String },

    /// Circuit breaker is open and no fallback is configured
    #[error("Circuit '{sink}' is open")]
    CircuitOpen { sink: String },

    /// Sink reported a delivery failure
    #[error("Sink '{sink}' failed: {message}")]
    SinkFailure { sink: String, message: String },

    /// Invalid configuration with details
    #[error("Invalid configuration for {component}: {message}")]
    InvalidConfiguration { component: String, message: String },

    /// Spool segment could not be decoded
    #[error("Spool segment '{path}' is corrupt: {message}")]
    SpoolCorrupt { path: String, message: String },

    /// Spool directory lock error
    #[error("Failed to acquire spool lock on '{path}'")]
    SpoolLock { path: String },

    /// Spool is at capacity
    #[error("Spool capacity exhausted: {current}/{max} bytes")]
    SpoolFull { current: u64, max: u64 },

    /// Provider registration after the capability was resolved
    #[error("Capability for type '{type_name}' was already resolved")]
    CapabilityResolved { type_name: String },

    /// Two types share the serde name a provider is keyed by
    #[error("Capability name '{type_name}' is already used by '{existing}', cannot register '{incoming}'")]
    CapabilityCollision {
        type_name: String,
        existing: String,
        incoming: String,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl LoggerError {
    /// Create an IO operation error with context
    pub fn io_operation(
        operation: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        LoggerError::IoOperation {
            operation: operation.into(),
            message: message.into(),
            source,
        }
    }

    /// Create a queue full error with buffer details
    pub fn queue_full(current: usize, max: usize) -> Self {
        LoggerError::QueueFull { current, max }
    }

    pub fn sink_closed(sink: impl Into<String>) -> Self {
        LoggerError::SinkClosed { sink: sink.into() }
    }

    pub fn circuit_open(sink: impl Into<String>) -> Self {
        LoggerError::CircuitOpen { sink: sink.into() }
    }

    /// Create a sink failure error
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        LoggerError::SinkFailure {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn config(component: impl Into<String>, message: impl Into<String>) -> Self {
        LoggerError::InvalidConfiguration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a spool corruption error
    pub fn spool_corrupt(path: impl Into<String>, message: impl Into<String>) -> Self {
        LoggerError::SpoolCorrupt {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a spool lock error
    pub fn spool_lock(path: impl Into<String>) -> Self {
        LoggerError::SpoolLock { path: path.into() }
    }

    pub fn spool_full(current: u64, max: u64) -> Self {
        LoggerError::SpoolFull { current, max }
    }

    pub fn capability_resolved(type_name: impl Into<String>) -> Self {
        LoggerError::CapabilityResolved {
            type_name: type_name.into(),
        }
    }

    pub fn capability_collision(
        type_name: impl Into<String>,
        existing: impl Into<String>,
        incoming: impl Into<String>,
    ) -> Self {
        LoggerError::CapabilityCollision {
            type_name: type_name.into(),
            existing: existing.into(),
            incoming: incoming.into(),
        }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        LoggerError::Other(msg.into())
    }

    /// Whether the error means the event was refused rather than failed
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LoggerError::QueueFull { .. }
                | LoggerError::SinkClosed { .. }
                | LoggerError::CircuitOpen { .. }
        )
    }
}

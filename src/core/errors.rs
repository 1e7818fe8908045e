use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Unified error type for every coordination strategy.
///
/// Outcomes fan out to many waiters, so the error is `Clone`: operation
/// failures are shared behind an `Arc` rather than copied.
#[derive(Debug, Clone, Error)]
pub enum TetherError {
    /// The operation settled with an error of its own
    #[error("Operation failed in {strategy}: {source}")]
    Failed {
        strategy: String,
        source: SharedError,
    },

    /// The operation panicked while building its future or while being polled
    #[error("Operation panicked in {strategy}: {message}")]
    Panicked { strategy: String, message: String },

    /// The running attempt observed its cancellation token
    #[error("Operation was cancelled: {operation}")]
    Cancelled {
        operation: String,
        reason: Option<String>,
    },

    /// The settling side went away before delivering a result
    #[error("Outcome abandoned before settlement: {operation}")]
    Abandoned { operation: String },

    /// No runtime was available to drive the operation
    #[error("Runtime unavailable: {message}")]
    Runtime { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Serialization errors (configuration loading)
    #[error("Serialization failed: {format}: {message}")]
    Serialization { format: String, message: String },
}

/// An operation error shared by every waiter of one outcome.
#[derive(Clone)]
pub struct SharedError(Arc<anyhow::Error>);

impl SharedError {
    pub fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }

    /// Borrow the underlying `anyhow::Error`
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// Attempt to downcast the operation error to a concrete type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl TetherError {
    /// Create a failure from an operation error
    pub fn failed<S: Into<String>>(strategy: S, err: anyhow::Error) -> Self {
        // A cancellation surfaced through `?` keeps its own variant.
        if let Some(cancelled) = err.downcast_ref::<TetherError>() {
            if matches!(cancelled, Self::Cancelled { .. }) {
                return cancelled.clone();
            }
        }
        Self::Failed {
            strategy: strategy.into(),
            source: SharedError::new(err),
        }
    }

    /// Create a panic error from a caught unwind payload
    pub fn panicked<S: Into<String>>(strategy: S, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked {
            strategy: strategy.into(),
            message,
        }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            reason: None,
        }
    }

    /// Create a cancellation error with a reason
    pub fn cancelled_with_reason<S: Into<String>, R: Into<String>>(operation: S, reason: R) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            reason: Some(reason.into()),
        }
    }

    /// Create an abandonment error
    pub fn abandoned<S: Into<String>>(operation: S) -> Self {
        Self::Abandoned {
            operation: operation.into(),
        }
    }

    /// Create a runtime error
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error for a specific field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Whether a fresh call with the same arguments may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Failed { .. } | Self::Panicked { .. } => true,
            Self::Cancelled { .. } | Self::Abandoned { .. } => true,
            Self::Runtime { .. } => false,
            Self::Configuration { .. } | Self::Serialization { .. } => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::Panicked { .. } => "panicked",
            Self::Cancelled { .. } => "cancelled",
            Self::Abandoned { .. } => "abandoned",
            Self::Runtime { .. } => "runtime",
            Self::Configuration { .. } => "configuration",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TetherError>;

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for TetherError {
    fn from(err: anyhow::Error) -> Self {
        Self::failed("operation", err)
    }
}

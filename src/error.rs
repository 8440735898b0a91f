//! Error types and handling for the sluice engine

use thiserror::Error;

/// Result type alias for sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;

/// Main error type for the sluice engine
#[derive(Error, Debug)]
pub enum SluiceError {
    /// I/O errors from file or mapping operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message describing the configuration issue
        message: String,
    },

    /// CPU/NUMA topology errors
    #[error("Topology error: {message}")]
    Topology {
        /// Error message describing the topology issue
        message: String,
    },

    /// Memory or thread resource errors
    #[error("Resource error: {message}")]
    Resource {
        /// Error message describing the resource issue
        message: String,
    },
}

impl SluiceError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a new topology error
    pub fn topology(message: impl Into<String>) -> Self {
        Self::Topology {
            message: message.into(),
        }
    }

    /// Create a new resource error
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Check if this error is related to system resources
    pub fn is_resource_error(&self) -> bool {
        matches!(self, Self::Resource { .. } | Self::Io(_))
    }
}

/// Backpressure token returned by the queue hot paths.
///
/// A full ring (enqueue) or an empty ring (dequeue) is not an error;
/// the caller is expected to loop. Kept separate from [`SluiceError`]
/// so the hot path never constructs an error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SluiceError::config("test message");
        assert!(matches!(err, SluiceError::InvalidConfig { .. }));
        assert!(!err.is_resource_error());
    }

    #[test]
    fn test_error_classification() {
        let mem_err = SluiceError::resource("out of memory");
        assert!(mem_err.is_resource_error());

        let topo_err = SluiceError::topology("no such node");
        assert!(!topo_err.is_resource_error());
    }
}

//! Error types for the etcd client
//!
//! Configuration errors are raised while a client is being built; resolution,
//! authentication and call errors are raised by the operation that hit them.

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the client, its resolvers and the embedded server
#[derive(Debug, Error)]
pub enum Error {
    /// An endpoint descriptor could not be parsed
    #[error("Invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The resolver target names no known scheme
    #[error("Unknown resolver: {0}")]
    UnknownResolver(String),

    /// Any other invalid client configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A DNS or DNS SRV lookup failed
    #[error("Resolution of {name} failed: {message}")]
    Resolution { name: String, message: String },

    /// The authentication RPC failed
    #[error("Authentication failed: {0}")]
    Authentication(tonic::Status),

    /// A key-value RPC failed
    #[error("Call failed: {0}")]
    Call(#[from] tonic::Status),

    /// Transport setup error
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// IO operation error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_endpoint(endpoint: &str, reason: impl Into<String>) -> Self {
        Error::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error was caused by invalid configuration rather than by
    /// anything that happened at runtime.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidEndpoint { .. } | Error::UnknownResolver(_) | Error::Configuration(_)
        )
    }
}

impl From<Error> for tonic::Status {
    fn from(error: Error) -> Self {
        match error {
            Error::Authentication(status) | Error::Call(status) => status,
            Error::InvalidEndpoint { .. } | Error::UnknownResolver(_) | Error::Configuration(_) => {
                tonic::Status::invalid_argument(error.to_string())
            }
            Error::Resolution { .. } => tonic::Status::unavailable(error.to_string()),
            Error::Transport(e) => tonic::Status::unavailable(format!("Transport error: {}", e)),
            Error::Io(e) => tonic::Status::internal(format!("IO error: {}", e)),
        }
    }
}

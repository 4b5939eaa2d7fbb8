//! Error types for the ferrule core library.

use crate::code::BrokerError;
use thiserror::Error;

/// Main error type for ferrule operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The client configuration was rejected, e.g. a required setting is missing
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// None of the bootstrap addresses accepted a TCP connection
    #[error("Connectivity error: no reachable address in [{addresses}]: {message}")]
    Connectivity { addresses: String, message: String },

    /// An error reported by the underlying broker client
    #[error("Client error: {0}")]
    Client(#[from] BrokerError),

    /// `subscribe` was called on a consumer that is already running
    #[error("the {component} is running")]
    AlreadyRunning { component: &'static str },

    /// The component was closed, or failed to start
    #[error("the {component} has been disposed")]
    Disposed { component: &'static str },

    /// An application callback reported a failure
    #[error("Handler error: {message}")]
    Handler { message: String },

    /// Internal system errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for ferrule operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for [`Error::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Shorthand for [`Error::Handler`].
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler { message: message.into() }
    }

    /// Shorthand for [`Error::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// True for the state-misuse error returned while running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. })
    }

    /// True for the error returned once a component is disposed.
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }

    /// The broker error carried by [`Error::Client`], if any.
    #[must_use]
    pub const fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            Self::Client(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::ErrorCode;

    #[test]
    fn test_state_errors_display() {
        let err = Error::AlreadyRunning { component: "Consumer" };
        assert_eq!(err.to_string(), "the Consumer is running");
        assert!(err.is_running());
        assert!(!err.is_disposed());

        let err = Error::Disposed { component: "Producer" };
        assert_eq!(err.to_string(), "the Producer has been disposed");
        assert!(err.is_disposed());
    }

    #[test]
    fn test_client_error_from_broker_error() {
        let err: Error = BrokerError::new(ErrorCode::Transport, "connection refused").into();
        assert_eq!(
            err.broker_error().map(|e| e.code),
            Some(ErrorCode::Transport)
        );
        assert!(err.to_string().starts_with("Client error:"));
    }
}

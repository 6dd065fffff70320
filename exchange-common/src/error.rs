// =================================================================
// error.rs - Error Types
// =================================================================

use thiserror::Error;

/// Message fragment a venue broker answers with when a request could not be
/// registered on its streaming control channel. Once seen, the client that
/// produced it keeps failing until it is rebuilt.
pub const BROKER_REGISTRATION_FAILURE: &str = "Could not register request with broker";

/// Error types shared by every venue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Malformed or ambiguous configuration. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The transport could not be established, or was torn down.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The venue rejected the request.
    #[error("Exchange API error: {0}")]
    Application(String),

    /// Generic I/O, protocol or decoding failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request failed local validation before reaching the venue.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A subscriber callback panicked during dispatch.
    #[error("Callback failed: {0}")]
    Callback(String),

    /// The active venue (or the bundled connector) does not offer this.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl ExchangeError {
    /// True for the transient broker-registration failure that only a fresh
    /// client can recover from.
    pub fn is_broker_registration_failure(&self) -> bool {
        match self {
            ExchangeError::Connection(msg) | ExchangeError::Transport(msg) => {
                msg.contains(BROKER_REGISTRATION_FAILURE)
            }
            _ => false,
        }
    }

    /// Check if error is recoverable by rebuilding the client
    pub fn is_recoverable(&self) -> bool {
        self.is_broker_registration_failure()
    }

    /// Errors raised before any request reaches a venue
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ExchangeError::Configuration(_)
                | ExchangeError::InvalidRequest(_)
                | ExchangeError::Unsupported(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_failure_detection() {
        let err = ExchangeError::Transport(format!(
            "protocol error: {}: timeout",
            BROKER_REGISTRATION_FAILURE
        ));
        assert!(err.is_broker_registration_failure());
        assert!(err.is_recoverable());

        let err = ExchangeError::Connection(BROKER_REGISTRATION_FAILURE.to_string());
        assert!(err.is_broker_registration_failure());
    }

    #[test]
    fn test_other_errors_are_not_broker_failures() {
        // the venue may echo the text back, but a rejection is still a rejection
        let err = ExchangeError::Application(BROKER_REGISTRATION_FAILURE.to_string());
        assert!(!err.is_broker_registration_failure());

        assert!(!ExchangeError::Connection("reset by peer".into()).is_recoverable());
        assert!(ExchangeError::Configuration("x".into()).is_local());
        assert!(!ExchangeError::Transport("x".into()).is_local());
    }
}

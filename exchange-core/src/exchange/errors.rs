// =================================================================
// exchange/errors.rs - Wire error mapping
// =================================================================

use exchange_common::ExchangeError;
use reqwest::StatusCode;
use tokio_tungstenite::tungstenite;

/// Map an HTTP client failure onto the common error kinds
pub(crate) fn from_reqwest(err: reqwest::Error) -> ExchangeError {
    if err.is_timeout() {
        ExchangeError::Transport(format!("Request timeout: {}", err))
    } else if err.is_connect() {
        ExchangeError::Connection(err.to_string())
    } else if err.is_decode() {
        ExchangeError::Transport(format!("Data parsing error: {}", err))
    } else {
        ExchangeError::Transport(err.to_string())
    }
}

pub(crate) fn from_json(err: serde_json::Error) -> ExchangeError {
    ExchangeError::Transport(format!("Data parsing error: {}", err))
}

pub(crate) fn from_ws(err: tungstenite::Error) -> ExchangeError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ExchangeError::Connection("WebSocket connection closed".to_string())
        }
        tungstenite::Error::Io(e) => ExchangeError::Connection(format!("WebSocket I/O: {}", e)),
        other => ExchangeError::Transport(format!("WebSocket error: {}", other)),
    }
}

/// Classify a non-success HTTP response. Client errors carry the venue's
/// rejection; anything else is a transport problem.
pub(crate) fn from_status(status: StatusCode, body: &str) -> ExchangeError {
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        ExchangeError::Application(format!("HTTP {}: {}", status, body))
    } else {
        ExchangeError::Transport(format!("HTTP {}: {}", status, body))
    }
}

// ── Core error types ──
//
// Everything here is recoverable once the bridge is running: callers log
// and move on. The `From` impls translate transport-layer errors from
// `bifrost-api` and `rumqttc` into domain variants so log lines read the
// same regardless of which connection failed.

use thiserror::Error;

use crate::router::RouteError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Message errors ───────────────────────────────────────────────
    #[error("Unknown device: {name}")]
    UnknownDevice { name: String },

    #[error(transparent)]
    Route(#[from] RouteError),

    // ── Connection errors ────────────────────────────────────────────
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Send failed: {reason}")]
    SendFailed { reason: String },

    #[error("Controller did not answer within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Bus error: {reason}")]
    Bus { reason: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Bridge is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<bifrost_api::Error> for CoreError {
    fn from(err: bifrost_api::Error) -> Self {
        match err {
            bifrost_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed { reason },
            bifrost_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                reason: format!("closed by controller (code {code}): {reason}"),
            },
            bifrost_api::Error::InvalidUrl(reason) => CoreError::ConnectionFailed {
                reason: format!("invalid address: {reason}"),
            },
            bifrost_api::Error::Send(reason) => CoreError::SendFailed { reason },
            bifrost_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            bifrost_api::Error::Protocol { message } => {
                CoreError::Internal(format!("protocol error: {message}"))
            }
        }
    }
}

impl From<rumqttc::ConnectionError> for CoreError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        CoreError::Bus {
            reason: err.to_string(),
        }
    }
}

use thiserror::Error;

/// Top-level error type for the `bifrost-api` crate.
///
/// Covers every failure mode of a controller session: connecting,
/// sending frames, reading replies, and making sense of what came back.
/// `bifrost-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// WebSocket handshake or TCP connect failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The controller closed the connection.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// URL could not be turned into a WebSocket request.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // ── Transfer ────────────────────────────────────────────────────
    /// Writing a frame to the controller failed.
    #[error("Failed to send to controller: {0}")]
    Send(String),

    /// Waiting for a reply took too long.
    #[error("Controller did not answer within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Data ────────────────────────────────────────────────────────
    /// The controller answered with something we could not decode.
    #[error("Protocol error: {message}")]
    Protocol { message: String },
}

impl Error {
    /// Returns `true` if the session is unusable and must be re-established.
    ///
    /// Protocol errors leave the socket intact; everything else means the
    /// connection is gone or in an unknown state.
    pub fn is_connection_lost(&self) -> bool {
        !matches!(self, Self::Protocol { .. })
    }
}

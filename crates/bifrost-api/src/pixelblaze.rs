//! WebSocket client for Pixelblaze-compatible effect controllers.
//!
//! The controller speaks JSON over a plain WebSocket (port 81 by default).
//! Only a small slice of the protocol is used here:
//!
//! | operation      | frame sent                                  |
//! |----------------|---------------------------------------------|
//! | set brightness | `{"brightness": 0.4, "save": false}`        |
//! | next pattern   | `{"nextProgram": true, "save": false}`      |
//! | query state    | `{"getConfig": true}`                       |
//!
//! The firmware has no separate power switch, so "off" is brightness 0 and
//! "on" is whatever level the caller wants restored. Besides replies, the
//! controller pushes unsolicited frames (binary previews, fps stats); those
//! are read and skipped.
//!
//! # Example
//!
//! ```rust,ignore
//! use bifrost_api::PixelblazeClient;
//! use url::Url;
//!
//! let url = Url::parse("ws://10.0.0.5:81")?;
//! let mut client = PixelblazeClient::connect(&url).await?;
//! let state = client.get_state().await?;
//! client.set_brightness(state.brightness + 0.1).await?;
//! client.close().await;
//! ```

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;

/// How long [`PixelblazeClient::get_state`] waits for the config reply.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Port the controller's WebSocket listens on out of the box.
pub const DEFAULT_PORT: u16 = 81;

/// Close code used when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetBrightness {
    brightness: f64,
    save: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NextProgram {
    next_program: bool,
    save: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetConfig {
    get_config: bool,
}

/// The part of a `getConfig` reply the bridge cares about.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceState {
    /// Brightness slider, 0.0..=1.0.
    pub brightness: f64,

    /// Device name as configured on the controller.
    #[serde(default)]
    pub name: Option<String>,
}

impl DeviceState {
    /// A controller is considered lit whenever its slider is above zero.
    pub fn is_on(&self) -> bool {
        self.brightness > 0.0
    }
}

/// One frame read from the controller, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A config frame, either a reply to `getConfig` or pushed after a
    /// change made elsewhere (web UI, another client).
    Config(DeviceState),
    /// Anything else: previews, stats, pongs.
    Other,
}

// ── PixelblazeClient ─────────────────────────────────────────────────

/// A single live WebSocket session with one controller.
///
/// Not cloneable: exactly one owner writes to a controller at a time.
/// Drop or [`close`](Self::close) the client to end the session.
pub struct PixelblazeClient {
    url: Url,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    query_timeout: Duration,
}

impl std::fmt::Debug for PixelblazeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelblazeClient")
            .field("url", &self.url.as_str())
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

impl PixelblazeClient {
    /// Open a WebSocket session to the controller at `url`.
    pub async fn connect(url: &Url) -> Result<Self, Error> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::InvalidUrl(format!(
                    "unsupported scheme '{other}' in {url}"
                )));
            }
        }

        tracing::debug!(url = %url, "Connecting to controller");

        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        Ok(Self {
            url: url.clone(),
            stream,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        })
    }

    /// Override how long [`get_state`](Self::get_state) waits for a reply.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the brightness slider. Values are clamped to `0.0..=1.0`.
    ///
    /// Fire-and-forget: the controller does not acknowledge the write.
    pub async fn set_brightness(&mut self, level: f64) -> Result<(), Error> {
        let frame = encode_set_brightness(level)?;
        self.send_text(frame).await
    }

    /// Advance the controller's sequencer to the next pattern. The
    /// brightness slider is left alone.
    pub async fn next_pattern(&mut self) -> Result<(), Error> {
        let frame = serde_json::to_string(&NextProgram {
            next_program: true,
            save: false,
        })
        .map_err(|e| Error::Protocol {
            message: e.to_string(),
        })?;
        self.send_text(frame).await
    }

    /// Switch the output on (at `level`) or off.
    pub async fn set_power(&mut self, on: bool, level: f64) -> Result<(), Error> {
        let target = if on { level } else { 0.0 };
        self.set_brightness(target).await
    }

    /// Ask the controller for its current config and wait for the reply.
    ///
    /// Unrelated frames that arrive in the meantime are skipped.
    pub async fn get_state(&mut self) -> Result<DeviceState, Error> {
        let request = serde_json::to_string(&GetConfig { get_config: true })
            .map_err(|e| Error::Protocol {
                message: e.to_string(),
            })?;
        self.send_text(request).await?;

        let timeout = self.query_timeout;
        let wait = async {
            loop {
                if let Frame::Config(state) = self.next_frame().await? {
                    return Ok(state);
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: timeout.as_secs(),
            })?
    }

    /// Read the next frame from the controller.
    ///
    /// Returns an error once the session is gone, whether the controller
    /// sent a close frame or the socket simply ended.
    pub async fn next_frame(&mut self) -> Result<Frame, Error> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(classify_text(&text)),
            Some(Ok(Message::Close(frame))) => Err(match frame {
                Some(cf) => Error::WebSocketClosed {
                    code: cf.code.into(),
                    reason: cf.reason.to_string(),
                },
                None => Error::WebSocketClosed {
                    code: ABNORMAL_CLOSURE,
                    reason: "close frame without payload".into(),
                },
            }),
            Some(Ok(_)) => {
                // Binary previews, ping, pong -- tungstenite answers pings itself
                tracing::trace!(url = %self.url, "Skipping non-text frame");
                Ok(Frame::Other)
            }
            Some(Err(e)) => Err(Error::WebSocketConnect(e.to_string())),
            None => Err(Error::WebSocketClosed {
                code: ABNORMAL_CLOSURE,
                reason: "stream ended".into(),
            }),
        }
    }

    /// Send a close frame and drop the session. Errors are ignored; the
    /// peer may already be gone.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(url = %self.url, error = %e, "Close handshake failed");
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        tracing::trace!(url = %self.url, frame = %text, "Sending frame");
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e: tungstenite::Error| Error::Send(e.to_string()))
    }
}

// ── Encoding / decoding ──────────────────────────────────────────────

fn encode_set_brightness(level: f64) -> Result<String, Error> {
    let brightness = if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    };
    serde_json::to_string(&SetBrightness {
        brightness,
        save: false,
    })
    .map_err(|e| Error::Protocol {
        message: e.to_string(),
    })
}

/// Decide whether a text frame is a config frame.
fn classify_text(text: &str) -> Frame {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        tracing::debug!("Ignoring non-JSON text frame");
        return Frame::Other;
    };

    if value.get("brightness").is_none() {
        return Frame::Other;
    }

    match serde_json::from_value::<DeviceState>(value) {
        Ok(state) => Frame::Config(state),
        Err(e) => {
            tracing::debug!(error = %e, "Config frame with unexpected shape");
            Frame::Other
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brightness_frame_matches_wire_format() {
        let frame = encode_set_brightness(0.4).unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, serde_json::json!({ "brightness": 0.4, "save": false }));
    }

    #[test]
    fn brightness_frame_is_clamped() {
        let high: serde_json::Value =
            serde_json::from_str(&encode_set_brightness(3.0).unwrap()).unwrap();
        let low: serde_json::Value =
            serde_json::from_str(&encode_set_brightness(-1.0).unwrap()).unwrap();
        let nan: serde_json::Value =
            serde_json::from_str(&encode_set_brightness(f64::NAN).unwrap()).unwrap();

        assert_eq!(high["brightness"], 1.0);
        assert_eq!(low["brightness"], 0.0);
        assert_eq!(nan["brightness"], 0.0);
    }

    #[test]
    fn next_program_frame_matches_wire_format() {
        let frame = serde_json::to_string(&NextProgram {
            next_program: true,
            save: false,
        })
        .unwrap();
        assert_eq!(frame, r#"{"nextProgram":true,"save":false}"#);
    }

    #[test]
    fn get_config_request_shape() {
        let frame = serde_json::to_string(&GetConfig { get_config: true }).unwrap();
        assert_eq!(frame, r#"{"getConfig":true}"#);
    }

    #[test]
    fn config_frame_is_recognised() {
        let frame = classify_text(
            r#"{"name":"porch","brightness":0.25,"maxBrightness":100,"pixelCount":150}"#,
        );
        assert_eq!(
            frame,
            Frame::Config(DeviceState {
                brightness: 0.25,
                name: Some("porch".into()),
            })
        );
    }

    #[test]
    fn stats_and_garbage_are_other() {
        assert_eq!(classify_text(r#"{"fps":59.8,"vmerr":0}"#), Frame::Other);
        assert_eq!(classify_text("not json at all"), Frame::Other);
        assert_eq!(classify_text(r#"{"brightness":"loud"}"#), Frame::Other);
    }

    #[test]
    fn zero_brightness_reads_as_off() {
        let off = DeviceState {
            brightness: 0.0,
            name: None,
        };
        let on = DeviceState {
            brightness: 0.01,
            name: None,
        };
        assert!(!off.is_on());
        assert!(on.is_on());
    }
}

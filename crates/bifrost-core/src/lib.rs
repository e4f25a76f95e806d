//! Command routing and device-state bridge between an MQTT bus and LED
//! effect controllers.
//!
//! - **[`Router`]**: pure mapping from `(topic, payload)` to
//!   `(controller name, Action)`. `bifrost/{name}/{on|off|up|down}` plus,
//!   when switches are bound, Hue dimmer `hue/{switch}/buttonevent` codes.
//!
//! - **[`ControllerHandle`]**: one background task per controller owns
//!   the WebSocket session and the last known [`ControllerState`]. It
//!   reconnects with backoff.
//!
//! - **[`DeviceRegistry`]**: lazily creates at most one handle per
//!   configured controller name.
//!
//! - **[`BusListener`]**: MQTT subscription with reconnect and
//!   resubscribe; forwards raw messages over a channel.
//!
//! - **[`Bridge`]**: wires the listener to the router and registry, then
//!   runs the bounded graceful shutdown.

pub mod config;
pub mod error;
pub mod handle;
pub mod listener;
pub mod model;
pub mod registry;
pub mod router;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bifrost_api::ReconnectConfig;
pub use config::{BridgeConfig, ControllerConfig, MqttConfig};
pub use error::CoreError;
pub use handle::{ControllerHandle, HandleOptions};
pub use listener::{BusListener, BusMessage};
pub use model::{Action, ConnectionState, ControllerState};
pub use registry::DeviceRegistry;
pub use router::{DispatchOutcome, RouteError, Router, dispatch, route};
pub use supervisor::Bridge;

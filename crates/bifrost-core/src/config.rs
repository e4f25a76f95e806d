// ── Runtime bridge configuration ──
//
// These types describe *what* the bridge talks to: the broker, the
// controllers, and the switch bindings. They are plain data, built once
// by `bifrost-config` and never mutated. Core never reads config files.

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use bifrost_api::ReconnectConfig;

use crate::router::DEFAULT_STEP;

/// One addressable effect controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Logical name used in topics (`bifrost/{name}/on`). Unique.
    pub name: String,
    /// WebSocket endpoint, e.g. `ws://10.0.0.5:81`.
    pub address: Url,
    /// Level restored by `TurnOn` when the stored brightness is zero.
    pub default_brightness: Option<f64>,
}

/// How to reach the MQTT broker.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// MQTT client id. Reusing an id kicks the other session off the broker.
    pub client_id: String,
    /// Keepalive interval. Zero disables keepalive.
    pub keepalive: Duration,
    pub user: Option<String>,
    pub password: Option<SecretString>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: format!("bifrost-{}", uuid::Uuid::new_v4()),
            keepalive: Duration::from_secs(60),
            user: None,
            password: None,
        }
    }
}

/// Everything the [`Bridge`](crate::Bridge) needs to run.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub controllers: Vec<ControllerConfig>,
    /// Hue switch id -> controller name.
    pub switches: HashMap<String, String>,
    /// Brightness change applied by `up` / `down`.
    pub brightness_step: f64,
    /// Backoff policy shared by the bus and every controller.
    pub reconnect: ReconnectConfig,
    /// How long to wait for the controller's reply to a state query.
    pub query_timeout: Duration,
    /// Upper bound on draining in-flight commands at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            controllers: Vec::new(),
            switches: HashMap::new(),
            brightness_step: DEFAULT_STEP,
            reconnect: ReconnectConfig::default(),
            query_timeout: bifrost_api::pixelblaze::DEFAULT_QUERY_TIMEOUT,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

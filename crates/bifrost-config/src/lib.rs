//! Configuration for the bifrost bridge.
//!
//! A TOML or YAML document (picked by file extension) layered with
//! environment overrides, validated, then translated into
//! `bifrost_core::BridgeConfig`. Core never touches files or the
//! environment; everything it needs arrives through that struct.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml, Yaml},
};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use bifrost_api::ReconnectConfig;
use bifrost_api::pixelblaze::DEFAULT_PORT;
use bifrost_core::{BridgeConfig, ControllerConfig, MqttConfig};

/// Where `load_config` looks when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/bifrost.toml";

/// Prefix for structured overrides, e.g. `BIFROST_MQTT__HOST`.
pub const ENV_PREFIX: &str = "BIFROST_";

/// Unprefixed broker overrides still honoured for existing deployments.
const LEGACY_MQTT_ENV: [&str; 5] = [
    "MQTT_HOST",
    "MQTT_PORT",
    "MQTT_KEEPALIVE",
    "MQTT_USER",
    "MQTT_PASSWORD",
];

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unsupported config format '{extension}' (expected .toml, .yaml or .yml)")]
    UnsupportedFormat { extension: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Document structs ────────────────────────────────────────────────

/// Top-level configuration document.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Brightness change applied by `up` / `down`.
    #[serde(default = "default_step")]
    pub brightness_step: f64,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// How long to wait for a controller to answer a state query.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    #[serde(default)]
    pub mqtt: MqttSettings,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    #[serde(default)]
    pub controllers: Vec<ControllerEntry>,

    /// Hue switch id -> controller name.
    #[serde(default)]
    pub switches: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MqttSettings {
    pub host: Option<String>,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Seconds. Zero disables keepalive.
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,

    /// Random `bifrost-<uuid>` when omitted.
    pub client_id: Option<String>,

    pub user: Option<String>,

    pub password: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

/// One `[[controllers]]` entry.
#[derive(Debug, Deserialize)]
pub struct ControllerEntry {
    pub name: String,

    /// `host:port` (ws:// implied) or a full `ws://` / `wss://` URI.
    pub address: String,

    pub default_brightness: Option<f64>,
}

fn default_step() -> f64 {
    bifrost_core::router::DEFAULT_STEP
}
fn default_shutdown_timeout() -> u64 {
    5
}
fn default_query_timeout() -> u64 {
    5
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_keepalive() -> u64 {
    60
}
fn default_initial_delay() -> u64 {
    1_000
}
fn default_max_delay() -> u64 {
    30_000
}

// ── Loading ─────────────────────────────────────────────────────────

/// Document format, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Yaml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match extension.as_str() {
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(ConfigError::UnsupportedFormat { extension }),
        }
    }
}

/// Load a document from `path`, apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let format = DocumentFormat::from_path(path)?;
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;

    let figment = with_env(document(&contents, format));
    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Parse a document without consulting the environment.
pub fn parse_config(contents: &str, format: DocumentFormat) -> Result<Config, ConfigError> {
    let config: Config = document(contents, format).extract()?;
    config.validate()?;
    Ok(config)
}

/// Load, validate and translate in one step.
pub fn load_bridge_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    load_config(path)?.into_bridge_config()
}

fn document(contents: &str, format: DocumentFormat) -> Figment {
    match format {
        DocumentFormat::Toml => Figment::from(Toml::string(contents)),
        DocumentFormat::Yaml => Figment::from(Yaml::string(contents)),
    }
}

fn with_env(figment: Figment) -> Figment {
    figment
        .merge(
            Env::raw()
                .only(&LEGACY_MQTT_ENV)
                .map(|key| key.as_str().to_ascii_lowercase().replacen("mqtt_", "mqtt.", 1).into()),
        )
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

// ── Validation ──────────────────────────────────────────────────────

impl Config {
    /// Reject documents the bridge could not run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.brightness_step > 0.0 && self.brightness_step <= 1.0) {
            return Err(invalid(
                "brightness_step",
                format!("must be in (0, 1], got {}", self.brightness_step),
            ));
        }

        match self.mqtt.host.as_deref().map(str::trim) {
            None | Some("") => return Err(invalid("mqtt.host", "an MQTT broker host is required")),
            Some(_) => {}
        }

        if self.query_timeout_secs == 0 {
            return Err(invalid("query_timeout_secs", "must be greater than zero"));
        }

        if self.reconnect.initial_delay_ms == 0 {
            return Err(invalid("reconnect.initial_delay_ms", "must be greater than zero"));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(invalid(
                "reconnect.max_delay_ms",
                "must not be smaller than initial_delay_ms",
            ));
        }

        if self.controllers.is_empty() {
            return Err(invalid("controllers", "at least one controller is required"));
        }

        let mut seen = HashSet::new();
        for (index, controller) in self.controllers.iter().enumerate() {
            let field = format!("controllers[{index}]");
            validate_name(&field, &controller.name)?;
            if !seen.insert(controller.name.as_str()) {
                return Err(invalid(
                    format!("{field}.name"),
                    format!("duplicate controller name '{}'", controller.name),
                ));
            }
            parse_address(&controller.address)
                .map_err(|reason| invalid(format!("{field}.address"), reason))?;
            if let Some(level) = controller.default_brightness {
                if !(0.0..=1.0).contains(&level) {
                    return Err(invalid(
                        format!("{field}.default_brightness"),
                        format!("must be in [0, 1], got {level}"),
                    ));
                }
            }
        }

        for (switch, target) in &self.switches {
            if !seen.contains(target.as_str()) {
                return Err(invalid(
                    format!("switches.{switch}"),
                    format!("bound to unknown controller '{target}'"),
                ));
            }
        }

        Ok(())
    }

    /// Translate into the runtime config. Validates first.
    pub fn into_bridge_config(self) -> Result<BridgeConfig, ConfigError> {
        self.validate()?;

        let controllers = self
            .controllers
            .into_iter()
            .map(|entry| {
                let address = parse_address(&entry.address)
                    .map_err(|reason| invalid("controllers.address", reason))?;
                Ok(ControllerConfig {
                    name: entry.name,
                    address,
                    default_brightness: entry.default_brightness,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let defaults = MqttConfig::default();
        let mqtt = MqttConfig {
            host: self.mqtt.host.unwrap_or(defaults.host),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.unwrap_or(defaults.client_id),
            keepalive: Duration::from_secs(self.mqtt.keepalive),
            user: self.mqtt.user,
            password: self.mqtt.password,
        };

        Ok(BridgeConfig {
            mqtt,
            controllers,
            switches: self.switches,
            brightness_step: self.brightness_step,
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            },
            query_timeout: Duration::from_secs(self.query_timeout_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        })
    }
}

/// Names become topic segments, so MQTT wildcards and separators are out.
fn validate_name(field: &str, name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(invalid(format!("{field}.name"), "must not be empty"));
    }
    if name.contains(['/', '+', '#']) {
        return Err(invalid(
            format!("{field}.name"),
            format!("'{name}' must not contain '/', '+' or '#'"),
        ));
    }
    Ok(())
}

/// Parse a controller address.
///
/// Bare `host` or `host:port` implies `ws://` and the controller's default
/// port; anything with a scheme must be `ws` or `wss`.
pub fn parse_address(address: &str) -> Result<Url, String> {
    let address = address.trim();
    if address.is_empty() {
        return Err("address is empty".into());
    }

    let url = if address.contains("://") {
        let url = Url::parse(address).map_err(|e| format!("'{address}': {e}"))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(format!(
                "'{address}': scheme must be ws or wss, got '{}'",
                url.scheme()
            ));
        }
        url
    } else {
        let mut url =
            Url::parse(&format!("ws://{address}")).map_err(|e| format!("'{address}': {e}"))?;
        if !address.contains(':') {
            url.set_port(Some(DEFAULT_PORT))
                .map_err(|()| format!("'{address}': cannot set port"))?;
        }
        url
    };

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(format!("'{address}': missing host")),
    }
}

// ── Command routing ──
//
// Turns an inbound bus message into `(controller name, Action)`.
// `Router::route` is pure; `dispatch` is the one place that couples it to
// the registry and decides how each failure is logged.

use std::collections::HashMap;
use std::str::FromStr;

use strum::EnumString;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::model::Action;
use crate::registry::DeviceRegistry;

/// First topic segment of every bridge command.
pub const TOPIC_PREFIX: &str = "bifrost";

/// Wildcard subscription covering every bridge command.
pub const COMMAND_SUBSCRIPTION: &str = "bifrost/#";

/// Subscription for Hue dimmer switch events, used when switches are bound.
pub const HUE_SUBSCRIPTION: &str = "hue/+/buttonevent";

/// Brightness change applied by `up` / `down` unless configured otherwise.
pub const DEFAULT_STEP: f64 = 0.2;

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("malformed topic '{topic}': {reason}")]
    Malformed { topic: String, reason: &'static str },

    #[error("switch '{switch}' is not bound to a controller")]
    UnboundSwitch { switch: String },

    #[error("button event {code} on switch '{switch}' has no action")]
    Ignored { switch: String, code: String },
}

fn malformed(topic: &str, reason: &'static str) -> RouteError {
    RouteError::Malformed {
        topic: topic.to_owned(),
        reason,
    }
}

// ── Verbs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
enum Verb {
    On,
    Off,
    Up,
    Down,
}

// ── Hue button events ────────────────────────────────────────────────

/// What the user did with a Hue dimmer button. The numeric value is the
/// last digit of the event code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interaction {
    Press,
    Hold,
    Click,
    LongRelease,
}

impl Interaction {
    fn from_digit(digit: u32) -> Option<Self> {
        match digit {
            0 => Some(Self::Press),
            1 => Some(Self::Hold),
            2 => Some(Self::Click),
            3 => Some(Self::LongRelease),
            _ => None,
        }
    }
}

/// A decoded `hue/{switch}/buttonevent` payload such as `"2001"`:
/// first digit is the button (1 = on or next pattern, 2 = brighter,
/// 3 = dimmer, 4 = off), last digit the interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ButtonEvent {
    button: u32,
    interaction: Interaction,
}

impl ButtonEvent {
    fn parse(payload: &[u8]) -> Option<Self> {
        let code = std::str::from_utf8(payload).ok()?.trim();
        if code.len() != 4 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let mut digits = code.chars().filter_map(|c| c.to_digit(10));
        let button = digits.next()?;
        let interaction = Interaction::from_digit(digits.last()?)?;
        (1..=4)
            .contains(&button)
            .then_some(Self {
                button,
                interaction,
            })
    }

    fn action(self, step: f64) -> Option<Action> {
        use Interaction::{Click, Hold};
        match (self.button, self.interaction) {
            (1, Click) => Some(Action::TurnOnOrCycle),
            (2, Click | Hold) => Some(Action::BrightnessUp(step)),
            (3, Click | Hold) => Some(Action::BrightnessDown(step)),
            (4, Click) => Some(Action::TurnOff),
            _ => None,
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────

/// Maps topics to controller actions. Holds only immutable configuration.
#[derive(Debug, Clone)]
pub struct Router {
    step: f64,
    switches: HashMap<String, String>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(DEFAULT_STEP)
    }
}

impl Router {
    pub fn new(step: f64) -> Self {
        Self {
            step,
            switches: HashMap::new(),
        }
    }

    /// Bind Hue switch ids to controller names.
    pub fn with_switches(mut self, switches: HashMap<String, String>) -> Self {
        self.switches = switches;
        self
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.brightness_step).with_switches(config.switches.clone())
    }

    /// Topic filters the bus listener must subscribe to.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics = vec![COMMAND_SUBSCRIPTION.to_owned()];
        if !self.switches.is_empty() {
            topics.push(HUE_SUBSCRIPTION.to_owned());
        }
        topics
    }

    /// Route one message.
    ///
    /// `bifrost/{name}/{on|off|up|down}` ignores the payload. Hue switch
    /// events carry their meaning in the payload instead.
    pub fn route(&self, topic: &str, payload: &[u8]) -> Result<(String, Action), RouteError> {
        let segments: Vec<&str> = topic.split('/').collect();

        match segments.as_slice() {
            [TOPIC_PREFIX, name, verb] => {
                if name.is_empty() {
                    return Err(malformed(topic, "empty controller name"));
                }
                let verb = Verb::from_str(verb).map_err(|_| malformed(topic, "unknown verb"))?;
                let action = match verb {
                    Verb::On => Action::TurnOn,
                    Verb::Off => Action::TurnOff,
                    Verb::Up => Action::BrightnessUp(self.step),
                    Verb::Down => Action::BrightnessDown(self.step),
                };
                Ok(((*name).to_owned(), action))
            }
            ["hue", switch, "buttonevent"] if !switch.is_empty() => {
                self.route_button(topic, switch, payload)
            }
            [TOPIC_PREFIX, ..] => Err(malformed(topic, "expected bifrost/{name}/{verb}")),
            _ => Err(malformed(topic, "unrecognised topic")),
        }
    }

    fn route_button(
        &self,
        topic: &str,
        switch: &str,
        payload: &[u8],
    ) -> Result<(String, Action), RouteError> {
        let controller = self
            .switches
            .get(switch)
            .ok_or_else(|| RouteError::UnboundSwitch {
                switch: switch.to_owned(),
            })?;

        let event = ButtonEvent::parse(payload)
            .ok_or_else(|| malformed(topic, "button event payload is not a 4-digit code"))?;

        let action = event.action(self.step).ok_or_else(|| RouteError::Ignored {
            switch: switch.to_owned(),
            code: String::from_utf8_lossy(payload).trim().to_owned(),
        })?;

        Ok((controller.clone(), action))
    }
}

/// Route with the default step and no switch bindings.
pub fn route(topic: &str, payload: &[u8]) -> Result<(String, Action), RouteError> {
    Router::default().route(topic, payload)
}

// ── Dispatch ─────────────────────────────────────────────────────────

/// What happened to one bus message.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Handed to the controller's task.
    Applied { controller: String, action: Action },
    /// The message created the controller's handle; the action runs once
    /// the first connection opens.
    Deferred { controller: String, action: Action },
    /// Controller exists but is not connected; the command was discarded.
    Dropped { controller: String, action: Action },
    /// The message could not be routed or names no configured controller.
    Rejected(CoreError),
}

/// Route a message and hand the action to its controller.
///
/// Never fails: every problem is logged here and reported in the outcome,
/// so one bad message cannot stop the caller's loop.
pub fn dispatch(
    router: &Router,
    registry: &DeviceRegistry,
    topic: &str,
    payload: &[u8],
) -> DispatchOutcome {
    let (name, action) = match router.route(topic, payload) {
        Ok(routed) => routed,
        Err(RouteError::Ignored { switch, code }) => {
            debug!(switch = %switch, code = %code, "ignoring button event");
            return DispatchOutcome::Rejected(RouteError::Ignored { switch, code }.into());
        }
        Err(e) => {
            warn!(topic, error = %e, "dropping message");
            return DispatchOutcome::Rejected(e.into());
        }
    };

    let handle = match registry.get_or_create_with(&name, Some(action)) {
        Ok((_, true)) => {
            debug!(controller = %name, ?action, "command deferred until connected");
            return DispatchOutcome::Deferred {
                controller: name,
                action,
            };
        }
        Ok((handle, false)) => handle,
        Err(e) => {
            warn!(topic, controller = %name, error = %e, "dropping message");
            return DispatchOutcome::Rejected(e);
        }
    };

    if handle.apply(action) {
        debug!(controller = %name, ?action, "command dispatched");
        DispatchOutcome::Applied {
            controller: name,
            action,
        }
    } else {
        DispatchOutcome::Dropped {
            controller: name,
            action,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn routed(name: &str, action: Action) -> Result<(String, Action), RouteError> {
        Ok((name.to_owned(), action))
    }

    fn is_malformed(result: &Result<(String, Action), RouteError>) -> bool {
        matches!(result, Err(RouteError::Malformed { .. }))
    }

    fn hue_router() -> Router {
        Router::new(0.1).with_switches(HashMap::from([("hallway".to_owned(), "lamp".to_owned())]))
    }

    #[test]
    fn known_verbs_route_exactly() {
        assert_eq!(route("bifrost/lamp/on", b""), routed("lamp", Action::TurnOn));
        assert_eq!(route("bifrost/lamp/off", b""), routed("lamp", Action::TurnOff));
        assert_eq!(
            route("bifrost/lamp/up", b""),
            routed("lamp", Action::BrightnessUp(DEFAULT_STEP))
        );
        assert_eq!(
            route("bifrost/lamp/down", b""),
            routed("lamp", Action::BrightnessDown(DEFAULT_STEP))
        );
    }

    #[test]
    fn configured_step_is_used() {
        let router = Router::new(0.05);
        assert_eq!(
            router.route("bifrost/porch/up", b""),
            routed("porch", Action::BrightnessUp(0.05))
        );
    }

    #[test]
    fn payload_is_ignored_for_commands() {
        assert_eq!(
            route("bifrost/lamp/on", b"\xff\xfe garbage"),
            routed("lamp", Action::TurnOn)
        );
    }

    #[test]
    fn names_keep_their_exact_spelling() {
        assert_eq!(
            route("bifrost/Living-Room_2/off", b""),
            routed("Living-Room_2", Action::TurnOff)
        );
    }

    #[test]
    fn unknown_verb_is_malformed() {
        assert!(is_malformed(&route("bifrost/lamp/sideways", b"")));
        assert!(is_malformed(&route("bifrost/lamp/ON", b"")));
        assert!(is_malformed(&route("bifrost/lamp/", b"")));
    }

    #[test]
    fn missing_or_extra_segments_are_malformed() {
        for topic in [
            "",
            "bifrost",
            "bifrost/",
            "bifrost/lamp",
            "bifrost//on",
            "bifrost/lamp/on/extra",
            "/bifrost/lamp/on",
            "other/lamp/on",
        ] {
            assert!(is_malformed(&route(topic, b"")), "{topic:?} should be malformed");
        }
    }

    #[test]
    fn malformed_error_names_the_topic() {
        let err = route("bifrost/lamp/sideways", b"").unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed topic 'bifrost/lamp/sideways': unknown verb"
        );
    }

    #[test]
    fn subscriptions_include_hue_only_when_bound() {
        assert_eq!(Router::default().subscriptions(), vec!["bifrost/#"]);
        assert_eq!(
            hue_router().subscriptions(),
            vec!["bifrost/#", "hue/+/buttonevent"]
        );
    }

    #[test]
    fn hue_buttons_map_to_actions() {
        let router = hue_router();
        let topic = "hue/hallway/buttonevent";

        assert_eq!(
            router.route(topic, b"1002"),
            routed("lamp", Action::TurnOnOrCycle)
        );
        assert_eq!(
            router.route(topic, b"2001"),
            routed("lamp", Action::BrightnessUp(0.1))
        );
        assert_eq!(
            router.route(topic, b"2002"),
            routed("lamp", Action::BrightnessUp(0.1))
        );
        assert_eq!(
            router.route(topic, b"3001"),
            routed("lamp", Action::BrightnessDown(0.1))
        );
        assert_eq!(router.route(topic, b"4002"), routed("lamp", Action::TurnOff));
    }

    #[test]
    fn hue_press_and_release_are_ignored() {
        let router = hue_router();
        for code in ["1000", "1003", "4001", "2003"] {
            let result = router.route("hue/hallway/buttonevent", code.as_bytes());
            assert!(
                matches!(result, Err(RouteError::Ignored { .. })),
                "{code} should be ignored, got {result:?}"
            );
        }
    }

    #[test]
    fn hue_bad_payloads_are_malformed() {
        let router = hue_router();
        for payload in [&b""[..], b"12", b"abcd", b"5002", b"1009", b"10020"] {
            assert!(is_malformed(&router.route("hue/hallway/buttonevent", payload)));
        }
    }

    #[test]
    fn hue_unbound_switch_is_reported() {
        let result = hue_router().route("hue/kitchen/buttonevent", b"1002");
        assert_eq!(
            result,
            Err(RouteError::UnboundSwitch {
                switch: "kitchen".into()
            })
        );
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    fn unreachable_registry() -> DeviceRegistry {
        DeviceRegistry::new(
            vec![crate::ControllerConfig {
                name: "lamp".into(),
                address: "ws://127.0.0.1:9".parse().unwrap(),
                default_brightness: None,
            }],
            crate::HandleOptions::default(),
        )
    }

    #[tokio::test]
    async fn dispatch_rejects_without_creating_handles() {
        let registry = unreachable_registry();
        let router = Router::default();

        let unknown = dispatch(&router, &registry, "bifrost/attic/on", b"");
        let sideways = dispatch(&router, &registry, "bifrost/lamp/sideways", b"");

        assert!(matches!(
            unknown,
            DispatchOutcome::Rejected(CoreError::UnknownDevice { .. })
        ));
        assert!(matches!(
            sideways,
            DispatchOutcome::Rejected(CoreError::Route(RouteError::Malformed { .. }))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dispatch_defers_first_command_then_drops_while_offline() {
        let registry = unreachable_registry();
        let router = Router::default();

        let first = dispatch(&router, &registry, "bifrost/lamp/on", b"");
        let second = dispatch(&router, &registry, "bifrost/lamp/up", b"");

        assert!(matches!(
            first,
            DispatchOutcome::Deferred { ref controller, action: Action::TurnOn }
                if controller == "lamp"
        ));
        assert!(matches!(second, DispatchOutcome::Dropped { .. }));
        assert_eq!(registry.len(), 1);
        registry.shutdown(std::time::Duration::from_secs(1)).await;
    }
}

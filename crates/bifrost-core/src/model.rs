// ── Domain model ──
//
// Actions flow from the router to a controller handle; the handle folds
// them into its `ControllerState`. All brightness arithmetic lives here so
// clamping is enforced in exactly one place.

use strum::Display;

/// Resolution brightness values are rounded to. Keeps repeated `up`/`down`
/// steps from accumulating float error (0.1 + 0.2 != 0.3).
const BRIGHTNESS_RESOLUTION: f64 = 1000.0;

/// One discrete command for a controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    TurnOn,
    /// Hue "I" button: turn on when dark, otherwise advance the controller
    /// to its next pattern.
    TurnOnOrCycle,
    TurnOff,
    BrightnessUp(f64),
    BrightnessDown(f64),
}

/// Connection lifecycle of the bus or a controller.
///
/// Written only by the task that owns the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Last known output state of one controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerState {
    pub on: bool,
    /// Stored level, kept while the output is off so `TurnOn` can restore it.
    pub brightness: f64,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            on: false,
            brightness: 0.0,
        }
    }
}

impl ControllerState {
    /// Initial state for a fresh handle: off, at the configured default.
    pub fn initial(default_brightness: Option<f64>) -> Self {
        Self {
            on: false,
            brightness: default_brightness.map_or(0.0, clamp_brightness),
        }
    }

    /// Fold an action into the state.
    ///
    /// `TurnOn` at zero brightness restores `default_brightness` when one
    /// is configured. `TurnOnOrCycle` on a lit controller changes the
    /// pattern, not the state. Brightness steps saturate at both ends and
    /// leave the on/off flag alone.
    pub fn apply(self, action: Action, default_brightness: Option<f64>) -> Self {
        match action {
            Action::TurnOnOrCycle if self.is_lit() => self,
            Action::TurnOn | Action::TurnOnOrCycle => {
                let brightness = match default_brightness {
                    Some(default) if self.brightness <= 0.0 => clamp_brightness(default),
                    _ => self.brightness,
                };
                Self {
                    on: true,
                    brightness,
                }
            }
            Action::TurnOff => Self { on: false, ..self },
            Action::BrightnessUp(step) => Self {
                brightness: clamp_brightness(self.brightness + step.abs()),
                ..self
            },
            Action::BrightnessDown(step) => Self {
                brightness: clamp_brightness(self.brightness - step.abs()),
                ..self
            },
        }
    }

    /// Adopt what the controller reports after (re)connecting.
    ///
    /// A lit controller tells us both flags; a dark one only tells us it is
    /// off, so the stored level survives.
    pub fn resync(self, device_brightness: f64) -> Self {
        let level = clamp_brightness(device_brightness);
        if level > 0.0 {
            Self {
                on: true,
                brightness: level,
            }
        } else {
            Self { on: false, ..self }
        }
    }

    /// The level the controller should actually display.
    pub fn output_level(&self) -> f64 {
        if self.on { self.brightness } else { 0.0 }
    }

    pub fn is_lit(&self) -> bool {
        self.output_level() > 0.0
    }
}

/// Clamp to `0.0..=1.0` and round to the working resolution. NaN is 0.
pub fn clamp_brightness(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    (value.clamp(0.0, 1.0) * BRIGHTNESS_RESOLUTION).round() / BRIGHTNESS_RESOLUTION
}

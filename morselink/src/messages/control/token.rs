use serde::{Deserialize, Serialize};
use strum_macros::{EnumString, IntoStaticStr};

/// Field unit is able to capture, sent as the state token.
pub const READY: u8 = b'R';
/// Field unit is too dark to capture, sent as the state token.
pub const NO_LIGHT: u8 = b'N';
/// The button fired since the previous iteration.
pub const BUTTON_PUSHED: u8 = b'B';
/// Filler byte for acknowledgements, "button not pressed" and "continue".
pub const IDLE: u8 = b'z';
/// Station request that paces the button token.
pub const REQUEST: u8 = b'c';
/// Station command ending the session.
pub const QUIT: u8 = b'q';
/// Station command announcing a resolution descriptor follows.
pub const CHANGE_RESOLUTION: u8 = b'r';

/// Raw ADC readings above this mean the light is too low (the sensor is a
/// light dependent resistor, high resistance is darkness).
pub const LIGHT_THRESHOLD: f64 = 1000.0;

/// Control state of the field unit, computed from the luminosity reading
/// every iteration of the primary loop.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, EnumString, IntoStaticStr,
)]
pub enum ControlState {
    /// Enough light to capture and transfer a frame.
    #[default]
    Ready,
    /// Too dark; the iteration skips capture entirely.
    NoLight,
}

impl ControlState {
    /// Apply one luminosity sample to the current state.
    ///
    /// A reading above the threshold moves to `NoLight`, a reading strictly
    /// between zero and the threshold moves to `Ready`. Anything else (zero,
    /// negative, exactly the threshold, NaN) leaves the state as it was.
    ///
    /// * `reading`: raw ADC value from the light sensor.
    pub fn next(self, reading: f64) -> Self {
        if reading > LIGHT_THRESHOLD {
            ControlState::NoLight
        } else if reading > 0.0 && reading < LIGHT_THRESHOLD {
            ControlState::Ready
        } else {
            self
        }
    }

    /// Wire token for the state.
    pub fn token(self) -> u8 {
        match self {
            ControlState::Ready => READY,
            ControlState::NoLight => NO_LIGHT,
        }
    }

    /// Interpret a state token received by the station. Only `R` denotes
    /// ready; any other byte is treated as no light.
    pub fn from_token(token: u8) -> Self {
        if token == READY {
            ControlState::Ready
        } else {
            ControlState::NoLight
        }
    }
}

/// Per-iteration command the station sends at the end of a ready iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// End the session gracefully.
    Quit,
    /// A resolution descriptor follows.
    ChangeResolution,
    /// Any other byte.
    Continue,
}

impl Command {
    /// Decode a command token, unknown bytes continue the loop.
    pub fn from_token(token: u8) -> Self {
        match token {
            QUIT => Command::Quit,
            CHANGE_RESOLUTION => Command::ChangeResolution,
            _ => Command::Continue,
        }
    }

    /// Wire token for the command.
    pub fn token(self) -> u8 {
        match self {
            Command::Quit => QUIT,
            Command::ChangeResolution => CHANGE_RESOLUTION,
            Command::Continue => IDLE,
        }
    }
}

/// True when a button token signals a press.
pub fn is_button_pushed(token: u8) -> bool {
    token == BUTTON_PUSHED
}

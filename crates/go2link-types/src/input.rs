//! Operator input snapshot produced by the gamepad poller.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Digital buttons on an Xbox-layout controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Button {
    A,
    B,
    X,
    Y,
    LeftBumper,
    RightBumper,
    Back,
    Start,
    Guide,
    LeftStick,
    RightStick,
}

impl Button {
    /// Every button, in raw-index order of the common Xbox layout.
    pub const ALL: [Button; 11] = [
        Button::A,
        Button::B,
        Button::X,
        Button::Y,
        Button::LeftBumper,
        Button::RightBumper,
        Button::Back,
        Button::Start,
        Button::Guide,
        Button::LeftStick,
        Button::RightStick,
    ];

    /// Short label used in logs and the CLI.
    pub fn label(self) -> &'static str {
        match self {
            Button::A => "A",
            Button::B => "B",
            Button::X => "X",
            Button::Y => "Y",
            Button::LeftBumper => "LB",
            Button::RightBumper => "RB",
            Button::Back => "BACK",
            Button::Start => "START",
            Button::Guide => "GUIDE",
            Button::LeftStick => "LS",
            Button::RightStick => "RS",
        }
    }
}

/// Direction reported by the controller's D-pad (hat 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DpadDirection {
    #[default]
    None,
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
}

impl DpadDirection {
    /// Convert a raw hat value (`x` right-positive, `y` up-positive) into a
    /// direction.
    pub fn from_hat(x: i8, y: i8) -> Self {
        match (x.signum(), y.signum()) {
            (0, 1) => DpadDirection::Up,
            (0, -1) => DpadDirection::Down,
            (-1, 0) => DpadDirection::Left,
            (1, 0) => DpadDirection::Right,
            (-1, 1) => DpadDirection::UpLeft,
            (1, 1) => DpadDirection::UpRight,
            (-1, -1) => DpadDirection::DownLeft,
            (1, -1) => DpadDirection::DownRight,
            _ => DpadDirection::None,
        }
    }
}

/// A deadzone-shaped analog stick. Both axes lie in `[-1, 1]`; `y` is
/// positive when the stick is pulled towards the operator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Stick {
    pub x: f64,
    pub y: f64,
}

/// Immutable snapshot of the controller, rebuilt on every poll.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputState {
    pub connected: bool,
    pub device_name: String,
    pub left_stick: Stick,
    pub right_stick: Stick,
    /// `[0, 1]`
    pub left_trigger: f64,
    /// `[0, 1]`
    pub right_trigger: f64,
    pub pressed: BTreeSet<Button>,
    pub dpad: DpadDirection,
}

impl InputState {
    /// Snapshot reported while no device is attached.
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.pressed.contains(&button)
    }
}

/// Edge-triggered button transition. Held buttons never produce events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonEvent {
    pub button: Button,
    /// `true` on the press edge, `false` on the release edge.
    pub pressed: bool,
}

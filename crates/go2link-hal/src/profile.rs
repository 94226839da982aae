//! Per-controller axis and button layouts.
//!
//! Controllers disagree on where the right stick and triggers live in the
//! raw axis list. Guessing from the axis count alone can read the same
//! physical axis twice, so every layout is an explicit [`DeviceProfile`] and
//! selection goes through [`DeviceProfile::resolve`]:
//!
//! | Profile | Sticks (LX, LY, RX, RY) | Triggers (LT, RT) | Selected when |
//! |---|---|---|---|
//! | [`XBOX_LINUX`] | 0, 1, 3, 4 | 2, 5 bipolar | name matches Xbox on Linux (xpad) |
//! | [`XBOX_SDL`] | 0, 1, 2, 3 | 4, 5 bipolar | name matches Xbox elsewhere, or ≥ 6 axes |
//! | [`GENERIC_4AXIS`] | 0, 1, 2, 3 | none | anything else |
//! | [`STANDARD`] | 0, 1, 2, 3 | 4, 5 unipolar | backend supplies it as a hint |

use go2link_types::{Button, DpadDirection, InputState, Stick};

use crate::gamepad::{DeviceInfo, RawSnapshot};
use crate::input::apply_deadzone;

/// How a trigger axis encodes "released" and "fully pressed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEncoding {
    /// `-1` released, `+1` pressed.
    Bipolar,
    /// `0` released, `1` pressed.
    Unipolar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerAxes {
    pub left: usize,
    pub right: usize,
    pub encoding: TriggerEncoding,
}

/// Raw-index layout of one controller family.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: &'static str,
    /// Lower-case substrings matched against the device's declared name.
    pub name_patterns: &'static [&'static str],
    pub left_stick: (usize, usize),
    pub right_stick: (usize, usize),
    pub triggers: Option<TriggerAxes>,
    pub buttons: &'static [(Button, usize)],
}

const XBOX_BUTTONS: &[(Button, usize)] = &[
    (Button::A, 0),
    (Button::B, 1),
    (Button::X, 2),
    (Button::Y, 3),
    (Button::LeftBumper, 4),
    (Button::RightBumper, 5),
    (Button::Back, 6),
    (Button::Start, 7),
    (Button::Guide, 8),
    (Button::LeftStick, 9),
    (Button::RightStick, 10),
];

const XBOX_NAMES: &[&str] = &["xbox", "x-box", "xinput"];

pub static XBOX_LINUX: DeviceProfile = DeviceProfile {
    name: "xbox-linux",
    name_patterns: XBOX_NAMES,
    left_stick: (0, 1),
    right_stick: (3, 4),
    triggers: Some(TriggerAxes {
        left: 2,
        right: 5,
        encoding: TriggerEncoding::Bipolar,
    }),
    buttons: XBOX_BUTTONS,
};

pub static XBOX_SDL: DeviceProfile = DeviceProfile {
    name: "xbox-sdl",
    name_patterns: XBOX_NAMES,
    left_stick: (0, 1),
    right_stick: (2, 3),
    triggers: Some(TriggerAxes {
        left: 4,
        right: 5,
        encoding: TriggerEncoding::Bipolar,
    }),
    buttons: XBOX_BUTTONS,
};

pub static GENERIC_4AXIS: DeviceProfile = DeviceProfile {
    name: "generic-4axis",
    name_patterns: &[],
    left_stick: (0, 1),
    right_stick: (2, 3),
    triggers: None,
    buttons: XBOX_BUTTONS,
};

/// Canonical layout produced by backends that normalise devices themselves.
/// Buttons follow [`Button::ALL`] order.
pub static STANDARD: DeviceProfile = DeviceProfile {
    name: "standard",
    name_patterns: &[],
    left_stick: (0, 1),
    right_stick: (2, 3),
    triggers: Some(TriggerAxes {
        left: 4,
        right: 5,
        encoding: TriggerEncoding::Unipolar,
    }),
    buttons: XBOX_BUTTONS,
};

#[cfg(target_os = "linux")]
static NAMED_PROFILES: &[&DeviceProfile] = &[&XBOX_LINUX];
#[cfg(not(target_os = "linux"))]
static NAMED_PROFILES: &[&DeviceProfile] = &[&XBOX_SDL];

/// Minimum axis count for the trigger-capable fallback.
const TRIGGER_FALLBACK_AXES: usize = 6;

impl DeviceProfile {
    /// Pick the profile for `info`.
    ///
    /// A backend hint wins, then a name match against the platform's named
    /// profiles, then the axis-count fallback.
    pub fn resolve(info: &DeviceInfo) -> &'static DeviceProfile {
        if let Some(hint) = info.profile_hint {
            return hint;
        }
        let lower = info.name.to_lowercase();
        if let Some(p) = NAMED_PROFILES
            .iter()
            .find(|p| p.name_patterns.iter().any(|pat| lower.contains(pat)))
        {
            return p;
        }
        if info.axis_count >= TRIGGER_FALLBACK_AXES {
            &XBOX_SDL
        } else {
            &GENERIC_4AXIS
        }
    }

    /// Shape a raw reading into an [`InputState`].
    ///
    /// Sticks go through the deadzone; triggers are mapped to `[0, 1]`.
    /// Indices beyond what the device reports read as neutral.
    pub fn decode(&self, device_name: &str, raw: &RawSnapshot, deadzone: f64) -> InputState {
        let axis = |i: usize| raw.axes.get(i).copied().unwrap_or(0.0);
        let stick = |(x, y): (usize, usize)| Stick {
            x: apply_deadzone(axis(x), deadzone),
            y: apply_deadzone(axis(y), deadzone),
        };
        let trigger = |i: usize, enc: TriggerEncoding| {
            let Some(&v) = raw.axes.get(i) else {
                return 0.0;
            };
            let v = match enc {
                TriggerEncoding::Bipolar => (v + 1.0) / 2.0,
                TriggerEncoding::Unipolar => v,
            };
            v.clamp(0.0, 1.0)
        };
        let (left_trigger, right_trigger) = match self.triggers {
            Some(t) => (trigger(t.left, t.encoding), trigger(t.right, t.encoding)),
            None => (0.0, 0.0),
        };
        let pressed = self
            .buttons
            .iter()
            .filter(|(_, idx)| raw.buttons.get(*idx).copied().unwrap_or(false))
            .map(|(b, _)| *b)
            .collect();

        InputState {
            connected: true,
            device_name: device_name.to_string(),
            left_stick: stick(self.left_stick),
            right_stick: stick(self.right_stick),
            left_trigger,
            right_trigger,
            pressed,
            dpad: DpadDirection::from_hat(raw.hat.0, raw.hat.1),
        }
    }

    /// Every raw axis index this profile reads.
    pub fn axis_indices(&self) -> Vec<usize> {
        let mut v = vec![self.left_stick.0, self.left_stick.1, self.right_stick.0, self.right_stick.1];
        if let Some(t) = self.triggers {
            v.push(t.left);
            v.push(t.right);
        }
        v
    }
}

//! `gilrs`-backed [`GamepadBackend`].
//!
//! gilrs already normalises controllers to a standard layout, so the
//! snapshot is emitted in [`STANDARD`] order and handed over as a profile
//! hint. Stick Y axes are flipped so that pulling towards the operator is
//! positive, matching the raw convention of the other profiles.

use gilrs::{Axis, Button as GButton, GamepadId, Gilrs};

use go2link_types::{Button, DeviceError};

use crate::gamepad::{DeviceInfo, GamepadBackend, RawSnapshot};
use crate::profile::STANDARD;

const BUTTON_ORDER: [GButton; 11] = [
    GButton::South,
    GButton::East,
    GButton::West,
    GButton::North,
    GButton::LeftTrigger,
    GButton::RightTrigger,
    GButton::Select,
    GButton::Start,
    GButton::Mode,
    GButton::LeftThumb,
    GButton::RightThumb,
];

pub struct GilrsBackend {
    gilrs: Gilrs,
    active: Option<GamepadId>,
}

impl GilrsBackend {
    /// # Errors
    ///
    /// Returns [`DeviceError::BackendUnavailable`] when the platform API
    /// cannot be initialised.
    pub fn open() -> Result<Self, DeviceError> {
        let gilrs = Gilrs::new().map_err(|e| DeviceError::BackendUnavailable(e.to_string()))?;
        Ok(Self { gilrs, active: None })
    }
}

impl GamepadBackend for GilrsBackend {
    fn refresh(&mut self) -> Option<DeviceInfo> {
        while self.gilrs.next_event().is_some() {}

        let Some((id, pad)) = self.gilrs.gamepads().find(|(_, g)| g.is_connected()) else {
            self.active = None;
            return None;
        };
        self.active = Some(id);
        Some(DeviceInfo {
            name: pad.name().to_string(),
            axis_count: 6,
            button_count: Button::ALL.len(),
            profile_hint: Some(&STANDARD),
        })
    }

    fn read(&mut self) -> Result<RawSnapshot, DeviceError> {
        let id = self
            .active
            .ok_or_else(|| DeviceError::Unplugged("no active gamepad".to_string()))?;
        let pad = self
            .gilrs
            .connected_gamepad(id)
            .ok_or_else(|| DeviceError::Unplugged(format!("gamepad {id:?} went away")))?;

        let axis = |a: Axis| f64::from(pad.value(a));
        let trigger = |b: GButton| pad.button_data(b).map(|d| f64::from(d.value())).unwrap_or(0.0);
        let axes = vec![
            axis(Axis::LeftStickX),
            -axis(Axis::LeftStickY),
            axis(Axis::RightStickX),
            -axis(Axis::RightStickY),
            trigger(GButton::LeftTrigger2),
            trigger(GButton::RightTrigger2),
        ];
        let buttons = BUTTON_ORDER.iter().map(|&b| pad.is_pressed(b)).collect();
        let hat_x = i8::from(pad.is_pressed(GButton::DPadRight)) - i8::from(pad.is_pressed(GButton::DPadLeft));
        let hat_y = i8::from(pad.is_pressed(GButton::DPadUp)) - i8::from(pad.is_pressed(GButton::DPadDown));

        Ok(RawSnapshot {
            axes,
            buttons,
            hat: (hat_x, hat_y),
        })
    }
}

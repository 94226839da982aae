//! Gamepad device API abstraction.
//!
//! A [`GamepadBackend`] is owned by exactly one poller and is deliberately
//! not `Send`: some platform APIs bind their handle to the thread that
//! created it. Construct the backend on the thread that polls it.

use std::collections::VecDeque;

use go2link_types::DeviceError;

use crate::profile::DeviceProfile;

/// Raw, unshaped controller values as reported by the device API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSnapshot {
    pub axes: Vec<f64>,
    pub buttons: Vec<bool>,
    /// Hat 0: `x` right-positive, `y` up-positive.
    pub hat: (i8, i8),
}

/// Declared identity and capabilities of an attached device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub axis_count: usize,
    pub button_count: usize,
    /// Set by backends that already normalise the layout, in which case the
    /// profile table is bypassed.
    pub profile_hint: Option<&'static DeviceProfile>,
}

/// Single-owner handle to a gamepad API.
pub trait GamepadBackend {
    /// Pump pending backend events and report the attached device, or `None`
    /// when no controller is plugged in.
    fn refresh(&mut self) -> Option<DeviceInfo>;

    /// Read the raw state of the device reported by the last `refresh`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Unplugged`] when the device vanished between
    /// `refresh` and `read`.
    fn read(&mut self) -> Result<RawSnapshot, DeviceError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Null backend
// ────────────────────────────────────────────────────────────────────────────

/// Backend used when no gamepad API is compiled in. Never reports a device.
#[derive(Debug, Default)]
pub struct NullBackend;

impl GamepadBackend for NullBackend {
    fn refresh(&mut self) -> Option<DeviceInfo> {
        None
    }

    fn read(&mut self) -> Result<RawSnapshot, DeviceError> {
        Err(DeviceError::Unplugged("no gamepad backend".to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scripted backend
// ────────────────────────────────────────────────────────────────────────────

/// One scripted poll: either a device with its raw values, or nothing
/// plugged in.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Attached(DeviceInfo, RawSnapshot),
    Detached,
}

/// Replays a fixed sequence of device states, one per `refresh`. After the
/// script runs out the last step repeats.
///
/// Used by tests and by the CLI's `--demo-input` mode.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    steps: VecDeque<ScriptStep>,
    current: Option<ScriptStep>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a poll where `info` is attached and reports `raw`.
    pub fn then_attached(mut self, info: DeviceInfo, raw: RawSnapshot) -> Self {
        self.steps.push_back(ScriptStep::Attached(info, raw));
        self
    }

    /// Append a poll with no device attached.
    pub fn then_detached(mut self) -> Self {
        self.steps.push_back(ScriptStep::Detached);
        self
    }
}

impl GamepadBackend for ScriptedBackend {
    fn refresh(&mut self) -> Option<DeviceInfo> {
        if let Some(step) = self.steps.pop_front() {
            self.current = Some(step);
        }
        match &self.current {
            Some(ScriptStep::Attached(info, _)) => Some(info.clone()),
            _ => None,
        }
    }

    fn read(&mut self) -> Result<RawSnapshot, DeviceError> {
        match &self.current {
            Some(ScriptStep::Attached(_, raw)) => Ok(raw.clone()),
            _ => Err(DeviceError::Unplugged("scripted device detached".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad() -> DeviceInfo {
        DeviceInfo {
            name: "Test Pad".to_string(),
            axis_count: 4,
            button_count: 11,
            profile_hint: None,
        }
    }

    #[test]
    fn null_backend_never_reports_a_device() {
        let mut b = NullBackend;
        assert!(b.refresh().is_none());
        assert!(b.read().is_err());
    }

    #[test]
    fn scripted_backend_replays_and_repeats_last_step() {
        let raw = RawSnapshot {
            axes: vec![0.5, 0.0, 0.0, 0.0],
            ..RawSnapshot::default()
        };
        let mut b = ScriptedBackend::new()
            .then_attached(pad(), raw.clone())
            .then_detached();

        assert_eq!(b.refresh().map(|i| i.name), Some("Test Pad".to_string()));
        assert_eq!(b.read().unwrap(), raw);
        assert!(b.refresh().is_none());
        assert!(b.read().is_err());
        // Script exhausted: stays detached.
        assert!(b.refresh().is_none());
    }
}

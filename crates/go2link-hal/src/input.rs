//! [`InputSource`] – fixed-rate gamepad poller.
//!
//! `poll` takes `&mut self` and the backend is not `Send`, so the poller is
//! bound to the single thread that created it. Drive it at ~60 Hz
//! ([`POLL_INTERVAL`]).
//!
//! Each poll:
//!
//! 1. pumps the backend and detects hot-plug / unplug,
//! 2. maps raw values through the device's [`DeviceProfile`],
//! 3. diffs the pressed-button set against the previous poll and emits one
//!    [`ButtonEvent`] per press or release edge.
//!
//! If the backend could not be opened, the source stays disconnected for
//! good and every poll is a no-op.

use std::collections::BTreeSet;
use std::time::Duration;

use go2link_types::{Button, ButtonEvent, DeviceError, InputState};
use tracing::{debug, info, warn};

use crate::gamepad::GamepadBackend;
use crate::profile::DeviceProfile;

/// Default stick deadzone.
pub const DEFAULT_DEADZONE: f64 = 0.15;
/// Poll cadence (~60 Hz).
pub const POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Upper bound accepted for the deadzone; above this sticks become unusable.
const MAX_DEADZONE: f64 = 0.95;

/// Reshape a raw axis value.
///
/// Values with `|v| < deadzone` snap to exactly `0`. Above the threshold the
/// magnitude is rescaled linearly so that `deadzone → 0` and `1 → 1`,
/// preserving sign.
pub fn apply_deadzone(value: f64, deadzone: f64) -> f64 {
    if !value.is_finite() || deadzone >= 1.0 {
        return 0.0;
    }
    let magnitude = value.abs();
    if magnitude < deadzone {
        return 0.0;
    }
    let scaled = (magnitude - deadzone) / (1.0 - deadzone);
    (scaled * value.signum()).clamp(-1.0, 1.0)
}

/// Result of one [`InputSource::poll`].
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutput {
    pub state: InputState,
    pub events: Vec<ButtonEvent>,
}

/// Gamepad poller with deadzone shaping and edge detection.
pub struct InputSource {
    backend: Option<Box<dyn GamepadBackend>>,
    deadzone: f64,
    profile: Option<&'static DeviceProfile>,
    device_name: String,
    connected: bool,
    pressed: BTreeSet<Button>,
}

impl InputSource {
    /// Wrap an opened backend.
    pub fn new(backend: Box<dyn GamepadBackend>, deadzone: f64) -> Self {
        Self {
            backend: Some(backend),
            deadzone: sanitize_deadzone(deadzone),
            profile: None,
            device_name: String::new(),
            connected: false,
            pressed: BTreeSet::new(),
        }
    }

    /// A source whose backend failed to open. Permanently disconnected.
    pub fn unavailable(reason: &DeviceError, deadzone: f64) -> Self {
        warn!(error = %reason, "gamepad backend unavailable; input disabled");
        Self {
            backend: None,
            deadzone: sanitize_deadzone(deadzone),
            profile: None,
            device_name: String::new(),
            connected: false,
            pressed: BTreeSet::new(),
        }
    }

    /// Open the platform gamepad API.
    ///
    /// With the `gamepad` feature this is `gilrs`; without it the source is
    /// [`unavailable`][Self::unavailable].
    pub fn open_default(deadzone: f64) -> Self {
        #[cfg(feature = "gamepad")]
        {
            match crate::gilrs_backend::GilrsBackend::open() {
                Ok(b) => Self::new(Box::new(b), deadzone),
                Err(e) => Self::unavailable(&e, deadzone),
            }
        }
        #[cfg(not(feature = "gamepad"))]
        {
            Self::unavailable(
                &DeviceError::BackendUnavailable("built without the `gamepad` feature".to_string()),
                deadzone,
            )
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn deadzone(&self) -> f64 {
        self.deadzone
    }

    /// Name of the profile in use, if a device is attached.
    pub fn profile_name(&self) -> Option<&'static str> {
        self.profile.map(|p| p.name)
    }

    /// Read the device once. See the module docs for the sequence.
    pub fn poll(&mut self) -> PollOutput {
        let Some(backend) = self.backend.as_mut() else {
            return PollOutput {
                state: InputState::disconnected(),
                events: Vec::new(),
            };
        };

        let Some(info) = backend.refresh() else {
            return self.detach("device removed");
        };

        if !self.connected || info.name != self.device_name {
            let profile = DeviceProfile::resolve(&info);
            info!(
                device = %info.name,
                axes = info.axis_count,
                buttons = info.button_count,
                profile = profile.name,
                "gamepad connected"
            );
            self.profile = Some(profile);
            self.device_name = info.name.clone();
            self.connected = true;
        }

        let raw = match backend.read() {
            Ok(raw) => raw,
            Err(e) => return self.detach(&e.to_string()),
        };

        let profile = self.profile.unwrap_or_else(|| DeviceProfile::resolve(&info));
        let state = profile.decode(&self.device_name, &raw, self.deadzone);
        let events = diff_buttons(&self.pressed, &state.pressed);
        if !events.is_empty() {
            debug!(?events, "button edges");
        }
        self.pressed = state.pressed.clone();

        PollOutput { state, events }
    }

    fn detach(&mut self, reason: &str) -> PollOutput {
        let events = if self.connected {
            info!(device = %self.device_name, reason, "gamepad disconnected");
            diff_buttons(&self.pressed, &BTreeSet::new())
        } else {
            Vec::new()
        };
        self.connected = false;
        self.profile = None;
        self.pressed.clear();
        PollOutput {
            state: InputState::disconnected(),
            events,
        }
    }
}

fn sanitize_deadzone(dz: f64) -> f64 {
    if dz.is_finite() { dz.clamp(0.0, MAX_DEADZONE) } else { DEFAULT_DEADZONE }
}

/// Press edges first, then release edges, each in [`Button`] order.
fn diff_buttons(before: &BTreeSet<Button>, after: &BTreeSet<Button>) -> Vec<ButtonEvent> {
    let pressed = after.difference(before).map(|&button| ButtonEvent {
        button,
        pressed: true,
    });
    let released = before.difference(after).map(|&button| ButtonEvent {
        button,
        pressed: false,
    });
    pressed.chain(released).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamepad::{DeviceInfo, RawSnapshot, ScriptedBackend};

    fn pad(name: &str) -> DeviceInfo {
        DeviceInfo {
            name: name.to_string(),
            axis_count: 4,
            button_count: 11,
            profile_hint: None,
        }
    }

    fn raw_with(buttons: &[usize], axes: [f64; 4]) -> RawSnapshot {
        let mut b = vec![false; 11];
        for &i in buttons {
            b[i] = true;
        }
        RawSnapshot {
            axes: axes.to_vec(),
            buttons: b,
            hat: (0, 0),
        }
    }

    // ── Deadzone ─────────────────────────────────────────────────────────────

    #[test]
    fn values_inside_deadzone_snap_to_zero() {
        for v in [0.0, 0.05, -0.1, 0.149, -0.149_999] {
            assert_eq!(apply_deadzone(v, 0.15), 0.0, "value {v}");
        }
    }

    #[test]
    fn deadzone_is_continuous_at_threshold() {
        assert_eq!(apply_deadzone(0.15, 0.15), 0.0);
        assert_eq!(apply_deadzone(-0.15, 0.15), 0.0);
        assert!((apply_deadzone(1.0, 0.15) - 1.0).abs() < 1e-12);
        assert!((apply_deadzone(-1.0, 0.15) + 1.0).abs() < 1e-12);
        // Just above the threshold the output is just above zero.
        let v = apply_deadzone(0.150_001, 0.15);
        assert!(v > 0.0 && v < 1e-5);
    }

    #[test]
    fn deadzone_rescale_is_linear_and_keeps_sign() {
        let mid = apply_deadzone(0.575, 0.15);
        assert!((mid - 0.5).abs() < 1e-12);
        assert!((apply_deadzone(-0.575, 0.15) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_raw_values_are_clamped() {
        assert_eq!(apply_deadzone(1.2, 0.15), 1.0);
        assert_eq!(apply_deadzone(f64::NAN, 0.15), 0.0);
    }

    // ── Polling ──────────────────────────────────────────────────────────────

    #[test]
    fn unavailable_source_is_permanently_disconnected() {
        let mut src = InputSource::unavailable(
            &DeviceError::BackendUnavailable("test".to_string()),
            DEFAULT_DEADZONE,
        );
        for _ in 0..3 {
            let out = src.poll();
            assert!(!out.state.connected);
            assert!(out.events.is_empty());
        }
        assert!(!src.is_available());
    }

    #[test]
    fn press_and_release_edges_are_emitted_once() {
        let backend = ScriptedBackend::new()
            .then_attached(pad("Pad"), raw_with(&[], [0.0; 4]))
            .then_attached(pad("Pad"), raw_with(&[0], [0.0; 4]))
            .then_attached(pad("Pad"), raw_with(&[0], [0.0; 4]))
            .then_attached(pad("Pad"), raw_with(&[], [0.0; 4]));
        let mut src = InputSource::new(Box::new(backend), DEFAULT_DEADZONE);

        assert!(src.poll().events.is_empty());
        assert_eq!(
            src.poll().events,
            vec![ButtonEvent {
                button: Button::A,
                pressed: true
            }]
        );
        // Held: nothing new.
        assert!(src.poll().events.is_empty());
        assert_eq!(
            src.poll().events,
            vec![ButtonEvent {
                button: Button::A,
                pressed: false
            }]
        );
    }

    #[test]
    fn unplug_releases_held_buttons_and_reports_disconnected() {
        let backend = ScriptedBackend::new()
            .then_attached(pad("Pad"), raw_with(&[1, 4], [0.0; 4]))
            .then_detached();
        let mut src = InputSource::new(Box::new(backend), DEFAULT_DEADZONE);

        let first = src.poll();
        assert!(first.state.connected);
        assert_eq!(first.events.len(), 2);

        let second = src.poll();
        assert!(!second.state.connected);
        assert!(!src.is_connected());
        assert!(second.events.iter().all(|e| !e.pressed));
        assert_eq!(second.events.len(), 2);
    }

    #[test]
    fn replug_rereads_device_name() {
        let backend = ScriptedBackend::new()
            .then_attached(pad("First Pad"), raw_with(&[], [0.0; 4]))
            .then_detached()
            .then_attached(pad("Second Pad"), raw_with(&[], [0.0; 4]));
        let mut src = InputSource::new(Box::new(backend), DEFAULT_DEADZONE);

        assert_eq!(src.poll().state.device_name, "First Pad");
        assert!(!src.poll().state.connected);
        let out = src.poll();
        assert!(out.state.connected);
        assert_eq!(out.state.device_name, "Second Pad");
        assert_eq!(src.profile_name(), Some("generic-4axis"));
    }

    #[test]
    fn sticks_are_deadzone_shaped() {
        let backend =
            ScriptedBackend::new().then_attached(pad("Pad"), raw_with(&[], [0.1, -1.0, 0.575, 0.0]));
        let mut src = InputSource::new(Box::new(backend), DEFAULT_DEADZONE);
        let s = src.poll().state;
        assert_eq!(s.left_stick.x, 0.0);
        assert!((s.left_stick.y + 1.0).abs() < 1e-12);
        assert!((s.right_stick.x - 0.5).abs() < 1e-12);
    }

    #[test]
    fn deadzone_is_sanitized() {
        let src = InputSource::new(Box::new(ScriptedBackend::new()), 3.0);
        assert_eq!(src.deadzone(), MAX_DEADZONE);
        let src = InputSource::new(Box::new(ScriptedBackend::new()), f64::NAN);
        assert_eq!(src.deadzone(), DEFAULT_DEADZONE);
    }
}

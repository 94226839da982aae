//! Gamepad snapshot → robot command.
//!
//! [`map_motion`] is a pure function of the snapshot, the current speed
//! multiplier and the [`MapperConfig`]. Buttons go through a fixed table:
//!
//! | Button | Effect |
//! |---|---|
//! | A | `StandUp` |
//! | B | `StandDown` |
//! | X | `BalanceStand` |
//! | Y | `Damp` |
//! | Back | `EmergencyStop` |
//! | Start | `RecoveryStand` |
//! | LB | multiplier −0.1 |
//! | RB | multiplier +0.1 |
//!
//! Only press edges have an effect.

use go2link_types::{ActionRequest, Button, ButtonEvent, InputState, MotionCommand};
use serde::{Deserialize, Serialize};

/// Trigger travel below which a trigger counts as released.
const TRIGGER_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Forward speed at full stick and multiplier 1.0 (m/s).
    pub base_vx: f64,
    /// Lateral speed at full stick (m/s).
    pub base_vy: f64,
    /// Yaw rate at full stick (rad/s).
    pub base_vyaw: f64,
    /// Forward-speed factor at full trigger travel.
    pub boost: f64,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            base_vx: 0.8,
            base_vy: 0.3,
            base_vyaw: 0.8,
            boost: 1.5,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Speed multiplier
// ────────────────────────────────────────────────────────────────────────────

/// Operator speed scale, always within [`SpeedMultiplier::MIN`, `MAX`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedMultiplier(f64);

impl SpeedMultiplier {
    pub const MIN: f64 = 0.3;
    pub const MAX: f64 = 1.5;
    pub const STEP: f64 = 0.1;

    pub fn new(value: f64) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn increment(self) -> Self {
        Self::new(round_step(self.0 + Self::STEP))
    }

    pub fn decrement(self) -> Self {
        Self::new(round_step(self.0 - Self::STEP))
    }
}

impl Default for SpeedMultiplier {
    fn default() -> Self {
        Self(1.0)
    }
}

// Keeps repeated ±0.1 steps from drifting (0.30000000000000004 and friends).
fn round_step(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ────────────────────────────────────────────────────────────────────────────
// Motion
// ────────────────────────────────────────────────────────────────────────────

/// Map sticks and triggers to a bounded [`MotionCommand`].
///
/// Stick `y` is positive towards the operator, so pushing forward
/// (`y < 0`) yields `vx > 0`. A pressed left trigger reverses and boosts
/// `vx` and masks the right trigger; otherwise the right trigger boosts.
pub fn map_motion(input: &InputState, multiplier: SpeedMultiplier, config: &MapperConfig) -> MotionCommand {
    let m = multiplier.value();
    let mut vx = -input.left_stick.y * config.base_vx * m;
    let vy = -input.left_stick.x * config.base_vy * m;
    let vyaw = -input.right_stick.x * config.base_vyaw * m;

    let lt = input.left_trigger.clamp(0.0, 1.0);
    let rt = input.right_trigger.clamp(0.0, 1.0);
    if lt > TRIGGER_THRESHOLD {
        vx *= -(1.0 + lt * (config.boost - 1.0));
    } else if rt > TRIGGER_THRESHOLD {
        vx *= 1.0 + rt * (config.boost - 1.0);
    }

    MotionCommand::new(vx, vy, vyaw)
}

/// Static button table. `None` for buttons without a one-shot action.
pub fn action_for(button: Button) -> Option<ActionRequest> {
    match button {
        Button::A => Some(ActionRequest::StandUp),
        Button::B => Some(ActionRequest::StandDown),
        Button::X => Some(ActionRequest::BalanceStand),
        Button::Y => Some(ActionRequest::Damp),
        Button::Back => Some(ActionRequest::EmergencyStop),
        Button::Start => Some(ActionRequest::RecoveryStand),
        _ => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stateful mapper
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapperOutput {
    Action(ActionRequest),
    SpeedChanged(f64),
    None,
}

/// Button table, config and current multiplier in one place.
#[derive(Debug, Clone, Default)]
pub struct CommandMapper {
    config: MapperConfig,
    multiplier: SpeedMultiplier,
}

impl CommandMapper {
    pub fn new(config: MapperConfig) -> Self {
        Self {
            config,
            multiplier: SpeedMultiplier::default(),
        }
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn multiplier(&self) -> SpeedMultiplier {
        self.multiplier
    }

    pub fn map_motion(&self, input: &InputState) -> MotionCommand {
        map_motion(input, self.multiplier, &self.config)
    }

    pub fn on_button(&mut self, event: ButtonEvent) -> MapperOutput {
        if !event.pressed {
            return MapperOutput::None;
        }
        match event.button {
            Button::LeftBumper => {
                self.multiplier = self.multiplier.decrement();
                MapperOutput::SpeedChanged(self.multiplier.value())
            }
            Button::RightBumper => {
                self.multiplier = self.multiplier.increment();
                MapperOutput::SpeedChanged(self.multiplier.value())
            }
            other => action_for(other).map_or(MapperOutput::None, MapperOutput::Action),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use go2link_hal::{DEFAULT_DEADZONE, apply_deadzone};
    use go2link_types::{MAX_VX, MAX_VY, MAX_VYAW, Stick};

    fn pad(lx: f64, ly: f64, rx: f64, lt: f64, rt: f64) -> InputState {
        InputState {
            connected: true,
            left_stick: Stick { x: lx, y: ly },
            right_stick: Stick { x: rx, y: 0.0 },
            left_trigger: lt,
            right_trigger: rt,
            ..InputState::default()
        }
    }

    fn press(button: Button) -> ButtonEvent {
        ButtonEvent { button, pressed: true }
    }

    #[test]
    fn stick_inside_deadzone_gives_exact_zero() {
        let cfg = MapperConfig::default();
        let mut raw = -0.149;
        while raw < 0.15 {
            let v = apply_deadzone(raw, DEFAULT_DEADZONE);
            let cmd = map_motion(&pad(v, v, v, 0.0, 1.0), SpeedMultiplier::new(1.5), &cfg);
            assert_eq!(cmd, MotionCommand::ZERO, "raw {raw}");
            raw += 0.01;
        }
    }

    #[test]
    fn forward_stick_drives_forward() {
        let cmd = map_motion(&pad(0.0, -1.0, 0.0, 0.0, 0.0), SpeedMultiplier::default(), &MapperConfig::default());
        assert!((cmd.vx() - 0.8).abs() < 1e-9);
        assert_eq!(cmd.vy(), 0.0);

        let cmd = map_motion(&pad(1.0, 0.0, 1.0, 0.0, 0.0), SpeedMultiplier::default(), &MapperConfig::default());
        assert!((cmd.vy() + 0.3).abs() < 1e-9);
        assert!((cmd.vyaw() + 0.8).abs() < 1e-9);
    }

    #[test]
    fn right_trigger_boosts_forward() {
        let cmd = map_motion(&pad(0.0, -1.0, 0.0, 0.0, 1.0), SpeedMultiplier::default(), &MapperConfig::default());
        assert!((cmd.vx() - 1.2).abs() < 1e-9);
    }

    #[test]
    fn left_trigger_reverses_and_masks_right() {
        let cfg = MapperConfig::default();
        let both = map_motion(&pad(0.0, -1.0, 0.0, 1.0, 1.0), SpeedMultiplier::default(), &cfg);
        let left_only = map_motion(&pad(0.0, -1.0, 0.0, 1.0, 0.0), SpeedMultiplier::default(), &cfg);
        assert!((both.vx() + 1.2).abs() < 1e-9);
        assert_eq!(both, left_only);

        // A trigger resting at the threshold does nothing.
        let rest = map_motion(&pad(0.0, -1.0, 0.0, 0.1, 0.1), SpeedMultiplier::default(), &cfg);
        assert!((rest.vx() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn output_stays_in_bounds_for_any_input() {
        let cfg = MapperConfig {
            base_vx: 5.0,
            base_vy: 5.0,
            base_vyaw: 5.0,
            boost: 3.0,
        };
        let values = [-1.0, -0.6, -0.2, 0.0, 0.3, 0.7, 1.0];
        for m in [0.3, 1.0, 1.5] {
            for &x in &values {
                for &y in &values {
                    for &t in &[0.0, 0.5, 1.0] {
                        let cmd = map_motion(&pad(x, y, x, t, 1.0 - t), SpeedMultiplier::new(m), &cfg);
                        assert!(cmd.vx().abs() <= MAX_VX);
                        assert!(cmd.vy().abs() <= MAX_VY);
                        assert!(cmd.vyaw().abs() <= MAX_VYAW);
                    }
                }
            }
        }
    }

    #[test]
    fn multiplier_stays_clamped() {
        let mut m = SpeedMultiplier::default();
        for _ in 0..20 {
            m = m.increment();
        }
        assert_eq!(m.value(), 1.5);
        for _ in 0..30 {
            m = m.decrement();
        }
        assert_eq!(m.value(), 0.3);
        for i in 0..50 {
            m = if i % 3 == 0 { m.decrement() } else { m.increment() };
            assert!((SpeedMultiplier::MIN..=SpeedMultiplier::MAX).contains(&m.value()));
        }
    }

    #[test]
    fn bumpers_change_speed_and_buttons_map_to_actions() {
        let mut mapper = CommandMapper::default();
        assert_eq!(mapper.on_button(press(Button::RightBumper)), MapperOutput::SpeedChanged(1.1));
        assert_eq!(mapper.on_button(press(Button::LeftBumper)), MapperOutput::SpeedChanged(1.0));
        assert_eq!(mapper.on_button(press(Button::A)), MapperOutput::Action(ActionRequest::StandUp));
        assert_eq!(
            mapper.on_button(press(Button::Back)),
            MapperOutput::Action(ActionRequest::EmergencyStop)
        );
        assert_eq!(mapper.on_button(press(Button::Guide)), MapperOutput::None);
    }

    #[test]
    fn release_edges_are_ignored() {
        let mut mapper = CommandMapper::default();
        let release = ButtonEvent {
            button: Button::RightBumper,
            pressed: false,
        };
        assert_eq!(mapper.on_button(release), MapperOutput::None);
        assert_eq!(mapper.multiplier().value(), 1.0);
    }
}

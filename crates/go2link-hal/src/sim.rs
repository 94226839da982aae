//! Synthetic telemetry for running without a robot.
//!
//! [`SyntheticTelemetry::sample`] is a pure function of time: the same `t`
//! always yields the same snapshot. Every channel oscillates at its own
//! frequency so the values are plausible but obviously synthetic.
//!
//! | Channel | Formula (t in seconds) |
//! |---|---|
//! | battery % | `max(20, 100 − ⌊(t mod 1000) / 10⌋)` |
//! | voltage / current | `25 + 0.5·sin 0.1t` / `2 + sin 0.5t` |
//! | roll, pitch, yaw (rad) | `0.05 sin 2t`, `0.03 sin 1.5t`, `0.1 sin 0.3t` |
//! | gyro | `0.1 cos 2t`, `0.06 cos 1.5t`, `0.2 cos 0.3t` |
//! | accel | `0.5 sin t`, `0.3 cos t`, `9.81 + 0.1 sin 3t` |
//! | motor i | `q = 0.3 sin(t + i/2)`, `dq = 0.2 cos(t + i/2)`, `T = 35 + 5 sin(0.1t + i)`, `τ = 2 sin(2t + i)` |
//! | foot i | contact when `(⌊2t⌋ + i)` is even; force `50 + 20 sin(3t + i)` in contact |
//!
//! The last motion command is echoed in `velocity`, so a simulated session
//! still responds to the operator.
//!
//! # Example
//!
//! ```rust
//! use go2link_hal::sim::SyntheticTelemetry;
//! use go2link_types::MotionCommand;
//!
//! let state = SyntheticTelemetry::sample(12.5, &MotionCommand::new(0.4, 0.0, 0.2));
//! assert_eq!(state.velocity, [0.4, 0.0, 0.2]);
//! assert_eq!(state.motors.len(), 12);
//! ```

use std::time::Duration;

use go2link_types::{ActionRequest, MotionCommand, RobotMode, RobotState, unix_now};

/// Publishing cadence for synthetic sources (20 Hz).
pub const SYNTHETIC_INTERVAL: Duration = Duration::from_millis(50);

/// Stateless generator; see the module docs for the formulas.
pub struct SyntheticTelemetry;

impl SyntheticTelemetry {
    /// Snapshot at wall-clock time `t` (seconds since the Unix epoch).
    ///
    /// `connected` is left `false`; callers that present the sample as a
    /// live link set it themselves.
    pub fn sample(t: f64, last_motion: &MotionCommand) -> RobotState {
        let mut s = RobotState {
            timestamp: t,
            mode: RobotMode::StandUp,
            velocity: last_motion.as_array(),
            ..RobotState::default()
        };

        s.battery.level_percent = (100.0 - (t.rem_euclid(1000.0) / 10.0).floor()).max(20.0);
        s.battery.voltage = 25.0 + (t * 0.1).sin() * 0.5;
        s.battery.current = 2.0 + (t * 0.5).sin();

        s.imu.rpy = [(t * 2.0).sin() * 0.05, (t * 1.5).sin() * 0.03, (t * 0.3).sin() * 0.1];
        s.imu.gyroscope = [(t * 2.0).cos() * 0.1, (t * 1.5).cos() * 0.06, (t * 0.3).cos() * 0.2];
        s.imu.accelerometer = [t.sin() * 0.5, t.cos() * 0.3, 9.81 + (t * 3.0).sin() * 0.1];
        s.imu.quaternion = quaternion_from_rpy(s.imu.rpy);

        for (i, m) in s.motors.iter_mut().enumerate() {
            let fi = i as f64;
            m.q = (t + fi * 0.5).sin() * 0.3;
            m.dq = (t + fi * 0.5).cos() * 0.2;
            m.temperature = 35.0 + (t * 0.1 + fi).sin() * 5.0;
            m.tau_est = (t * 2.0 + fi).sin() * 2.0;
        }

        let phase = (t * 2.0).floor() as i64;
        for (i, f) in s.feet.iter_mut().enumerate() {
            let fi = i as f64;
            f.contact = (phase + i as i64).rem_euclid(2) == 0;
            f.force = if f.contact { 50.0 + (t * 3.0 + fi).sin() * 20.0 } else { 0.0 };
        }

        s
    }

    /// Snapshot at the current wall-clock time.
    pub fn now(last_motion: &MotionCommand) -> RobotState {
        Self::sample(unix_now(), last_motion)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated robot
// ────────────────────────────────────────────────────────────────────────────

/// Minimal posture model layered over [`SyntheticTelemetry`].
///
/// Tracks the mode implied by the last posture action and the current
/// velocity command. Shared by every component that pretends to be a robot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedRobot {
    mode: RobotMode,
    motion: MotionCommand,
}

impl Default for SimulatedRobot {
    fn default() -> Self {
        Self {
            mode: RobotMode::StandUp,
            motion: MotionCommand::ZERO,
        }
    }
}

impl SimulatedRobot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> RobotMode {
        self.mode
    }

    pub fn motion(&self) -> MotionCommand {
        self.motion
    }

    pub fn set_motion(&mut self, cmd: MotionCommand) {
        self.motion = cmd;
    }

    /// Apply a posture action. Actions without a posture effect are ignored.
    pub fn apply(&mut self, action: &ActionRequest) {
        match action {
            ActionRequest::StandUp | ActionRequest::BalanceStand | ActionRequest::RecoveryStand => {
                self.mode = RobotMode::StandUp;
            }
            ActionRequest::StandDown => {
                self.motion = MotionCommand::ZERO;
                self.mode = RobotMode::StandDown;
            }
            ActionRequest::StopMove => self.motion = MotionCommand::ZERO,
            ActionRequest::Damp | ActionRequest::EmergencyStop => {
                self.motion = MotionCommand::ZERO;
                self.mode = RobotMode::Idle;
            }
            _ => {}
        }
    }

    /// Synthetic snapshot at `t`, with this robot's mode and velocity.
    pub fn state_at(&self, t: f64) -> RobotState {
        let mut s = SyntheticTelemetry::sample(t, &self.motion);
        s.mode = self.mode;
        s
    }
}

/// ZYX Euler angles to a `[w, x, y, z]` unit quaternion.
fn quaternion_from_rpy([roll, pitch, yaw]: [f64; 3]) -> [f64; 4] {
    let (sr, cr) = (roll * 0.5).sin_cos();
    let (sp, cp) = (pitch * 0.5).sin_cos();
    let (sy, cy) = (yaw * 0.5).sin_cos();
    [
        cr * cp * cy + sr * sp * sy,
        sr * cp * cy - cr * sp * sy,
        cr * sp * cy + sr * cp * sy,
        cr * cp * sy - sr * sp * cy,
    ]
}

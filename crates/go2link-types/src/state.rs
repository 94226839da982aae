//! Robot telemetry snapshot.
//!
//! [`RobotState`] always carries exactly [`MOTOR_COUNT`] motor entries and
//! [`FOOT_COUNT`] foot entries: both are fixed-size arrays, so no update path
//! can shrink or grow them. Code that assembles a snapshot from
//! variable-length data goes through [`RobotState::from_parts`], which fails
//! fast on the wrong count.

use serde::{Deserialize, Serialize};

use crate::error::InvariantError;

pub const MOTOR_COUNT: usize = 12;
/// Feet are indexed FR, FL, RR, RL.
pub const FOOT_COUNT: usize = 4;

/// Battery level under which the robot is no longer considered healthy.
const MIN_HEALTHY_BATTERY: f64 = 10.0;
/// Motor temperature above which the robot is no longer considered healthy.
const MAX_HEALTHY_MOTOR_TEMP: f64 = 80.0;

/// Seconds since the Unix epoch, with microsecond resolution.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

// ────────────────────────────────────────────────────────────────────────────
// Mode
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RobotMode {
    Idle,
    StandDown,
    StandUp,
    Walking,
    Running,
    Climbing,
    #[default]
    Unknown,
}

impl RobotMode {
    /// Short display label, also used as the relay's wire encoding.
    pub fn label(self) -> &'static str {
        match self {
            RobotMode::Idle => "IDLE",
            RobotMode::StandDown => "DOWN",
            RobotMode::StandUp => "STAND",
            RobotMode::Walking => "WALK",
            RobotMode::Running => "RUN",
            RobotMode::Climbing => "CLIMB",
            RobotMode::Unknown => "---",
        }
    }

    /// Inverse of [`label`][Self::label]. Anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "IDLE" => RobotMode::Idle,
            "DOWN" => RobotMode::StandDown,
            "STAND" => RobotMode::StandUp,
            "WALK" => RobotMode::Walking,
            "RUN" => RobotMode::Running,
            "CLIMB" => RobotMode::Climbing,
            _ => RobotMode::Unknown,
        }
    }

    /// Decode the firmware's numeric sport mode.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => RobotMode::Idle,
            1 => RobotMode::StandDown,
            2 => RobotMode::StandUp,
            3 => RobotMode::Walking,
            4 => RobotMode::Running,
            5 => RobotMode::Climbing,
            _ => RobotMode::Unknown,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sub-states
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub level_percent: f64,
    pub voltage: f64,
    pub current: f64,
    pub temperature_c: f64,
}

impl Default for BatteryState {
    fn default() -> Self {
        Self {
            level_percent: 0.0,
            voltage: 0.0,
            current: 0.0,
            temperature_c: 25.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuState {
    /// `[w, x, y, z]`
    pub quaternion: [f64; 4],
    pub gyroscope: [f64; 3],
    pub accelerometer: [f64; 3],
    /// Roll, pitch, yaw in radians.
    pub rpy: [f64; 3],
    pub temperature: f64,
}

impl Default for ImuState {
    fn default() -> Self {
        Self {
            quaternion: [1.0, 0.0, 0.0, 0.0],
            gyroscope: [0.0; 3],
            accelerometer: [0.0, 0.0, 9.81],
            rpy: [0.0; 3],
            temperature: 25.0,
        }
    }
}

impl ImuState {
    pub fn roll_deg(&self) -> f64 {
        self.rpy[0].to_degrees()
    }

    pub fn pitch_deg(&self) -> f64 {
        self.rpy[1].to_degrees()
    }

    pub fn yaw_deg(&self) -> f64 {
        self.rpy[2].to_degrees()
    }
}

/// One joint motor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorState {
    pub id: u8,
    pub mode: u8,
    /// Angle (rad).
    pub q: f64,
    /// Angular velocity (rad/s).
    pub dq: f64,
    /// Angular acceleration (rad/s²).
    pub ddq: f64,
    /// Estimated torque (N·m).
    pub tau_est: f64,
    pub temperature: f64,
    /// Communication with the motor driver was lost.
    pub lost: bool,
}

impl MotorState {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            mode: 0,
            q: 0.0,
            dq: 0.0,
            ddq: 0.0,
            tau_est: 0.0,
            temperature: 25.0,
            lost: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FootState {
    pub id: u8,
    pub contact: bool,
    /// Contact force (N).
    pub force: f64,
}

impl FootState {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            contact: false,
            force: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorStatus {
    pub code: i32,
    pub message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// RobotState
// ────────────────────────────────────────────────────────────────────────────

/// Full telemetry snapshot. Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub timestamp: f64,
    pub connected: bool,
    pub mode: RobotMode,
    pub battery: BatteryState,
    pub imu: ImuState,
    pub motors: [MotorState; MOTOR_COUNT],
    pub feet: [FootState; FOOT_COUNT],
    /// `[vx, vy, vyaw]`
    pub velocity: [f64; 3],
    pub position: [f64; 3],
    pub error: ErrorStatus,
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            connected: false,
            mode: RobotMode::Unknown,
            battery: BatteryState::default(),
            imu: ImuState::default(),
            motors: std::array::from_fn(|i| MotorState::new(i as u8)),
            feet: std::array::from_fn(|i| FootState::new(i as u8)),
            velocity: [0.0; 3],
            position: [0.0; 3],
            error: ErrorStatus::default(),
        }
    }
}

impl RobotState {
    /// Assemble a snapshot from variable-length motor and foot lists.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantError`] unless exactly [`MOTOR_COUNT`] motors and
    /// [`FOOT_COUNT`] feet are supplied.
    pub fn from_parts(motors: Vec<MotorState>, feet: Vec<FootState>) -> Result<Self, InvariantError> {
        let motors: [MotorState; MOTOR_COUNT] = motors
            .try_into()
            .map_err(|v: Vec<MotorState>| InvariantError::MotorCount(v.len()))?;
        let feet: [FootState; FOOT_COUNT] = feet
            .try_into()
            .map_err(|v: Vec<FootState>| InvariantError::FootCount(v.len()))?;
        Ok(Self {
            motors,
            feet,
            ..Self::default()
        })
    }

    /// `false` when the battery is below 10 %, an error code is set, a motor
    /// runs hotter than 80 °C, or a motor lost communication.
    pub fn is_healthy(&self) -> bool {
        if self.battery.level_percent < MIN_HEALTHY_BATTERY {
            return false;
        }
        if self.error.code != 0 {
            return false;
        }
        !self
            .motors
            .iter()
            .any(|m| m.temperature > MAX_HEALTHY_MOTOR_TEMP || m.lost)
    }

    pub fn foot_contacts(&self) -> [bool; FOOT_COUNT] {
        self.feet.map(|f| f.contact)
    }

    pub fn foot_forces(&self) -> [f64; FOOT_COUNT] {
        self.feet.map(|f| f.force)
    }

    pub fn max_motor_temperature(&self) -> f64 {
        self.motors
            .iter()
            .map(|m| m.temperature)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_state() -> RobotState {
        let mut s = RobotState::default();
        s.battery.level_percent = 50.0;
        s.error.code = 0;
        for m in s.motors.iter_mut() {
            m.temperature = 40.0;
            m.lost = false;
        }
        s
    }

    #[test]
    fn default_state_has_fixed_layout() {
        let s = RobotState::default();
        assert_eq!(s.motors.len(), MOTOR_COUNT);
        assert_eq!(s.feet.len(), FOOT_COUNT);
        for (i, m) in s.motors.iter().enumerate() {
            assert_eq!(m.id as usize, i);
        }
        assert_eq!(s.imu.accelerometer, [0.0, 0.0, 9.81]);
        assert_eq!(s.battery.temperature_c, 25.0);
    }

    #[test]
    fn healthy_with_nominal_values() {
        assert!(healthy_state().is_healthy());
    }

    #[test]
    fn unhealthy_on_low_battery() {
        let mut s = healthy_state();
        s.battery.level_percent = 5.0;
        assert!(!s.is_healthy());
    }

    #[test]
    fn unhealthy_on_error_code() {
        let mut s = healthy_state();
        s.error.code = 3;
        assert!(!s.is_healthy());
    }

    #[test]
    fn unhealthy_on_hot_or_lost_motor() {
        let mut hot = healthy_state();
        hot.motors[7].temperature = 81.0;
        assert!(!hot.is_healthy());

        let mut lost = healthy_state();
        lost.motors[0].lost = true;
        assert!(!lost.is_healthy());
    }

    #[test]
    fn from_parts_rejects_wrong_foot_count() {
        let motors = (0..12).map(MotorState::new).collect();
        let feet = (0..3).map(FootState::new).collect();
        let err = RobotState::from_parts(motors, feet).unwrap_err();
        assert_eq!(err, InvariantError::FootCount(3));
    }

    #[test]
    fn from_parts_rejects_wrong_motor_count() {
        let motors = (0..11).map(MotorState::new).collect();
        let feet = (0..4).map(FootState::new).collect();
        let err = RobotState::from_parts(motors, feet).unwrap_err();
        assert_eq!(err, InvariantError::MotorCount(11));
    }

    #[test]
    fn from_parts_accepts_exact_counts() {
        let motors = (0..12).map(MotorState::new).collect();
        let feet = (0..4).map(FootState::new).collect();
        let s = RobotState::from_parts(motors, feet).unwrap();
        assert_eq!(s.feet[3].id, 3);
    }

    #[test]
    fn mode_labels_roundtrip() {
        for mode in [
            RobotMode::Idle,
            RobotMode::StandDown,
            RobotMode::StandUp,
            RobotMode::Walking,
            RobotMode::Running,
            RobotMode::Climbing,
        ] {
            assert_eq!(RobotMode::from_label(mode.label()), mode);
        }
        assert_eq!(RobotMode::from_label("BACKFLIP"), RobotMode::Unknown);
    }

    #[test]
    fn imu_degrees_are_derived_from_rpy() {
        let imu = ImuState {
            rpy: [std::f64::consts::FRAC_PI_2, 0.0, -std::f64::consts::PI],
            ..ImuState::default()
        };
        assert!((imu.roll_deg() - 90.0).abs() < 1e-9);
        assert!((imu.yaw_deg() + 180.0).abs() < 1e-9);
    }

    #[test]
    fn robot_state_json_roundtrip_keeps_layout() {
        let s = healthy_state();
        let json = serde_json::to_string(&s).unwrap();
        let back: RobotState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}

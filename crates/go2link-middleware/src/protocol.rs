//! JSON wire protocol spoken between the relay server and its clients.
//!
//! Every frame is a WebSocket text message holding one object with a
//! `"type"` discriminator.
//!
//! | Direction | `type` | Body |
//! |---|---|---|
//! | client → server | `move` | `vx`, `vy`, `vyaw` |
//! | client → server | `standUp` `standDown` `balanceStand` `recoveryStand` `stopMove` `damp` `emergencyStop` | none |
//! | client → server | `getState`, `ping` | none |
//! | server → client | `connected` | `simulationMode`, `version` |
//! | server → client | `state` | `data`: see [`WireState`] |
//! | server → client | `pong` | none |
//!
//! Decoding never panics: invalid JSON is [`ProtocolError::Malformed`], an
//! unrecognised `type` is [`ProtocolError::UnknownType`].

use go2link_types::{
    ActionRequest, FOOT_COUNT, MotionCommand, ProtocolError, RobotMode, RobotState,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "1.0.0";

// ────────────────────────────────────────────────────────────────────────────
// Client → server
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Move {
        #[serde(default)]
        vx: f64,
        #[serde(default)]
        vy: f64,
        #[serde(default)]
        vyaw: f64,
    },
    StandUp,
    StandDown,
    BalanceStand,
    RecoveryStand,
    StopMove,
    Damp,
    EmergencyStop,
    GetState,
    Ping,
}

const CLIENT_TYPES: &[&str] = &[
    "move",
    "standUp",
    "standDown",
    "balanceStand",
    "recoveryStand",
    "stopMove",
    "damp",
    "emergencyStop",
    "getState",
    "ping",
];

impl ClientMessage {
    pub fn from_motion(cmd: &MotionCommand) -> Self {
        ClientMessage::Move {
            vx: cmd.vx(),
            vy: cmd.vy(),
            vyaw: cmd.vyaw(),
        }
    }

    /// Wire form of an action, or `None` when the relay has no verb for it.
    pub fn from_action(action: &ActionRequest) -> Option<Self> {
        Some(match action {
            ActionRequest::StandUp => ClientMessage::StandUp,
            ActionRequest::StandDown => ClientMessage::StandDown,
            ActionRequest::BalanceStand => ClientMessage::BalanceStand,
            ActionRequest::RecoveryStand => ClientMessage::RecoveryStand,
            ActionRequest::StopMove => ClientMessage::StopMove,
            ActionRequest::Damp => ClientMessage::Damp,
            ActionRequest::EmergencyStop => ClientMessage::EmergencyStop,
            _ => return None,
        })
    }

    /// The action this message requests, if it is one.
    pub fn action(&self) -> Option<ActionRequest> {
        Some(match self {
            ClientMessage::StandUp => ActionRequest::StandUp,
            ClientMessage::StandDown => ActionRequest::StandDown,
            ClientMessage::BalanceStand => ActionRequest::BalanceStand,
            ClientMessage::RecoveryStand => ActionRequest::RecoveryStand,
            ClientMessage::StopMove => ActionRequest::StopMove,
            ClientMessage::Damp => ActionRequest::Damp,
            ClientMessage::EmergencyStop => ActionRequest::EmergencyStop,
            _ => return None,
        })
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        decode_tagged(text, CLIENT_TYPES)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Server → client
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Connected {
        #[serde(rename = "simulationMode", default)]
        simulation_mode: bool,
        #[serde(default)]
        version: String,
    },
    State {
        #[serde(default)]
        data: WireState,
    },
    Pong,
}

const SERVER_TYPES: &[&str] = &["connected", "state", "pong"];

impl ServerMessage {
    pub fn connected(simulation_mode: bool) -> Self {
        ServerMessage::Connected {
            simulation_mode,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn state(state: &RobotState) -> Self {
        ServerMessage::State {
            data: WireState::from(state),
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        decode_tagged(text, SERVER_TYPES)
    }
}

fn decode_tagged<T: DeserializeOwned>(text: &str, known: &[&str]) -> Result<T, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing \"type\" field".to_string()))?;
    if !known.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

// ────────────────────────────────────────────────────────────────────────────
// State payload
// ────────────────────────────────────────────────────────────────────────────

/// Flat camelCase telemetry record carried in `state` frames.
///
/// IMU angles travel in degrees. Every field is optional on decode; short
/// arrays fill only the entries they carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireState {
    pub timestamp: f64,
    pub connected: bool,
    pub mode: String,
    pub battery_level: f64,
    pub battery_voltage: f64,
    pub battery_current: f64,
    pub battery_temperature: f64,
    pub imu_roll: f64,
    pub imu_pitch: f64,
    pub imu_yaw: f64,
    pub imu_gyro: Vec<f64>,
    pub imu_accel: Vec<f64>,
    pub velocity_x: f64,
    pub velocity_y: f64,
    pub velocity_yaw: f64,
    pub foot_contacts: Vec<bool>,
    pub foot_forces: Vec<f64>,
}

impl Default for WireState {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            connected: false,
            mode: String::new(),
            battery_level: 0.0,
            battery_voltage: 0.0,
            battery_current: 0.0,
            battery_temperature: 25.0,
            imu_roll: 0.0,
            imu_pitch: 0.0,
            imu_yaw: 0.0,
            imu_gyro: vec![0.0; 3],
            imu_accel: vec![0.0, 0.0, 9.81],
            velocity_x: 0.0,
            velocity_y: 0.0,
            velocity_yaw: 0.0,
            foot_contacts: vec![false; FOOT_COUNT],
            foot_forces: vec![0.0; FOOT_COUNT],
        }
    }
}

impl From<&RobotState> for WireState {
    fn from(s: &RobotState) -> Self {
        Self {
            timestamp: s.timestamp,
            connected: s.connected,
            mode: s.mode.label().to_string(),
            battery_level: s.battery.level_percent,
            battery_voltage: s.battery.voltage,
            battery_current: s.battery.current,
            battery_temperature: s.battery.temperature_c,
            imu_roll: s.imu.roll_deg(),
            imu_pitch: s.imu.pitch_deg(),
            imu_yaw: s.imu.yaw_deg(),
            imu_gyro: s.imu.gyroscope.to_vec(),
            imu_accel: s.imu.accelerometer.to_vec(),
            velocity_x: s.velocity[0],
            velocity_y: s.velocity[1],
            velocity_yaw: s.velocity[2],
            foot_contacts: s.foot_contacts().to_vec(),
            foot_forces: s.foot_forces().to_vec(),
        }
    }
}

impl WireState {
    /// Fold the record into a full snapshot. Motors keep their defaults; the
    /// relay does not carry them.
    pub fn into_state(self) -> RobotState {
        let mut s = RobotState {
            timestamp: self.timestamp,
            connected: self.connected,
            mode: RobotMode::from_label(&self.mode),
            velocity: [self.velocity_x, self.velocity_y, self.velocity_yaw],
            ..RobotState::default()
        };
        s.battery.level_percent = self.battery_level;
        s.battery.voltage = self.battery_voltage;
        s.battery.current = self.battery_current;
        s.battery.temperature_c = self.battery_temperature;
        s.imu.rpy = [
            self.imu_roll.to_radians(),
            self.imu_pitch.to_radians(),
            self.imu_yaw.to_radians(),
        ];
        fill(&mut s.imu.gyroscope, &self.imu_gyro);
        fill(&mut s.imu.accelerometer, &self.imu_accel);
        for (foot, &contact) in s.feet.iter_mut().zip(&self.foot_contacts) {
            foot.contact = contact;
        }
        for (foot, &force) in s.feet.iter_mut().zip(&self.foot_forces) {
            foot.force = force;
        }
        s
    }
}

fn fill(dst: &mut [f64], src: &[f64]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = *s;
    }
}

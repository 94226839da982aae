//! `go2link-types` – shared vocabulary of the teleoperation bridge.
//!
//! Every other crate in the workspace speaks in terms of these types: the
//! operator's gamepad snapshot, the bounded motion command, the one-shot
//! action requests, the robot telemetry snapshot, and the error taxonomy.
//!
//! # Modules
//!
//! - [`input`] – [`InputState`], [`Button`], [`ButtonEvent`], [`DpadDirection`].
//! - [`command`] – [`MotionCommand`] (always clamped) and [`ActionRequest`].
//! - [`state`] – [`RobotState`] with its fixed 12-motor / 4-foot layout.
//! - [`link`] – connection lifecycle enums shared by transports and the
//!   coordinator.
//! - [`media`] – raw [`MediaFrame`] buffers delivered by video-capable
//!   transports.
//! - [`error`] – `thiserror` enums for connection, protocol, device and
//!   invariant failures.

pub mod command;
pub mod error;
pub mod input;
pub mod link;
pub mod media;
pub mod state;

pub use command::{
    ActionRequest, GaitType, MAX_VX, MAX_VY, MAX_VYAW, MotionCommand, SpecialAction, SpeedLevel,
};
pub use error::{BridgeError, CommandError, ConnectionError, DeviceError, InvariantError, ProtocolError};
pub use input::{Button, ButtonEvent, DpadDirection, InputState, Stick};
pub use link::{ConnectionState, LinkState, TransportKind};
pub use media::{MediaFrame, PixelFormat};
pub use state::{
    BatteryState, ErrorStatus, FOOT_COUNT, FootState, ImuState, MOTOR_COUNT, MotorState,
    RobotMode, RobotState, unix_now,
};

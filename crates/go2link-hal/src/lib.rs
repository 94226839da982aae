//! `go2link-hal` – Operator hardware and stand-in robot hardware.
//!
//! # Modules
//!
//! - [`gamepad`] – [`GamepadBackend`][gamepad::GamepadBackend]: the
//!   single-owner device API the input poller reads from, plus the
//!   [`NullBackend`][gamepad::NullBackend] and
//!   [`ScriptedBackend`][gamepad::ScriptedBackend] stand-ins.
//! - [`profile`] – [`DeviceProfile`][profile::DeviceProfile]: per-controller
//!   table that maps raw axis/button indices onto the logical layout.
//! - [`input`] – [`InputSource`][input::InputSource]: fixed-rate poller with
//!   deadzone shaping, edge-triggered button events and hot-plug detection.
//! - [`sim`] – [`SyntheticTelemetry`][sim::SyntheticTelemetry]: time-driven
//!   dummy [`RobotState`][go2link_types::RobotState] used whenever no robot is
//!   reachable, and [`SimulatedRobot`][sim::SimulatedRobot], the posture model
//!   the simulated transports and the relay server share.
//! - [`camera`] – [`FrameSource`][camera::FrameSource] and the
//!   [`TestPatternCamera`][camera::TestPatternCamera] used by simulated
//!   transports.
//!
//! Physical gamepads are read through `gilrs` when the `gamepad` feature is
//! enabled. Without it, [`InputSource::open_default`][input::InputSource::open_default]
//! reports a permanently disconnected controller.

pub mod camera;
pub mod gamepad;
#[cfg(feature = "gamepad")]
pub mod gilrs_backend;
pub mod input;
pub mod profile;
pub mod sim;

pub use camera::{FrameSource, TestPatternCamera};
pub use gamepad::{DeviceInfo, GamepadBackend, NullBackend, RawSnapshot, ScriptedBackend};
pub use input::{DEFAULT_DEADZONE, InputSource, PollOutput, apply_deadzone};
pub use profile::DeviceProfile;
pub use sim::{SYNTHETIC_INTERVAL, SimulatedRobot, SyntheticTelemetry};

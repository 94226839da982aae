//! `go2link-runtime` – the bridge's moving parts.
//!
//! # Modules
//!
//! - [`mapper`] – [`map_motion`][mapper::map_motion] and
//!   [`CommandMapper`][mapper::CommandMapper]: gamepad snapshot and button
//!   edges to bounded motion, actions and speed changes.
//! - [`coordinator`] – [`BridgeCoordinator`][coordinator::BridgeCoordinator]:
//!   owns the single active transport, the telemetry store, the synthetic
//!   fallback and the connection state machine. This is the API a
//!   presentation layer talks to.
//! - [`control`] – [`ControlLoop`][control::ControlLoop]: the 50 Hz task that
//!   turns the latest input snapshot into motion.
//! - [`watchdog`] – heartbeat deadlines used to spot stalled telemetry.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP exporter.

pub mod control;
pub mod coordinator;
pub mod mapper;
pub mod telemetry;
pub mod watchdog;

#[cfg(test)]
mod testing;

pub use control::{CONTROL_INTERVAL, ControlLoop};
pub use coordinator::{BridgeCoordinator, Subscription};
pub use mapper::{CommandMapper, MapperConfig, MapperOutput, SpeedMultiplier, map_motion};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use watchdog::{ComponentHealth, Watchdog};

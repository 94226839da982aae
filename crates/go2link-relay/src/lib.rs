//! `go2link-relay` – the edge computer's side of the relay transport.
//!
//! Boots a WebSocket server (default port `8765`) that speaks the relay's
//! JSON protocol on behalf of a robot. Commands reach the robot through a
//! [`SportBinding`](go2link_middleware::SportBinding) when one is attached
//! and opens; otherwise the relay serves a simulated robot:
//! posture commands change its mode, `move` sets the velocity echoed in its
//! telemetry, and every client receives its state at 20 Hz.
//!
//! ```rust,no_run
//! use go2link_relay::RelayServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), go2link_types::BridgeError> {
//!     RelayServer::new().run().await
//! }
//! ```

pub mod server;

pub use server::{DEFAULT_PORT, EdgeRobot, RelayServer, handle_client_message};

//! `go2link-middleware` – how commands reach the robot and state comes back.
//!
//! Three interchangeable transports sit behind one [`Transport`] trait. The
//! coordinator in `go2link-runtime` owns exactly one of them at a time and
//! never needs to know which.
//!
//! | Transport | Wire | Reconnects | Video |
//! |---|---|---|---|
//! | [`DirectTransport`] | vendor SDK binding, or built-in simulation | no | simulation only |
//! | [`RelayTransport`] | JSON text frames over WebSocket | yes, 3 s backoff | no |
//! | [`PeerTransport`] | JSON topics over a peer session | yes, 3 s backoff | yes |
//!
//! # Modules
//!
//! - [`transport`] – the [`Transport`] trait, callback sinks, task lifetime
//!   handling and [`TransportSpec`] target parsing.
//! - [`factory`] – [`TransportFactory`] turns a spec into a boxed transport.
//! - [`sport`] – topic names, API ids and request bodies shared by the direct
//!   and peer transports.
//! - [`protocol`] – the relay's JSON message set.
//! - [`store`] – [`TelemetryStore`], the single authoritative snapshot with
//!   generation-gated writers and ordered fan-out.

pub mod direct;
pub mod factory;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod sport;
pub mod store;
pub mod transport;

pub use direct::{DirectMode, DirectTransport, SportBinding};
pub use factory::{DefaultTransportFactory, TransportFactory};
pub use peer::{
    NoPeerBackend, PeerConnector, PeerEvent, PeerLink, PeerMode, PeerSession, PeerStateDecoder,
    PeerTransport, StaTarget,
};
pub use protocol::{ClientMessage, PROTOCOL_VERSION, ServerMessage, WireState};
pub use relay::RelayTransport;
pub use sport::SportRequest;
pub use store::{StoreWriter, TelemetryReceiver, TelemetryStore};
pub use transport::{
    CONNECT_TIMEOUT, DEFAULT_RELAY_HOST, DEFAULT_RELAY_PORT, DEFAULT_ROBOT_IP, LinkSink, MediaSink,
    RECONNECT_BACKOFF, TelemetrySink, Transport, TransportSpec, relay_url,
};

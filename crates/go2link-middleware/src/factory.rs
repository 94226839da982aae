//! Builds a boxed [`Transport`] from a [`TransportSpec`].
//!
//! The coordinator only ever sees `Box<dyn Transport>`; which concrete
//! transport backs it, and which native bindings that transport uses, is
//! decided here.

use std::sync::Arc;
use std::time::Duration;

use crate::direct::{DirectTransport, SportBinding};
use crate::peer::{NoPeerBackend, PeerConnector, PeerTransport};
use crate::relay::RelayTransport;
use crate::transport::{RECONNECT_BACKOFF, Transport, TransportSpec};

pub trait TransportFactory: Send + Sync {
    /// Construct an unconnected transport for `spec`.
    fn build(&self, spec: &TransportSpec) -> Box<dyn Transport>;
}

/// The stock factory.
///
/// Without a [`SportBinding`] the direct transport runs simulated; without a
/// [`PeerConnector`] peer connects fail with `Unavailable`.
pub struct DefaultTransportFactory {
    sport: Option<Arc<dyn SportBinding>>,
    peer: Arc<dyn PeerConnector>,
    connect_timeout: Option<Duration>,
    reconnect_backoff: Duration,
}

impl Default for DefaultTransportFactory {
    fn default() -> Self {
        Self {
            sport: None,
            peer: Arc::new(NoPeerBackend),
            connect_timeout: None,
            reconnect_backoff: RECONNECT_BACKOFF,
        }
    }
}

impl DefaultTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sport_binding(mut self, binding: Arc<dyn SportBinding>) -> Self {
        self.sport = Some(binding);
        self
    }

    pub fn with_peer_connector(mut self, connector: Arc<dyn PeerConnector>) -> Self {
        self.peer = connector;
        self
    }

    /// Override every transport's connect timeout. By default each kind
    /// keeps its own (see [`TransportSpec::default_connect_timeout`]).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn build(&self, spec: &TransportSpec) -> Box<dyn Transport> {
        let timeout = self
            .connect_timeout
            .unwrap_or_else(|| spec.default_connect_timeout());
        match spec {
            TransportSpec::Direct { robot_ip } => Box::new(
                DirectTransport::new(robot_ip.clone(), self.sport.clone()).with_connect_timeout(timeout),
            ),
            TransportSpec::Relay { url } => Box::new(
                RelayTransport::new(url.clone())
                    .with_connect_timeout(timeout)
                    .with_reconnect_backoff(self.reconnect_backoff),
            ),
            TransportSpec::Peer { mode } => Box::new(
                PeerTransport::new(mode.clone(), Arc::clone(&self.peer))
                    .with_connect_timeout(timeout)
                    .with_reconnect_backoff(self.reconnect_backoff),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerMode;
    use go2link_types::{ConnectionError, TransportKind};

    #[test]
    fn builds_the_requested_kind() {
        let factory = DefaultTransportFactory::new();
        for kind in [TransportKind::Direct, TransportKind::Relay, TransportKind::Peer] {
            let transport = factory.build(&TransportSpec::from_target(kind, ""));
            assert_eq!(transport.kind(), kind);
            assert!(!transport.is_connected());
        }
    }

    #[tokio::test]
    async fn direct_without_binding_connects_simulated() -> Result<(), Box<dyn std::error::Error>> {
        let factory = DefaultTransportFactory::new();
        let mut t = factory.build(&TransportSpec::Direct {
            robot_ip: "127.0.0.1".to_string(),
        });
        t.connect().await?;
        assert!(t.is_connected());
        t.disconnect().await;
        assert!(!t.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn peer_without_connector_is_unavailable() {
        let factory = DefaultTransportFactory::new();
        let mut t = factory.build(&TransportSpec::Peer {
            mode: PeerMode::LocalAp,
        });
        assert!(matches!(t.connect().await, Err(ConnectionError::Unavailable(_))));
    }
}

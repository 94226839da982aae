//! The transport contract shared by the Direct, Relay and Peer links.
//!
//! The coordinator owns exactly one `Box<dyn Transport>` at a time. Every
//! transport:
//!
//! * binds its target at construction from a [`TransportSpec`],
//! * connects within a bounded timeout and reports failure as a
//!   [`ConnectionError`],
//! * accepts commands without blocking and drops them while disconnected,
//! * pushes decoded telemetry, media and link-state changes into the sinks
//!   registered with `on_*`.
//!
//! Background work lives in a [`TaskGroup`]: a `watch<bool>` shutdown signal
//! plus the join handles, torn down with a bounded grace period.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use go2link_types::{
    ActionRequest, ConnectionError, LinkState, MediaFrame, MotionCommand, RobotState, TransportKind,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::peer::{PeerMode, StaTarget};

/// Connect timeout for the Direct and Relay transports.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Connect timeout for the Peer transport; session negotiation is slower.
pub const PEER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Fixed wait between reconnect attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);
/// How long a background task may take to wind down before it is aborted.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

pub const DEFAULT_ROBOT_IP: &str = "192.168.123.161";
pub const DEFAULT_RELAY_HOST: &str = "192.168.123.18";
pub const DEFAULT_RELAY_PORT: u16 = 8765;

pub type TelemetrySink = Arc<dyn Fn(RobotState) + Send + Sync>;
pub type MediaSink = Arc<dyn Fn(MediaFrame) + Send + Sync>;
pub type LinkSink = Arc<dyn Fn(LinkState) + Send + Sync>;

// ────────────────────────────────────────────────────────────────────────────
// Transport trait
// ────────────────────────────────────────────────────────────────────────────

/// A connection to the robot, or to something that speaks for it.
///
/// # Contract
///
/// * `connect` is idempotent while connected and never outlives its
///   timeout.
/// * `disconnect` always succeeds, may be called repeatedly, and leaves no
///   background task running.
/// * `send_*` never block. While disconnected they drop the command.
/// * `send_actions` enqueues the whole slice as one unit: nothing else is
///   sent between its elements.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn connect(&mut self) -> Result<(), ConnectionError>;

    async fn disconnect(&mut self);

    fn send_motion(&self, cmd: MotionCommand);

    fn send_action(&self, action: ActionRequest) {
        self.send_actions(&[action]);
    }

    fn send_actions(&self, actions: &[ActionRequest]);

    /// Register the single telemetry consumer. Replaces any previous sink.
    fn on_telemetry(&mut self, sink: TelemetrySink);

    /// Register a media consumer. Transports without video ignore it.
    fn on_media_frame(&mut self, _sink: MediaSink) {}

    fn on_link_state(&mut self, sink: LinkSink);

    fn is_connected(&self) -> bool;
}

// ────────────────────────────────────────────────────────────────────────────
// Sinks
// ────────────────────────────────────────────────────────────────────────────

/// Callback slots shared between a transport handle and its tasks.
///
/// Sinks may be registered after `connect`; tasks always read the current
/// slot.
#[derive(Default)]
pub struct SinkSet {
    telemetry: RwLock<Option<TelemetrySink>>,
    media: RwLock<Option<MediaSink>>,
    link: RwLock<Option<LinkSink>>,
}

impl SinkSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_telemetry(&self, sink: TelemetrySink) {
        if let Ok(mut slot) = self.telemetry.write() {
            *slot = Some(sink);
        }
    }

    pub fn set_media(&self, sink: MediaSink) {
        if let Ok(mut slot) = self.media.write() {
            *slot = Some(sink);
        }
    }

    pub fn set_link(&self, sink: LinkSink) {
        if let Ok(mut slot) = self.link.write() {
            *slot = Some(sink);
        }
    }

    pub fn has_media(&self) -> bool {
        self.media.read().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn telemetry(&self, state: RobotState) {
        let sink = self.telemetry.read().ok().and_then(|s| s.clone());
        if let Some(sink) = sink {
            sink(state);
        }
    }

    pub fn media(&self, frame: MediaFrame) {
        let sink = self.media.read().ok().and_then(|s| s.clone());
        if let Some(sink) = sink {
            sink(frame);
        }
    }

    pub fn link(&self, state: LinkState) {
        debug!(?state, "link state");
        let sink = self.link.read().ok().and_then(|s| s.clone());
        if let Some(sink) = sink {
            sink(state);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Task group
// ────────────────────────────────────────────────────────────────────────────

/// Background tasks sharing one shutdown signal.
pub struct TaskGroup {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Receiver that flips to `true` when [`shutdown`][Self::shutdown] runs.
    pub fn signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.retain(|h| !h.is_finished());
        self.handles.push(tokio::spawn(task));
    }

    pub fn is_empty(&self) -> bool {
        self.handles.iter().all(|h| h.is_finished())
    }

    /// Signal shutdown, give each task [`SHUTDOWN_GRACE`] to return, abort
    /// the stragglers. The group is reusable afterwards.
    pub async fn shutdown(&mut self) {
        self.shutdown.send_replace(true);
        for handle in self.handles.drain(..) {
            let abort = handle.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("background task ignored shutdown; aborting");
                abort.abort();
            }
        }
        let (fresh, _) = watch::channel(false);
        self.shutdown = fresh;
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Resolves once `signal` reads `true` or its sender is gone.
pub async fn shutdown_requested(signal: &mut watch::Receiver<bool>) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transport spec
// ────────────────────────────────────────────────────────────────────────────

/// Which transport to build and what it connects to.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSpec {
    Direct { robot_ip: String },
    Relay { url: String },
    Peer { mode: PeerMode },
}

impl TransportSpec {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportSpec::Direct { .. } => TransportKind::Direct,
            TransportSpec::Relay { .. } => TransportKind::Relay,
            TransportSpec::Peer { .. } => TransportKind::Peer,
        }
    }

    /// Interpret an operator-typed target for `kind`.
    ///
    /// | Kind | Target | Result |
    /// |---|---|---|
    /// | direct | `""` / ip | default robot ip / that ip |
    /// | relay | `""`, `host`, `host:port`, `ws://…` | WebSocket URL, port 8765 by default |
    /// | peer | `""` / `ap` | local access-point mode |
    /// | peer | IPv4 address | local station mode by ip |
    /// | peer | anything else | local station mode by serial |
    pub fn from_target(kind: TransportKind, target: &str) -> Self {
        let target = target.trim();
        match kind {
            TransportKind::Direct => TransportSpec::Direct {
                robot_ip: if target.is_empty() {
                    DEFAULT_ROBOT_IP.to_string()
                } else {
                    target.to_string()
                },
            },
            TransportKind::Relay => TransportSpec::Relay {
                url: relay_url_from_target(target),
            },
            TransportKind::Peer => TransportSpec::Peer {
                mode: if target.is_empty() || target.eq_ignore_ascii_case("ap") {
                    PeerMode::LocalAp
                } else if target.parse::<std::net::Ipv4Addr>().is_ok() {
                    PeerMode::LocalSta(StaTarget::Ip(target.to_string()))
                } else {
                    PeerMode::LocalSta(StaTarget::Serial(target.to_string()))
                },
            },
        }
    }

    pub fn default_connect_timeout(&self) -> Duration {
        match self {
            TransportSpec::Peer { .. } => PEER_CONNECT_TIMEOUT,
            _ => CONNECT_TIMEOUT,
        }
    }
}

impl fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSpec::Direct { robot_ip } => write!(f, "direct {robot_ip}"),
            TransportSpec::Relay { url } => write!(f, "relay {url}"),
            TransportSpec::Peer { mode } => write!(f, "peer {mode}"),
        }
    }
}

pub fn relay_url(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}")
}

fn relay_url_from_target(target: &str) -> String {
    if target.is_empty() {
        relay_url(DEFAULT_RELAY_HOST, DEFAULT_RELAY_PORT)
    } else if target.starts_with("ws://") || target.starts_with("wss://") {
        target.to_string()
    } else if target.contains(':') {
        format!("ws://{target}")
    } else {
        relay_url(target, DEFAULT_RELAY_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn relay_targets_expand_to_urls() {
        let url = |t| match TransportSpec::from_target(TransportKind::Relay, t) {
            TransportSpec::Relay { url } => url,
            other => panic!("unexpected spec {other:?}"),
        };
        assert_eq!(url(""), "ws://192.168.123.18:8765");
        assert_eq!(url("10.0.0.5"), "ws://10.0.0.5:8765");
        assert_eq!(url("10.0.0.5:9000"), "ws://10.0.0.5:9000");
        assert_eq!(url("wss://relay.example/ws"), "wss://relay.example/ws");
    }

    #[test]
    fn peer_targets_select_mode() {
        let mode = |t| match TransportSpec::from_target(TransportKind::Peer, t) {
            TransportSpec::Peer { mode } => mode,
            other => panic!("unexpected spec {other:?}"),
        };
        assert_eq!(mode(""), PeerMode::LocalAp);
        assert_eq!(mode("AP"), PeerMode::LocalAp);
        assert_eq!(
            mode("192.168.1.40"),
            PeerMode::LocalSta(StaTarget::Ip("192.168.1.40".to_string()))
        );
        assert_eq!(
            mode("B42D2000XXXX"),
            PeerMode::LocalSta(StaTarget::Serial("B42D2000XXXX".to_string()))
        );
    }

    #[test]
    fn direct_defaults_to_robot_ip() {
        assert_eq!(
            TransportSpec::from_target(TransportKind::Direct, " "),
            TransportSpec::Direct {
                robot_ip: DEFAULT_ROBOT_IP.to_string()
            }
        );
        assert_eq!(
            TransportSpec::from_target(TransportKind::Peer, "").default_connect_timeout(),
            PEER_CONNECT_TIMEOUT
        );
    }

    #[test]
    fn sinks_registered_late_are_used() {
        let sinks = SinkSet::new();
        // No sink yet: dropped.
        sinks.telemetry(RobotState::default());

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        sinks.set_telemetry(Arc::new(move |_: RobotState| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        sinks.telemetry(RobotState::default());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!sinks.has_media());
    }

    #[tokio::test]
    async fn task_group_shutdown_stops_cooperative_tasks() {
        let mut group = TaskGroup::new();
        let mut signal = group.signal();
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        group.spawn(async move {
            shutdown_requested(&mut signal).await;
            d.fetch_add(1, Ordering::SeqCst);
        });
        group.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(group.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn task_group_aborts_stubborn_tasks_after_grace() {
        let mut group = TaskGroup::new();
        group.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let started = tokio::time::Instant::now();
        group.shutdown().await;
        assert!(started.elapsed() >= SHUTDOWN_GRACE);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(group.is_empty());
    }
}

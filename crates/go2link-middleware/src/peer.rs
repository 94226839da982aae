//! Peer-connection transport: named JSON topics over a negotiated session.
//!
//! The session itself (signalling, ICE, data channels, video track) is owned
//! by whatever implements [`PeerConnector`] / [`PeerLink`]. This module only
//! deals in topics:
//!
//! * commands are published as `{"api_id", "parameter"}` bodies built by
//!   [`crate::sport`];
//! * motion goes to the obstacle-avoidance service while avoidance is on;
//! * `rt/lf/lowstate` and `rt/sportmodestate` are folded into one running
//!   [`RobotState`] by [`PeerStateDecoder`];
//! * video frames are forwarded to the media sink untouched.
//!
//! A closed session is reported as [`LinkState::Reconnecting`] and re-opened
//! after the backoff, until `disconnect`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use go2link_types::{
    ActionRequest, ConnectionError, FOOT_COUNT, LinkState, MOTOR_COUNT, MediaFrame, MotionCommand,
    ProtocolError, RobotMode, RobotState, TransportKind, unix_now,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use crate::sport::{SportRequest, action_requests, move_request, topic};
use crate::transport::{
    LinkSink, MediaSink, PEER_CONNECT_TIMEOUT, RECONNECT_BACKOFF, SinkSet, TaskGroup,
    TelemetrySink, Transport, shutdown_requested,
};

/// Foot force above which a foot counts as in contact (N).
const FOOT_CONTACT_THRESHOLD: f64 = 20.0;

// ────────────────────────────────────────────────────────────────────────────
// Connection modes
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaTarget {
    Ip(String),
    Serial(String),
}

/// How the peer session is reached. Chosen once per connect.
#[derive(Clone, PartialEq)]
pub enum PeerMode {
    /// The robot's own access point.
    LocalAp,
    /// Robot and operator on the same network.
    LocalSta(StaTarget),
    /// Through the vendor's remote signalling service.
    Remote {
        serial: String,
        username: String,
        password: Zeroizing<String>,
    },
}

impl fmt::Debug for PeerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerMode::LocalAp => write!(f, "LocalAp"),
            PeerMode::LocalSta(target) => f.debug_tuple("LocalSta").field(target).finish(),
            PeerMode::Remote {
                serial, username, ..
            } => f
                .debug_struct("Remote")
                .field("serial", serial)
                .field("username", username)
                .field("password", &"[redacted]")
                .finish(),
        }
    }
}

impl fmt::Display for PeerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerMode::LocalAp => write!(f, "ap"),
            PeerMode::LocalSta(StaTarget::Ip(ip)) => write!(f, "sta {ip}"),
            PeerMode::LocalSta(StaTarget::Serial(sn)) => write!(f, "sta serial {sn}"),
            PeerMode::Remote { serial, .. } => write!(f, "remote {serial}"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session abstraction
// ────────────────────────────────────────────────────────────────────────────

/// Something a live session delivers.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Message { topic: String, data: Value },
    Video(MediaFrame),
    Closed(String),
}

/// Outbound half of a negotiated session.
pub trait PeerLink: Send + Sync {
    fn publish(&self, topic: &str, body: Value) -> Result<(), ConnectionError>;

    fn subscribe(&self, topic: &str) -> Result<(), ConnectionError>;

    fn close(&self);
}

pub struct PeerSession {
    pub link: Arc<dyn PeerLink>,
    pub events: mpsc::Receiver<PeerEvent>,
}

/// Negotiates sessions. Implemented on top of a WebRTC stack.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn open(&self, mode: &PeerMode) -> Result<PeerSession, ConnectionError>;
}

/// Connector used when no WebRTC stack is linked in. Every attempt fails.
#[derive(Debug, Default)]
pub struct NoPeerBackend;

#[async_trait]
impl PeerConnector for NoPeerBackend {
    async fn open(&self, mode: &PeerMode) -> Result<PeerSession, ConnectionError> {
        Err(ConnectionError::Unavailable(format!(
            "no peer-connection backend in this build (requested {mode})"
        )))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// State decoding
// ────────────────────────────────────────────────────────────────────────────

/// Folds low-level and sport-mode state messages into one snapshot.
///
/// Each topic only updates the fields it carries; the rest keep their last
/// value.
#[derive(Debug, Default)]
pub struct PeerStateDecoder {
    state: RobotState,
}

impl PeerStateDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one message. Returns the updated snapshot, or `None` for topics
    /// that carry no robot state.
    pub fn apply(&mut self, topic_name: &str, data: &Value) -> Result<Option<RobotState>, ProtocolError> {
        match topic_name {
            topic::LOW_STATE => self.apply_low_state(data)?,
            topic::SPORT_STATE => self.apply_sport_state(data)?,
            _ => return Ok(None),
        }
        self.state.timestamp = unix_now();
        Ok(Some(self.state.clone()))
    }

    fn apply_low_state(&mut self, data: &Value) -> Result<(), ProtocolError> {
        let obj = data
            .as_object()
            .ok_or_else(|| ProtocolError::Malformed("lowstate is not an object".to_string()))?;
        let s = &mut self.state;

        if let Some(imu) = obj.get("imu_state") {
            fill(&mut s.imu.quaternion, imu.get("quaternion"));
            fill(&mut s.imu.gyroscope, imu.get("gyroscope"));
            fill(&mut s.imu.accelerometer, imu.get("accelerometer"));
            fill(&mut s.imu.rpy, imu.get("rpy"));
            if let Some(t) = number(imu.get("temperature")) {
                s.imu.temperature = t;
            }
        }

        if let Some(motors) = obj.get("motor_state").and_then(Value::as_array) {
            for (m, raw) in s.motors.iter_mut().zip(motors.iter().take(MOTOR_COUNT)) {
                m.q = number(raw.get("q")).unwrap_or(m.q);
                m.dq = number(raw.get("dq")).unwrap_or(m.dq);
                m.ddq = number(raw.get("ddq")).unwrap_or(m.ddq);
                m.tau_est = number(raw.get("tau_est")).unwrap_or(m.tau_est);
                m.temperature = number(raw.get("temperature")).unwrap_or(m.temperature);
                m.lost = match raw.get("lost") {
                    Some(Value::Bool(b)) => *b,
                    Some(v) => v.as_f64().is_some_and(|n| n != 0.0),
                    None => m.lost,
                };
            }
        }

        if let Some(bms) = obj.get("bms_state") {
            if let Some(soc) = number(bms.get("soc")) {
                s.battery.level_percent = soc;
            }
            if let Some(current) = number(bms.get("current")) {
                s.battery.current = current;
            }
        }
        if let Some(v) = number(obj.get("power_v")) {
            s.battery.voltage = v;
        }
        apply_foot_force(s, obj.get("foot_force"));
        Ok(())
    }

    fn apply_sport_state(&mut self, data: &Value) -> Result<(), ProtocolError> {
        let obj = data
            .as_object()
            .ok_or_else(|| ProtocolError::Malformed("sportmodestate is not an object".to_string()))?;
        let s = &mut self.state;
        if let Some(mode) = obj.get("mode").and_then(Value::as_i64) {
            s.mode = RobotMode::from_code(mode);
        }
        fill(&mut s.velocity, obj.get("velocity"));
        fill(&mut s.position, obj.get("position"));
        if let Some(code) = obj.get("error_code").and_then(Value::as_i64) {
            s.error.code = i32::try_from(code).unwrap_or(i32::MAX);
            s.error.message = if code == 0 { String::new() } else { format!("sport error {code}") };
        }
        apply_foot_force(s, obj.get("foot_force"));
        Ok(())
    }
}

fn number(v: Option<&Value>) -> Option<f64> {
    v.and_then(Value::as_f64)
}

fn fill(dst: &mut [f64], src: Option<&Value>) {
    let Some(values) = src.and_then(Value::as_array) else {
        return;
    };
    for (d, v) in dst.iter_mut().zip(values) {
        if let Some(n) = v.as_f64() {
            *d = n;
        }
    }
}

fn apply_foot_force(s: &mut RobotState, src: Option<&Value>) {
    let Some(forces) = src.and_then(Value::as_array) else {
        return;
    };
    for (foot, v) in s.feet.iter_mut().zip(forces.iter().take(FOOT_COUNT)) {
        if let Some(force) = v.as_f64() {
            foot.force = force;
            foot.contact = force > FOOT_CONTACT_THRESHOLD;
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

type SharedLink = Arc<RwLock<Option<Arc<dyn PeerLink>>>>;

pub struct PeerTransport {
    mode: PeerMode,
    connector: Arc<dyn PeerConnector>,
    connect_timeout: Duration,
    reconnect_backoff: Duration,
    link: SharedLink,
    connected: Arc<AtomicBool>,
    avoid: AtomicBool,
    sinks: Arc<SinkSet>,
    send_lock: Mutex<()>,
    tasks: TaskGroup,
}

impl PeerTransport {
    pub fn new(mode: PeerMode, connector: Arc<dyn PeerConnector>) -> Self {
        Self {
            mode,
            connector,
            connect_timeout: PEER_CONNECT_TIMEOUT,
            reconnect_backoff: RECONNECT_BACKOFF,
            link: Arc::new(RwLock::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            avoid: AtomicBool::new(false),
            sinks: SinkSet::new(),
            send_lock: Mutex::new(()),
            tasks: TaskGroup::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn obstacle_avoidance(&self) -> bool {
        self.avoid.load(Ordering::SeqCst)
    }

    fn publish(&self, request: &SportRequest) {
        let link = self.link.read().ok().and_then(|l| l.clone());
        let Some(link) = link else {
            trace!(api_id = request.api_id, "peer link gone; request dropped");
            return;
        };
        if let Err(e) = link.publish(request.topic, request.body()) {
            warn!(topic = request.topic, api_id = request.api_id, error = %e, "peer publish failed");
        }
    }
}

async fn open_session(
    connector: &dyn PeerConnector,
    mode: &PeerMode,
    timeout: Duration,
) -> Result<PeerSession, ConnectionError> {
    let session = tokio::time::timeout(timeout, connector.open(mode))
        .await
        .map_err(|_| ConnectionError::Timeout(timeout))??;
    for t in [topic::LOW_STATE, topic::SPORT_STATE] {
        if let Err(e) = session.link.subscribe(t) {
            warn!(topic = t, error = %e, "peer subscribe failed");
        }
    }
    Ok(session)
}

fn install(slot: &SharedLink, link: Option<Arc<dyn PeerLink>>) -> Option<Arc<dyn PeerLink>> {
    match slot.write() {
        Ok(mut guard) => std::mem::replace(&mut *guard, link),
        Err(_) => None,
    }
}

#[async_trait]
impl Transport for PeerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Peer
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            return Ok(());
        }
        let session = open_session(self.connector.as_ref(), &self.mode, self.connect_timeout).await?;
        install(&self.link, Some(Arc::clone(&session.link)));
        self.connected.store(true, Ordering::SeqCst);
        info!(mode = %self.mode, "peer session established");
        self.sinks.link(LinkState::Up);

        let supervisor = Supervisor {
            mode: self.mode.clone(),
            connector: Arc::clone(&self.connector),
            connect_timeout: self.connect_timeout,
            backoff: self.reconnect_backoff,
            link: Arc::clone(&self.link),
            connected: Arc::clone(&self.connected),
            sinks: Arc::clone(&self.sinks),
            shutdown: self.tasks.signal(),
        };
        self.tasks.spawn(supervisor.run(session.events));
        Ok(())
    }

    async fn disconnect(&mut self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.tasks.shutdown().await;
        if let Some(link) = install(&self.link, None) {
            link.close();
        }
        if was_connected {
            info!(mode = %self.mode, "peer session closed");
            self.sinks.link(LinkState::Down);
        }
    }

    fn send_motion(&self, cmd: MotionCommand) {
        if !self.is_connected() {
            trace!("peer not connected; motion dropped");
            return;
        }
        let Ok(_guard) = self.send_lock.lock() else {
            return;
        };
        self.publish(&move_request(&cmd, self.obstacle_avoidance()));
    }

    fn send_actions(&self, actions: &[ActionRequest]) {
        if !self.is_connected() {
            trace!(?actions, "peer not connected; actions dropped");
            return;
        }
        let Ok(_guard) = self.send_lock.lock() else {
            return;
        };
        for action in actions {
            if let ActionRequest::ObstacleAvoidance(enable) = action {
                self.avoid.store(*enable, Ordering::SeqCst);
                info!(enable, "obstacle avoidance toggled");
            }
            for request in action_requests(action) {
                self.publish(&request);
            }
        }
    }

    fn on_telemetry(&mut self, sink: TelemetrySink) {
        self.sinks.set_telemetry(sink);
    }

    fn on_media_frame(&mut self, sink: MediaSink) {
        self.sinks.set_media(sink);
    }

    fn on_link_state(&mut self, sink: LinkSink) {
        self.sinks.set_link(sink);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct Supervisor {
    mode: PeerMode,
    connector: Arc<dyn PeerConnector>,
    connect_timeout: Duration,
    backoff: Duration,
    link: SharedLink,
    connected: Arc<AtomicBool>,
    sinks: Arc<SinkSet>,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(self, first: mpsc::Receiver<PeerEvent>) {
        let mut events = Some(first);
        loop {
            if let Some(rx) = events.take() {
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    reason = self.ingest(rx) => {
                        warn!(mode = %self.mode, reason = %reason, "peer session lost");
                    }
                    _ = shutdown_requested(&mut shutdown) => return,
                }
                self.connected.store(false, Ordering::SeqCst);
                if let Some(stale) = install(&self.link, None) {
                    stale.close();
                }
                self.sinks.link(LinkState::Reconnecting);
            }

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.backoff) => {}
                _ = shutdown_requested(&mut shutdown) => return,
            }

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                opened = open_session(self.connector.as_ref(), &self.mode, self.connect_timeout) => {
                    match opened {
                        Ok(session) => {
                            install(&self.link, Some(session.link));
                            self.connected.store(true, Ordering::SeqCst);
                            info!(mode = %self.mode, "peer session re-established");
                            self.sinks.link(LinkState::Up);
                            events = Some(session.events);
                        }
                        Err(e) => debug!(mode = %self.mode, error = %e, "peer reconnect failed"),
                    }
                }
                _ = shutdown_requested(&mut shutdown) => return,
            }
        }
    }

    /// Decode one session's events. Each session starts from an empty
    /// decoder so nothing merged from a previous link leaks into the next.
    async fn ingest(&self, mut rx: mpsc::Receiver<PeerEvent>) -> String {
        let mut decoder = PeerStateDecoder::new();
        while let Some(event) = rx.recv().await {
            match event {
                PeerEvent::Message { topic, data } => match decoder.apply(&topic, &data) {
                    Ok(Some(mut state)) => {
                        state.connected = true;
                        self.sinks.telemetry(state);
                    }
                    Ok(None) => trace!(topic = %topic, "ignoring peer topic"),
                    Err(e) => warn!(topic = %topic, error = %e, "dropping peer message"),
                },
                PeerEvent::Video(frame) => self.sinks.media(frame),
                PeerEvent::Closed(reason) => return reason,
            }
        }
        "peer event stream ended".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sport::api;
    use go2link_types::PixelFormat;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingLink {
        published: Mutex<Vec<(String, Value)>>,
        subscribed: Mutex<Vec<String>>,
    }

    impl PeerLink for RecordingLink {
        fn publish(&self, topic: &str, body: Value) -> Result<(), ConnectionError> {
            if let Ok(mut p) = self.published.lock() {
                p.push((topic.to_string(), body));
            }
            Ok(())
        }
        fn subscribe(&self, topic: &str) -> Result<(), ConnectionError> {
            if let Ok(mut s) = self.subscribed.lock() {
                s.push(topic.to_string());
            }
            Ok(())
        }
        fn close(&self) {}
    }

    /// Hands out sessions backed by [`RecordingLink`] and keeps the event
    /// senders so tests can inject traffic.
    #[derive(Default)]
    struct LoopbackConnector {
        opens: AtomicUsize,
        links: Mutex<Vec<Arc<RecordingLink>>>,
        senders: Mutex<Vec<mpsc::Sender<PeerEvent>>>,
    }

    impl LoopbackConnector {
        fn last_link(&self) -> Option<Arc<RecordingLink>> {
            self.links.lock().ok().and_then(|l| l.last().cloned())
        }
        fn last_sender(&self) -> Option<mpsc::Sender<PeerEvent>> {
            self.senders.lock().ok().and_then(|s| s.last().cloned())
        }
    }

    #[async_trait]
    impl PeerConnector for LoopbackConnector {
        async fn open(&self, _mode: &PeerMode) -> Result<PeerSession, ConnectionError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let link = Arc::new(RecordingLink::default());
            let (tx, rx) = mpsc::channel(64);
            if let Ok(mut l) = self.links.lock() {
                l.push(Arc::clone(&link));
            }
            if let Ok(mut s) = self.senders.lock() {
                s.push(tx);
            }
            Ok(PeerSession { link, events: rx })
        }
    }

    #[test]
    fn remote_password_is_redacted() {
        let mode = PeerMode::Remote {
            serial: "B42D".to_string(),
            username: "op@example.com".to_string(),
            password: Zeroizing::new("hunter2".to_string()),
        };
        let debug = format!("{mode:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[redacted]"));
        assert!(!mode.to_string().contains("hunter2"));
    }

    #[test]
    fn lowstate_updates_imu_motors_battery_and_feet() -> Result<(), ProtocolError> {
        let mut dec = PeerStateDecoder::new();
        let data = json!({
            "imu_state": { "rpy": [0.1, -0.2, 0.3], "temperature": 41 },
            "motor_state": [ { "q": 0.5, "temperature": 50, "lost": 0 }, { "q": -0.5, "lost": 1 } ],
            "bms_state": { "soc": 87, "current": 1.5 },
            "power_v": 28.4,
            "foot_force": [35, 0, 80, 10]
        });
        let s = dec.apply(topic::LOW_STATE, &data)?.ok_or(ProtocolError::Malformed("none".into()))?;
        assert_eq!(s.imu.rpy, [0.1, -0.2, 0.3]);
        assert_eq!(s.imu.temperature, 41.0);
        assert_eq!(s.motors[0].q, 0.5);
        assert_eq!(s.motors[0].temperature, 50.0);
        assert!(s.motors[1].lost);
        assert_eq!(s.motors[2].q, 0.0);
        assert_eq!(s.motors.len(), 12);
        assert_eq!(s.battery.level_percent, 87.0);
        assert_eq!(s.battery.voltage, 28.4);
        assert_eq!(s.foot_contacts(), [true, false, true, false]);
        Ok(())
    }

    #[test]
    fn sport_state_merges_with_low_state() -> Result<(), ProtocolError> {
        let mut dec = PeerStateDecoder::new();
        dec.apply(topic::LOW_STATE, &json!({ "bms_state": { "soc": 60 } }))?;
        let s = dec
            .apply(
                topic::SPORT_STATE,
                &json!({ "mode": 3, "velocity": [0.4, 0.0, 0.1], "error_code": 0 }),
            )?
            .ok_or(ProtocolError::Malformed("none".into()))?;
        assert_eq!(s.mode, RobotMode::Walking);
        assert_eq!(s.velocity, [0.4, 0.0, 0.1]);
        assert_eq!(s.battery.level_percent, 60.0);
        Ok(())
    }

    #[test]
    fn non_object_payload_is_malformed_and_other_topics_ignored() {
        let mut dec = PeerStateDecoder::new();
        assert!(matches!(
            dec.apply(topic::LOW_STATE, &json!([1, 2, 3])),
            Err(ProtocolError::Malformed(_))
        ));
        assert_eq!(dec.apply(topic::LIDAR, &json!({})), Ok(None));
    }

    #[tokio::test]
    async fn no_backend_reports_unavailable() {
        let mut peer = PeerTransport::new(PeerMode::LocalAp, Arc::new(NoPeerBackend));
        let err = peer.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Unavailable(_)));
        assert!(!peer.is_connected());
    }

    #[tokio::test]
    async fn motion_routes_through_avoidance_when_enabled() -> Result<(), Box<dyn std::error::Error>> {
        let connector = Arc::new(LoopbackConnector::default());
        let mut peer = PeerTransport::new(PeerMode::LocalAp, connector.clone());
        peer.connect().await?;
        let link = connector.last_link().ok_or("no link")?;
        assert_eq!(
            link.subscribed.lock().map(|s| s.clone()).unwrap_or_default(),
            vec![topic::LOW_STATE.to_string(), topic::SPORT_STATE.to_string()]
        );

        let cmd = MotionCommand::new(0.3, 0.0, 0.0);
        peer.send_motion(cmd);
        peer.send_action(ActionRequest::ObstacleAvoidance(true));
        peer.send_motion(cmd);
        peer.send_action(ActionRequest::ObstacleAvoidance(false));
        peer.send_motion(cmd);

        let published = link.published.lock().map(|p| p.clone()).unwrap_or_default();
        let route: Vec<(&str, u64)> = published
            .iter()
            .map(|(t, b)| (t.as_str(), b["api_id"].as_u64().unwrap_or(0)))
            .collect();
        assert_eq!(
            route,
            vec![
                (topic::SPORT_MOD, u64::from(api::MOVE)),
                (topic::OBSTACLES_AVOID, u64::from(api::AVOID_SWITCH)),
                (topic::OBSTACLES_AVOID, u64::from(api::AVOID_MOVE)),
                (topic::OBSTACLES_AVOID, u64::from(api::AVOID_SWITCH)),
                (topic::SPORT_MOD, u64::from(api::MOVE)),
            ]
        );
        assert_eq!(published[1].1["parameter"], json!({ "enable": true }));
        peer.disconnect().await;
        Ok(())
    }

    #[tokio::test]
    async fn inbound_state_and_video_reach_sinks() -> Result<(), Box<dyn std::error::Error>> {
        let connector = Arc::new(LoopbackConnector::default());
        let mut peer = PeerTransport::new(PeerMode::LocalAp, connector.clone());
        let (state_tx, mut state_rx) = watch::channel(0.0_f64);
        peer.on_telemetry(Arc::new(move |s: go2link_types::RobotState| {
            state_tx.send_replace(s.battery.level_percent);
        }));
        let frames = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&frames);
        peer.on_media_frame(Arc::new(move |_: go2link_types::MediaFrame| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        peer.connect().await?;

        let tx = connector.last_sender().ok_or("no sender")?;
        tx.send(PeerEvent::Message {
            topic: topic::LOW_STATE.to_string(),
            data: json!("garbage"),
        })
        .await?;
        tx.send(PeerEvent::Message {
            topic: topic::LOW_STATE.to_string(),
            data: json!({ "bms_state": { "soc": 42 } }),
        })
        .await?;
        tx.send(PeerEvent::Video(MediaFrame {
            width: 2,
            height: 1,
            format: PixelFormat::Gray8,
            data: vec![0, 255],
            timestamp: 0.0,
        }))
        .await?;

        tokio::time::timeout(Duration::from_secs(2), state_rx.changed()).await??;
        assert_eq!(*state_rx.borrow(), 42.0);
        for _ in 0..50 {
            if frames.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(frames.load(Ordering::SeqCst), 1);
        peer.disconnect().await;
        Ok(())
    }

    #[tokio::test]
    async fn closed_session_is_reopened_after_backoff() -> Result<(), Box<dyn std::error::Error>> {
        let connector = Arc::new(LoopbackConnector::default());
        let mut peer = PeerTransport::new(PeerMode::LocalAp, connector.clone())
            .with_reconnect_backoff(Duration::from_millis(20));
        let states = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&states);
        peer.on_link_state(Arc::new(move |ls: go2link_types::LinkState| {
            if let Ok(mut v) = s.lock() {
                v.push(ls);
            }
        }));
        peer.connect().await?;

        let tx = connector.last_sender().ok_or("no sender")?;
        tx.send(PeerEvent::Closed("ice failed".to_string())).await?;

        for _ in 0..100 {
            if connector.opens.load(Ordering::SeqCst) == 2 && peer.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
        assert!(peer.is_connected());
        peer.disconnect().await;

        let seen = states.lock().map(|v| v.clone()).unwrap_or_default();
        assert_eq!(
            seen,
            vec![LinkState::Up, LinkState::Reconnecting, LinkState::Up, LinkState::Down]
        );
        Ok(())
    }

    #[tokio::test]
    async fn reopened_session_starts_from_empty_state() -> Result<(), Box<dyn std::error::Error>> {
        let connector = Arc::new(LoopbackConnector::default());
        let mut peer = PeerTransport::new(PeerMode::LocalAp, connector.clone())
            .with_reconnect_backoff(Duration::from_millis(20));
        let (state_tx, mut state_rx) = watch::channel((0.0_f64, 0.0_f64));
        peer.on_telemetry(Arc::new(move |s: go2link_types::RobotState| {
            state_tx.send_replace((s.battery.level_percent, s.velocity[0]));
        }));
        peer.connect().await?;

        let first = connector.last_sender().ok_or("no sender")?;
        first
            .send(PeerEvent::Message {
                topic: topic::LOW_STATE.to_string(),
                data: json!({ "bms_state": { "soc": 60 } }),
            })
            .await?;
        tokio::time::timeout(Duration::from_secs(2), state_rx.changed()).await??;
        assert_eq!(state_rx.borrow_and_update().0, 60.0);
        first.send(PeerEvent::Closed("ice failed".to_string())).await?;

        for _ in 0..100 {
            if connector.opens.load(Ordering::SeqCst) == 2 && peer.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);

        let second = connector.last_sender().ok_or("no sender")?;
        second
            .send(PeerEvent::Message {
                topic: topic::SPORT_STATE.to_string(),
                data: json!({ "mode": 3, "velocity": [0.4, 0.0, 0.0] }),
            })
            .await?;
        tokio::time::timeout(Duration::from_secs(2), state_rx.changed()).await??;
        assert_eq!(*state_rx.borrow(), (0.0, 0.4));
        peer.disconnect().await;
        Ok(())
    }
}

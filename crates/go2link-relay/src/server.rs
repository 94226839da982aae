//! [`RelayServer`] – the edge-side JSON/WebSocket relay.
//!
//! Listens on `0.0.0.0:8765` (configurable via [`RelayServer::with_port`]).
//!
//! * Every accepted client gets a `connected` frame, then the shared state
//!   stream at 20 Hz.
//! * Client commands drive one [`EdgeRobot`] shared by all clients. With a
//!   [`SportBinding`] that opens, commands go to the robot through the sport
//!   api-id table and state comes from the binding. Otherwise a
//!   [`SimulatedRobot`] answers and `simulationMode` is advertised.
//! * Each client is limited to [`RATE_PER_SECOND`] messages per second with a
//!   burst of [`RATE_BURST`]; the excess is dropped.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use go2link_hal::SimulatedRobot;
use go2link_middleware::sport::{SportRequest, action_requests, move_request};
use go2link_middleware::{ClientMessage, DEFAULT_RELAY_PORT, ServerMessage, SportBinding};
use go2link_types::{
    ActionRequest, BridgeError, ConnectionError, MotionCommand, ProtocolError, RobotState, unix_now,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub const DEFAULT_PORT: u16 = DEFAULT_RELAY_PORT;

/// State broadcast period (20 Hz).
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(50);

pub const RATE_PER_SECOND: u32 = 100;
pub const RATE_BURST: u32 = 200;

/// Encoded state frames buffered per client before it starts lagging.
const STATE_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Edge robot
// ---------------------------------------------------------------------------

/// The robot every client talks to: the vendor SDK when one is attached,
/// the posture model otherwise.
///
/// The posture model tracks the last commands in both modes.
#[derive(Default)]
pub struct EdgeRobot {
    sim: SimulatedRobot,
    sdk: Option<Arc<dyn SportBinding>>,
}

impl EdgeRobot {
    pub fn simulated() -> Self {
        Self::default()
    }

    /// Forward commands to an already opened binding.
    pub fn with_sdk(binding: Arc<dyn SportBinding>) -> Self {
        Self {
            sim: SimulatedRobot::new(),
            sdk: Some(binding),
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.sdk.is_none()
    }

    pub fn robot(&self) -> &SimulatedRobot {
        &self.sim
    }

    /// Current telemetry, stamped with Unix time and marked connected.
    pub fn snapshot(&self) -> RobotState {
        let mut state = match &self.sdk {
            Some(binding) => binding.read_state().unwrap_or_default(),
            None => self.sim.state_at(unix_now()),
        };
        if state.timestamp <= 0.0 {
            state.timestamp = unix_now();
        }
        state.connected = true;
        state
    }

    /// Apply one client message. Returns the reply, if the message has one.
    pub fn handle(&mut self, msg: &ClientMessage) -> Option<ServerMessage> {
        match msg {
            ClientMessage::Move { vx, vy, vyaw } => {
                let cmd = MotionCommand::new(*vx, *vy, *vyaw);
                self.sim.set_motion(cmd);
                self.forward(&[move_request(&cmd, false)]);
                None
            }
            ClientMessage::GetState => Some(ServerMessage::state(&self.snapshot())),
            ClientMessage::Ping => Some(ServerMessage::Pong),
            other => {
                if let Some(action) = other.action() {
                    self.apply_action(&action);
                }
                None
            }
        }
    }

    fn apply_action(&mut self, action: &ActionRequest) {
        match &self.sdk {
            Some(_) => {
                debug!(?action, "forwarding action to robot");
                self.forward(&action_requests(action));
            }
            None => info!(?action, mode = ?self.sim.mode(), "simulated action"),
        }
        self.sim.apply(action);
    }

    fn forward(&self, requests: &[SportRequest]) {
        let Some(binding) = &self.sdk else {
            return;
        };
        for request in requests {
            if let Err(e) = binding.request(request) {
                warn!(api_id = request.api_id, error = %e, "sport request failed");
            }
        }
    }
}

/// Decode `text` and apply it to `robot`.
///
/// Malformed input and unknown message types are returned as errors and
/// leave the robot untouched.
pub fn handle_client_message(
    text: &str,
    robot: &Mutex<EdgeRobot>,
) -> Result<Option<ServerMessage>, ProtocolError> {
    let msg = ClientMessage::decode(text)?;
    let mut robot = robot
        .lock()
        .map_err(|_| ProtocolError::Malformed("robot state poisoned".to_string()))?;
    Ok(robot.handle(&msg))
}

fn client_quota() -> Quota {
    let rate = NonZeroU32::new(RATE_PER_SECOND).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(RATE_BURST).unwrap_or(NonZeroU32::MIN);
    Quota::per_second(rate).allow_burst(burst)
}

// ---------------------------------------------------------------------------
// RelayServer
// ---------------------------------------------------------------------------

/// WebSocket relay in front of one robot.
///
/// ```rust,no_run
/// use go2link_relay::RelayServer;
///
/// #[tokio::main]
/// async fn main() -> Result<(), go2link_types::BridgeError> {
///     RelayServer::new().with_port(8765).run().await
/// }
/// ```
pub struct RelayServer {
    port: u16,
    robot: Arc<Mutex<EdgeRobot>>,
    sdk: Option<(Arc<dyn SportBinding>, String)>,
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayServer {
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            robot: Arc::new(Mutex::new(EdgeRobot::simulated())),
            sdk: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Drive the robot at `robot_ip` through `binding`. The binding is
    /// opened when serving starts; if that fails the relay simulates.
    pub fn with_sport_binding(mut self, binding: Arc<dyn SportBinding>, robot_ip: impl Into<String>) -> Self {
        self.sdk = Some((binding, robot_ip.into()));
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Handle on the shared robot, for inspection.
    pub fn robot(&self) -> Arc<Mutex<EdgeRobot>> {
        Arc::clone(&self.robot)
    }

    /// Bind `0.0.0.0:<port>` and serve until the task is cancelled.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Io`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), BridgeError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!(%addr, error = %e, "relay bind failed");
            BridgeError::Io(e)
        })?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(mut self, listener: TcpListener) -> Result<(), BridgeError> {
        let local = listener.local_addr()?;
        self.attach_sdk().await;
        let simulated = self.robot.lock().map(|r| r.is_simulated()).unwrap_or(true);
        info!(addr = %local, simulation_mode = simulated, "relay listening");

        let (states, _) = broadcast::channel::<String>(STATE_BUFFER);
        let ticker = tokio::spawn(broadcast_states(Arc::clone(&self.robot), states.clone()));
        let _ticker = AbortOnDrop(ticker);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let robot = Arc::clone(&self.robot);
                    let rx = states.subscribe();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, peer, robot, rx).await {
                            warn!(peer = %peer, error = %e, "client session failed");
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept failed"),
            }
        }
    }

    /// Open the configured binding off the executor and install it.
    async fn attach_sdk(&mut self) {
        let Some((binding, robot_ip)) = self.sdk.take() else {
            return;
        };
        let opener = Arc::clone(&binding);
        let ip = robot_ip.clone();
        let opened = tokio::task::spawn_blocking(move || opener.open(&ip)).await;
        match opened {
            Ok(Ok(())) => {
                info!(robot_ip = %robot_ip, "sport SDK attached");
                if let Ok(mut robot) = self.robot.lock() {
                    *robot = EdgeRobot::with_sdk(binding);
                }
            }
            Ok(Err(e)) => warn!(robot_ip = %robot_ip, error = %e, "sport SDK unavailable; simulating"),
            Err(e) => warn!(robot_ip = %robot_ip, error = %e, "sport SDK open panicked; simulating"),
        }
    }
}

struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn broadcast_states(robot: Arc<Mutex<EdgeRobot>>, states: broadcast::Sender<String>) {
    let mut tick = tokio::time::interval(BROADCAST_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        let Some(snapshot) = robot.lock().ok().map(|r| r.snapshot()) else {
            return;
        };
        // No clients is fine.
        let _ = states.send(ServerMessage::state(&snapshot).encode());
    }
}

// ---------------------------------------------------------------------------
// Per-client session
// ---------------------------------------------------------------------------

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    robot: Arc<Mutex<EdgeRobot>>,
    mut states: broadcast::Receiver<String>,
) -> Result<(), BridgeError> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| ConnectionError::HandshakeFailed(format!("{peer}: {e}")))?;
    info!(peer = %peer, "client connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let limiter: DefaultDirectRateLimiter = RateLimiter::direct(client_quota());
    let mut dropped: u64 = 0;

    let simulated = robot.lock().map(|r| r.is_simulated()).unwrap_or(true);
    let hello = ServerMessage::connected(simulated).encode();
    if ws_tx.send(Message::Text(hello.into())).await.is_err() {
        return Ok(());
    }

    loop {
        tokio::select! {
            frame = states.recv() => match frame {
                Ok(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(peer = %peer, skipped = n, "client lagging behind state stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if limiter.check().is_err() {
                        dropped += 1;
                        if dropped == 1 || dropped % 100 == 0 {
                            warn!(peer = %peer, dropped, "rate limit exceeded; dropping messages");
                        }
                        continue;
                    }
                    match handle_client_message(text.as_str(), &robot) {
                        Ok(Some(reply)) => {
                            if ws_tx.send(Message::Text(reply.encode().into())).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(peer = %peer, error = %e, "dropping client message"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(peer = %peer, error = %e, "client read error");
                    break;
                }
                _ => {}
            },
        }
    }

    info!(peer = %peer, "client disconnected");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use go2link_types::RobotMode;
    use tokio_tungstenite::connect_async;

    fn sim() -> Mutex<EdgeRobot> {
        Mutex::new(EdgeRobot::simulated())
    }

    fn robot(sim: &Mutex<EdgeRobot>) -> SimulatedRobot {
        sim.lock().map(|s| *s.robot()).unwrap_or_default()
    }

    /// Records every request and reports a fixed battery level.
    #[derive(Default)]
    struct RecordingBinding {
        fail_open: bool,
        sent: Mutex<Vec<SportRequest>>,
    }

    impl RecordingBinding {
        fn api_ids(&self) -> Vec<u32> {
            self.sent
                .lock()
                .map(|sent| sent.iter().map(|r| r.api_id).collect())
                .unwrap_or_default()
        }
    }

    impl SportBinding for RecordingBinding {
        fn open(&self, _robot_ip: &str) -> Result<(), ConnectionError> {
            if self.fail_open {
                return Err(ConnectionError::HandshakeFailed("no sdk".to_string()));
            }
            Ok(())
        }

        fn request(&self, request: &SportRequest) -> Result<(), ConnectionError> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(request.clone());
            }
            Ok(())
        }

        fn read_state(&self) -> Option<RobotState> {
            let mut state = RobotState::default();
            state.battery.level_percent = 77.0;
            Some(state)
        }

        fn close(&self) {}
    }

    #[test]
    fn default_port_is_8765() {
        assert_eq!(RelayServer::new().port(), 8765);
        assert_eq!(RelayServer::new().with_port(9999).port(), 9999);
    }

    #[test]
    fn move_sets_velocity_and_stop_clears_it() -> Result<(), ProtocolError> {
        let sim = sim();
        let reply = handle_client_message(r#"{"type":"move","vx":0.5,"vy":-0.2,"vyaw":0.1}"#, &sim)?;
        assert!(reply.is_none());
        assert_eq!(robot(&sim).motion(), MotionCommand::new(0.5, -0.2, 0.1));

        handle_client_message(r#"{"type":"stopMove"}"#, &sim)?;
        assert_eq!(robot(&sim).motion(), MotionCommand::ZERO);
        assert_eq!(robot(&sim).mode(), RobotMode::StandUp);
        Ok(())
    }

    #[test]
    fn posture_commands_change_mode() -> Result<(), ProtocolError> {
        let sim = sim();
        handle_client_message(r#"{"type":"standDown"}"#, &sim)?;
        assert_eq!(robot(&sim).mode(), RobotMode::StandDown);
        handle_client_message(r#"{"type":"standUp"}"#, &sim)?;
        assert_eq!(robot(&sim).mode(), RobotMode::StandUp);

        handle_client_message(r#"{"type":"move","vx":1.0}"#, &sim)?;
        handle_client_message(r#"{"type":"emergencyStop"}"#, &sim)?;
        assert_eq!(robot(&sim).mode(), RobotMode::Idle);
        assert_eq!(robot(&sim).motion(), MotionCommand::ZERO);
        Ok(())
    }

    #[test]
    fn get_state_and_ping_reply() -> Result<(), ProtocolError> {
        let sim = sim();
        handle_client_message(r#"{"type":"damp"}"#, &sim)?;
        match handle_client_message(r#"{"type":"getState"}"#, &sim)? {
            Some(ServerMessage::State { data }) => {
                assert_eq!(data.mode, "IDLE");
                assert!(data.connected);
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(handle_client_message(r#"{"type":"ping"}"#, &sim)?, Some(ServerMessage::Pong));
        Ok(())
    }

    #[test]
    fn bad_input_is_rejected_without_side_effects() {
        let sim = sim();
        assert!(matches!(
            handle_client_message("not json at all", &sim),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            handle_client_message(r#"{"type":"selfDestruct"}"#, &sim),
            Err(ProtocolError::UnknownType(_))
        ));
        assert_eq!(robot(&sim), SimulatedRobot::new());
    }

    #[test]
    fn snapshots_carry_unix_time() {
        let before = unix_now();
        let state = EdgeRobot::simulated().snapshot();
        assert!(state.timestamp >= before);
        assert!(state.timestamp > 1.6e9);
        assert!(state.connected);
    }

    #[test]
    fn sdk_mode_forwards_commands_to_binding() -> Result<(), ProtocolError> {
        let binding = Arc::new(RecordingBinding::default());
        let edge = Mutex::new(EdgeRobot::with_sdk(binding.clone()));

        handle_client_message(r#"{"type":"move","vx":0.4,"vy":0.0,"vyaw":-0.3}"#, &edge)?;
        handle_client_message(r#"{"type":"emergencyStop"}"#, &edge)?;
        assert_eq!(binding.api_ids(), vec![1008, 2, 0]);
        let first = binding.sent.lock().map(|sent| sent[0].parameter.clone()).ok();
        assert_eq!(first, Some(serde_json::json!({ "x": 0.4, "y": 0.0, "z": -0.3 })));

        match handle_client_message(r#"{"type":"getState"}"#, &edge)? {
            Some(ServerMessage::State { data }) => {
                assert_eq!(data.battery_level, 77.0);
                assert!(data.connected);
                assert!(data.timestamp > 1.6e9);
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert!(!edge.lock().map(|e| e.is_simulated()).unwrap_or(true));
        Ok(())
    }

    #[test]
    fn quota_allows_the_configured_burst() {
        let limiter: DefaultDirectRateLimiter = RateLimiter::direct(client_quota());
        let passed = (0..RATE_BURST + 50).filter(|_| limiter.check().is_ok()).count();
        assert!(passed >= RATE_BURST as usize);
        assert!(passed < (RATE_BURST + 50) as usize);
    }

    #[tokio::test]
    async fn client_sees_connected_then_state_stream() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(RelayServer::new().serve(listener));

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await?;
        let first = ws.next().await.ok_or("closed")??;
        let hello = ServerMessage::decode(first.to_text()?)?;
        assert_eq!(hello, ServerMessage::connected(true));

        let mut states = 0;
        while states < 3 {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await?
                .ok_or("closed")??;
            if let ServerMessage::State { data } = ServerMessage::decode(frame.to_text()?)? {
                assert_eq!(data.foot_contacts.len(), 4);
                states += 1;
            }
        }

        ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await?;
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await?
                .ok_or("closed")??;
            if ServerMessage::decode(frame.to_text()?)? == ServerMessage::Pong {
                break;
            }
        }
        server.abort();
        Ok(())
    }

    #[tokio::test]
    async fn attached_binding_disables_simulation_mode() -> Result<(), Box<dyn std::error::Error>> {
        let binding = Arc::new(RecordingBinding::default());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = RelayServer::new().with_sport_binding(binding.clone(), "192.168.123.161");
        let edge = server.robot();
        let server = tokio::spawn(server.serve(listener));

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await?;
        let first = ws.next().await.ok_or("closed")??;
        assert_eq!(ServerMessage::decode(first.to_text()?)?, ServerMessage::connected(false));

        ws.send(Message::Text(r#"{"type":"move","vx":0.2,"vy":0.1,"vyaw":0.0}"#.into())).await?;
        tokio::time::timeout(Duration::from_secs(2), async {
            while !binding.api_ids().contains(&1008) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;
        assert!(!edge.lock().map(|e| e.is_simulated()).unwrap_or(true));
        server.abort();
        Ok(())
    }

    #[tokio::test]
    async fn binding_that_fails_to_open_leaves_simulation_on() -> Result<(), Box<dyn std::error::Error>> {
        let binding = Arc::new(RecordingBinding { fail_open: true, ..Default::default() });
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(
            RelayServer::new()
                .with_sport_binding(binding.clone(), "192.168.123.161")
                .serve(listener),
        );

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await?;
        let first = ws.next().await.ok_or("closed")??;
        assert_eq!(ServerMessage::decode(first.to_text()?)?, ServerMessage::connected(true));

        ws.send(Message::Text(r#"{"type":"standDown"}"#.into())).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(binding.api_ids().is_empty());
        server.abort();
        Ok(())
    }
}

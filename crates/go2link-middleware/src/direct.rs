//! Direct transport: the vendor pub/sub binding, or a local simulation.
//!
//! Whether a binding is present is decided once, at construction, and fixed
//! in [`DirectMode`]:
//!
//! * [`DirectMode::Real`] – requests go through the [`SportBinding`] using
//!   the api-id table in [`crate::sport`]; state is polled at 50 Hz.
//! * [`DirectMode::Simulated`] – nothing leaves the process. Commands are
//!   logged and fed to a [`SimulatedRobot`], telemetry is synthesised at
//!   20 Hz and test-pattern frames are emitted at ~30 fps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use go2link_hal::{FrameSource, SYNTHETIC_INTERVAL, SimulatedRobot, TestPatternCamera};
use go2link_types::{
    ActionRequest, ConnectionError, LinkState, MotionCommand, RobotState, TransportKind, unix_now,
};
use tracing::{debug, info, trace, warn};

use crate::sport::{SportRequest, action_requests, move_request};
use crate::transport::{
    CONNECT_TIMEOUT, LinkSink, MediaSink, SinkSet, TaskGroup, TelemetrySink, Transport,
    shutdown_requested,
};

/// State poll cadence in real mode.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Test-pattern cadence in simulated mode (~30 fps).
pub const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Opaque handle to the vendor SDK.
///
/// Calls are synchronous; `open` may block and is run off the async
/// executor.
pub trait SportBinding: Send + Sync {
    fn open(&self, robot_ip: &str) -> Result<(), ConnectionError>;

    fn request(&self, request: &SportRequest) -> Result<(), ConnectionError>;

    /// Most recent state the binding has received, if any.
    fn read_state(&self) -> Option<RobotState>;

    fn close(&self);
}

pub enum DirectMode {
    Real(Arc<dyn SportBinding>),
    Simulated,
}

impl DirectMode {
    pub fn detect(binding: Option<Arc<dyn SportBinding>>) -> Self {
        match binding {
            Some(b) => DirectMode::Real(b),
            None => DirectMode::Simulated,
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, DirectMode::Simulated)
    }
}

pub struct DirectTransport {
    robot_ip: String,
    mode: DirectMode,
    connect_timeout: Duration,
    connected: Arc<AtomicBool>,
    avoid: AtomicBool,
    sinks: Arc<SinkSet>,
    sim: Arc<Mutex<SimulatedRobot>>,
    // Serialises request sequences so bursts are never interleaved.
    send_lock: Mutex<()>,
    tasks: TaskGroup,
}

impl DirectTransport {
    pub fn new(robot_ip: impl Into<String>, binding: Option<Arc<dyn SportBinding>>) -> Self {
        let mode = DirectMode::detect(binding);
        let robot_ip = robot_ip.into();
        if mode.is_simulated() {
            info!(robot_ip = %robot_ip, "no SDK binding available; direct transport will simulate");
        }
        Self {
            robot_ip,
            mode,
            connect_timeout: CONNECT_TIMEOUT,
            connected: Arc::new(AtomicBool::new(false)),
            avoid: AtomicBool::new(false),
            sinks: SinkSet::new(),
            sim: Arc::new(Mutex::new(SimulatedRobot::new())),
            send_lock: Mutex::new(()),
            tasks: TaskGroup::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn mode(&self) -> &DirectMode {
        &self.mode
    }

    fn start_simulation(&mut self) {
        let sim = Arc::clone(&self.sim);
        let sinks = Arc::clone(&self.sinks);
        let mut shutdown = self.tasks.signal();
        self.tasks.spawn(async move {
            let mut tick = tokio::time::interval(SYNTHETIC_INTERVAL);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let robot = sim.lock().map(|r| *r).unwrap_or_default();
                        let mut state = robot.state_at(unix_now());
                        state.connected = true;
                        sinks.telemetry(state);
                    }
                    _ = shutdown_requested(&mut shutdown) => break,
                }
            }
        });

        let sinks = Arc::clone(&self.sinks);
        let mut shutdown = self.tasks.signal();
        self.tasks.spawn(async move {
            let mut camera = TestPatternCamera::new("front");
            let mut tick = tokio::time::interval(FRAME_INTERVAL);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if !sinks.has_media() {
                            continue;
                        }
                        match camera.capture() {
                            Ok(frame) => sinks.media(frame),
                            Err(e) => warn!(camera = camera.id(), error = %e, "test pattern capture failed"),
                        }
                    }
                    _ = shutdown_requested(&mut shutdown) => break,
                }
            }
        });
    }

    fn start_polling(&mut self, binding: Arc<dyn SportBinding>) {
        let sinks = Arc::clone(&self.sinks);
        let mut shutdown = self.tasks.signal();
        self.tasks.spawn(async move {
            let mut tick = tokio::time::interval(STATE_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Some(mut state) = binding.read_state() {
                            state.connected = true;
                            sinks.telemetry(state);
                        }
                    }
                    _ = shutdown_requested(&mut shutdown) => break,
                }
            }
        });
    }

    fn issue(&self, binding: &dyn SportBinding, request: &SportRequest) {
        if let Err(e) = binding.request(request) {
            warn!(api_id = request.api_id, topic = request.topic, error = %e, "sport request failed");
        }
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            return Ok(());
        }
        let binding = match &self.mode {
            DirectMode::Real(binding) => Some(Arc::clone(binding)),
            DirectMode::Simulated => None,
        };
        match binding {
            None => {
                self.start_simulation();
                info!(robot_ip = %self.robot_ip, "direct transport connected (simulated)");
            }
            Some(binding) => {
                let opener = Arc::clone(&binding);
                let ip = self.robot_ip.clone();
                let open = tokio::task::spawn_blocking(move || opener.open(&ip));
                match tokio::time::timeout(self.connect_timeout, open).await {
                    Err(_) => return Err(ConnectionError::Timeout(self.connect_timeout)),
                    Ok(Err(e)) => return Err(ConnectionError::Unavailable(e.to_string())),
                    Ok(Ok(result)) => result?,
                }
                self.start_polling(binding);
                info!(robot_ip = %self.robot_ip, "direct transport connected");
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        self.sinks.link(LinkState::Up);
        Ok(())
    }

    async fn disconnect(&mut self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.tasks.shutdown().await;
        if !was_connected {
            return;
        }
        if let DirectMode::Real(binding) = &self.mode {
            binding.close();
        }
        info!(robot_ip = %self.robot_ip, "direct transport disconnected");
        self.sinks.link(LinkState::Down);
    }

    fn send_motion(&self, cmd: MotionCommand) {
        if !self.is_connected() {
            trace!("direct transport not connected; motion dropped");
            return;
        }
        let Ok(_guard) = self.send_lock.lock() else {
            return;
        };
        match &self.mode {
            DirectMode::Simulated => {
                if let Ok(mut robot) = self.sim.lock() {
                    trace!(vx = cmd.vx(), vy = cmd.vy(), vyaw = cmd.vyaw(), "simulated move command");
                    if robot.motion() != cmd {
                        debug!(vx = cmd.vx(), vy = cmd.vy(), vyaw = cmd.vyaw(), "simulated move");
                    }
                    robot.set_motion(cmd);
                }
            }
            DirectMode::Real(binding) => {
                let request = move_request(&cmd, self.avoid.load(Ordering::SeqCst));
                self.issue(binding.as_ref(), &request);
            }
        }
    }

    fn send_actions(&self, actions: &[ActionRequest]) {
        if !self.is_connected() {
            trace!(?actions, "direct transport not connected; actions dropped");
            return;
        }
        let Ok(_guard) = self.send_lock.lock() else {
            return;
        };
        for action in actions {
            if let ActionRequest::ObstacleAvoidance(enable) = action {
                self.avoid.store(*enable, Ordering::SeqCst);
            }
            match &self.mode {
                DirectMode::Simulated => {
                    info!(?action, "simulated action");
                    if let Ok(mut robot) = self.sim.lock() {
                        robot.apply(action);
                    }
                }
                DirectMode::Real(binding) => {
                    for request in action_requests(action) {
                        self.issue(binding.as_ref(), &request);
                    }
                }
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

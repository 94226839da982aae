//! [`BridgeCoordinator`] – owns the transport and everything around it.
//!
//! ```text
//! Idle → Connecting → Ready ⇄ Degraded → Disconnected
//! ```
//!
//! * At most one transport is installed. A replacement is only built after
//!   the previous one has been disconnected.
//! * Each installed transport writes telemetry through its own gate, bound
//!   to one store generation. Tearing the transport down closes the gate, so
//!   late callbacks from it are discarded.
//! * While nothing is `Ready` or `Degraded`, a synthetic generator keeps the
//!   store fresh at 20 Hz with `connected = false`.
//! * A supervisor task warns when a `Ready` transport goes quiet.
//!
//! The coordinator is a cheap handle; clones share the same state.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use go2link_hal::{SYNTHETIC_INTERVAL, SyntheticTelemetry};
use go2link_middleware::{
    DefaultTransportFactory, LinkSink, MediaSink, StoreWriter, TelemetrySink, TelemetryStore,
    Transport, TransportFactory, TransportSpec,
};
use go2link_types::{
    ActionRequest, ConnectionState, LinkState, MediaFrame, MotionCommand, RobotState, TransportKind,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::watchdog::{ComponentHealth, TELEMETRY, TELEMETRY_TIMEOUT, Watchdog};

/// How often the supervisor checks the watchdog.
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(1);

/// Buffered connection-state transitions per [`BridgeCoordinator::transitions`] receiver.
const TRANSITION_CAPACITY: usize = 32;

// ────────────────────────────────────────────────────────────────────────────
// Write gate
// ────────────────────────────────────────────────────────────────────────────

/// Per-transport write permission. Closed until the transport is installed,
/// closed for good at teardown.
#[derive(Default)]
struct Gate {
    writer: Mutex<Option<StoreWriter>>,
}

impl Gate {
    fn open(&self, writer: StoreWriter) {
        if let Ok(mut slot) = self.writer.lock() {
            *slot = Some(writer);
        }
    }

    fn close(&self) {
        if let Ok(mut slot) = self.writer.lock() {
            *slot = None;
        }
    }

    fn is_open(&self) -> bool {
        self.writer
            .lock()
            .map(|w| w.as_ref().is_some_and(StoreWriter::is_current))
            .unwrap_or(false)
    }

    fn publish(&self, state: RobotState) -> bool {
        self.writer
            .lock()
            .map(|w| w.as_ref().is_some_and(|w| w.publish(state)))
            .unwrap_or(false)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Subscription
// ────────────────────────────────────────────────────────────────────────────

/// Live telemetry callback registration. Dropping it unsubscribes.
///
/// A subscription made with no Tokio runtime reachable is inactive and
/// never delivers.
pub struct Subscription {
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Coordinator
// ────────────────────────────────────────────────────────────────────────────

struct Inner {
    factory: Arc<dyn TransportFactory>,
    store: Arc<TelemetryStore>,
    // Serialises connect/disconnect against each other.
    lifecycle: tokio::sync::Mutex<()>,
    transport: tokio::sync::Mutex<Option<Box<dyn Transport>>>,
    gate: Mutex<Option<Arc<Gate>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    transitions: broadcast::Sender<ConnectionState>,
    last_motion: watch::Sender<MotionCommand>,
    media: Arc<Mutex<Option<MediaSink>>>,
    watchdog: Arc<Mutex<Watchdog>>,
    fallback: Mutex<Option<JoinHandle<()>>>,
    supervisor: Option<JoinHandle<()>>,
    // Runtime the coordinator was built on, if any.
    runtime: Option<tokio::runtime::Handle>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.fallback.lock().ok().and_then(|mut f| f.take()) {
            handle.abort();
        }
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
    }
}

#[derive(Clone)]
pub struct BridgeCoordinator {
    inner: Arc<Inner>,
}

impl BridgeCoordinator {
    /// Build an idle coordinator. Inside a Tokio runtime this also starts
    /// the synthetic fallback and the watchdog supervisor; outside one they
    /// start on the first `connect`/`disconnect`.
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        let (state, state_rx) = watch::channel(ConnectionState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let (last_motion, _) = watch::channel(MotionCommand::ZERO);
        let watchdog = Arc::new(Mutex::new(Watchdog::new()));

        let runtime = tokio::runtime::Handle::try_current().ok();
        let supervisor = runtime
            .as_ref()
            .map(|rt| rt.spawn(supervise(Arc::clone(&watchdog), state_rx)));

        let coordinator = Self {
            inner: Arc::new(Inner {
                factory,
                store: Arc::new(TelemetryStore::default()),
                lifecycle: tokio::sync::Mutex::new(()),
                transport: tokio::sync::Mutex::new(None),
                gate: Mutex::new(None),
                state: Arc::new(state),
                transitions,
                last_motion,
                media: Arc::new(Mutex::new(None)),
                watchdog,
                fallback: Mutex::new(None),
                supervisor,
                runtime,
            }),
        };
        coordinator.start_fallback();
        coordinator
    }

    /// Coordinator over the stock transports: simulated direct mode, real
    /// relay, peer unavailable.
    pub fn with_default_factory() -> Self {
        Self::new(Arc::new(DefaultTransportFactory::new()))
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Replace the current transport with one built from `spec`.
    ///
    /// Never fails: the outcome is the returned state, `Ready` or
    /// `Disconnected`.
    pub async fn connect(&self, spec: TransportSpec) -> ConnectionState {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.teardown().await;
        self.start_fallback();
        self.set_state(ConnectionState::Connecting);
        info!(spec = %spec, "connecting");

        let gate = Arc::new(Gate::default());
        let mut transport = self.inner.factory.build(&spec);
        transport.on_telemetry(self.telemetry_sink(&gate));
        transport.on_link_state(self.link_sink(&gate));
        if let Some(sink) = self.media_sink() {
            transport.on_media_frame(sink);
        }

        // The lock is not held while the transport negotiates.
        match transport.connect().await {
            Ok(()) => {
                self.stop_fallback();
                gate.open(self.inner.store.begin_generation());
                if let Ok(mut wd) = self.inner.watchdog.lock() {
                    wd.register(TELEMETRY, TELEMETRY_TIMEOUT);
                }
                if let Ok(mut slot) = self.inner.gate.lock() {
                    *slot = Some(gate);
                }
                *self.inner.transport.lock().await = Some(transport);
                info!(spec = %spec, "transport ready");
                self.set_state(ConnectionState::Ready);
                ConnectionState::Ready
            }
            Err(e) => {
                warn!(spec = %spec, error = %e, "connect failed");
                transport.disconnect().await;
                self.set_state(ConnectionState::Disconnected);
                ConnectionState::Disconnected
            }
        }
    }

    /// Parse an operator-typed target and [`connect`][Self::connect].
    pub async fn connect_to(&self, kind: TransportKind, target: &str) -> ConnectionState {
        self.connect(TransportSpec::from_target(kind, target)).await
    }

    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let had_transport = self.teardown().await;
        self.start_fallback();
        if had_transport || self.connection_state() != ConnectionState::Idle {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Take the transport out, close its gate, then disconnect it. Returns
    /// whether anything was installed.
    async fn teardown(&self) -> bool {
        let old = self.inner.transport.lock().await.take();
        if let Some(gate) = self.inner.gate.lock().ok().and_then(|mut g| g.take()) {
            gate.close();
        }
        if let Ok(mut wd) = self.inner.watchdog.lock() {
            wd.unregister(TELEMETRY);
        }
        match old {
            Some(mut transport) => {
                info!(kind = %transport.kind(), "tearing down transport");
                transport.disconnect().await;
                true
            }
            None => false,
        }
    }

    // ── Commands ────────────────────────────────────────────────────────────

    /// Record `cmd` as the last-sent motion and forward it. Never waits: if
    /// the transport is busy the command is dropped and the next tick
    /// supersedes it.
    pub fn dispatch_motion(&self, cmd: MotionCommand) {
        self.inner.last_motion.send_replace(cmd);
        match self.inner.transport.try_lock() {
            Ok(guard) => match guard.as_ref() {
                Some(transport) => transport.send_motion(cmd),
                None => trace!(?cmd, "no transport; motion dropped"),
            },
            Err(_) => trace!(?cmd, "transport busy; motion dropped"),
        }
    }

    pub async fn dispatch_action(&self, action: ActionRequest) {
        if action == ActionRequest::EmergencyStop {
            self.emergency_stop().await;
            return;
        }
        let guard = self.inner.transport.lock().await;
        match guard.as_ref() {
            Some(transport) => {
                debug!(?action, "dispatching action");
                transport.send_action(action);
            }
            None => trace!(?action, "no transport; action dropped"),
        }
    }

    /// `StopMove` immediately followed by `Damp`, sent as one burst while
    /// holding the transport lock.
    pub async fn emergency_stop(&self) {
        self.inner.last_motion.send_replace(MotionCommand::ZERO);
        let guard = self.inner.transport.lock().await;
        match guard.as_ref() {
            Some(transport) => {
                warn!(kind = %transport.kind(), "emergency stop");
                transport.send_actions(&[ActionRequest::StopMove, ActionRequest::Damp]);
            }
            None => warn!("emergency stop requested with no transport"),
        }
    }

    pub async fn stand_up(&self) {
        self.dispatch_action(ActionRequest::StandUp).await;
    }

    pub async fn stand_down(&self) {
        self.dispatch_action(ActionRequest::StandDown).await;
    }

    pub async fn balance_stand(&self) {
        self.dispatch_action(ActionRequest::BalanceStand).await;
    }

    pub async fn recovery_stand(&self) {
        self.dispatch_action(ActionRequest::RecoveryStand).await;
    }

    /// Clamped motion from raw velocities.
    pub fn move_robot(&self, vx: f64, vy: f64, vyaw: f64) {
        self.dispatch_motion(MotionCommand::new(vx, vy, vyaw));
    }

    pub fn last_motion(&self) -> MotionCommand {
        *self.inner.last_motion.borrow()
    }

    // ── Observation ─────────────────────────────────────────────────────────

    pub fn latest_state(&self) -> Arc<RobotState> {
        self.inner.store.latest()
    }

    pub fn store(&self) -> Arc<TelemetryStore> {
        Arc::clone(&self.inner.store)
    }

    /// Call `callback` for every accepted telemetry update, in order, until
    /// the returned [`Subscription`] is dropped.
    ///
    /// The delivery task runs on the caller's runtime, else on the runtime
    /// the coordinator was built on. With neither, the subscription is
    /// inactive; this never panics.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<RobotState>) + Send + 'static,
    {
        let Some(rt) = tokio::runtime::Handle::try_current()
            .ok()
            .or_else(|| self.inner.runtime.clone())
        else {
            warn!("no Tokio runtime available; telemetry subscription inactive");
            return Subscription { handle: None };
        };
        let mut rx = self.inner.store.subscribe();
        let handle = rt.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(state) => callback(state),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "telemetry subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription {
            handle: Some(handle),
        }
    }

    /// Register the video consumer. Applies from the next `connect`.
    pub fn on_media_frame<F>(&self, callback: F)
    where
        F: Fn(MediaFrame) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.inner.media.lock() {
            *slot = Some(Arc::new(callback));
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Latest-value view of the connection state.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Every transition, in order.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.transitions.subscribe()
    }

    pub async fn transport_kind(&self) -> Option<TransportKind> {
        self.inner.transport.lock().await.as_ref().map(|t| t.kind())
    }

    pub fn telemetry_health(&self) -> ComponentHealth {
        self.inner
            .watchdog
            .lock()
            .map(|wd| wd.health(TELEMETRY))
            .unwrap_or(ComponentHealth::TimedOut)
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn set_state(&self, next: ConnectionState) {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(state = ?next, "connection state");
            let _ = self.inner.transitions.send(next);
        }
    }

    fn telemetry_sink(&self, gate: &Arc<Gate>) -> TelemetrySink {
        let gate = Arc::clone(gate);
        let watchdog = Arc::clone(&self.inner.watchdog);
        Arc::new(move |state: RobotState| {
            if gate.publish(state) {
                if let Ok(mut wd) = watchdog.lock() {
                    wd.heartbeat(TELEMETRY);
                }
            }
        })
    }

    fn link_sink(&self, gate: &Arc<Gate>) -> LinkSink {
        let gate = Arc::clone(gate);
        let state = Arc::clone(&self.inner.state);
        let transitions = self.inner.transitions.clone();
        Arc::new(move |link: LinkState| {
            if !gate.is_open() {
                return;
            }
            let mut next = None;
            state.send_if_modified(|current| {
                let target = match (link, *current) {
                    (LinkState::Reconnecting, ConnectionState::Ready) => ConnectionState::Degraded,
                    (LinkState::Up, ConnectionState::Degraded) => ConnectionState::Ready,
                    _ => return false,
                };
                *current = target;
                next = Some(target);
                true
            });
            if let Some(s) = next {
                match s {
                    ConnectionState::Degraded => warn!("link lost; transport reconnecting"),
                    _ => info!("link restored"),
                }
                let _ = transitions.send(s);
            }
        })
    }

    fn media_sink(&self) -> Option<MediaSink> {
        let slot = Arc::clone(&self.inner.media);
        let present = slot.lock().map(|s| s.is_some()).unwrap_or(false);
        present.then(|| -> MediaSink {
            Arc::new(move |frame: MediaFrame| {
                let sink = slot.lock().ok().and_then(|s| s.clone());
                if let Some(sink) = sink {
                    sink(frame);
                }
            })
        })
    }

    fn start_fallback(&self) {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let Ok(mut slot) = self.inner.fallback.lock() else {
            return;
        };
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let writer = self.inner.store.begin_generation();
        let motion = self.inner.last_motion.subscribe();
        debug!(generation = writer.generation(), "synthetic telemetry on");
        *slot = Some(rt.spawn(synthesize(writer, motion)));
    }

    fn stop_fallback(&self) {
        if let Some(handle) = self.inner.fallback.lock().ok().and_then(|mut f| f.take()) {
            debug!("synthetic telemetry off");
            handle.abort();
        }
    }
}

async fn synthesize(writer: StoreWriter, motion: watch::Receiver<MotionCommand>) {
    let mut tick = tokio::time::interval(SYNTHETIC_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        let cmd = *motion.borrow();
        if !writer.publish(SyntheticTelemetry::now(&cmd)) {
            // Superseded by a newer generation.
            return;
        }
    }
}

async fn supervise(watchdog: Arc<Mutex<Watchdog>>, mut state: watch::Receiver<ConnectionState>) {
    let mut tick = tokio::time::interval(SUPERVISE_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stalled = false;
    loop {
        tick.tick().await;
        if state.has_changed().is_err() {
            return;
        }
        if *state.borrow_and_update() != ConnectionState::Ready {
            stalled = false;
            continue;
        }
        let silence = watchdog.lock().ok().and_then(|wd| {
            wd.check_all()
                .iter()
                .any(|c| c == TELEMETRY)
                .then(|| wd.silence(TELEMETRY))
                .flatten()
        });
        match (silence, stalled) {
            (Some(quiet), false) => {
                warn!(silent_ms = quiet.as_millis() as u64, "telemetry stalled");
                stalled = true;
            }
            (None, true) => {
                info!("telemetry resumed");
                stalled = false;
            }
            _ => {}
        }
    }
}

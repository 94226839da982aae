//! WebSocket client for the edge relay.
//!
//! One connection carries two independent tasks:
//!
//! * **send** – drains the action queue first (`biased` select), then the
//!   latest-wins motion slot. A burst from `send_actions` is one queue item,
//!   so its frames go out back to back.
//! * **recv** – decodes `state` frames into [`RobotState`] and hands them to
//!   the telemetry sink. Malformed frames are logged and dropped.
//!
//! Whichever task finishes first aborts the other. Unless the transport is
//! being shut down, the supervisor then reports [`LinkState::Reconnecting`],
//! waits [`RECONNECT_BACKOFF`] and dials again, forever. Actions still queued
//! when a link drops are discarded before the next link goes up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use go2link_types::{
    ActionRequest, ConnectionError, LinkState, MotionCommand, TransportKind,
};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{
    CONNECT_TIMEOUT, LinkSink, MediaSink, RECONNECT_BACKOFF, SinkSet, TaskGroup, TelemetrySink,
    Transport, shutdown_requested,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ActionQueue = Arc<Mutex<mpsc::UnboundedReceiver<Vec<ActionRequest>>>>;

pub struct RelayTransport {
    url: String,
    connect_timeout: Duration,
    reconnect_backoff: Duration,
    connected: Arc<AtomicBool>,
    sinks: Arc<SinkSet>,
    motion: watch::Sender<MotionCommand>,
    actions: Option<mpsc::UnboundedSender<Vec<ActionRequest>>>,
    tasks: TaskGroup,
}

impl RelayTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let (motion, _) = watch::channel(MotionCommand::ZERO);
        Self {
            url: url.into(),
            connect_timeout: CONNECT_TIMEOUT,
            reconnect_backoff: RECONNECT_BACKOFF,
            connected: Arc::new(AtomicBool::new(false)),
            sinks: SinkSet::new(),
            motion,
            actions: None,
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

    pub fn url(&self) -> &str {
        &self.url
    }
}

async fn dial(url: &str, timeout: Duration) -> Result<Socket, ConnectionError> {
    match tokio::time::timeout(timeout, connect_async(url)).await {
        Err(_) => Err(ConnectionError::Timeout(timeout)),
        Ok(Err(tokio_tungstenite::tungstenite::Error::Io(e)))
            if e.kind() == std::io::ErrorKind::ConnectionRefused =>
        {
            Err(ConnectionError::Refused(format!("{url}: {e}")))
        }
        Ok(Err(e)) => Err(ConnectionError::HandshakeFailed(format!("{url}: {e}"))),
        Ok(Ok((socket, _response))) => Ok(socket),
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            return Ok(());
        }
        let socket = dial(&self.url, self.connect_timeout).await?;
        info!(url = %self.url, "relay connected");

        let (action_tx, action_rx) = mpsc::unbounded_channel();
        self.actions = Some(action_tx);
        self.connected.store(true, Ordering::SeqCst);
        self.sinks.link(LinkState::Up);

        let supervisor = Supervisor {
            url: self.url.clone(),
            connect_timeout: self.connect_timeout,
            backoff: self.reconnect_backoff,
            connected: Arc::clone(&self.connected),
            sinks: Arc::clone(&self.sinks),
            motion: self.motion.clone(),
            actions: Arc::new(Mutex::new(action_rx)),
            shutdown: self.tasks.signal(),
        };
        self.tasks.spawn(supervisor.run(socket));
        Ok(())
    }

    async fn disconnect(&mut self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.actions = None;
        self.tasks.shutdown().await;
        if was_connected {
            info!(url = %self.url, "relay disconnected");
            self.sinks.link(LinkState::Down);
        }
    }

    fn send_motion(&self, cmd: MotionCommand) {
        if !self.is_connected() {
            trace!("relay not connected; motion dropped");
            return;
        }
        self.motion.send_replace(cmd);
    }

    fn send_actions(&self, actions: &[ActionRequest]) {
        if !self.is_connected() {
            trace!(?actions, "relay not connected; actions dropped");
            return;
        }
        if let Some(tx) = &self.actions {
            let _ = tx.send(actions.to_vec());
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

// ────────────────────────────────────────────────────────────────────────────
// Session supervisor
// ────────────────────────────────────────────────────────────────────────────

struct Supervisor {
    url: String,
    connect_timeout: Duration,
    backoff: Duration,
    connected: Arc<AtomicBool>,
    sinks: Arc<SinkSet>,
    motion: watch::Sender<MotionCommand>,
    actions: ActionQueue,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(self, first: Socket) {
        let mut socket = Some(first);
        loop {
            if let Some(ws) = socket.take() {
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    reason = self.session(ws) => {
                        warn!(url = %self.url, reason = %reason, "relay link lost");
                    }
                    _ = shutdown_requested(&mut shutdown) => return,
                }
                self.connected.store(false, Ordering::SeqCst);
                self.sinks.link(LinkState::Reconnecting);
            }

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.backoff) => {}
                _ = shutdown_requested(&mut shutdown) => return,
            }

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                dialled = dial(&self.url, self.connect_timeout) => match dialled {
                    Ok(ws) => {
                        info!(url = %self.url, "relay reconnected");
                        self.discard_stale_actions().await;
                        self.connected.store(true, Ordering::SeqCst);
                        self.sinks.link(LinkState::Up);
                        socket = Some(ws);
                    }
                    Err(e) => debug!(url = %self.url, error = %e, "relay reconnect failed"),
                },
                _ = shutdown_requested(&mut shutdown) => return,
            }
        }
    }

    /// Drop bursts queued for a session that no longer exists. Nothing
    /// requested before a link loss is replayed on the next link.
    async fn discard_stale_actions(&self) {
        let mut queue = self.actions.lock().await;
        let mut dropped = 0usize;
        while let Ok(burst) = queue.try_recv() {
            dropped += burst.len();
        }
        if dropped > 0 {
            warn!(url = %self.url, dropped, "discarding actions queued before link loss");
        }
    }

    /// Run one connection until either side gives up. Returns why.
    async fn session(&self, ws: Socket) -> String {
        let (mut tx, rx) = ws.split();
        if let Err(e) = tx.send(text(ClientMessage::GetState.encode())).await {
            return e.to_string();
        }

        // Dropping the set aborts both tasks, including on shutdown.
        let mut tasks = JoinSet::new();
        tasks.spawn(send_loop(tx, self.motion.subscribe(), Arc::clone(&self.actions)));
        tasks.spawn(recv_loop(rx, Arc::clone(&self.sinks)));

        match tasks.join_next().await {
            Some(Ok(reason)) => reason,
            Some(Err(e)) => format!("relay task failed: {e}"),
            None => "relay session had no tasks".to_string(),
        }
    }
}

fn text(s: String) -> Message {
    Message::Text(s.into())
}

async fn send_loop(
    mut tx: SplitSink<Socket, Message>,
    mut motion: watch::Receiver<MotionCommand>,
    actions: ActionQueue,
) -> String {
    let mut queue = actions.lock().await;
    loop {
        tokio::select! {
            biased;
            burst = queue.recv() => {
                let Some(burst) = burst else {
                    return "action queue closed".to_string();
                };
                for action in burst {
                    let Some(msg) = ClientMessage::from_action(&action) else {
                        debug!(?action, "relay has no verb for action; skipped");
                        continue;
                    };
                    if let Err(e) = tx.send(text(msg.encode())).await {
                        return e.to_string();
                    }
                }
            }
            changed = motion.changed() => {
                if changed.is_err() {
                    return "motion slot closed".to_string();
                }
                let cmd = *motion.borrow_and_update();
                if let Err(e) = tx.send(text(ClientMessage::from_motion(&cmd).encode())).await {
                    return e.to_string();
                }
            }
        }
    }
}

async fn recv_loop(mut rx: SplitStream<Socket>, sinks: Arc<SinkSet>) -> String {
    while let Some(frame) = rx.next().await {
        match frame {
            Ok(Message::Text(body)) => match ServerMessage::decode(body.as_str()) {
                Ok(ServerMessage::State { data }) => sinks.telemetry(data.into_state()),
                Ok(ServerMessage::Connected {
                    simulation_mode,
                    version,
                }) => {
                    info!(simulation_mode, version = %version, "relay session started");
                }
                Ok(ServerMessage::Pong) => trace!("relay pong"),
                Err(e) => warn!(error = %e, "dropping relay frame"),
            },
            Ok(Message::Close(_)) => return "closed by relay".to_string(),
            Ok(_) => {}
            Err(e) => return e.to_string(),
        }
    }
    "relay stream ended".to_string()
}

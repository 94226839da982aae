//! Recording transport used by the coordinator and control-loop tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use go2link_middleware::{LinkSink, TelemetrySink, Transport, TransportFactory, TransportSpec};
use go2link_types::{
    ActionRequest, ConnectionError, LinkState, MotionCommand, RobotState, TransportKind,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Motion(MotionCommand),
    Action(ActionRequest),
}

/// Shared view into whatever the factory built last.
#[derive(Default)]
pub struct Harness {
    sent: Mutex<Vec<Sent>>,
    telemetry: Mutex<Option<TelemetrySink>>,
    link: Mutex<Option<LinkSink>>,
    pub builds: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub refuse: AtomicBool,
}

impl Harness {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<ActionRequest> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Action(a) => Some(a),
                Sent::Motion(_) => None,
            })
            .collect()
    }

    pub fn telemetry_sink(&self) -> Option<TelemetrySink> {
        self.telemetry.lock().ok().and_then(|s| s.clone())
    }

    pub fn push_state(&self, state: RobotState) {
        if let Some(sink) = self.telemetry_sink() {
            sink(state);
        }
    }

    pub fn push_link(&self, state: LinkState) {
        let sink = self.link.lock().ok().and_then(|s| s.clone());
        if let Some(sink) = sink {
            sink(state);
        }
    }
}

pub struct RecordingTransport {
    kind: TransportKind,
    harness: Arc<Harness>,
    connected: bool,
}

#[async_trait]
impl Transport for RecordingTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.harness.refuse.load(Ordering::SeqCst) {
            return Err(ConnectionError::Refused("harness refused".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.harness.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn send_motion(&self, cmd: MotionCommand) {
        if let Ok(mut sent) = self.harness.sent.lock() {
            sent.push(Sent::Motion(cmd));
        }
    }

    // One lock for the whole burst, like the real transports.
    fn send_actions(&self, actions: &[ActionRequest]) {
        if let Ok(mut sent) = self.harness.sent.lock() {
            sent.extend(actions.iter().copied().map(Sent::Action));
        }
    }

    fn on_telemetry(&mut self, sink: TelemetrySink) {
        if let Ok(mut slot) = self.harness.telemetry.lock() {
            *slot = Some(sink);
        }
    }

    fn on_link_state(&mut self, sink: LinkSink) {
        if let Ok(mut slot) = self.harness.link.lock() {
            *slot = Some(sink);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[derive(Default)]
pub struct RecordingFactory {
    pub harness: Arc<Harness>,
}

impl TransportFactory for RecordingFactory {
    fn build(&self, spec: &TransportSpec) -> Box<dyn Transport> {
        self.harness.builds.fetch_add(1, Ordering::SeqCst);
        Box::new(RecordingTransport {
            kind: spec.kind(),
            harness: Arc::clone(&self.harness),
            connected: false,
        })
    }
}

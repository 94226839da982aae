//! Authoritative telemetry snapshot with ordered fan-out.
//!
//! [`TelemetryStore`] keeps two channels side by side:
//!
//! | Channel | Semantics | Used by |
//! |---|---|---|
//! | `watch<Arc<RobotState>>` | latest value, swapped whole | `latest()`, pollers, UI redraws |
//! | `broadcast<Arc<RobotState>>` | every update, in order | [`TelemetryReceiver`] subscribers |
//!
//! Writers hold a [`StoreWriter`] stamped with a *generation*. Starting a new
//! generation (a new transport, or the synthetic fallback taking over)
//! invalidates every older writer, so a transport that is being torn down
//! can never overwrite fresher state.

use std::sync::{Arc, Mutex};

use go2link_types::RobotState;
use tokio::sync::{broadcast, watch};
use tracing::trace;

/// Buffered updates per subscriber before the oldest are dropped.
const DEFAULT_CAPACITY: usize = 256;

pub struct TelemetryStore {
    latest: watch::Sender<Arc<RobotState>>,
    updates: broadcast::Sender<Arc<RobotState>>,
    // Held across check-and-publish so a generation bump cannot race a write.
    generation: Mutex<u64>,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TelemetryStore {
    pub fn new(capacity: usize) -> Self {
        let (latest, _) = watch::channel(Arc::new(RobotState::default()));
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self {
            latest,
            updates,
            generation: Mutex::new(0),
        }
    }

    /// The current snapshot. Cheap: clones the `Arc` only.
    pub fn latest(&self) -> Arc<RobotState> {
        self.latest.borrow().clone()
    }

    /// Latest-value receiver; `changed()` wakes on every accepted write.
    pub fn watch(&self) -> watch::Receiver<Arc<RobotState>> {
        self.latest.subscribe()
    }

    /// Ordered receiver for every accepted write from now on.
    pub fn subscribe(&self) -> TelemetryReceiver {
        TelemetryReceiver {
            receiver: self.updates.subscribe(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.lock().map(|g| *g).unwrap_or(0)
    }

    /// Invalidate all existing writers and return a writer for the new
    /// generation.
    pub fn begin_generation(self: &Arc<Self>) -> StoreWriter {
        let generation = match self.generation.lock() {
            Ok(mut g) => {
                *g += 1;
                *g
            }
            Err(poisoned) => {
                let mut g = poisoned.into_inner();
                *g += 1;
                *g
            }
        };
        StoreWriter {
            store: Arc::clone(self),
            generation,
        }
    }

    /// Publish `state` if `generation` is still current. Returns whether the
    /// write landed.
    pub fn publish(&self, generation: u64, state: RobotState) -> bool {
        let Ok(current) = self.generation.lock() else {
            return false;
        };
        if *current != generation {
            trace!(stale = generation, current = *current, "dropping stale telemetry");
            return false;
        }
        let state = Arc::new(state);
        self.latest.send_replace(Arc::clone(&state));
        // No subscribers is fine.
        let _ = self.updates.send(state);
        true
    }
}

/// Write handle bound to one generation of a [`TelemetryStore`].
#[derive(Clone)]
pub struct StoreWriter {
    store: Arc<TelemetryStore>,
    generation: u64,
}

impl StoreWriter {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `false` once a newer generation has started.
    pub fn is_current(&self) -> bool {
        self.store.generation() == self.generation
    }

    pub fn publish(&self, state: RobotState) -> bool {
        self.store.publish(self.generation, state)
    }
}

/// Ordered telemetry subscription.
pub struct TelemetryReceiver {
    receiver: broadcast::Receiver<Arc<RobotState>>,
}

impl TelemetryReceiver {
    /// Wait for the next update.
    ///
    /// Returns:
    /// * `Ok(state)` – the next accepted write.
    /// * `Err(RecvError::Lagged(n))` – the subscriber fell behind and `n`
    ///   updates were skipped. The caller decides whether to continue.
    /// * `Err(RecvError::Closed)` – the store was dropped.
    pub async fn recv(&mut self) -> Result<Arc<RobotState>, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}

//! Heartbeat deadlines for the bridge's data flows.
//!
//! The coordinator registers `"telemetry"` when a transport becomes ready and
//! heartbeats it on every accepted telemetry write. Its supervisor calls
//! [`Watchdog::check_all`] once a second and warns about anything silent.
//!
//! Time comes from `tokio::time::Instant`, so paused-clock tests can advance
//! past deadlines without sleeping.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Component name heartbeated on every telemetry arrival.
pub const TELEMETRY: &str = "telemetry";

/// Silence after which telemetry counts as stalled.
pub const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    Healthy,
    TimedOut,
}

#[derive(Debug)]
struct Deadline {
    last_heartbeat: Instant,
    timeout: Duration,
}

impl Deadline {
    fn expired(&self) -> bool {
        self.last_heartbeat.elapsed() > self.timeout
    }
}

#[derive(Debug, Default)]
pub struct Watchdog {
    components: HashMap<String, Deadline>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `component`. Its clock starts now; re-registering
    /// restarts it.
    pub fn register(&mut self, component: &str, timeout: Duration) {
        self.components.insert(
            component.to_string(),
            Deadline {
                last_heartbeat: Instant::now(),
                timeout,
            },
        );
    }

    pub fn unregister(&mut self, component: &str) {
        self.components.remove(component);
    }

    /// No-op for unregistered components.
    pub fn heartbeat(&mut self, component: &str) {
        if let Some(d) = self.components.get_mut(component) {
            d.last_heartbeat = Instant::now();
        }
    }

    /// Unregistered components report `TimedOut`.
    pub fn health(&self, component: &str) -> ComponentHealth {
        match self.components.get(component) {
            Some(d) if !d.expired() => ComponentHealth::Healthy,
            _ => ComponentHealth::TimedOut,
        }
    }

    /// Time since the last heartbeat, if registered.
    pub fn silence(&self, component: &str) -> Option<Duration> {
        self.components.get(component).map(|d| d.last_heartbeat.elapsed())
    }

    /// Names of every registered component past its deadline, sorted.
    pub fn check_all(&self) -> Vec<String> {
        let mut stalled: Vec<String> = self
            .components
            .iter()
            .filter(|(_, d)| d.expired())
            .map(|(name, _)| name.clone())
            .collect();
        stalled.sort();
        stalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_keeps_component_alive() {
        let mut wd = Watchdog::new();
        wd.register(TELEMETRY, TELEMETRY_TIMEOUT);
        advance(Duration::from_millis(800)).await;
        wd.heartbeat(TELEMETRY);
        advance(Duration::from_millis(800)).await;
        assert_eq!(wd.health(TELEMETRY), ComponentHealth::Healthy);
        assert!(wd.check_all().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_component_times_out() {
        let mut wd = Watchdog::new();
        wd.register(TELEMETRY, TELEMETRY_TIMEOUT);
        wd.register("media", Duration::from_secs(60));
        advance(Duration::from_millis(1500)).await;
        assert_eq!(wd.health(TELEMETRY), ComponentHealth::TimedOut);
        assert_eq!(wd.check_all(), vec![TELEMETRY.to_string()]);
        assert!(wd.silence(TELEMETRY).is_some_and(|s| s >= Duration::from_millis(1500)));
    }

    #[tokio::test(start_paused = true)]
    async fn reregister_and_unregister() {
        let mut wd = Watchdog::new();
        wd.register(TELEMETRY, TELEMETRY_TIMEOUT);
        advance(Duration::from_secs(2)).await;
        wd.register(TELEMETRY, TELEMETRY_TIMEOUT);
        assert_eq!(wd.health(TELEMETRY), ComponentHealth::Healthy);

        wd.unregister(TELEMETRY);
        assert!(wd.check_all().is_empty());
        assert_eq!(wd.health(TELEMETRY), ComponentHealth::TimedOut);
    }

    #[test]
    fn unknown_component_is_ignored() {
        let mut wd = Watchdog::new();
        wd.heartbeat("ghost");
        assert_eq!(wd.health("ghost"), ComponentHealth::TimedOut);
        assert_eq!(wd.silence("ghost"), None);
    }
}

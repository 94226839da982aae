//! Fixed-rate gamepad → coordinator loop.
//!
//! The input thread publishes snapshots into a `watch` and button edges into
//! an `mpsc`. Every [`CONTROL_INTERVAL`] the loop maps the latest snapshot and
//! dispatches it; button edges are handled as they arrive.
//!
//! A tick is skipped while the pad is disconnected or the coordinator is not
//! `Ready`. When the pad drops out mid-drive one zero command is sent first.

use std::time::Duration;

use go2link_types::{ButtonEvent, ConnectionState, InputState, MotionCommand};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::coordinator::BridgeCoordinator;
use crate::mapper::{CommandMapper, MapperOutput};

/// 50 Hz.
pub const CONTROL_INTERVAL: Duration = Duration::from_millis(20);

pub struct ControlLoop {
    coordinator: BridgeCoordinator,
    mapper: CommandMapper,
    input: watch::Receiver<InputState>,
    buttons: mpsc::Receiver<ButtonEvent>,
    speed: watch::Sender<f64>,
    was_connected: bool,
}

impl ControlLoop {
    pub fn new(
        coordinator: BridgeCoordinator,
        mapper: CommandMapper,
        input: watch::Receiver<InputState>,
        buttons: mpsc::Receiver<ButtonEvent>,
    ) -> Self {
        let (speed, _) = watch::channel(mapper.multiplier().value());
        Self {
            coordinator,
            mapper,
            input,
            buttons,
            speed,
            was_connected: false,
        }
    }

    /// Current speed multiplier, updated on every bumper press.
    pub fn speed(&self) -> watch::Receiver<f64> {
        self.speed.subscribe()
    }

    /// Run until the input sender is dropped.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut tick = tokio::time::interval(CONTROL_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut buttons_open = true;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if self.input.has_changed().is_err() {
                        debug!("input source gone; control loop exiting");
                        return;
                    }
                    self.on_tick();
                }
                event = self.buttons.recv(), if buttons_open => match event {
                    Some(event) => self.on_button(event).await,
                    None => buttons_open = false,
                },
            }
        }
    }

    fn on_tick(&mut self) {
        let input = self.input.borrow_and_update().clone();
        let ready = self.coordinator.connection_state() == ConnectionState::Ready;
        if !input.connected {
            if std::mem::take(&mut self.was_connected) && ready {
                info!("gamepad lost; stopping");
                self.coordinator.dispatch_motion(MotionCommand::ZERO);
            }
            return;
        }
        self.was_connected = true;
        if ready {
            self.coordinator.dispatch_motion(self.mapper.map_motion(&input));
        }
    }

    async fn on_button(&mut self, event: ButtonEvent) {
        match self.mapper.on_button(event) {
            MapperOutput::Action(action) => {
                debug!(button = ?event.button, ?action, "button action");
                self.coordinator.dispatch_action(action).await;
            }
            MapperOutput::SpeedChanged(value) => {
                info!(multiplier = value, "speed multiplier");
                self.speed.send_replace(value);
            }
            MapperOutput::None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingFactory, Sent};
    use go2link_middleware::TransportSpec;
    use go2link_types::{ActionRequest, Button, Stick};
    use std::sync::Arc;

    fn pushing_forward() -> InputState {
        InputState {
            connected: true,
            device_name: "test pad".to_string(),
            left_stick: Stick { x: 0.0, y: -1.0 },
            ..InputState::default()
        }
    }

    struct Rig {
        coord: BridgeCoordinator,
        harness: Arc<crate::testing::Harness>,
        input: watch::Sender<InputState>,
        buttons: mpsc::Sender<ButtonEvent>,
        speed: watch::Receiver<f64>,
        handle: JoinHandle<()>,
    }

    async fn rig(connect: bool) -> Rig {
        let factory = RecordingFactory::default();
        let harness = Arc::clone(&factory.harness);
        let coord = BridgeCoordinator::new(Arc::new(factory));
        if connect {
            coord
                .connect(TransportSpec::Direct {
                    robot_ip: "127.0.0.1".to_string(),
                })
                .await;
        }
        let (input, input_rx) = watch::channel(InputState::disconnected());
        let (buttons, buttons_rx) = mpsc::channel(16);
        let control = ControlLoop::new(coord.clone(), CommandMapper::default(), input_rx, buttons_rx);
        let speed = control.speed();
        Rig {
            coord,
            harness,
            input,
            buttons,
            speed,
            handle: control.spawn(),
        }
    }

    fn motions(sent: &[Sent]) -> Vec<MotionCommand> {
        sent.iter()
            .filter_map(|s| match s {
                Sent::Motion(m) => Some(*m),
                Sent::Action(_) => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn connected_pad_streams_motion_at_fixed_rate() {
        let rig = rig(true).await;
        rig.input.send_replace(pushing_forward());
        tokio::time::sleep(Duration::from_millis(205)).await;

        let sent = motions(&rig.harness.sent());
        assert!((9..=12).contains(&sent.len()), "got {} ticks", sent.len());
        assert!(sent.iter().all(|m| (m.vx() - 0.8).abs() < 1e-9));
        assert_eq!(rig.coord.last_motion().vx(), sent[0].vx());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_pad_or_transport_sends_nothing() {
        let offline = rig(false).await;
        offline.input.send_replace(pushing_forward());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(offline.harness.sent().is_empty());

        // Ready, but the pad never connected.
        let idle = rig(true).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(idle.harness.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unplugging_sends_one_stop() {
        let rig = rig(true).await;
        rig.input.send_replace(pushing_forward());
        tokio::time::sleep(Duration::from_millis(50)).await;
        rig.input.send_replace(InputState::disconnected());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sent = motions(&rig.harness.sent());
        assert_eq!(sent.last(), Some(&MotionCommand::ZERO));
        assert_eq!(sent.iter().filter(|m| m.is_zero()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn buttons_dispatch_actions_and_speed() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig(true).await;
        for button in [Button::A, Button::RightBumper, Button::Back] {
            rig.buttons.send(ButtonEvent { button, pressed: true }).await?;
            rig.buttons.send(ButtonEvent { button, pressed: false }).await?;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            rig.harness.actions(),
            vec![ActionRequest::StandUp, ActionRequest::StopMove, ActionRequest::Damp]
        );
        assert!(rig.speed.has_changed()?);
        assert_eq!(*rig.speed.borrow_and_update(), 1.1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn loop_exits_when_input_source_is_dropped() -> Result<(), Box<dyn std::error::Error>> {
        let rig = rig(false).await;
        drop(rig.input);
        tokio::time::timeout(Duration::from_secs(1), rig.handle).await??;
        Ok(())
    }
}

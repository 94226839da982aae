//! End-to-end: coordinator ↔ relay transport ↔ relay server, over a real
//! loopback WebSocket.

use std::sync::Arc;
use std::time::Duration;

use go2link_middleware::{DefaultTransportFactory, TransportSpec};
use go2link_relay::RelayServer;
use go2link_runtime::BridgeCoordinator;
use go2link_types::{ConnectionState, MotionCommand, RobotMode, TransportKind};
use tokio::net::TcpListener;

/// Poll `check` every 10 ms for up to two seconds.
async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn commands_and_telemetry_cross_the_relay() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let server = RelayServer::new();
    let edge = server.robot();
    let serving = tokio::spawn(server.serve(listener));

    let coord = BridgeCoordinator::with_default_factory();
    let state = coord
        .connect(TransportSpec::Relay {
            url: format!("ws://127.0.0.1:{port}"),
        })
        .await;
    assert_eq!(state, ConnectionState::Ready);
    assert_eq!(coord.transport_kind().await, Some(TransportKind::Relay));

    // Broadcast telemetry replaces the synthetic stream.
    assert!(eventually(|| coord.latest_state().connected).await);

    coord.stand_down().await;
    assert!(
        eventually(|| edge
            .lock()
            .map(|s| s.robot().mode() == RobotMode::StandDown)
            .unwrap_or(false))
        .await
    );
    assert!(eventually(|| coord.latest_state().mode == RobotMode::StandDown).await);

    coord.stand_up().await;
    coord.move_robot(0.5, -0.2, 0.1);
    let wanted = MotionCommand::new(0.5, -0.2, 0.1);
    assert!(
        eventually(|| edge
            .lock()
            .map(|s| s.robot().motion() == wanted)
            .unwrap_or(false))
        .await
    );

    coord.emergency_stop().await;
    assert!(
        eventually(|| edge
            .lock()
            .map(|s| s.robot().mode() == RobotMode::Idle && s.robot().motion().is_zero())
            .unwrap_or(false))
        .await
    );

    coord.disconnect().await;
    assert_eq!(coord.connection_state(), ConnectionState::Disconnected);
    assert_eq!(coord.transport_kind().await, None);
    // Back on synthetic data.
    assert!(eventually(|| !coord.latest_state().connected).await);

    serving.abort();
    Ok(())
}

#[tokio::test]
async fn unreachable_relay_falls_back_to_synthetic() -> Result<(), Box<dyn std::error::Error>> {
    let factory = DefaultTransportFactory::new().with_connect_timeout(Duration::from_millis(200));
    let coord = BridgeCoordinator::new(Arc::new(factory));
    let mut transitions = coord.transitions();

    let state = coord.connect_to(TransportKind::Relay, "10.0.0.5").await;
    assert_eq!(state, ConnectionState::Disconnected);
    assert_eq!(transitions.recv().await?, ConnectionState::Connecting);
    assert_eq!(transitions.recv().await?, ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(120)).await;
    let latest = coord.latest_state();
    assert!(!latest.connected);
    assert_eq!(latest.motors.len(), 12);
    assert!(latest.timestamp > 0.0);
    assert!(latest.battery.level_percent > 0.0);

    // Commands while disconnected go nowhere and do not block.
    coord.move_robot(1.0, 0.0, 0.0);
    coord.stand_up().await;
    Ok(())
}

#[tokio::test]
async fn refused_relay_port_reports_disconnected() -> Result<(), Box<dyn std::error::Error>> {
    // Bind then drop to get a port nothing listens on.
    let port = TcpListener::bind("127.0.0.1:0").await?.local_addr()?.port();
    let coord = BridgeCoordinator::with_default_factory();
    let state = coord
        .connect_to(TransportKind::Relay, &format!("127.0.0.1:{port}"))
        .await;
    assert_eq!(state, ConnectionState::Disconnected);
    assert_eq!(coord.transport_kind().await, None);
    Ok(())
}

//! `go2link` – operator console for the Go2 teleoperation bridge.
//!
//! ```text
//! go2link [--demo-input]     interactive console
//! go2link relay [--port N]   run the edge relay server
//! ```
//!
//! The console:
//!
//! 1. Checks for `~/.go2link/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Starts the gamepad thread and the 50 Hz control loop.
//! 3. Drops the operator into an **interactive REPL** (`/help` for commands).
//! 4. Intercepts **Ctrl-C** to send an emergency stop and exit.

mod config;
mod repl;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use go2link_hal::{DeviceInfo, InputSource, RawSnapshot, ScriptedBackend, profile};
use go2link_relay::RelayServer;
use go2link_runtime::{BridgeCoordinator, CommandMapper, ControlLoop, telemetry};
use go2link_types::{ButtonEvent, InputState, TransportKind};

/// Gamepad sampling period (~60 Hz).
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Invocation {
    Console { demo_input: bool },
    Relay { port: Option<u16> },
    Help,
}

impl Invocation {
    fn parse<I, S>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        match args.first().map(String::as_str) {
            None => Ok(Invocation::Console { demo_input: false }),
            Some("--demo-input") if args.len() == 1 => Ok(Invocation::Console { demo_input: true }),
            Some("-h" | "--help" | "help") => Ok(Invocation::Help),
            Some("relay") => match &args[1..] {
                [] => Ok(Invocation::Relay { port: None }),
                [flag, port] if flag == "--port" => port
                    .parse::<u16>()
                    .map(|p| Invocation::Relay { port: Some(p) })
                    .map_err(|_| format!("'{port}' is not a valid port number")),
                _ => Err("usage: go2link relay [--port N]".to_string()),
            },
            Some(other) => Err(format!("unexpected argument '{other}'")),
        }
    }
}

fn main() -> ExitCode {
    let invocation = match Invocation::parse(std::env::args().skip(1)) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            print_usage();
            return ExitCode::from(2);
        }
    };

    let result = match invocation {
        Invocation::Help => {
            print_usage();
            Ok(())
        }
        Invocation::Relay { port } => run_relay(port),
        Invocation::Console { demo_input } => run_console(demo_input),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay server
// ─────────────────────────────────────────────────────────────────────────────

fn run_relay(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let _telemetry = telemetry::init_tracing("go2link-relay");
    let cfg = config::load_or_default();
    let port = port.unwrap_or(cfg.relay_listen_port);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        println!(
            "  {} relay on {}",
            "go2link".bold(),
            format!("ws://0.0.0.0:{port}").bold().cyan()
        );
        tokio::select! {
            result = RelayServer::new().with_port(port).run() => result?,
            _ = tokio::signal::ctrl_c() => info!("relay stopped by operator"),
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Console
// ─────────────────────────────────────────────────────────────────────────────

fn run_console(demo_input: bool) -> Result<(), Box<dyn std::error::Error>> {
    let _telemetry = telemetry::init_tracing("go2link");
    print_banner();

    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("go2link-rt")
        .build()?;

    // ── Gamepad thread ────────────────────────────────────────────────────
    let stop_input = Arc::new(AtomicBool::new(false));
    let (input_tx, input_rx) = watch::channel(InputState::disconnected());
    let (button_tx, button_rx) = mpsc::channel(64);
    let input_thread = spawn_input_thread(
        cfg.deadzone,
        demo_input,
        input_tx,
        button_tx,
        Arc::clone(&stop_input),
    )?;

    // ── Coordinator and control loop ──────────────────────────────────────
    let mapper = CommandMapper::new(cfg.mapper_config());
    let repl_input = input_rx.clone();
    let (coord, speed) = rt.block_on(async move {
        let coord = BridgeCoordinator::with_default_factory();
        let control = ControlLoop::new(coord.clone(), mapper, input_rx, button_rx);
        let speed = control.speed();
        control.spawn();
        (coord, speed)
    });

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    // Covers signals that arrive outside the prompt; at the prompt the line
    // editor reports Ctrl-C itself.
    let handle = rt.handle().clone();
    let coord_ctrlc = coord.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – emergency stop …".yellow().bold());
        handle.block_on(async {
            coord_ctrlc.emergency_stop().await;
            coord_ctrlc.disconnect().await;
        });
        println!("{}", "  ✓ Stop and damp sent. Exiting go2link.".green());
        std::process::exit(130);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C outside the prompt will not stop the robot");
    }

    println!(
        "  Default transport {} · type {} to connect, {} for commands.\n",
        cfg.transport.to_string().bold(),
        "/connect".bold().cyan(),
        "/help".bold().cyan()
    );
    if demo_input {
        println!("  {}", "Demo input: scripted pad with centred sticks.".dimmed());
    }

    let session = repl::Repl::new(coord, cfg, speed, repl_input);
    let outcome = repl::run(session, rt.handle());

    stop_input.store(true, Ordering::SeqCst);
    if input_thread.join().is_err() {
        warn!("input thread panicked");
    }
    rt.shutdown_timeout(Duration::from_secs(1));
    outcome.map_err(Into::into)
}

/// Poll the gamepad on a dedicated thread. The backend is created on that
/// thread since some gamepad APIs are bound to the thread that opened them.
fn spawn_input_thread(
    deadzone: f64,
    demo: bool,
    state_tx: watch::Sender<InputState>,
    button_tx: mpsc::Sender<ButtonEvent>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("go2link-input".to_string())
        .spawn(move || {
            let mut source = if demo {
                InputSource::new(Box::new(demo_backend()), deadzone)
            } else {
                InputSource::open_default(deadzone)
            };
            if !source.is_available() {
                info!("no gamepad backend; use the REPL to drive");
            }
            while !stop.load(Ordering::SeqCst) {
                let output = source.poll();
                for event in output.events {
                    if let Err(e) = button_tx.try_send(event) {
                        warn!(error = %e, "button event dropped");
                    }
                }
                if state_tx.send(output.state).is_err() {
                    return;
                }
                std::thread::sleep(INPUT_POLL_INTERVAL);
            }
        })
}

fn demo_backend() -> ScriptedBackend {
    let info = DeviceInfo {
        name: "go2link demo pad".to_string(),
        axis_count: 6,
        button_count: 11,
        profile_hint: Some(&profile::STANDARD),
    };
    let neutral = RawSnapshot {
        axes: vec![0.0; 6],
        buttons: vec![false; 11],
        hat: (0, 0),
    };
    ScriptedBackend::new().then_attached(info, neutral)
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       go2link First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up go2link.\n");

    let mut cfg = config::Config::default();

    println!("  How do you reach the robot?");
    println!("    1) Direct    – vendor SDK on the robot's network (default)");
    println!("    2) Relay     – WebSocket relay on an edge computer");
    println!("    3) Peer      – WebRTC session with the robot");
    let choice = repl::prompt_str("  Enter choice [1]: ", "1");
    cfg.transport = match choice.trim() {
        "2" => TransportKind::Relay,
        "3" => TransportKind::Peer,
        _ => TransportKind::Direct,
    };

    match cfg.transport {
        TransportKind::Direct => {
            cfg.robot_ip = repl::prompt_str(&format!("  Robot IP [{}]: ", cfg.robot_ip), &cfg.robot_ip);
        }
        TransportKind::Relay => {
            cfg.relay_host =
                repl::prompt_str(&format!("  Relay host [{}]: ", cfg.relay_host), &cfg.relay_host);
            let port = repl::prompt_str(
                &format!("  Relay port [{}]: ", cfg.relay_port),
                &cfg.relay_port.to_string(),
            );
            if let Ok(p) = port.trim().parse::<u16>() {
                cfg.relay_port = p;
            }
        }
        TransportKind::Peer => {
            let mode = repl::prompt_str("  Peer mode (ap/sta/remote) [ap]: ", "ap");
            cfg.peer_mode = mode.parse().unwrap_or_default();
            if cfg.peer_mode != config::PeerModeSetting::Ap {
                cfg.peer_serial = repl::prompt_str("  Robot serial: ", "");
            }
            if cfg.peer_mode == config::PeerModeSetting::Sta && cfg.peer_serial.is_empty() {
                cfg.robot_ip =
                    repl::prompt_str(&format!("  Robot IP [{}]: ", cfg.robot_ip), &cfg.robot_ip);
            }
            if cfg.peer_mode == config::PeerModeSetting::Remote {
                cfg.remote_username = repl::prompt_str("  Account e-mail: ", "");
                cfg.remote_password = zeroize::Zeroizing::new(repl::prompt_str("  Account password: ", ""));
            }
        }
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____      ___   _ _       _    "#.bold().cyan());
    println!("{}", r#"  / ___| ___|_  ) | (_)_ __ | | __"#.bold().cyan());
    println!("{}", r#" | |  _ / _ \/ /  | | | '_ \| |/ /"#.bold().cyan());
    println!("{}", r#"  \____|\___/___| |_|_|_| |_|_|\_\"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "go2link".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Quadruped teleoperation bridge");
    println!();
}

fn print_usage() {
    println!("usage:");
    println!("  go2link [--demo-input]     interactive console");
    println!("  go2link relay [--port N]   run the edge relay server");
}

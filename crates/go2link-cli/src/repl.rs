//! REPL – the operator's interactive shell.
//!
//! Supported slash-commands:
//!   /connect [direct|relay|peer] [target] – (re)connect, defaults from config
//!   /disconnect                           – drop the link, keep synthetic telemetry
//!   /stand /down /balance /recover /damp  – posture actions
//!   /estop                                – stop motion and damp immediately
//!   /move vx vy vyaw                      – one-shot velocity command
//!   /action <name>                        – named action (`backFlip`, `hello`, ...)
//!   /avoid on|off                         – toggle obstacle avoidance
//!   /state /status                        – telemetry snapshot, link summary
//!   /settings                             – edit `~/.go2link/config.toml`
//!   /help                                 – show this list
//!   /quit | /exit                         – stop, disconnect and exit

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, BufRead, Write};
use tokio::runtime::Handle;
use tokio::sync::watch;

use go2link_middleware::TransportSpec;
use go2link_runtime::{BridgeCoordinator, ComponentHealth};
use go2link_types::{ActionRequest, ConnectionState, InputState, RobotState, TransportKind};

use crate::config::{self, Config, PeerModeSetting};

/// One parsed line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect {
        kind: Option<TransportKind>,
        target: Option<String>,
    },
    Disconnect,
    Action(ActionRequest),
    EmergencyStop,
    Move { vx: f64, vy: f64, vyaw: f64 },
    Avoid(bool),
    State,
    Status,
    Settings,
    Help,
    Quit,
}

impl Command {
    /// Parse a slash-command. The error is a message for the operator.
    pub fn parse(line: &str) -> Result<Command, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err("empty command".to_string());
        };
        let args: Vec<&str> = words.collect();
        let cmd = match head {
            "/connect" => {
                let kind = match args.first() {
                    Some(k) => Some(k.parse::<TransportKind>()?),
                    None => None,
                };
                let target = if args.len() > 1 { Some(args[1..].join(" ")) } else { None };
                Command::Connect { kind, target }
            }
            "/disconnect" => Command::Disconnect,
            "/stand" => Command::Action(ActionRequest::StandUp),
            "/down" => Command::Action(ActionRequest::StandDown),
            "/balance" => Command::Action(ActionRequest::BalanceStand),
            "/recover" => Command::Action(ActionRequest::RecoveryStand),
            "/damp" => Command::Action(ActionRequest::Damp),
            "/estop" => Command::EmergencyStop,
            "/move" => {
                let &[vx, vy, vyaw] = args.as_slice() else {
                    return Err("usage: /move <vx> <vy> <vyaw>".to_string());
                };
                let num = |s: &str| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| format!("'{s}' is not a number"))
                };
                Command::Move {
                    vx: num(vx)?,
                    vy: num(vy)?,
                    vyaw: num(vyaw)?,
                }
            }
            "/action" => {
                let Some(name) = args.first() else {
                    return Err("usage: /action <name>".to_string());
                };
                let action = ActionRequest::from_name(name)
                    .ok_or_else(|| format!("unknown action '{name}'"))?;
                if action == ActionRequest::EmergencyStop {
                    Command::EmergencyStop
                } else {
                    Command::Action(action)
                }
            }
            "/avoid" => match args.first().copied() {
                Some("on") => Command::Avoid(true),
                Some("off") => Command::Avoid(false),
                _ => return Err("usage: /avoid on|off".to_string()),
            },
            "/state" => Command::State,
            "/status" => Command::Status,
            "/settings" => Command::Settings,
            "/help" => Command::Help,
            "/quit" | "/exit" => Command::Quit,
            other => return Err(format!("unknown command '{other}'")),
        };
        Ok(cmd)
    }
}

/// Whether the loop keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Shell state shared across commands.
pub struct Repl {
    coord: BridgeCoordinator,
    cfg: Config,
    speed: watch::Receiver<f64>,
    input: watch::Receiver<InputState>,
}

impl Repl {
    pub fn new(
        coord: BridgeCoordinator,
        cfg: Config,
        speed: watch::Receiver<f64>,
        input: watch::Receiver<InputState>,
    ) -> Self {
        Self {
            coord,
            cfg,
            speed,
            input,
        }
    }

    pub async fn execute(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::Connect { kind, target } => self.cmd_connect(kind, target).await,
            Command::Disconnect => {
                self.coord.disconnect().await;
                println!("  {}", "Disconnected. Showing synthetic telemetry.".yellow());
            }
            Command::Action(action) => {
                if !self.require_link() {
                    return Flow::Continue;
                }
                self.coord.dispatch_action(action).await;
                println!("  {} {:?}", "→".cyan(), action);
            }
            Command::EmergencyStop => {
                self.coord.emergency_stop().await;
                println!("  {}", "EMERGENCY STOP sent (stop + damp).".red().bold());
            }
            Command::Move { vx, vy, vyaw } => {
                if !self.require_link() {
                    return Flow::Continue;
                }
                self.coord.move_robot(vx, vy, vyaw);
                let sent = self.coord.last_motion();
                println!(
                    "  {} vx={:.2} vy={:.2} vyaw={:.2}",
                    "→".cyan(),
                    sent.vx(),
                    sent.vy(),
                    sent.vyaw()
                );
            }
            Command::Avoid(on) => {
                if !self.require_link() {
                    return Flow::Continue;
                }
                self.coord.dispatch_action(ActionRequest::ObstacleAvoidance(on)).await;
                println!("  Obstacle avoidance {}", if on { "on".green() } else { "off".yellow() });
            }
            Command::State => print_state(&self.coord.latest_state()),
            Command::Status => self.cmd_status().await,
            Command::Settings => cmd_settings(&mut self.cfg),
            Command::Help => cmd_help(),
            Command::Quit => {
                self.coord.dispatch_action(ActionRequest::StopMove).await;
                self.coord.disconnect().await;
                println!("{}", "Goodbye.".green());
                return Flow::Quit;
            }
        }
        Flow::Continue
    }

    fn require_link(&self) -> bool {
        if self.coord.connection_state().has_transport() {
            return true;
        }
        println!(
            "  {} Not connected. Use {} first.",
            "!".yellow().bold(),
            "/connect".bold()
        );
        false
    }

    async fn cmd_connect(&self, kind: Option<TransportKind>, target: Option<String>) {
        let kind = kind.unwrap_or(self.cfg.transport);
        let spec = match target {
            Some(t) => TransportSpec::from_target(kind, &t),
            None => self.cfg.spec_for(kind),
        };
        print!("  Connecting ({}) … ", spec.to_string().bold());
        io::stdout().flush().ok();
        match self.coord.connect(spec).await {
            ConnectionState::Ready => println!("{}", "ready".green()),
            other => {
                println!("{}", format!("{other:?}").to_lowercase().red());
                println!("  {}", "Falling back to synthetic telemetry. See the log for details.".dimmed());
            }
        }
    }

    async fn cmd_status(&self) {
        let state = self.coord.connection_state();
        let kind = self.coord.transport_kind().await;
        let input = self.input.borrow().clone();
        let motion = self.coord.last_motion();

        println!("{}", "Status".bold().underline());
        println!("  Connection : {}", colour_state(state));
        println!(
            "  Transport  : {}",
            kind.map(|k| k.to_string()).unwrap_or_else(|| "none".to_string())
        );
        let telemetry = match (state.has_transport(), self.coord.telemetry_health()) {
            (false, _) => "synthetic".dimmed(),
            (true, ComponentHealth::Healthy) => "live".green(),
            (true, ComponentHealth::TimedOut) => "stalled".red(),
        };
        println!("  Telemetry  : {telemetry}");
        if input.connected {
            println!("  Gamepad    : {} {}", "connected".green(), input.device_name.dimmed());
        } else {
            println!("  Gamepad    : {}", "not connected".yellow());
        }
        println!("  Speed      : ×{:.1}", *self.speed.borrow());
        println!(
            "  Last motion: vx={:.2} vy={:.2} vyaw={:.2}",
            motion.vx(),
            motion.vy(),
            motion.vyaw()
        );
    }
}

/// Read lines until `/quit`, end of input or Ctrl-C.
///
/// Ctrl-C at the prompt sends an emergency stop before leaving.
pub fn run(mut repl: Repl, rt: &Handle) -> Result<(), ReadlineError> {
    let mut editor = DefaultEditor::new()?;
    loop {
        let prompt = format!("go2link[{}]> ", prompt_state(repl.coord.connection_state()));
        match editor.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line).ok();
                match Command::parse(line) {
                    Ok(cmd) => {
                        if rt.block_on(repl.execute(cmd)) == Flow::Quit {
                            break;
                        }
                    }
                    Err(msg) => println!(
                        "{} {}. Type {} for available commands.",
                        "Error:".red(),
                        msg,
                        "/help".bold()
                    ),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", "⚠  Ctrl-C – emergency stop".yellow().bold());
                rt.block_on(repl.coord.emergency_stop());
                rt.block_on(repl.coord.disconnect());
                break;
            }
            Err(ReadlineError::Eof) => {
                rt.block_on(repl.execute(Command::Quit));
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "go2link Commands".bold().underline());
    let rows = [
        ("/connect [kind] [target]", "connect via direct, relay or peer"),
        ("/disconnect", "drop the link"),
        ("/stand  /down", "stand up, lie down"),
        ("/balance  /recover", "balance stand, recovery stand"),
        ("/damp", "release the motors"),
        ("/estop", "stop and damp immediately"),
        ("/move vx vy vyaw", "one velocity command (m/s, rad/s)"),
        ("/action <name>", "named action, e.g. hello, dance1, backFlip"),
        ("/avoid on|off", "obstacle avoidance"),
        ("/state", "latest telemetry"),
        ("/status", "connection, gamepad and speed"),
        ("/settings", "edit ~/.go2link/config.toml"),
        ("/quit  /exit", "stop, disconnect and exit"),
    ];
    for (cmd, what) in rows {
        println!("  {:<26} {}", cmd.bold().cyan(), what);
    }
    println!();
}

fn cmd_settings(cfg: &mut Config) {
    println!("{}", "Settings Editor".bold().underline());
    println!("  (press Enter to keep the current value)");

    let transport = prompt_str(
        &format!("  Transport (direct/relay/peer) [{}]: ", cfg.transport),
        &cfg.transport.to_string(),
    );
    match transport.parse::<TransportKind>() {
        Ok(kind) => cfg.transport = kind,
        Err(e) => println!("  {} {}, keeping {}", "Warning:".yellow(), e, cfg.transport),
    }
    cfg.robot_ip = prompt_str(&format!("  Robot IP [{}]: ", cfg.robot_ip), &cfg.robot_ip);
    cfg.relay_host = prompt_str(&format!("  Relay host [{}]: ", cfg.relay_host), &cfg.relay_host);
    cfg.relay_port = prompt_u16(&format!("  Relay port [{}]: ", cfg.relay_port), cfg.relay_port);

    let mode = prompt_str(
        &format!("  Peer mode (ap/sta/remote) [{}]: ", cfg.peer_mode),
        &cfg.peer_mode.to_string(),
    );
    match mode.parse::<PeerModeSetting>() {
        Ok(m) => cfg.peer_mode = m,
        Err(e) => println!("  {} {}, keeping {}", "Warning:".yellow(), e, cfg.peer_mode),
    }
    if cfg.peer_mode != PeerModeSetting::Ap {
        cfg.peer_serial = prompt_str(
            &format!("  Robot serial [{}]: ", cfg.peer_serial),
            &cfg.peer_serial,
        );
    }

    cfg.deadzone = prompt_f64(&format!("  Stick deadzone [{}]: ", cfg.deadzone), cfg.deadzone)
        .clamp(0.0, 0.9);
    cfg.boost = prompt_f64(&format!("  Trigger boost [{}]: ", cfg.boost), cfg.boost).max(1.0);

    match config::save(cfg) {
        Ok(()) => println!(
            "{} {}",
            "✓ Settings saved to".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    println!("  {}", "Speed and deadzone changes apply on next start.".dimmed());
}

fn print_state(s: &RobotState) {
    let source = if s.connected { "robot".green() } else { "synthetic".yellow() };
    println!("{} ({})", "Robot State".bold().underline(), source);
    println!("  Mode     : {}", s.mode.label().bold());
    println!(
        "  Battery  : {:.0}%  {:.1} V  {:.1} A",
        s.battery.level_percent, s.battery.voltage, s.battery.current
    );
    println!(
        "  Attitude : roll {:+.1}°  pitch {:+.1}°  yaw {:+.1}°",
        s.imu.roll_deg(),
        s.imu.pitch_deg(),
        s.imu.yaw_deg()
    );
    println!(
        "  Velocity : vx {:+.2}  vy {:+.2}  vyaw {:+.2}",
        s.velocity[0], s.velocity[1], s.velocity[2]
    );
    let feet: String = s
        .feet
        .iter()
        .map(|f| if f.contact { '●' } else { '○' })
        .collect();
    println!("  Feet     : {feet}");
    println!("  Motors   : max {:.0} °C", s.max_motor_temperature());
    if !s.is_healthy() {
        println!("  {}", "Health check failed".red().bold());
    }
    if s.error.code != 0 {
        println!("  Error    : {} {}", s.error.code.to_string().red(), s.error.message);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_state(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Idle => "idle",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Ready => "ready",
        ConnectionState::Degraded => "degraded",
        ConnectionState::Disconnected => "offline",
    }
}

fn colour_state(state: ConnectionState) -> colored::ColoredString {
    let label = prompt_state(state);
    match state {
        ConnectionState::Ready => label.green(),
        ConnectionState::Degraded | ConnectionState::Connecting => label.yellow(),
        ConnectionState::Idle | ConnectionState::Disconnected => label.red(),
    }
}

fn prompt_u16(msg: &str, default: u16) -> u16 {
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<u16>() {
        Ok(v) => v,
        Err(_) => {
            println!(
                "  {} '{}' is not a valid port number, keeping {}",
                "Warning:".yellow(),
                raw,
                default
            );
            default
        }
    }
}

fn prompt_f64(msg: &str, default: f64) -> f64 {
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => {
            println!("  {} '{}' is not a number, keeping {}", "Warning:".yellow(), raw, default);
            default
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub(crate) fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}

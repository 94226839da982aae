//! Configuration Vault – reads/writes `~/.go2link/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use go2link_hal::DEFAULT_DEADZONE;
use go2link_middleware::{
    DEFAULT_RELAY_HOST, DEFAULT_RELAY_PORT, DEFAULT_ROBOT_IP, PeerMode, StaTarget, TransportSpec,
    relay_url,
};
use go2link_runtime::MapperConfig;
use go2link_types::{BridgeError, TransportKind};

/// How a peer session reaches the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerModeSetting {
    /// The robot's own Wi-Fi access point.
    #[default]
    Ap,
    /// Robot and operator on the same LAN.
    Sta,
    /// Through the vendor's cloud account.
    Remote,
}

impl std::fmt::Display for PeerModeSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerModeSetting::Ap => write!(f, "ap"),
            PeerModeSetting::Sta => write!(f, "sta"),
            PeerModeSetting::Remote => write!(f, "remote"),
        }
    }
}

impl std::str::FromStr for PeerModeSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ap" => Ok(PeerModeSetting::Ap),
            "sta" => Ok(PeerModeSetting::Sta),
            "remote" => Ok(PeerModeSetting::Remote),
            other => Err(format!("unknown peer mode '{other}'")),
        }
    }
}

/// Persisted operator configuration stored in `~/.go2link/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Transport `/connect` uses when none is given.
    #[serde(default = "default_transport")]
    pub transport: TransportKind,

    /// Robot address for direct and peer STA sessions.
    #[serde(default = "default_robot_ip")]
    pub robot_ip: String,

    /// Edge computer running `go2link relay`.
    #[serde(default = "default_relay_host")]
    pub relay_host: String,

    #[serde(default = "default_relay_port")]
    pub relay_port: u16,

    #[serde(default)]
    pub peer_mode: PeerModeSetting,

    /// Robot serial number. Selects the robot in STA and remote peer modes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub peer_serial: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_username: String,

    /// Cloud account password (stored as plain text – the vault file is
    /// owner-only).
    #[serde(default, skip_serializing_if = "is_blank")]
    pub remote_password: Zeroizing<String>,

    /// Stick deadzone, `[0, 1)`.
    #[serde(default = "default_deadzone")]
    pub deadzone: f64,

    #[serde(default = "default_base_vx")]
    pub base_vx: f64,

    #[serde(default = "default_base_vy")]
    pub base_vy: f64,

    #[serde(default = "default_base_vyaw")]
    pub base_vyaw: f64,

    /// Forward-speed factor at full right trigger.
    #[serde(default = "default_boost")]
    pub boost: f64,

    /// Port `go2link relay` listens on.
    #[serde(default = "default_relay_port")]
    pub relay_listen_port: u16,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("transport", &self.transport)
            .field("robot_ip", &self.robot_ip)
            .field("relay_host", &self.relay_host)
            .field("relay_port", &self.relay_port)
            .field("peer_mode", &self.peer_mode)
            .field("peer_serial", &self.peer_serial)
            .field("remote_username", &self.remote_username)
            .field(
                "remote_password",
                if self.remote_password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("deadzone", &self.deadzone)
            .field("base_vx", &self.base_vx)
            .field("base_vy", &self.base_vy)
            .field("base_vyaw", &self.base_vyaw)
            .field("boost", &self.boost)
            .field("relay_listen_port", &self.relay_listen_port)
            .finish()
    }
}

fn is_blank(s: &Zeroizing<String>) -> bool {
    s.is_empty()
}

fn default_transport() -> TransportKind {
    TransportKind::Direct
}
fn default_robot_ip() -> String {
    DEFAULT_ROBOT_IP.to_string()
}
fn default_relay_host() -> String {
    DEFAULT_RELAY_HOST.to_string()
}
fn default_relay_port() -> u16 {
    DEFAULT_RELAY_PORT
}
fn default_deadzone() -> f64 {
    DEFAULT_DEADZONE
}
fn default_base_vx() -> f64 {
    MapperConfig::default().base_vx
}
fn default_base_vy() -> f64 {
    MapperConfig::default().base_vy
}
fn default_base_vyaw() -> f64 {
    MapperConfig::default().base_vyaw
}
fn default_boost() -> f64 {
    MapperConfig::default().boost
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            robot_ip: default_robot_ip(),
            relay_host: default_relay_host(),
            relay_port: default_relay_port(),
            peer_mode: PeerModeSetting::default(),
            peer_serial: String::new(),
            remote_username: String::new(),
            remote_password: Zeroizing::new(String::new()),
            deadzone: default_deadzone(),
            base_vx: default_base_vx(),
            base_vy: default_base_vy(),
            base_vyaw: default_base_vyaw(),
            boost: default_boost(),
            relay_listen_port: default_relay_port(),
        }
    }
}

impl Config {
    /// Connection target for `kind`, filled in from the saved addresses.
    pub fn spec_for(&self, kind: TransportKind) -> TransportSpec {
        match kind {
            TransportKind::Direct => TransportSpec::Direct {
                robot_ip: self.robot_ip.clone(),
            },
            TransportKind::Relay => TransportSpec::Relay {
                url: relay_url(&self.relay_host, self.relay_port),
            },
            TransportKind::Peer => TransportSpec::Peer {
                mode: self.peer_session_mode(),
            },
        }
    }

    /// The configured default connection.
    pub fn transport_spec(&self) -> TransportSpec {
        self.spec_for(self.transport)
    }

    fn peer_session_mode(&self) -> PeerMode {
        match self.peer_mode {
            PeerModeSetting::Ap => PeerMode::LocalAp,
            PeerModeSetting::Sta if self.peer_serial.is_empty() => {
                PeerMode::LocalSta(StaTarget::Ip(self.robot_ip.clone()))
            }
            PeerModeSetting::Sta => PeerMode::LocalSta(StaTarget::Serial(self.peer_serial.clone())),
            PeerModeSetting::Remote => PeerMode::Remote {
                serial: self.peer_serial.clone(),
                username: self.remote_username.clone(),
                password: self.remote_password.clone(),
            },
        }
    }

    pub fn mapper_config(&self) -> MapperConfig {
        MapperConfig {
            base_vx: self.base_vx,
            base_vy: self.base_vy,
            base_vyaw: self.base_vyaw,
            boost: self.boost,
        }
    }
}

/// Return the path to `~/.go2link/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".go2link").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, BridgeError> {
    let cfg = load_from(&config_path())?;
    Ok(cfg.map(|mut cfg| {
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

/// Saved config with environment overrides, or defaults when there is no
/// file or it cannot be parsed.
pub fn load_or_default() -> Config {
    match load() {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            tracing::warn!(error = %e, "config unreadable; using defaults");
            Config::default()
        }
    }
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `GO2LINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `GO2LINK_TRANSPORT` | `transport` |
/// | `GO2LINK_ROBOT_IP` | `robot_ip` |
/// | `GO2LINK_RELAY_HOST` | `relay_host` |
/// | `GO2LINK_RELAY_PORT` | `relay_port` |
/// | `GO2LINK_DEADZONE` | `deadzone` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(kind) = lookup("GO2LINK_TRANSPORT").and_then(|v| v.parse().ok()) {
        cfg.transport = kind;
    }
    if let Some(ip) = lookup("GO2LINK_ROBOT_IP") {
        cfg.robot_ip = ip;
    }
    if let Some(host) = lookup("GO2LINK_RELAY_HOST") {
        cfg.relay_host = host;
    }
    if let Some(port) = lookup("GO2LINK_RELAY_PORT").and_then(|v| v.parse().ok()) {
        cfg.relay_port = port;
    }
    if let Some(dz) = lookup("GO2LINK_DEADZONE").and_then(|v| v.parse::<f64>().ok()) {
        if (0.0..1.0).contains(&dz) {
            cfg.deadzone = dz;
        }
    }
}

/// Save the config to disk, creating `~/.go2link/` if necessary.
pub fn save(cfg: &Config) -> Result<(), BridgeError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
        }
    }
    let raw = Zeroizing::new(
        toml::to_string_pretty(cfg).map_err(|e| BridgeError::Config(e.to_string()))?,
    );
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(raw.as_bytes())?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw.as_bytes())?;
    Ok(())
}

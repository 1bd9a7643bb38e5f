//! Configuration Vault – reads/writes `~/.vigil/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vigil_kernel::{AlertMode, MonitorConfig, RecordPolicy};
use vigil_types::VigilError;

/// Persisted hub and node configuration stored in `~/.vigil/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TCP port the hub listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address the hub binds to.
    #[serde(default = "default_bind_host")]
    pub bind_host: IpAddr,

    /// Silence longer than this marks a client stale.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// How often the timeout monitor scans the registry.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub record_policy: RecordPolicy,

    #[serde(default)]
    pub alert_mode: AlertMode,

    /// Concurrent connection cap; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,

    /// Node mode: `host:port` of the hub.
    #[serde(default = "default_hub_addr")]
    pub hub_addr: String,

    /// Node mode: time between pulses.
    #[serde(default = "default_pulse_interval_ms")]
    pub pulse_interval_ms: u64,
}

fn default_port() -> u16 {
    vigil_hub::DEFAULT_PORT
}
fn default_bind_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_deadline_ms() -> u64 {
    5_000
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_hub_addr() -> String {
    vigil_node::node::DEFAULT_HUB_ADDR.to_string()
}
fn default_pulse_interval_ms() -> u64 {
    1_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_host: default_bind_host(),
            deadline_ms: default_deadline_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            record_policy: RecordPolicy::default(),
            alert_mode: AlertMode::default(),
            max_connections: None,
            hub_addr: default_hub_addr(),
            pulse_interval_ms: default_pulse_interval_ms(),
        }
    }
}

impl Config {
    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            deadline: Duration::from_millis(self.deadline_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            mode: self.alert_mode,
        }
    }

    pub fn pulse_interval(&self) -> Duration {
        Duration::from_millis(self.pulse_interval_ms)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), VigilError> {
        if self.poll_interval_ms == 0 {
            return Err(VigilError::Config("poll_interval_ms must be greater than 0".into()));
        }
        if self.pulse_interval_ms == 0 {
            return Err(VigilError::Config("pulse_interval_ms must be greater than 0".into()));
        }
        if self.max_connections == Some(0) {
            return Err(VigilError::Config("max_connections must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Return the path to `~/.vigil/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".vigil").join("config.toml")
}

/// Load the config from disk, falling back to defaults when the file is
/// absent.  `VIGIL_*` overrides apply either way.
pub fn load_or_default() -> Result<Config, VigilError> {
    load_or_default_from(&config_path())
}

pub(crate) fn load_or_default_from(path: &Path) -> Result<Config, VigilError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, VigilError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        VigilError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| VigilError::Config(format!("failed to parse config: {e}")))?;
    Ok(Some(cfg))
}

/// Apply `VIGIL_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `VIGIL_PORT` | `port` |
/// | `VIGIL_DEADLINE_MS` | `deadline_ms` |
/// | `VIGIL_POLL_INTERVAL_MS` | `poll_interval_ms` |
/// | `VIGIL_PULSE_INTERVAL_MS` | `pulse_interval_ms` |
/// | `VIGIL_HUB_ADDR` | `hub_addr` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(port) = env_number("VIGIL_PORT") {
        cfg.port = port;
    }
    if let Some(ms) = env_number("VIGIL_DEADLINE_MS") {
        cfg.deadline_ms = ms;
    }
    if let Some(ms) = env_number("VIGIL_POLL_INTERVAL_MS") {
        cfg.poll_interval_ms = ms;
    }
    if let Some(ms) = env_number("VIGIL_PULSE_INTERVAL_MS") {
        cfg.pulse_interval_ms = ms;
    }
    if let Ok(addr) = std::env::var("VIGIL_HUB_ADDR") {
        cfg.hub_addr = addr;
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Save the config to `~/.vigil/config.toml` with owner-only permissions.
pub fn save(cfg: &Config) -> Result<(), VigilError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path, creating its directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), VigilError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            VigilError::Config(format!("failed to create config directory: {e}"))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                VigilError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| VigilError::Config(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| VigilError::Config(format!("failed to write config at {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

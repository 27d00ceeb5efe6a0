//! Settings resolution for devtunnel.
//!
//! Implements hierarchical settings resolution:
//! 1. Built-in defaults
//! 2. Global settings (~/.config/devtunnel/settings.json), or an explicit file
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete devtunnel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub tunnel: TunnelSettings,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub log: LogSettings,
}

/// Retry and readiness-probe tuning for tunnel establishment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// Dial attempts before giving up.
    pub max_attempts: u32,
    /// Fixed delay between attempts (milliseconds).
    pub retry_delay_ms: u64,
    /// Upper bound on waiting for the first byte (milliseconds). `None` waits
    /// for the remote side to write or hang up.
    pub probe_timeout_ms: Option<u64>,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            retry_delay_ms: 1_000,
            probe_timeout_ms: Some(5_000),
        }
    }
}

impl TunnelSettings {
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout_ms.map(Duration::from_millis)
    }
}

/// Bridge daemon client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Bridge client binary used to manage forwards.
    pub bin: PathBuf,
    /// Arguments placed before every bridge command (e.g. when `bin` is
    /// `ssh` and the bridge client runs on another host).
    pub prefix_args: Vec<String>,
    /// Default device serial when none is given on the command line.
    pub serial: Option<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            bin: PathBuf::from("adb"),
            prefix_args: Vec::new(),
            serial: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load settings with hierarchical resolution.
///
/// When `explicit` is given it replaces the global settings file and must exist.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();

    match explicit {
        Some(path) => {
            let file = load_settings_file(path)?;
            merge_settings(&mut settings, file);
        }
        None => {
            if let Some(global_path) = global_settings_path()
                && global_path.exists()
            {
                let global = load_settings_file(&global_path)?;
                merge_settings(&mut settings, global);
            }
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());

    Ok(settings)
}

/// `<config dir>/devtunnel/settings.json`, e.g. `~/.config/devtunnel/settings.json`
/// on Linux.
pub fn global_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("devtunnel").join("settings.json"))
}

fn load_settings_file(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn merge_settings(base: &mut Settings, overlay: Settings) {
    base.tunnel = overlay.tunnel;

    base.bridge.bin = overlay.bridge.bin;
    base.bridge.prefix_args = overlay.bridge.prefix_args;
    if overlay.bridge.serial.is_some() {
        base.bridge.serial = overlay.bridge.serial;
    }

    base.log = overlay.log;
}

/// Apply `DEVTUNNEL_*` overrides. Unparseable values are ignored.
fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("DEVTUNNEL_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
        settings.tunnel.max_attempts = n;
    }
    if let Some(ms) = lookup("DEVTUNNEL_RETRY_DELAY_MS").and_then(|v| v.parse().ok()) {
        settings.tunnel.retry_delay_ms = ms;
    }
    if let Some(val) = lookup("DEVTUNNEL_PROBE_TIMEOUT_MS") {
        // "0" disables the probe timeout.
        match val.parse::<u64>() {
            Ok(0) => settings.tunnel.probe_timeout_ms = None,
            Ok(ms) => settings.tunnel.probe_timeout_ms = Some(ms),
            Err(_) => {}
        }
    }
    if let Some(bin) = lookup("DEVTUNNEL_BRIDGE_BIN") {
        settings.bridge.bin = PathBuf::from(bin);
    }
    if let Some(serial) = lookup("DEVTUNNEL_SERIAL") {
        settings.bridge.serial = Some(serial);
    }
    if let Some(level) = lookup("DEVTUNNEL_LOG_LEVEL") {
        settings.log.level = level;
    }
}

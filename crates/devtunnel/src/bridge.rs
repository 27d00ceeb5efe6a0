//! [`Device`] backed by the bridge daemon's command-line client.
//!
//! Forwards are managed with `<bin> [-s <serial>] forward tcp:<port> <remote>`
//! and removed with `<bin> [-s <serial>] forward --remove tcp:<port>`.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use devtunnel_core::config::BridgeSettings;

use crate::device::{Device, DeviceError, LocalPort, RemoteSocket};

/// A device addressed through the bridge client binary.
#[derive(Debug, Clone)]
pub struct BridgeCliDevice {
    bin: PathBuf,
    prefix_args: Vec<String>,
    serial: Option<String>,
    label: String,
}

impl BridgeCliDevice {
    /// Device reached with `bin`. Without a serial the bridge picks the only
    /// attached device.
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            prefix_args: Vec::new(),
            serial: None,
            label: "default".to_string(),
        }
    }

    #[must_use]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        let serial = serial.into();
        self.label.clone_from(&serial);
        self.serial = Some(serial);
        self
    }

    /// Arguments placed before every bridge command, e.g. `["buildhost", "adb"]`
    /// when `bin` is `ssh`.
    #[must_use]
    pub fn with_prefix_args(mut self, args: Vec<String>) -> Self {
        self.prefix_args = args;
        self
    }

    pub fn from_settings(settings: &BridgeSettings) -> Self {
        let device = Self::new(settings.bin.clone()).with_prefix_args(settings.prefix_args.clone());
        match &settings.serial {
            Some(serial) => device.with_serial(serial.clone()),
            None => device,
        }
    }

    fn args(&self, command: &[String]) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.prefix_args.iter().map(OsString::from).collect();
        if let Some(serial) = &self.serial {
            args.push("-s".into());
            args.push(serial.into());
        }
        args.extend(command.iter().map(OsString::from));
        args
    }

    fn command_line(&self, args: &[OsString]) -> String {
        let mut line = self.bin.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    async fn run(&self, command: &[String]) -> Result<(), DeviceError> {
        let args = self.args(command);
        let cmd_line = self.command_line(&args);
        debug!("exec: {cmd_line}");

        let output = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DeviceError::Io {
                program: self.bin.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(DeviceError::Command {
                command: cmd_line,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Device for BridgeCliDevice {
    fn serial(&self) -> &str {
        &self.label
    }

    async fn forward(&self, local: LocalPort, remote: &RemoteSocket) -> Result<(), DeviceError> {
        self.run(&["forward".into(), local.to_string(), remote.to_string()])
            .await
    }

    async fn remove_forward(&self, local: LocalPort) -> Result<(), DeviceError> {
        self.run(&["forward".into(), "--remove".into(), local.to_string()])
            .await
    }
}

//! devtunnel CLI
//!
//! Forwards an abstract-named socket on a device through the bridge daemon and
//! streams it to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::info;

use devtunnel::{BridgeCliDevice, CleanupScope, Connector, ConnectorConfig, Device};
use devtunnel_core::config::{Settings, load_settings};

#[derive(Parser, Debug)]
#[command(name = "devtunnel")]
#[command(version, about = "Open streams to device sockets through a bridge daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to a device socket and copy its stream to stdout
    Connect(TunnelArgs),
    /// Check that a device socket is producing data, then disconnect
    Probe(TunnelArgs),
}

#[derive(Args, Debug)]
struct TunnelArgs {
    /// Abstract socket name on the device (e.g. "gapii")
    #[arg(long)]
    socket: String,

    /// Device serial (defaults to the bridge's only device)
    #[arg(short, long)]
    serial: Option<String>,

    /// Bridge client binary
    #[arg(long)]
    bridge_bin: Option<PathBuf>,

    /// Dial attempts before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay between dial attempts, in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Readiness probe timeout in milliseconds (0 waits indefinitely)
    #[arg(long)]
    probe_timeout_ms: Option<u64>,

    /// Settings file (replaces the global settings file)
    #[arg(long, env = "DEVTUNNEL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug")
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl TunnelArgs {
    /// CLI flags take precedence over file and environment settings.
    fn apply(&self, settings: &mut Settings) {
        if let Some(serial) = &self.serial {
            settings.bridge.serial = Some(serial.clone());
        }
        if let Some(bin) = &self.bridge_bin {
            settings.bridge.bin.clone_from(bin);
        }
        if let Some(n) = self.max_attempts {
            settings.tunnel.max_attempts = n;
        }
        if let Some(ms) = self.delay_ms {
            settings.tunnel.retry_delay_ms = ms;
        }
        if let Some(ms) = self.probe_timeout_ms {
            settings.tunnel.probe_timeout_ms = (ms > 0).then_some(ms);
        }
        if let Some(level) = &self.log_level {
            settings.log.level.clone_from(level);
        }
        if self.log_json {
            settings.log.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (Command::Connect(args) | Command::Probe(args)) = &cli.command;

    let mut settings = load_settings(args.config.as_deref())?;
    args.apply(&mut settings);

    devtunnel_core::tracing_init::init_tracing(
        &format!("devtunnel={}", settings.log.level),
        settings.log.json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %args.socket,
        bridge = %settings.bridge.bin.display(),
        max_attempts = settings.tunnel.max_attempts,
        "Starting devtunnel"
    );

    let device: Arc<dyn Device> = Arc::new(BridgeCliDevice::from_settings(&settings.bridge));
    let connector = Connector::new(ConnectorConfig::from(&settings.tunnel));
    let scope = CleanupScope::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = match &cli.command {
        Command::Connect(args) => {
            stream_to_stdout(&connector, device, &args.socket, &scope, shutdown_rx).await
        }
        Command::Probe(args) => probe(&connector, device, &args.socket, &scope, shutdown_rx).await,
    };

    signal.abort();
    let report = scope.run().await;
    info!(
        removed = report.removed,
        failed = report.failed,
        "devtunnel stopped"
    );
    result
}

async fn stream_to_stdout(
    connector: &Connector,
    device: Arc<dyn Device>,
    socket: &str,
    scope: &CleanupScope,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut stop = shutdown.clone();
    let mut conn = connector
        .connect_until(device, socket, scope, shutdown)
        .await?;
    let mut stdout = tokio::io::stdout();

    tokio::select! {
        copied = tokio::io::copy(&mut conn, &mut stdout) => {
            let bytes = copied?;
            info!(bytes, "Device closed the stream");
        }
        Ok(_) = stop.wait_for(|stopped| *stopped) => {
            info!("Closing tunnel");
        }
    }

    stdout.flush().await?;
    conn.close().await?;
    Ok(())
}

async fn probe(
    connector: &Connector,
    device: Arc<dyn Device>,
    socket: &str,
    scope: &CleanupScope,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut conn = connector
        .connect_until(device, socket, scope, shutdown)
        .await?;
    info!(
        port = %conn.local_port(),
        remote = %conn.remote(),
        "Service is ready"
    );
    conn.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn args(argv: &[&str]) -> TunnelArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        let (Command::Connect(args) | Command::Probe(args)) = cli.command;
        args
    }

    #[test]
    fn flags_override_settings() {
        let mut settings = Settings::default();
        args(&[
            "devtunnel",
            "connect",
            "--socket",
            "gapii",
            "-s",
            "emulator-5554",
            "--max-attempts",
            "5",
            "--delay-ms",
            "200",
            "--probe-timeout-ms",
            "0",
            "--log-json",
        ])
        .apply(&mut settings);

        assert_eq!(settings.bridge.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(settings.tunnel.max_attempts, 5);
        assert_eq!(settings.tunnel.retry_delay_ms, 200);
        assert_eq!(settings.tunnel.probe_timeout_ms, None);
        assert!(settings.log.json);
    }

    #[test]
    fn absent_flags_keep_settings() {
        let mut settings = Settings::default();
        settings.bridge.serial = Some("R58M".into());
        args(&["devtunnel", "probe", "--socket", "gapii"]).apply(&mut settings);

        assert_eq!(settings.bridge.serial.as_deref(), Some("R58M"));
        assert_eq!(settings.tunnel.max_attempts, 30);
        assert_eq!(settings.tunnel.probe_timeout_ms, Some(5_000));
    }

    #[test]
    fn socket_is_required() {
        assert!(Cli::try_parse_from(["devtunnel", "connect"]).is_err());
    }
}

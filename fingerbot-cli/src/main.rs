use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fingerbot_lib::{ActuatorSession, BleTransport, Credentials, SessionConfig, SessionError};

/// Drive a Tuya BLE fingerbot: connect, pair, and press.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bluetooth address of the fingerbot (e.g. DC:23:4D:00:11:22).
    #[arg(long, env = "FINGERBOT_MAC")]
    mac: String,
    /// Local key from the vendor cloud. Only the first six bytes are used.
    #[arg(long, env = "FINGERBOT_LOCAL_KEY", hide_env_values = true)]
    local_key: String,
    /// Pairing id ("uuid" in the vendor cloud).
    #[arg(long, env = "FINGERBOT_UUID")]
    uuid: String,
    /// Device id, at most 22 bytes.
    #[arg(long, env = "FINGERBOT_DEV_ID")]
    dev_id: String,

    /// How long the arm stays down during a press.
    #[arg(long, default_value_t = 1000)]
    dwell_ms: u64,
    /// Give up on a handshake after this many seconds.
    #[arg(long, default_value_t = 20)]
    timeout_secs: u64,
    /// Connection attempts before giving up; 0 retries forever.
    #[arg(long, default_value_t = 3)]
    retries: u32,
    /// Pause between connection attempts.
    #[arg(long, default_value_t = 2000)]
    retry_delay_ms: u64,

    /// Optional path to a log file, rotated daily, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Pair and run one press cycle (engage, dwell, release).
    Press,
    /// Pair only, and report what the device says about itself.
    Pair,
}

fn setup_logging(log_file_path: Option<&Path>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_thread_ids(false);

    let (file_layer, guard) = if let Some(path) = log_file_path {
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("Log file path has no file name: {:?}", path))?;
        let directory = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(directory)
            .with_context(|| format!("Failed to create log directory: {:?}", directory))?;

        let appender = tracing_appender::rolling::daily(directory, file_name);
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, -v for DEBUG, -vv for TRACE; RUST_LOG overrides
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.as_deref(), &cli.verbose)?;

    let credentials = Credentials::new(&cli.mac, &cli.local_key, &cli.uuid, &cli.dev_id)
        .context("Invalid fingerbot credentials")?;
    let config = SessionConfig::default()
        .with_dwell(Duration::from_millis(cli.dwell_ms))
        .with_handshake_timeout(Duration::from_secs(cli.timeout_secs));
    config.validate().context("Invalid session settings")?;

    let retry = RetryPolicy {
        attempts: cli.retries,
        delay: Duration::from_millis(cli.retry_delay_ms),
    };

    tokio::select! {
        result = run_with_retry(cli.command, &credentials, &config, &retry) => {
            if let Err(e) = result {
                error!("{:#}", e);
                process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            process::exit(130);
        }
    }

    Ok(())
}

struct RetryPolicy {
    /// 0 means unlimited
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    fn exhausted(&self, attempt: u32) -> bool {
        self.attempts != 0 && attempt >= self.attempts
    }
}

async fn run_with_retry(
    command: Command,
    credentials: &Credentials,
    config: &SessionConfig,
    retry: &RetryPolicy,
) -> Result<()> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match run_once(command, credentials, config).await {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_transient() => {
                return Err(e).context("Fingerbot session failed");
            }
            Err(e) if retry.exhausted(attempt) => {
                return Err(e).with_context(|| format!("Giving up after {} attempts", attempt));
            }
            Err(e) => {
                warn!(attempt, error = %e, "Attempt failed, retrying in {:?}", retry.delay);
                tokio::time::sleep(retry.delay).await;
            }
        }
    }
}

/// One connection: fresh transport, fresh session, torn down at the end.
async fn run_once(command: Command, credentials: &Credentials, config: &SessionConfig) -> Result<(), SessionError> {
    let transport = BleTransport::new().await?;
    let mut session = ActuatorSession::with_config(credentials.clone(), config.clone(), transport);

    session.connect().await?;
    if let Some(device) = session.device_info() {
        info!(
            device_version = %device.device_version,
            protocol_version = %device.protocol_version,
            hardware_version = %device.hardware_version,
            bound = device.is_bind,
            "Paired with {}",
            credentials.mac()
        );
    }

    let result = match command {
        Command::Press => session.press().await,
        Command::Pair => Ok(()),
    };
    if let Err(e) = session.disconnect().await {
        warn!(error = %e, "Disconnect failed");
    }
    result
}

//! tether daemon - supervised pool of relay connections
//!
//! This binary keeps one websocket session open per relay listed in the
//! relay file, each tunneled through that relay as a SOCKS5 proxy, and
//! follows edits to the relay file while running.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! tetherd start
//!
//! # Start the daemon (background/daemonized) with explicit files
//! tetherd start -d --relays /data/proxy.txt --user-id-file /data/id.txt
//!
//! # Stop the daemon
//! tetherd stop
//!
//! # Check daemon status
//! tetherd status
//! ```

use std::env;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tether_core::UserId;
use tetherd::config::{check_relay_list, load_user_id, DaemonConfig};
use tetherd::notifier::{signal_channel, spawn_debouncer, FileWatcher};
use tetherd::source::{FileMembershipSource, MembershipSource};
use tetherd::supervisor::{spawn_supervisor, WorkerSpawner};
use tetherd::worker::SocksConnector;

/// tether daemon - supervised relay connection pool
#[derive(Parser, Debug)]
#[command(name = "tetherd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Relay list file (overrides config and TETHER_RELAYS)
        #[arg(long)]
        relays: Option<PathBuf>,

        /// User id file (overrides config and TETHER_USER_ID_FILE)
        #[arg(long)]
        user_id_file: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tether")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("tetherd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("tetherd.log")
}

fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

/// Builds the effective configuration and runs the fatal startup checks.
///
/// Paths are made absolute here because daemonizing changes the working
/// directory to `/`.
fn prepare(
    config_path: Option<PathBuf>,
    relays: Option<PathBuf>,
    user_id_file: Option<PathBuf>,
) -> Result<(DaemonConfig, UserId)> {
    let mut config = match config_path {
        Some(path) => DaemonConfig::load(&path)?,
        None => DaemonConfig::default(),
    };
    config.apply_env();
    if let Some(relays) = relays {
        config.relay_list = relays;
    }
    if let Some(user_id_file) = user_id_file {
        config.user_id_file = user_id_file;
    }

    let cwd = env::current_dir().context("Failed to resolve working directory")?;
    config.resolve_paths(&cwd);
    config.validate()?;

    let user_id = load_user_id(&config.user_id_file)
        .context("A user id is required to authenticate relay sessions")?;
    check_relay_list(&config.relay_list)?;

    Ok((config, user_id))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
        relays: None,
        user_id_file: None,
    });

    match command {
        Command::Start {
            daemon,
            config,
            relays,
            user_id_file,
        } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'tetherd stop' to stop it first.");
                process::exit(1);
            }

            let (config, user_id) = prepare(config, relays, user_id_file)?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(config, user_id);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");

                let log_path = log_file_path();
                if log_path.exists() {
                    println!("Log: {}", log_path.display());
                }

                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig, user_id: UserId) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tetherd=info".parse()?)
                .add_directive("tether_core=info".parse()?)
                .add_directive("tether_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        relays = %config.relay_list.display(),
        endpoint = %config.endpoint,
        "tether daemon starting"
    );

    let connector = SocksConnector::new(
        &config.endpoint,
        &config.user_agent,
        config.accept_invalid_certs,
    )
    .context("Invalid upstream endpoint")?;

    let spawner = WorkerSpawner::new(
        Arc::new(connector),
        Arc::new(config.worker_settings(user_id)),
        config.stop_timeout(),
    );
    let source = Arc::new(FileMembershipSource::new(&config.relay_list));
    let supervisor = spawn_supervisor(spawner, source.clone());

    // Watch before the boot read so an edit in between is still reloaded.
    let (signal, signals) = signal_channel();
    let watcher = FileWatcher::watch(&config.relay_list, signal)
        .context("Failed to watch relay list")?;

    let initial = source
        .load_current()
        .await
        .context("Failed to read relay list")?;
    let report = supervisor.start(initial).await?;
    info!(relays = report.added.len(), "Relay pool started");

    let cancel_token = CancellationToken::new();
    let debouncer = spawn_debouncer(
        signals,
        config.debounce(),
        supervisor.clone(),
        cancel_token.clone(),
    );

    if let Err(e) = wait_for_shutdown_signal().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }
    info!("Shutdown signal received");

    drop(watcher);
    cancel_token.cancel();
    let _ = debouncer.await;

    let report = supervisor.shutdown_all().await?;
    info!(stopped = report.removed.len(), "tether daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

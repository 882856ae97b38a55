//! Controller binary: start | stop | status | restart
//!
//! Exit codes: 0 on success, 2 on internal errors, 3 when the OS denied a
//! required permission (e.g. spawning an MCP server).

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{error, info};

use taskweave::cli::{Cli, Command};
use taskweave::config::Config;
use taskweave::daemon::DaemonManager;
use taskweave::orchestrator::Orchestrator;

const EXIT_INTERNAL: u8 = 2;
const EXIT_PERMISSIONS: u8 = 3;

fn setup_logging(cli_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskweave")
        .join("logs");
    fs::create_dir_all(&log_dir).context("failed to create log directory")?;

    let level = match cli_level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("taskweave.log")).context("failed to create log file")?;
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(cli.log_level.as_deref()) {
        eprintln!("failed to set up logging: {e}");
        return ExitCode::from(EXIT_INTERNAL);
    }

    let config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(EXIT_INTERNAL);
        }
    };

    let result = match cli.command {
        Command::Start { foreground } => cmd_start(&config, cli.config.as_ref(), foreground).await,
        Command::Stop => cmd_stop(),
        Command::Status => cmd_status(&config).await,
        Command::Restart => cmd_restart(cli.config.as_ref()).await,
        Command::RunDaemon => run_daemon(&config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            if is_permission_error(&e) {
                ExitCode::from(EXIT_PERMISSIONS)
            } else {
                ExitCode::from(EXIT_INTERNAL)
            }
        }
    }
}

fn is_permission_error(error: &eyre::Report) -> bool {
    let text = format!("{error:#}").to_lowercase();
    text.contains("permission denied")
        || error
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::PermissionDenied)
}

async fn cmd_start(config: &Config, config_path: Option<&PathBuf>, foreground: bool) -> Result<()> {
    let manager = DaemonManager::new();
    if foreground {
        manager.adopt_current_process()?;
        let result = run_daemon(config).await;
        manager.mark_stopped();
        return result;
    }

    let pid = manager.start_detached(config_path)?;
    println!("daemon started (pid {pid})");
    Ok(())
}

fn cmd_stop() -> Result<()> {
    let manager = DaemonManager::new();
    if manager.stop()? {
        println!("daemon stopped");
    } else {
        println!("daemon is not running");
    }
    Ok(())
}

async fn cmd_status(config: &Config) -> Result<()> {
    let manager = DaemonManager::new();
    let Some(pid) = manager.running_pid() else {
        println!("daemon is not running");
        if !config.mcp.servers.is_empty() {
            println!("configured MCP servers:");
            for name in config.mcp.servers.keys() {
                println!("  - {name}");
            }
        }
        return Ok(());
    };

    // Live state from the daemon over the control socket; fall back to the
    // pidfile when the socket does not answer
    match taskweave::ipc::DaemonClient::new().status().await {
        Ok(report) => {
            println!(
                "daemon running (pid {}, version {}, {} active session(s))",
                report.pid, report.version, report.active_sessions
            );
            if report.servers.is_empty() {
                println!("no MCP servers configured");
            } else {
                println!("MCP servers:");
                for server in report.servers {
                    println!("  - {} [{}] {} tool(s)", server.name, server.status, server.tool_count);
                }
            }
        }
        Err(e) => {
            let version = manager.running_version().unwrap_or_else(|| "unknown".into());
            println!("daemon running (pid {pid}, version {version})");
            println!("control socket unavailable: {e}");
        }
    }
    Ok(())
}

async fn cmd_restart(config_path: Option<&PathBuf>) -> Result<()> {
    let manager = DaemonManager::new();
    if manager.stop()? {
        println!("daemon stopped");
    }
    let pid = manager.start_detached(config_path)?;
    println!("daemon started (pid {pid})");
    Ok(())
}

/// The daemon body: bring the orchestrator up, serve the control socket,
/// and run until a signal.
async fn run_daemon(config: &Config) -> Result<()> {
    info!(version = taskweave::daemon::VERSION, "daemon starting");
    let orchestrator = std::sync::Arc::new(Orchestrator::start(config).await?);
    info!("orchestrator ready");

    let socket_path = taskweave::ipc::default_socket_path();
    let listener = taskweave::ipc::create_listener_at(&socket_path)?;
    let ipc_shutdown = tokio_util::sync::CancellationToken::new();
    tokio::spawn(taskweave::ipc::serve(
        listener,
        std::sync::Arc::clone(&orchestrator),
        ipc_shutdown.clone(),
    ));

    wait_for_shutdown_signal().await?;

    info!("shutdown signal received");
    ipc_shutdown.cancel();
    taskweave::ipc::cleanup_socket(&socket_path);
    orchestrator.shutdown().await;
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

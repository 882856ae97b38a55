//! Daemon process management
//!
//! Pidfile handling, detached launch, and signal-based stop for the
//! controller subcommands.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use eyre::{Context, Result, eyre};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

/// Package version written alongside the pidfile.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Grace period between SIGTERM and SIGKILL on stop.
const STOP_GRACE: Duration = Duration::from_secs(10);

fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("taskweave")
}

/// Manages the daemon's pidfile and process lifecycle.
#[derive(Debug)]
pub struct DaemonManager {
    pid_file: PathBuf,
    version_file: PathBuf,
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonManager {
    pub fn new() -> Self {
        let dir = runtime_dir();
        Self {
            pid_file: dir.join("taskweave.pid"),
            version_file: dir.join("taskweave.version"),
        }
    }

    /// For tests: keep the files under a private directory.
    pub fn with_pid_file(pid_file: PathBuf) -> Self {
        let version_file = pid_file.with_extension("version");
        Self { pid_file, version_file }
    }

    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    /// Pid from the pidfile, filtered to live processes.
    pub fn running_pid(&self) -> Option<u32> {
        self.read_pid().filter(|&pid| is_process_alive(pid))
    }

    /// Version recorded when the running daemon started.
    pub fn running_version(&self) -> Option<String> {
        fs::read_to_string(&self.version_file)
            .ok()
            .map(|v| v.trim().to_string())
    }

    fn read_pid(&self) -> Option<u32> {
        let contents = fs::read_to_string(&self.pid_file).ok()?;
        contents.trim().parse().ok()
    }

    fn write_pid(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).context("failed to create runtime directory")?;
        }
        fs::write(&self.pid_file, pid.to_string()).context("failed to write pidfile")?;
        fs::write(&self.version_file, VERSION).context("failed to write version file")?;
        debug!(pid, path = %self.pid_file.display(), "wrote pidfile");
        Ok(())
    }

    fn remove_pid_file(&self) {
        for path in [&self.pid_file, &self.version_file] {
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "failed to remove runtime file");
                }
            }
        }
    }

    /// Spawn a detached daemon process re-invoking this binary with the
    /// hidden `run-daemon` subcommand.
    pub fn start_detached(&self, config: Option<&PathBuf>) -> Result<u32> {
        if let Some(pid) = self.running_pid() {
            return Err(eyre!("daemon already running (pid {pid})"));
        }

        let exe = std::env::current_exe().context("failed to locate current executable")?;
        let mut command = Command::new(exe);
        command
            .arg("run-daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(config) = config {
            command.arg("--config").arg(config);
        }

        let child = command.spawn().context("failed to spawn daemon process")?;
        let pid = child.id();
        self.write_pid(pid)?;
        info!(pid, "daemon started");
        Ok(pid)
    }

    /// Record the current process as the daemon (foreground / run-daemon).
    pub fn adopt_current_process(&self) -> Result<()> {
        self.write_pid(std::process::id())
    }

    /// SIGTERM the daemon, escalating to SIGKILL after the grace period.
    pub fn stop(&self) -> Result<bool> {
        let Some(pid) = self.running_pid() else {
            self.remove_pid_file();
            return Ok(false);
        };

        info!(pid, "stopping daemon");
        signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).context("failed to signal daemon")?;

        let deadline = Instant::now() + STOP_GRACE;
        while Instant::now() < deadline {
            if !is_process_alive(pid) {
                self.remove_pid_file();
                return Ok(true);
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        warn!(pid, "daemon did not exit in time, killing");
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        self.remove_pid_file();
        Ok(true)
    }

    /// Clear the pidfile on clean daemon exit.
    pub fn mark_stopped(&self) {
        self.remove_pid_file();
    }
}

/// Signal 0 probes liveness without touching the process.
fn is_process_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

//! Daemon process management
//!
//! PID file handling and process control for the detached daemon.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use eyre::{Context, Result};
use tracing::{debug, info};

use crate::config::data_dir;

/// Default PID file location
fn default_pid_path() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(data_dir).join("errand.pid")
}

/// Daemon status snapshot
#[derive(Debug)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub pid_file: PathBuf,
}

/// Daemon process manager
#[derive(Debug)]
pub struct DaemonManager {
    pid_file: PathBuf,
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonManager {
    /// Create a manager with the default PID file location
    pub fn new() -> Self {
        Self {
            pid_file: default_pid_path(),
        }
    }

    /// Create a manager with a custom PID file path
    pub fn with_pid_file(pid_file: PathBuf) -> Self {
        Self { pid_file }
    }

    /// Check if a daemon is running
    pub fn is_running(&self) -> bool {
        self.read_pid().is_some_and(is_process_running)
    }

    /// Get the running daemon's PID
    pub fn running_pid(&self) -> Option<u32> {
        self.read_pid().filter(|&pid| is_process_running(pid))
    }

    /// Current status
    pub fn status(&self) -> DaemonStatus {
        let pid = self.running_pid();
        DaemonStatus {
            running: pid.is_some(),
            pid,
            pid_file: self.pid_file.clone(),
        }
    }

    /// Record the current process as the daemon
    pub fn register_self(&self) -> Result<()> {
        self.write_pid(std::process::id())
    }

    /// Spawn a detached daemon process and return its PID
    pub fn start(&self) -> Result<u32> {
        if let Some(pid) = self.running_pid() {
            return Err(eyre::eyre!("Daemon already running with PID {}", pid));
        }

        info!("Starting daemon...");
        let exe = std::env::current_exe().context("Failed to get current executable")?;

        let child = Command::new(&exe)
            .arg("run-daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn daemon process")?;

        let pid = child.id();
        self.write_pid(pid)?;

        info!(pid, "Daemon started");
        Ok(pid)
    }

    /// Stop the running daemon
    pub fn stop(&self) -> Result<()> {
        let pid = self.running_pid().ok_or_else(|| eyre::eyre!("Daemon is not running"))?;

        info!(pid, "Stopping daemon...");

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).context("Failed to send SIGTERM")?;
        }

        // Wait for the process to exit
        let mut attempts = 0;
        while is_process_running(pid) && attempts < 50 {
            std::thread::sleep(std::time::Duration::from_millis(100));
            attempts += 1;
        }

        if is_process_running(pid) {
            return Err(eyre::eyre!("Daemon did not exit after SIGTERM"));
        }

        self.remove_pid_file()?;
        info!("Daemon stopped");
        Ok(())
    }

    /// Remove the PID file (on clean shutdown)
    pub fn remove_pid_file(&self) -> Result<()> {
        if self.pid_file.exists() {
            fs::remove_file(&self.pid_file).context("Failed to remove PID file")?;
            debug!(path = ?self.pid_file, "Removed PID file");
        }
        Ok(())
    }

    fn read_pid(&self) -> Option<u32> {
        let contents = fs::read_to_string(&self.pid_file).ok()?;
        contents.trim().parse().ok()
    }

    fn write_pid(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).context("Failed to create PID file directory")?;
        }

        fs::write(&self.pid_file, pid.to_string()).context("Failed to write PID file")?;
        debug!(pid, path = ?self.pid_file, "Wrote PID file");
        Ok(())
    }
}

/// Check whether a process with the given PID exists
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

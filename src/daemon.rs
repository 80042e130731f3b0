//! Single-instance enforcement and signal handling for the daemon
//!
//! The daemon runs in the foreground; this module only manages its pidfile,
//! detects stale instances, and stops a running one.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{info, warn};

const PIDFILE_NAME: &str = "clipstash.pid";

/// How long `stop_daemon` waits for SIGTERM before escalating
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Get the path for the pidfile
pub fn get_pidfile_path() -> Result<PathBuf> {
    let uid = nix::unistd::getuid();

    // Try XDG_RUNTIME_DIR first (modern Linux)
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return Ok(PathBuf::from(runtime_dir).join(PIDFILE_NAME));
        }
    }

    // Try /var/run/user/<uid>/ (systemd systems)
    let var_run_user = PathBuf::from(format!("/var/run/user/{}", uid));
    if var_run_user.exists() {
        return Ok(var_run_user.join(PIDFILE_NAME));
    }

    // Fallback to ~/.local/run/
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(".local").join("run").join(PIDFILE_NAME))
}

/// Write PID to pidfile
pub fn write_pidfile(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create pidfile directory")?;
    }

    let mut file =
        File::create(path).with_context(|| format!("Failed to create pidfile: {:?}", path))?;
    write!(file, "{}", pid)?;

    // Owner read/write only
    let mut permissions = file.metadata()?.permissions();
    permissions.set_mode(0o600);
    fs::set_permissions(path, permissions)?;

    info!("Wrote PID {} to {:?}", pid, path);
    Ok(())
}

/// Read PID from pidfile
pub fn read_pidfile(path: &Path) -> Result<Option<u32>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut contents = String::new();
    File::open(path)?.read_to_string(&mut contents)?;

    let pid = contents
        .trim()
        .parse::<u32>()
        .with_context(|| format!("Invalid PID in pidfile: {:?}", contents))?;

    Ok(Some(pid))
}

/// Remove pidfile
pub fn remove_pidfile(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("Failed to remove pidfile: {:?}", path))?;
        info!("Removed pidfile: {:?}", path);
    }
    Ok(())
}

/// Check if a process with the given PID is running
pub fn is_process_running(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    // Signal 0 only checks that the process exists and may be signalled.
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// PID of the running daemon, if any. A stale pidfile is removed.
pub fn running_daemon(path: &Path) -> Result<Option<u32>> {
    let pid = match read_pidfile(path) {
        Ok(pid) => pid,
        Err(e) => {
            warn!("Ignoring unreadable pidfile {:?}: {}", path, e);
            remove_pidfile(path)?;
            return Ok(None);
        }
    };

    match pid {
        Some(pid) if is_process_running(pid) => Ok(Some(pid)),
        Some(pid) => {
            info!("Found stale pidfile for PID {}, removing", pid);
            remove_pidfile(path)?;
            Ok(None)
        }
        None => Ok(None),
    }
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped(u32),
    Killed(u32),
}

/// Stop the running daemon
pub async fn stop_daemon(path: &Path) -> Result<StopOutcome> {
    let Some(pid) = running_daemon(path)? else {
        info!("Daemon is not running");
        return Ok(StopOutcome::NotRunning);
    };
    let target = Pid::from_raw(pid as i32);

    info!("Sending SIGTERM to daemon with PID {}", pid);
    signal::kill(target, Signal::SIGTERM)?;

    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while waited < STOP_TIMEOUT {
        tokio::time::sleep(step).await;
        waited += step;
        if !is_process_running(pid) {
            info!("Daemon stopped successfully");
            remove_pidfile(path)?;
            return Ok(StopOutcome::Stopped(pid));
        }
    }

    warn!("Daemon did not stop gracefully, sending SIGKILL");
    signal::kill(target, Signal::SIGKILL)?;
    tokio::time::sleep(step).await;

    if is_process_running(pid) {
        return Err(anyhow!("Failed to stop daemon with PID {}", pid));
    }

    remove_pidfile(path)?;
    info!("Daemon forcefully stopped");
    Ok(StopOutcome::Killed(pid))
}

/// Wait for SIGTERM or Ctrl-C
pub async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, shutting down gracefully");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pidfile_round_trip_and_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run").join("clipstash.pid");

        write_pidfile(&path, 4242).unwrap();
        assert_eq!(read_pidfile(&path).unwrap(), Some(4242));

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        remove_pidfile(&path).unwrap();
        assert_eq!(read_pidfile(&path).unwrap(), None);
        // Removing twice is fine.
        remove_pidfile(&path).unwrap();
    }

    #[test]
    fn test_current_process_is_running() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(0));
        assert!(!is_process_running(u32::MAX));
    }

    #[test]
    fn test_running_daemon_detects_self() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clipstash.pid");

        write_pidfile(&path, std::process::id()).unwrap();
        assert_eq!(running_daemon(&path).unwrap(), Some(std::process::id()));
        assert!(path.exists());
    }

    #[test]
    fn test_garbage_pidfile_is_cleared() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clipstash.pid");
        fs::write(&path, "not a pid").unwrap();

        assert!(read_pidfile(&path).is_err());
        assert_eq!(running_daemon(&path).unwrap(), None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stop_without_daemon() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clipstash.pid");
        assert_eq!(stop_daemon(&path).await.unwrap(), StopOutcome::NotRunning);
    }
}

// Build tool daemon probe
//
// A build daemon rooted above a redirected path holds open handles into it,
// which makes the unmount fail. It must be stopped before retracting.

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::process;

#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait BuildDaemonProbe: Send + Sync {
    fn is_running_for(&self, project: &Path) -> bool;

    /// Best-effort; failures are logged, not returned.
    fn stop_for(&self, project: &Path);
}

/// Probe for buck's `buckd`, which records its pid under `<project>/.buckd`.
pub struct BuckProbe {
    buck: String,
}

impl BuckProbe {
    pub fn new(buck: impl Into<String>) -> Self {
        Self { buck: buck.into() }
    }

    fn pid_file(project: &Path) -> PathBuf {
        project.join(".buckd").join("pid")
    }
}

impl BuildDaemonProbe for BuckProbe {
    fn is_running_for(&self, project: &Path) -> bool {
        let Ok(contents) = std::fs::read_to_string(Self::pid_file(project)) else {
            return false;
        };
        match contents.trim().parse::<i32>() {
            Ok(pid) => process_alive(pid),
            Err(_) => false,
        }
    }

    fn stop_for(&self, project: &Path) {
        tracing::info!("Stopping buck daemon for {}", project.display());
        let mut cmd = Command::new(&self.buck);
        cmd.arg("kill").current_dir(project);
        if let Err(e) = process::run_quietly(&mut cmd) {
            tracing::warn!("Failed to stop buck daemon for {}: {}", project.display(), e);
        }
    }
}

/// Probe that never finds a daemon.
pub struct NoBuildDaemon;

impl BuildDaemonProbe for NoBuildDaemon {
    fn is_running_for(&self, _project: &Path) -> bool {
        false
    }

    fn stop_for(&self, _project: &Path) {}
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid <= 0 {
        return false;
    }
    // Signal 0 only checks for existence; EPERM still means it exists.
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}

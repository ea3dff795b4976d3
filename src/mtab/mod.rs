//! Read-only view of the OS mount table, plus the few mount primitives the
//! redirection engine needs.
//!
//! One implementation per OS family; [`new`] picks the one for the running
//! platform.

mod linux;
mod macos;
mod nop;

pub use linux::{LinuxMountTable, parse_mtab};
pub use macos::{MacOsMountTable, parse_macos_mount_output};
pub use nop::NopMountTable;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use std::io;
use std::path::{Path, PathBuf};

use crate::platform::Platform;

/// One row of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

/// The subset of `lstat(2)` that mount checks look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountStat {
    pub dev: u64,
    pub mode: u32,
}

impl MountStat {
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self { dev: metadata.dev(), mode: metadata.mode() }
        }
        #[cfg(not(unix))]
        {
            let _ = metadata;
            Self { dev: 0, mode: 0 }
        }
    }
}

#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait MountTable: Send + Sync {
    /// List the system mounts.
    fn read(&self) -> io::Result<Vec<MountInfo>>;

    /// Detach the mount now, clean up references later (`umount -l`).
    fn unmount_lazy(&self, mount_point: &Path) -> bool;

    /// Force the unmount (`umount -f`).
    fn unmount_force(&self, mount_point: &Path) -> bool;

    /// Bind mount `source` onto `dest`.
    fn create_bind_mount(&self, source: &Path, dest: &Path) -> bool;

    /// `lstat` the path without following a final symlink.
    fn lstat(&self, path: &Path) -> io::Result<MountStat> {
        let metadata = std::fs::symlink_metadata(path)?;
        Ok(MountStat::from_metadata(&metadata))
    }
}

/// Mount table for the running platform.
pub fn new() -> Box<dyn MountTable> {
    for_platform(Platform::current())
}

pub fn for_platform(platform: Platform) -> Box<dyn MountTable> {
    match platform {
        Platform::Linux => Box::new(LinuxMountTable::new()),
        Platform::MacOs => Box::new(MacOsMountTable::new()),
        Platform::Windows | Platform::Other => Box::new(NopMountTable),
    }
}

/// Prefix a privileged command with `sudo` unless we already are root.
pub(crate) fn privileged(program: &str) -> std::process::Command {
    if running_as_root() {
        std::process::Command::new(program)
    } else {
        let mut cmd = std::process::Command::new("sudo");
        cmd.arg(program);
        cmd
    }
}

#[cfg(unix)]
fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

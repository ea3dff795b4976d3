// Bind redirection strategies
//
// A `bind` redirection means something different on each OS. The strategy is
// chosen once per invocation from the platform and the tool configuration.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crate::checkout::Checkout;
use crate::config::{BindMode, Config};
use crate::daemon::{FsClient, FsClientError, SocketFsClient};
use crate::error::{PLEASE_RESTART, RedirectError, RedirectResult};
use crate::mtab::MountTable;
use crate::platform::Platform;
use crate::process;
use crate::scratch::ScratchAllocator;

use super::symlink;

/// File name of the sparse disk image backing a redirection on macOS
/// without the APFS helper.
pub const DISK_IMAGE_NAME: &str = "image.dmg.sparseimage";

pub trait BindStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `bind` is realized as a symlink, so that it must be verified
    /// and obstructed like one.
    fn realizes_as_symlink(&self) -> bool {
        false
    }

    /// Where the redirected content lives.
    fn target_for(
        &self,
        checkout: &Checkout,
        repo_path: &Path,
        scratch: &dyn ScratchAllocator,
    ) -> RedirectResult<PathBuf> {
        scratch.scratch_dir(checkout.path(), repo_path)
    }

    fn mount(&self, checkout: &Checkout, repo_path: &Path, target: &Path) -> RedirectResult<()>;

    fn unmount(&self, checkout: &Checkout, repo_path: &Path) -> RedirectResult<()>;
}

fn create_dir_all(path: &Path) -> RedirectResult<()> {
    std::fs::create_dir_all(path)
        .map_err(|e| RedirectError::io(format!("Failed to create {}", path.display()), e))
}

/// Linux: the filesystem daemon owns the checkout mount and performs the bind.
pub struct DaemonBindStrategy {
    client: Arc<dyn FsClient>,
}

impl DaemonBindStrategy {
    pub fn new(client: Arc<dyn FsClient>) -> Self {
        Self { client }
    }
}

impl BindStrategy for DaemonBindStrategy {
    fn name(&self) -> &'static str {
        "daemon"
    }

    fn mount(&self, checkout: &Checkout, repo_path: &Path, target: &Path) -> RedirectResult<()> {
        let mount_path = checkout.abs_path(repo_path);
        if mount_path.exists() {
            // A bind mount unmounted behind the daemon's back stays in its
            // bookkeeping and makes the add fail.
            match self.client.remove_bind_mount(checkout.path(), repo_path) {
                Ok(()) => {}
                Err(FsClientError::UnsupportedOperation(_)) => tracing::warn!("{}", PLEASE_RESTART),
                Err(e) => {
                    tracing::debug!(
                        "Ignoring stale bind removal for {}: {}",
                        repo_path.display(),
                        e
                    )
                }
            }
        }

        create_dir_all(&mount_path)?;
        create_dir_all(target)?;
        self.client.add_bind_mount(checkout.path(), repo_path, target)?;
        Ok(())
    }

    fn unmount(&self, checkout: &Checkout, repo_path: &Path) -> RedirectResult<()> {
        self.client.remove_bind_mount(checkout.path(), repo_path)?;
        Ok(())
    }
}

/// Linux: `mount -o bind` issued directly, for checkouts without a daemon.
pub struct DirectBindStrategy {
    mount_table: Arc<dyn MountTable>,
}

impl DirectBindStrategy {
    pub fn new(mount_table: Arc<dyn MountTable>) -> Self {
        Self { mount_table }
    }
}

impl BindStrategy for DirectBindStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn mount(&self, checkout: &Checkout, repo_path: &Path, target: &Path) -> RedirectResult<()> {
        let mount_path = checkout.abs_path(repo_path);
        create_dir_all(&mount_path)?;
        create_dir_all(target)?;

        if !self.mount_table.create_bind_mount(target, &mount_path) {
            return Err(RedirectError::ExternalTool {
                command: format!("mount -o bind {} {}", target.display(), mount_path.display()),
                status: "failure".to_string(),
                stdout: String::new(),
                stderr: String::new(),
            });
        }
        Ok(())
    }

    fn unmount(&self, checkout: &Checkout, repo_path: &Path) -> RedirectResult<()> {
        let mount_path = checkout.abs_path(repo_path);
        if self.mount_table.unmount_lazy(&mount_path) || self.mount_table.unmount_force(&mount_path)
        {
            return Ok(());
        }
        Err(RedirectError::UnmountFailed { path: mount_path })
    }
}

/// macOS: an APFS volume created and mounted in place by a setuid helper.
pub struct ApfsVolumeStrategy {
    helper: PathBuf,
}

impl ApfsVolumeStrategy {
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self { helper: helper.into() }
    }
}

impl BindStrategy for ApfsVolumeStrategy {
    fn name(&self) -> &'static str {
        "apfs"
    }

    /// The volume's backing store is not visible from here, so the target is
    /// reported as the mount point itself.
    fn target_for(
        &self,
        checkout: &Checkout,
        repo_path: &Path,
        _scratch: &dyn ScratchAllocator,
    ) -> RedirectResult<PathBuf> {
        Ok(checkout.abs_path(repo_path))
    }

    fn mount(&self, checkout: &Checkout, repo_path: &Path, _target: &Path) -> RedirectResult<()> {
        let mount_path = checkout.abs_path(repo_path);
        create_dir_all(&mount_path)?;
        process::run_quietly(Command::new(&self.helper).arg("mount").arg(&mount_path))
    }

    fn unmount(&self, checkout: &Checkout, repo_path: &Path) -> RedirectResult<()> {
        diskutil_unmount(&checkout.abs_path(repo_path))
    }
}

/// macOS fallback: a sparse disk image stored in the scratch directory.
pub struct DiskImageStrategy;

impl DiskImageStrategy {
    pub fn image_path(target: &Path) -> PathBuf {
        target.join(DISK_IMAGE_NAME)
    }
}

impl BindStrategy for DiskImageStrategy {
    fn name(&self) -> &'static str {
        "disk-image"
    }

    fn mount(&self, checkout: &Checkout, repo_path: &Path, target: &Path) -> RedirectResult<()> {
        let mount_path = checkout.abs_path(repo_path);
        let image = Self::image_path(target);

        if !image.exists() {
            // Sized in kilobytes; hdiutil's unit-less sizes are not bytes.
            let size_kb = filesystem_size(target)? / 1024;
            process::run_quietly(
                Command::new("hdiutil")
                    .arg("create")
                    .arg("-size")
                    .arg(format!("{}k", size_kb))
                    .arg("-type")
                    .arg("SPARSE")
                    .arg("-fs")
                    .arg("HFS+")
                    .arg("-volname")
                    .arg(format!("Redirection for {}", mount_path.display()))
                    .arg(&image),
            )?;
        }

        process::run_quietly(
            Command::new("hdiutil")
                .arg("attach")
                .arg(&image)
                .arg("-nobrowse")
                .arg("-mountpoint")
                .arg(&mount_path),
        )
    }

    fn unmount(&self, checkout: &Checkout, repo_path: &Path) -> RedirectResult<()> {
        diskutil_unmount(&checkout.abs_path(repo_path))
    }
}

// Detaches both disk images and APFS volumes.
fn diskutil_unmount(mount_path: &Path) -> RedirectResult<()> {
    process::run_quietly(Command::new("diskutil").arg("unmount").arg("force").arg(mount_path))
}

#[cfg(unix)]
fn filesystem_size(path: &Path) -> RedirectResult<u64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|errno| {
        RedirectError::io(format!("Failed to statvfs {}", path.display()), errno.into())
    })?;
    Ok(stat.blocks() as u64 * stat.fragment_size() as u64)
}

#[cfg(not(unix))]
fn filesystem_size(path: &Path) -> RedirectResult<u64> {
    Err(RedirectError::Unsupported(format!("disk usage of {}", path.display())))
}

/// Windows: directory symlinks stand in for bind mounts.
pub struct SymlinkBindStrategy;

impl BindStrategy for SymlinkBindStrategy {
    fn name(&self) -> &'static str {
        "symlink"
    }

    fn realizes_as_symlink(&self) -> bool {
        true
    }

    fn mount(&self, checkout: &Checkout, repo_path: &Path, target: &Path) -> RedirectResult<()> {
        symlink::create(&checkout.abs_path(repo_path), target)
    }

    fn unmount(&self, checkout: &Checkout, repo_path: &Path) -> RedirectResult<()> {
        symlink::remove(&checkout.abs_path(repo_path))
    }
}

pub struct UnsupportedBindStrategy {
    platform: Platform,
}

impl UnsupportedBindStrategy {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    fn error(&self) -> RedirectError {
        RedirectError::Unsupported(format!("bind redirections on {}", self.platform))
    }
}

impl BindStrategy for UnsupportedBindStrategy {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn mount(&self, _checkout: &Checkout, _repo_path: &Path, _target: &Path) -> RedirectResult<()> {
        Err(self.error())
    }

    fn unmount(&self, _checkout: &Checkout, _repo_path: &Path) -> RedirectResult<()> {
        Err(self.error())
    }
}

/// Whether the APFS helper is installed setuid, and therefore usable by an
/// unprivileged user.
pub fn have_apfs_helper(mount_table: &dyn MountTable, helper: &Path) -> bool {
    match mount_table.lstat(helper) {
        Ok(stat) => stat.mode & SETUID_BIT != 0,
        Err(_) => false,
    }
}

#[cfg(unix)]
const SETUID_BIT: u32 = libc::S_ISUID as u32;

#[cfg(not(unix))]
const SETUID_BIT: u32 = 0o4000;

/// Pick the bind strategy for `platform`.
pub fn for_platform(
    platform: Platform,
    config: &Config,
    mount_table: Arc<dyn MountTable>,
) -> Arc<dyn BindStrategy> {
    let strategy: Arc<dyn BindStrategy> = match platform {
        Platform::Linux => match config.bind.mode {
            BindMode::Daemon => Arc::new(DaemonBindStrategy::new(Arc::new(SocketFsClient::new(
                &config.daemon.socket_path,
            )))),
            BindMode::Direct => Arc::new(DirectBindStrategy::new(mount_table)),
        },
        Platform::MacOs if have_apfs_helper(mount_table.as_ref(), &config.bind.apfs_helper) => {
            Arc::new(ApfsVolumeStrategy::new(&config.bind.apfs_helper))
        }
        Platform::MacOs => Arc::new(DiskImageStrategy),
        Platform::Windows => Arc::new(SymlinkBindStrategy),
        Platform::Other => Arc::new(UnsupportedBindStrategy::new(platform)),
    };
    tracing::debug!("Using the {} bind strategy on {}", strategy.name(), platform);
    strategy
}

/// Ask the APFS helper which volumes no longer belong to any of `checkouts`.
pub fn list_stale_apfs_volumes(
    helper: &Path,
    checkouts: &[PathBuf],
) -> RedirectResult<Vec<String>> {
    let stdout = process::capture_stdout(
        Command::new(helper).arg("list-stale-volumes").args(checkouts).arg("--json"),
    )?;
    serde_json::from_str(&stdout).map_err(|e| RedirectError::ExternalTool {
        command: format!("{} list-stale-volumes", helper.display()),
        status: "invalid output".to_string(),
        stdout: stdout.trim().to_string(),
        stderr: e.to_string(),
    })
}

pub fn delete_apfs_volume(helper: &Path, volume: &str) -> RedirectResult<()> {
    process::run_quietly(Command::new(helper).arg("delete-volume").arg(volume))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::MockFsClient;
    use crate::mtab::{MockMountTable, MountStat, NopMountTable};
    use crate::scratch::MockScratchAllocator;

    fn checkout() -> (tempfile::TempDir, Checkout) {
        let tmp = tempfile::tempdir().unwrap();
        let checkout = Checkout::new(tmp.path()).unwrap();
        (tmp, checkout)
    }

    #[test]
    fn test_daemon_mount_creates_dirs_and_adds() {
        let (_tmp, checkout) = checkout();
        let scratch = tempfile::tempdir().unwrap();
        let target = scratch.path().join("buck-out");

        let mut client = MockFsClient::new();
        client.expect_remove_bind_mount().never();
        client.expect_add_bind_mount().times(1).returning(|_, repo_path, _| {
            assert_eq!(repo_path, Path::new("buck-out"));
            Ok(())
        });

        let strategy = DaemonBindStrategy::new(Arc::new(client));
        strategy.mount(&checkout, Path::new("buck-out"), &target).unwrap();
        assert!(checkout.abs_path(Path::new("buck-out")).is_dir());
        assert!(target.is_dir());
    }

    #[test]
    fn test_daemon_mount_removes_stale_bind_first() {
        let (_tmp, checkout) = checkout();
        std::fs::create_dir(checkout.abs_path(Path::new("out"))).unwrap();

        let mut client = MockFsClient::new();
        client
            .expect_remove_bind_mount()
            .times(1)
            .returning(|_, _| Err(FsClientError::Remote("not mounted".into())));
        client.expect_add_bind_mount().times(1).returning(|_, _, _| Ok(()));

        let strategy = DaemonBindStrategy::new(Arc::new(client));
        let target = checkout.path().join(".scratch");
        strategy.mount(&checkout, Path::new("out"), &target).unwrap();
    }

    #[test]
    fn test_daemon_without_bind_support_requires_upgrade() {
        let (_tmp, checkout) = checkout();
        let mut client = MockFsClient::new();
        client
            .expect_add_bind_mount()
            .returning(|_, _, _| Err(FsClientError::UnsupportedOperation("addBindMount".into())));

        let strategy = DaemonBindStrategy::new(Arc::new(client));
        let target = checkout.path().join(".scratch");
        let err = strategy.mount(&checkout, Path::new("out"), &target).unwrap_err();
        assert!(matches!(err, RedirectError::DaemonUpgradeRequired));
    }

    #[test]
    fn test_direct_unmount_falls_back_to_force() {
        let (_tmp, checkout) = checkout();
        let mut table = MockMountTable::new();
        table.expect_unmount_lazy().times(1).returning(|_| false);
        table.expect_unmount_force().times(1).returning(|_| true);

        let strategy = DirectBindStrategy::new(Arc::new(table));
        strategy.unmount(&checkout, Path::new("out")).unwrap();
    }

    #[test]
    fn test_direct_unmount_failure() {
        let (_tmp, checkout) = checkout();
        let mut table = MockMountTable::new();
        table.expect_unmount_lazy().returning(|_| false);
        table.expect_unmount_force().returning(|_| false);

        let strategy = DirectBindStrategy::new(Arc::new(table));
        let err = strategy.unmount(&checkout, Path::new("out")).unwrap_err();
        assert!(matches!(err, RedirectError::UnmountFailed { .. }));
    }

    #[test]
    fn test_direct_mount_failure_is_reported() {
        let (_tmp, checkout) = checkout();
        let mut table = MockMountTable::new();
        table.expect_create_bind_mount().returning(|_, _| false);

        let strategy = DirectBindStrategy::new(Arc::new(table));
        let target = checkout.path().join(".scratch");
        let err = strategy.mount(&checkout, Path::new("out"), &target).unwrap_err();
        assert!(err.to_string().contains("mount -o bind"));
    }

    #[test]
    fn test_apfs_target_is_mount_point() {
        let (_tmp, checkout) = checkout();
        let mut scratch = MockScratchAllocator::new();
        scratch.expect_scratch_dir().never();

        let strategy = ApfsVolumeStrategy::new("/nonexistent/helper");
        let target = strategy.target_for(&checkout, Path::new("out"), &scratch).unwrap();
        assert_eq!(target, checkout.abs_path(Path::new("out")));
    }

    #[test]
    fn test_default_target_uses_scratch() {
        let (_tmp, checkout) = checkout();
        let mut scratch = MockScratchAllocator::new();
        scratch.expect_scratch_dir().times(1).returning(|_, _| Ok(PathBuf::from("/scratch/out")));

        let target =
            DiskImageStrategy.target_for(&checkout, Path::new("out"), &scratch).unwrap();
        assert_eq!(target, PathBuf::from("/scratch/out"));
        assert_eq!(
            DiskImageStrategy::image_path(&target),
            PathBuf::from("/scratch/out/image.dmg.sparseimage")
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_bind_round_trip() {
        let (_tmp, checkout) = checkout();
        let scratch = tempfile::tempdir().unwrap();

        let strategy = SymlinkBindStrategy;
        assert!(strategy.realizes_as_symlink());
        strategy.mount(&checkout, Path::new("a/out"), scratch.path()).unwrap();
        let link = checkout.abs_path(Path::new("a/out"));
        assert_eq!(std::fs::read_link(&link).unwrap(), scratch.path());

        strategy.unmount(&checkout, Path::new("a/out")).unwrap();
        assert!(std::fs::symlink_metadata(&link).is_err());
    }

    #[test]
    fn test_unsupported_platform() {
        let (_tmp, checkout) = checkout();
        let strategy = UnsupportedBindStrategy::new(Platform::Other);
        let err = strategy.unmount(&checkout, Path::new("out")).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported: bind redirections on other");
    }

    #[test]
    fn test_for_platform_selection() {
        let config = Config::default();
        let table: Arc<dyn MountTable> = Arc::new(MockMountTable::new());

        assert_eq!(for_platform(Platform::Linux, &config, table.clone()).name(), "daemon");
        assert_eq!(for_platform(Platform::Windows, &config, table.clone()).name(), "symlink");
        assert_eq!(for_platform(Platform::Other, &config, table.clone()).name(), "unsupported");

        let mut direct = Config::default();
        direct.bind.mode = BindMode::Direct;
        assert_eq!(for_platform(Platform::Linux, &direct, table.clone()).name(), "direct");

        let mut no_helper = Config::default();
        no_helper.bind.apfs_helper = PathBuf::from("/nonexistent/helper");
        let nop: Arc<dyn MountTable> = Arc::new(NopMountTable);
        assert_eq!(for_platform(Platform::MacOs, &no_helper, nop).name(), "disk-image");
    }

    #[test]
    #[cfg(unix)]
    fn test_helper_without_setuid_is_unusable() {
        let tmp = tempfile::tempdir().unwrap();
        let helper = tmp.path().join("helper");
        std::fs::write(&helper, b"#!/bin/sh\n").unwrap();
        assert!(!have_apfs_helper(&NopMountTable, &helper));
        assert!(!have_apfs_helper(&NopMountTable, &tmp.path().join("missing")));
    }

    #[test]
    fn test_helper_with_setuid_bit_is_usable() {
        let mut table = MockMountTable::new();
        table.expect_lstat().returning(|path| {
            let mode = if path.ends_with("setuid") { 0o104755 } else { 0o100755 };
            Ok(MountStat { dev: 1, mode })
        });
        assert!(have_apfs_helper(&table, Path::new("/opt/helper/setuid")));
        assert!(!have_apfs_helper(&table, Path::new("/opt/helper/plain")));
    }
}

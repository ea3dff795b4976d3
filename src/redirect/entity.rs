use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{RedirectError, RedirectResult};

use super::disposition::RepoPathDisposition;
use super::env::RedirectEnv;
use super::symlink;
use super::types::{Redirection, RedirectionType};

/// Number of inspections of the path while clearing it: the first may
/// retract a bind mount, the second confirms the retraction took.
const MAX_REMOVAL_PASSES: usize = 2;

impl Redirection {
    pub fn expand_repo_path(&self, env: &RedirectEnv) -> PathBuf {
        env.checkout.abs_path(&self.repo_path)
    }

    /// Where this redirection's content lives; `None` for unknown mounts.
    pub fn expand_target(&self, env: &RedirectEnv) -> RedirectResult<Option<PathBuf>> {
        let target = match self.kind {
            RedirectionType::Bind => {
                env.bind.target_for(&env.checkout, &self.repo_path, env.scratch.as_ref())?
            }
            RedirectionType::Symlink => {
                env.scratch.scratch_dir(env.checkout.path(), &self.repo_path)?
            }
            RedirectionType::Unknown => return Ok(None),
        };
        Ok(Some(target))
    }

    /// Clear whatever occupies the redirection's path, as far as it is safe
    /// to do so, and report what is left.
    ///
    /// Symlinks and empty directories are removed; a bind mount is retracted
    /// and the path re-examined. Non-empty directories and files are never
    /// touched.
    pub fn remove_existing(
        &self,
        env: &RedirectEnv,
        fail_if_bind_mount: bool,
    ) -> RedirectResult<RepoPathDisposition> {
        let path = self.expand_repo_path(env);
        let passes = if fail_if_bind_mount { 1 } else { MAX_REMOVAL_PASSES };

        for pass in 1..=passes {
            let disposition = RepoPathDisposition::analyze(&path, env.mount_table.as_ref())?;
            debug!("{} is {:?}", path.display(), disposition);
            if disposition == RepoPathDisposition::DoesNotExist {
                return Ok(disposition);
            }

            stop_build_daemon_above(env, &path);

            match disposition {
                RepoPathDisposition::IsSymlink => {
                    symlink::remove(&path)?;
                    return Ok(RepoPathDisposition::DoesNotExist);
                }
                RepoPathDisposition::IsBindMount => {
                    if pass == passes {
                        return Err(RedirectError::UnmountFailed { path });
                    }
                    info!("Unmounting {}", path.display());
                    env.bind.unmount(&env.checkout, &self.repo_path)?;
                }
                RepoPathDisposition::IsEmptyDirectory => {
                    std::fs::remove_dir(&path).map_err(|e| {
                        RedirectError::io(format!("Failed to remove {}", path.display()), e)
                    })?;
                    return Ok(RepoPathDisposition::DoesNotExist);
                }
                other => return Ok(other),
            }
        }

        Err(RedirectError::UnmountFailed { path })
    }

    /// Clear the path and realize this redirection over it.
    pub fn apply(&self, env: &RedirectEnv) -> RedirectResult<()> {
        let disposition = self.remove_existing(env, false)?;

        let as_symlink = match self.kind {
            RedirectionType::Symlink => true,
            RedirectionType::Bind => env.bind.realizes_as_symlink(),
            RedirectionType::Unknown => false,
        };

        // A bind mount may legitimately cover a populated directory; a
        // symlink would have to replace it.
        if disposition == RepoPathDisposition::IsNonEmptyDirectory && as_symlink {
            return Err(RedirectError::PathObstructed {
                repo_path: self.repo_path.clone(),
                reason: "it is a non-empty directory. Review its contents and remove it if \
                         that is appropriate and then try again."
                    .to_string(),
            });
        }
        if disposition == RepoPathDisposition::IsFile {
            return Err(RedirectError::PathObstructed {
                repo_path: self.repo_path.clone(),
                reason: "it is a file".to_string(),
            });
        }

        let Some(target) = self.expand_target(env)? else {
            return Err(RedirectError::Unsupported(format!(
                "applying a redirection of type {} at {}",
                self.kind,
                self.repo_path.display()
            )));
        };

        info!("Redirecting {} ({}) to {}", self.repo_path.display(), self.kind, target.display());
        match self.kind {
            RedirectionType::Bind => env.bind.mount(&env.checkout, &self.repo_path, &target),
            _ => symlink::create(&self.expand_repo_path(env), &target),
        }
    }
}

// A build daemon rooted at the parent keeps handles into the path and would
// not notice it going away.
fn stop_build_daemon_above(env: &RedirectEnv, path: &Path) {
    let Some(project) = path.parent() else {
        return;
    };
    if env.build_daemon.is_running_for(project) {
        info!("Stopping the build daemon for {}", project.display());
        env.build_daemon.stop_for(project);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builddaemon::{MockBuildDaemonProbe, NoBuildDaemon};
    use crate::checkout::{Checkout, TomlConfigStore};
    use crate::mtab::{MockMountTable, MountStat, NopMountTable};
    use crate::platform::Platform;
    use crate::redirect::bind::{BindStrategy, SymlinkBindStrategy};
    use crate::redirect::types::RedirectionSource;
    use crate::scratch::DirScratchAllocator;
    use std::sync::{Arc, Mutex};

    /// Records calls and never actually mounts anything.
    #[derive(Default)]
    struct RecordingBind {
        mounts: Mutex<Vec<PathBuf>>,
        unmounts: Mutex<Vec<PathBuf>>,
    }

    impl BindStrategy for RecordingBind {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn mount(&self, _: &Checkout, repo_path: &Path, _: &Path) -> RedirectResult<()> {
            self.mounts.lock().unwrap().push(repo_path.to_path_buf());
            Ok(())
        }

        fn unmount(&self, _: &Checkout, repo_path: &Path) -> RedirectResult<()> {
            self.unmounts.lock().unwrap().push(repo_path.to_path_buf());
            Ok(())
        }
    }

    struct Fixture {
        _checkout_dir: tempfile::TempDir,
        _scratch_dir: tempfile::TempDir,
        env: RedirectEnv,
    }

    fn fixture(bind: Arc<dyn BindStrategy>) -> Fixture {
        let checkout_dir = tempfile::tempdir().unwrap();
        let scratch_dir = tempfile::tempdir().unwrap();
        let env = RedirectEnv {
            checkout: Checkout::new(checkout_dir.path()).unwrap(),
            platform: Platform::Linux,
            mount_table: Arc::new(NopMountTable),
            bind,
            scratch: Arc::new(DirScratchAllocator::new(scratch_dir.path())),
            build_daemon: Arc::new(NoBuildDaemon),
            store: Arc::new(TomlConfigStore),
        };
        Fixture { _checkout_dir: checkout_dir, _scratch_dir: scratch_dir, env }
    }

    fn symlink_redir(path: &str) -> Redirection {
        Redirection::declared(path, RedirectionType::Symlink, RedirectionSource::User)
    }

    #[test]
    fn test_remove_missing_path() {
        let fx = fixture(Arc::new(RecordingBind::default()));
        let disposition = symlink_redir("out").remove_existing(&fx.env, false).unwrap();
        assert_eq!(disposition, RepoPathDisposition::DoesNotExist);
    }

    #[test]
    fn test_remove_empty_dir() {
        let fx = fixture(Arc::new(RecordingBind::default()));
        let redir = symlink_redir("out");
        std::fs::create_dir(redir.expand_repo_path(&fx.env)).unwrap();

        assert_eq!(
            redir.remove_existing(&fx.env, false).unwrap(),
            RepoPathDisposition::DoesNotExist
        );
        assert!(!redir.expand_repo_path(&fx.env).exists());
    }

    #[test]
    fn test_remove_keeps_non_empty_dir_and_file() {
        let fx = fixture(Arc::new(RecordingBind::default()));
        let dir = symlink_redir("dir");
        std::fs::create_dir(dir.expand_repo_path(&fx.env)).unwrap();
        std::fs::write(dir.expand_repo_path(&fx.env).join("data"), b"x").unwrap();
        assert_eq!(
            dir.remove_existing(&fx.env, false).unwrap(),
            RepoPathDisposition::IsNonEmptyDirectory
        );

        let file = symlink_redir("file");
        std::fs::write(file.expand_repo_path(&fx.env), b"x").unwrap();
        assert_eq!(file.remove_existing(&fx.env, false).unwrap(), RepoPathDisposition::IsFile);
        assert!(file.expand_repo_path(&fx.env).exists());
    }

    #[test]
    fn test_apply_symlink_is_idempotent() {
        let fx = fixture(Arc::new(RecordingBind::default()));
        let redir = symlink_redir("tools/out");

        redir.apply(&fx.env).unwrap();
        let link = redir.expand_repo_path(&fx.env);
        let target = redir.expand_target(&fx.env).unwrap().unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), target);

        redir.apply(&fx.env).unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), target);
    }

    #[test]
    fn test_apply_symlink_over_non_empty_dir_is_obstructed() {
        let fx = fixture(Arc::new(RecordingBind::default()));
        let redir = symlink_redir("out");
        let path = redir.expand_repo_path(&fx.env);
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("data"), b"x").unwrap();

        let err = redir.apply(&fx.env).unwrap_err();
        assert!(matches!(err, RedirectError::PathObstructed { .. }));
        assert!(err.to_string().contains("non-empty directory"));
        assert!(path.join("data").exists());
    }

    #[test]
    fn test_apply_over_file_is_obstructed() {
        let fx = fixture(Arc::new(RecordingBind::default()));
        let redir = Redirection::declared("out", RedirectionType::Bind, RedirectionSource::User);
        std::fs::write(redir.expand_repo_path(&fx.env), b"x").unwrap();

        let err = redir.apply(&fx.env).unwrap_err();
        assert_eq!(err.to_string(), "Cannot redirect out because it is a file");
    }

    #[test]
    fn test_bind_mounts_over_non_empty_dir() {
        let bind = Arc::new(RecordingBind::default());
        let fx = fixture(bind.clone());
        let redir = Redirection::declared("out", RedirectionType::Bind, RedirectionSource::User);
        let path = redir.expand_repo_path(&fx.env);
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("data"), b"x").unwrap();

        redir.apply(&fx.env).unwrap();
        assert_eq!(*bind.mounts.lock().unwrap(), vec![PathBuf::from("out")]);
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_realized_bind_is_obstructed_by_non_empty_dir() {
        let fx = fixture(Arc::new(SymlinkBindStrategy));
        let redir = Redirection::declared("out", RedirectionType::Bind, RedirectionSource::User);
        let path = redir.expand_repo_path(&fx.env);
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("data"), b"x").unwrap();

        assert!(matches!(redir.apply(&fx.env), Err(RedirectError::PathObstructed { .. })));
    }

    #[test]
    fn test_unknown_mount_cannot_be_applied() {
        let fx = fixture(Arc::new(RecordingBind::default()));
        let err = Redirection::unknown_mount("out").apply(&fx.env).unwrap_err();
        assert!(matches!(err, RedirectError::Unsupported(_)));
    }

    fn stuck_mount_env(fx: &mut Fixture, mount_point: PathBuf) {
        let mut table = MockMountTable::new();
        table.expect_lstat().returning(move |p: &Path| {
            let dev = if p == mount_point.as_path() { 7 } else { 1 };
            Ok(MountStat { dev, mode: 0o40755 })
        });
        fx.env.mount_table = Arc::new(table);
    }

    #[test]
    fn test_bind_mount_that_will_not_unmount() {
        let bind = Arc::new(RecordingBind::default());
        let mut fx = fixture(bind.clone());
        let redir = Redirection::declared("out", RedirectionType::Bind, RedirectionSource::User);
        let path = redir.expand_repo_path(&fx.env);
        std::fs::create_dir(&path).unwrap();
        stuck_mount_env(&mut fx, path.clone());

        let err = redir.remove_existing(&fx.env, false).unwrap_err();
        assert!(matches!(err, RedirectError::UnmountFailed { .. }));
        // One retraction, then the confirming pass gives up.
        assert_eq!(bind.unmounts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_fail_if_bind_mount_skips_retraction() {
        let bind = Arc::new(RecordingBind::default());
        let mut fx = fixture(bind.clone());
        let redir = Redirection::declared("out", RedirectionType::Bind, RedirectionSource::User);
        let path = redir.expand_repo_path(&fx.env);
        std::fs::create_dir(&path).unwrap();
        stuck_mount_env(&mut fx, path);

        assert!(redir.remove_existing(&fx.env, true).is_err());
        assert!(bind.unmounts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_build_daemon_stopped_before_removal() {
        let mut fx = fixture(Arc::new(RecordingBind::default()));
        let redir = symlink_redir("out");
        std::fs::create_dir(redir.expand_repo_path(&fx.env)).unwrap();

        let project = fx.env.checkout.path().to_path_buf();
        let mut probe = MockBuildDaemonProbe::new();
        probe.expect_is_running_for().returning(|_| true);
        probe
            .expect_stop_for()
            .times(1)
            .returning(move |p: &Path| assert_eq!(p, project.as_path()));
        fx.env.build_daemon = Arc::new(probe);

        redir.remove_existing(&fx.env, false).unwrap();
    }
}

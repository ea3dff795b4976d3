// Scratch directory allocation
//
// Redirection targets live outside the checkout in a deterministic location
// derived from the checkout path and the redirected repo path.

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{RedirectError, RedirectResult};
use crate::process;

/// Subdirectory under each checkout's scratch space holding redirections.
pub const REDIRECTIONS_SUBDIR: &str = "fsredirect/redirections";

#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait ScratchAllocator: Send + Sync {
    /// Return the scratch directory for `repo_path`, creating it if needed.
    /// Repeated calls with the same arguments return the same path.
    fn scratch_dir(&self, checkout: &Path, repo_path: &Path) -> RedirectResult<PathBuf>;
}

/// Allocates under a fixed root, keyed by a hash of the checkout path.
pub struct DirScratchAllocator {
    root: PathBuf,
}

impl DirScratchAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn checkout_key(checkout: &Path) -> String {
        let digest = Sha256::digest(checkout.as_os_str().as_encoded_bytes());
        format!("{:x}", digest)[..16].to_string()
    }
}

impl ScratchAllocator for DirScratchAllocator {
    fn scratch_dir(&self, checkout: &Path, repo_path: &Path) -> RedirectResult<PathBuf> {
        let dir = self
            .root
            .join(Self::checkout_key(checkout))
            .join(REDIRECTIONS_SUBDIR)
            .join(repo_path);
        std::fs::create_dir_all(&dir)
            .map_err(|e| RedirectError::io(format!("Failed to create {}", dir.display()), e))?;
        Ok(dir)
    }
}

/// Delegates to an external `mkscratch` executable.
pub struct MkscratchAllocator {
    mkscratch: PathBuf,
}

impl MkscratchAllocator {
    pub fn new(mkscratch: impl Into<PathBuf>) -> Self {
        Self { mkscratch: mkscratch.into() }
    }
}

impl ScratchAllocator for MkscratchAllocator {
    fn scratch_dir(&self, checkout: &Path, repo_path: &Path) -> RedirectResult<PathBuf> {
        let subdir = Path::new(REDIRECTIONS_SUBDIR).join(repo_path);
        let stdout = process::capture_stdout(
            Command::new(&self.mkscratch).arg("path").arg(checkout).arg("--subdir").arg(&subdir),
        )?;
        let dir = PathBuf::from(stdout.trim());
        std::fs::create_dir_all(&dir)
            .map_err(|e| RedirectError::io(format!("Failed to create {}", dir.display()), e))?;
        Ok(dir)
    }
}

/// Allocator selected by configuration.
pub fn from_config(config: &crate::config::ScratchConfig) -> Box<dyn ScratchAllocator> {
    match &config.mkscratch {
        Some(mkscratch) => Box::new(MkscratchAllocator::new(mkscratch)),
        None => Box::new(DirScratchAllocator::new(&config.root)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_allocator_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let alloc = DirScratchAllocator::new(tmp.path());

        let a = alloc.scratch_dir(Path::new("/repo"), Path::new("buck-out")).unwrap();
        let b = alloc.scratch_dir(Path::new("/repo"), Path::new("buck-out")).unwrap();
        assert_eq!(a, b);
        assert!(a.is_dir());
        assert!(a.starts_with(tmp.path()));
        assert!(a.ends_with("fsredirect/redirections/buck-out"));
    }

    #[test]
    fn test_dir_allocator_separates_checkouts() {
        let tmp = tempfile::tempdir().unwrap();
        let alloc = DirScratchAllocator::new(tmp.path());

        let a = alloc.scratch_dir(Path::new("/repo1"), Path::new("out")).unwrap();
        let b = alloc.scratch_dir(Path::new("/repo2"), Path::new("out")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    #[cfg(unix)]
    fn test_mkscratch_nonzero_exit_is_external_tool_error() {
        let alloc = MkscratchAllocator::new("false");
        let err = alloc.scratch_dir(Path::new("/repo"), Path::new("out")).unwrap_err();
        assert!(matches!(err, RedirectError::ExternalTool { .. }));
    }

    #[test]
    fn test_missing_mkscratch_is_io_error() {
        let alloc = MkscratchAllocator::new("/nonexistent/mkscratch");
        let err = alloc.scratch_dir(Path::new("/repo"), Path::new("out")).unwrap_err();
        assert!(matches!(err, RedirectError::Io { .. }));
    }
}

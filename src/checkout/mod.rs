//! A checkout: the root of a managed working copy and the location of its
//! per-checkout state.

mod store;

pub use store::{
    CheckoutConfig, ConfigStore, REDIRECTIONS_KEY, RedirectionProfile, TomlConfigStore,
};

#[cfg(any(test, feature = "mockall"))]
pub use store::MockConfigStore;

use std::path::{Path, PathBuf};

use crate::error::{RedirectError, RedirectResult};

/// Per-checkout state directory, relative to the checkout root.
pub const STATE_DIR: &str = ".fsredirect";
/// User-editable config inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "config.toml";
/// Repo-committed redirection profile, relative to the checkout root.
pub const REPO_PROFILE: &str = ".redirections";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    path: PathBuf,
}

impl Checkout {
    /// Use `path` as the checkout root. The path is canonicalized so that
    /// later prefix comparisons against the mount table and resolved paths
    /// are meaningful.
    pub fn new(path: impl AsRef<Path>) -> RedirectResult<Self> {
        let path = path.as_ref();
        let path = std::fs::canonicalize(path).map_err(|e| {
            RedirectError::io(format!("Failed to resolve checkout {}", path.display()), e)
        })?;
        Ok(Self { path })
    }

    /// Find the checkout containing `start` by walking up to the nearest
    /// directory holding [`STATE_DIR`].
    pub fn discover(start: impl AsRef<Path>) -> RedirectResult<Self> {
        let start = start.as_ref();
        let resolved = std::fs::canonicalize(start).map_err(|e| {
            RedirectError::io(format!("Failed to resolve {}", start.display()), e)
        })?;

        resolved
            .ancestors()
            .find(|dir| dir.join(STATE_DIR).is_dir())
            .map(|dir| Self { path: dir.to_path_buf() })
            .ok_or_else(|| RedirectError::NotACheckout { path: resolved.clone() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state_dir(&self) -> PathBuf {
        self.path.join(STATE_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join(CONFIG_FILE)
    }

    pub fn repo_profile_path(&self) -> PathBuf {
        self.path.join(REPO_PROFILE)
    }

    /// Absolute location of a repo-relative path.
    pub fn abs_path(&self, repo_path: &Path) -> PathBuf {
        self.path.join(repo_path)
    }
}

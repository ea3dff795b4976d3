// Filesystem daemon client
//
// The daemon owns the checkout's mount and is the only party allowed to add
// or remove bind mounts inside it on Linux.

mod socket;

pub use socket::SocketFsClient;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use std::path::Path;
use thiserror::Error;

use crate::error::RedirectError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsClientError {
    /// The daemon predates the requested method.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Failed to reach the filesystem daemon: {0}")]
    Transport(String),

    #[error("{0}")]
    Remote(String),
}

impl From<FsClientError> for RedirectError {
    fn from(err: FsClientError) -> Self {
        match err {
            FsClientError::UnsupportedOperation(_) => RedirectError::DaemonUpgradeRequired,
            other => RedirectError::Daemon(other.to_string()),
        }
    }
}

#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait FsClient: Send + Sync {
    fn add_bind_mount(
        &self,
        checkout: &Path,
        repo_path: &Path,
        target: &Path,
    ) -> Result<(), FsClientError>;

    fn remove_bind_mount(&self, checkout: &Path, repo_path: &Path) -> Result<(), FsClientError>;
}

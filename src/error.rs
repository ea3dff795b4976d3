use std::path::PathBuf;
use thiserror::Error;

pub type RedirectResult<T> = Result<T, RedirectError>;

pub const PLEASE_RESTART: &str =
    "Please restart the filesystem daemon to pick up the new redirections feature set";

#[derive(Error, Debug)]
pub enum RedirectError {
    #[error("Failed to parse {}: {message}", .path.display())]
    ConfigParse { path: PathBuf, message: String },

    #[error("{0}")]
    PathValidation(String),

    #[error("Cannot redirect {} because {reason}", .repo_path.display())]
    PathObstructed { repo_path: PathBuf, reason: String },

    #[error("Failed to remove {} since the bind unmount failed", .path.display())]
    UnmountFailed { path: PathBuf },

    #[error("{}", PLEASE_RESTART)]
    DaemonUpgradeRequired,

    #[error("{command}: Failed with status {status}: {stdout} {stderr}")]
    ExternalTool { command: String, status: String, stdout: String, stderr: String },

    #[error("Filesystem daemon error: {0}")]
    Daemon(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not inside a managed checkout", .path.display())]
    NotACheckout { path: PathBuf },

    #[error("{0} is not a known redirection")]
    UnknownRedirection(String),

    #[error("{repo_path} is defined by {defined_by} and cannot be removed using `del`")]
    NotRemovable { repo_path: String, defined_by: String },

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl RedirectError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RedirectError::Io { context: context.into(), source }
    }
}

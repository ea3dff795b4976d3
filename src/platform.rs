// Host OS family detection
//
// Strategies for mount-table reading and bind enactment are picked once,
// from this value, when the command starts.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Native bind mounts through the filesystem daemon
    Linux,
    /// APFS volumes or disk images stand in for bind mounts
    MacOs,
    /// No bind mounts; binds are realized as symlinks
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Other
        }
    }

    /// Whether persisted `/`-separated repo paths must be rewritten for display
    /// and lookup on this platform.
    pub fn uses_backslash_paths(&self) -> bool {
        matches!(self, Platform::Windows)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Windows => write!(f, "windows"),
            Platform::Other => write!(f, "other"),
        }
    }
}

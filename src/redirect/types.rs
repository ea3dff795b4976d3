use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// How a redirection is realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectionType {
    /// Linux: a bind mount to a scratch directory.
    /// macOS: an APFS volume or a mounted disk image.
    /// Windows: the same as `Symlink`.
    Bind,
    /// A symlink to a scratch directory
    Symlink,
    /// Something is mounted that has no configuration
    #[serde(skip)]
    Unknown,
}

impl RedirectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Symlink => "symlink",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a user-supplied type; `unknown` is never accepted.
    pub fn parse_type(s: &str) -> Option<Self> {
        match s {
            "bind" => Some(Self::Bind),
            "symlink" => Some(Self::Symlink),
            _ => None,
        }
    }
}

impl fmt::Display for RedirectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a redirection came from, highest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectionSource {
    /// The checkout's own config file
    User,
    /// The profile committed to the repository
    Repo,
    /// Observed in the mount table, not declared anywhere
    Mount,
}

impl RedirectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Repo => "repo",
            Self::Mount => "mount",
        }
    }
}

impl fmt::Display for RedirectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedirectionState {
    /// Matches the configuration as far as we can tell
    #[serde(rename = "ok")]
    MatchesConfiguration,
    /// Something is mounted that we have no configuration for
    UnknownMount,
    /// Expected to be mounted, but is not
    NotMounted,
    /// Expected a symlink, but none is present
    SymlinkMissing,
    /// The symlink is present but points somewhere else
    SymlinkIncorrect,
}

impl RedirectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MatchesConfiguration => "ok",
            Self::UnknownMount => "unknown-mount",
            Self::NotMounted => "not-mounted",
            Self::SymlinkMissing => "symlink-missing",
            Self::SymlinkIncorrect => "symlink-incorrect",
        }
    }
}

impl fmt::Display for RedirectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared or observed redirection.
///
/// Values are rebuilt on every resolution pass; `state` in particular is
/// only meaningful for the pass that computed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub repo_path: PathBuf,
    pub kind: RedirectionType,
    pub target: Option<PathBuf>,
    pub source: RedirectionSource,
    pub state: RedirectionState,
}

impl Redirection {
    /// A declared redirection, assumed to match until resolved.
    pub fn declared(
        repo_path: impl Into<PathBuf>,
        kind: RedirectionType,
        source: RedirectionSource,
    ) -> Self {
        Self {
            repo_path: repo_path.into(),
            kind,
            target: None,
            source,
            state: RedirectionState::MatchesConfiguration,
        }
    }

    /// A live mount with no configuration behind it.
    pub fn unknown_mount(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            kind: RedirectionType::Unknown,
            target: None,
            source: RedirectionSource::Mount,
            state: RedirectionState::UnknownMount,
        }
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "FSREDIRECT";
pub const DEFAULT_CONFIG_NAME: &str = "fsredirect";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scratch: ScratchConfig,
    pub daemon: DaemonConfig,
    pub bind: BindConfig,
    pub build: BuildConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    pub root: PathBuf,
    pub mkscratch: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
}

/// How bind redirections are realized on Linux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    /// Ask the filesystem daemon to add the bind mount
    #[default]
    Daemon,
    /// Call `mount -o bind` directly
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    pub mode: BindMode,
    pub apfs_helper: PathBuf,
    /// Every live checkout on this machine; APFS volumes belonging to none of
    /// them are stale.
    pub known_checkouts: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub buck: String,
    pub stop_daemons: bool,
}

impl Config {
    /// Load from `fsredirect.toml` in the working directory (if present),
    /// then `FSREDIRECT_*` environment variables (`__` separates nested keys).
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(None)
    }

    pub fn load_from(file: Option<&Path>) -> anyhow::Result<Self> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let env =
            config::Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__");

        let config = config::Config::builder().add_source(file_source).add_source(env).build()?;

        Ok(config.try_deserialize()?)
    }
}

impl Default for ScratchConfig {
    fn default() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self { root: base.join("fsredirect").join("scratch"), mkscratch: None }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { socket_path: PathBuf::from("/run/fsredirect/daemon.sock") }
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            mode: BindMode::Daemon,
            apfs_helper: PathBuf::from("/usr/local/libexec/fsredirect/apfs_mount_helper"),
            known_checkouts: Vec::new(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { buck: "buck".to_string(), stop_daemons: true }
    }
}

//! Redirection reconciliation: declared redirections, their observed state,
//! and the operations that bring the two in line.

mod bind;
mod disposition;
mod driver;
mod entity;
mod env;
pub mod output;
mod path;
mod resolver;
mod symlink;
mod types;

pub use bind::{
    ApfsVolumeStrategy, BindStrategy, DISK_IMAGE_NAME, DaemonBindStrategy, DirectBindStrategy,
    DiskImageStrategy, SymlinkBindStrategy, UnsupportedBindStrategy, delete_apfs_volume,
    for_platform as bind_strategy_for_platform, have_apfs_helper, list_stale_apfs_volumes,
};
pub use disposition::{RepoPathDisposition, is_bind_mount};
pub use driver::{AddOutcome, EntryFailure, ReconcileReport, Redirector};
pub use env::RedirectEnv;
pub use path::{resolve_lenient, resolve_repo_relative_path};
pub use resolver::{
    RedirectionMap, apply_redirection_configs, get_configured_redirections,
    get_effective_redirections, lookup_key, persisted_key, platform_key,
};
pub use types::{Redirection, RedirectionSource, RedirectionState, RedirectionType};

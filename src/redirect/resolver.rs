// Configured and effective redirection state
//
// Configured: the repo profile merged with the user's checkout config, user
// entries winning. Effective: the configured set checked against the mount
// table and the filesystem, plus any bind mounts nobody declared.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{RedirectError, RedirectResult};
use crate::platform::Platform;

use super::disposition::is_bind_mount;
use super::env::RedirectEnv;
use super::path::resolve_lenient;
use super::types::{Redirection, RedirectionSource, RedirectionState, RedirectionType};

/// Redirections keyed by their repo path in platform form.
pub type RedirectionMap = BTreeMap<String, Redirection>;

/// Map a persisted `/`-separated key to the platform's separator.
pub fn platform_key(key: &str, platform: Platform) -> String {
    if platform.uses_backslash_paths() {
        key.replace('/', "\\")
    } else {
        key.to_string()
    }
}

/// The persisted form of a repo path: always `/`-separated.
pub fn persisted_key(repo_path: &Path, platform: Platform) -> String {
    let key = repo_path.to_string_lossy();
    if platform.uses_backslash_paths() {
        key.replace('\\', "/")
    } else {
        key.into_owned()
    }
}

/// Merge the declared redirections. Later sources override earlier ones.
pub fn get_configured_redirections(env: &RedirectEnv) -> RedirectResult<RedirectionMap> {
    let mut sources = Vec::with_capacity(2);

    let profile = env.checkout.repo_profile_path();
    if profile.is_file() {
        sources.push((RedirectionSource::Repo, env.store.load_redirection_profile(&profile)?));
    }
    sources.push((RedirectionSource::User, env.store.get_config(&env.checkout)?.redirections));

    let mut redirs = RedirectionMap::new();
    for (source, declared) in sources {
        for (path, kind) in declared {
            let key = platform_key(&path, env.platform);
            redirs.insert(key.clone(), Redirection::declared(key, kind, source));
        }
    }
    Ok(redirs)
}

/// Compute what is actually in place for every configured redirection and
/// every bind mount found inside the checkout.
pub fn get_effective_redirections(env: &RedirectEnv) -> RedirectResult<RedirectionMap> {
    let mut redirs = RedirectionMap::new();
    let checkout = env.checkout.path();

    let mounts = env
        .mount_table
        .read()
        .map_err(|e| RedirectError::io("Failed to read the mount table", e))?;
    for mount in mounts {
        let Ok(rel) = mount.mount_point.strip_prefix(checkout) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        if !is_bind_mount(&mount.mount_point, env.mount_table.as_ref()) {
            debug!("Skipping {}: not a bind mount", mount.mount_point.display());
            continue;
        }
        let key = rel.to_string_lossy().into_owned();
        redirs.insert(key, Redirection::unknown_mount(rel));
    }

    let symlink_realized = env.bind.realizes_as_symlink();
    for (key, mut redir) in get_configured_redirections(env)? {
        redir.target = match redir.expand_target(env) {
            Ok(target) => target,
            Err(e) => {
                warn!("Cannot determine the target of {}: {}", key, e);
                None
            }
        };

        if redirs.contains_key(&key) {
            if redir.kind != RedirectionType::Bind {
                redir.state = RedirectionState::UnknownMount;
            }
        } else if redir.kind == RedirectionType::Bind && !symlink_realized {
            redir.state = RedirectionState::NotMounted;
        } else if redir.kind == RedirectionType::Symlink || symlink_realized {
            let link = redir.expand_repo_path(env);
            redir.state = symlink_state(&link, redir.target.as_deref());
        }

        redirs.insert(key, redir);
    }

    Ok(redirs)
}

fn symlink_state(link: &Path, expected: Option<&Path>) -> RedirectionState {
    let Some(expected) = expected else {
        return RedirectionState::SymlinkMissing;
    };
    let actual = match std::fs::read_link(link) {
        Ok(actual) => actual,
        Err(_) => return RedirectionState::SymlinkMissing,
    };

    // Relative link targets are relative to the directory holding the link.
    let actual = if actual.is_absolute() {
        actual
    } else {
        link.parent().map(|dir| dir.join(&actual)).unwrap_or(actual)
    };

    if resolve_lenient(&actual) == resolve_lenient(expected) {
        RedirectionState::MatchesConfiguration
    } else {
        RedirectionState::SymlinkIncorrect
    }
}

/// Rewrite the user config's redirection table from `redirs`, dropping
/// entries that came from the repo profile.
pub fn apply_redirection_configs<'a>(
    env: &RedirectEnv,
    redirs: impl IntoIterator<Item = &'a Redirection>,
) -> RedirectResult<()> {
    let table: BTreeMap<String, RedirectionType> = redirs
        .into_iter()
        .filter(|r| r.source != RedirectionSource::Repo)
        .map(|r| (persisted_key(&r.repo_path, env.platform), r.kind))
        .collect();

    let config = env.store.get_config(&env.checkout)?;
    env.store.save_config(&env.checkout, &config.with_redirections(table))
}

/// Look up `repo_path` the way the user typed it. Empty and `.` segments
/// are dropped, matching how `add` normalizes the path it persists.
pub fn lookup_key(repo_path: &str, platform: Platform) -> String {
    let separators: &[char] = if platform.uses_backslash_paths() { &['/', '\\'] } else { &['/'] };
    let key = repo_path
        .split(separators)
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/");
    platform_key(&key, platform)
}

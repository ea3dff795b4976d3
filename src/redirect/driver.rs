use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{RedirectError, RedirectResult};

use super::env::RedirectEnv;
use super::path::resolve_repo_relative_path;
use super::resolver::{
    apply_redirection_configs, get_configured_redirections, get_effective_redirections, lookup_key,
};
use super::types::{Redirection, RedirectionSource, RedirectionState, RedirectionType};

/// Outcome of `add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Applied,
    /// An identical user redirection was already in place.
    AlreadyInPlace,
}

/// A redirection that could not be reconciled during a batch operation.
#[derive(Debug, Clone, Serialize)]
pub struct EntryFailure {
    pub repo_path: PathBuf,
    pub message: String,
}

/// Result of `fixup` or `unmount`: the state after the pass and the entries
/// that failed along the way.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub redirections: Vec<Redirection>,
    pub failures: Vec<EntryFailure>,
    pub success: bool,
}

/// Entry point for every redirection command against one checkout.
pub struct Redirector {
    env: RedirectEnv,
}

impl Redirector {
    pub fn new(env: RedirectEnv) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &RedirectEnv {
        &self.env
    }

    /// The effective redirections, ordered by repo path.
    pub fn list(&self) -> RedirectResult<Vec<Redirection>> {
        Ok(get_effective_redirections(&self.env)?.into_values().collect())
    }

    /// Declare a user redirection at `path`, realize it and persist it.
    pub fn add(
        &self,
        path: &Path,
        kind: RedirectionType,
        force_remount: bool,
    ) -> RedirectResult<AddOutcome> {
        if kind == RedirectionType::Unknown {
            return Err(RedirectError::Unsupported(format!(
                "adding a redirection of type {}",
                kind
            )));
        }

        let repo_path = resolve_repo_relative_path(self.env.checkout.path(), path)?;
        let key = repo_path.to_string_lossy().into_owned();
        let redir = Redirection::declared(repo_path, kind, RedirectionSource::User);

        let effective = get_effective_redirections(&self.env)?;
        let in_place = effective.get(&key).is_some_and(|existing| {
            existing.kind == kind
                && existing.source == RedirectionSource::User
                && existing.state == RedirectionState::MatchesConfiguration
        });
        if in_place && !force_remount {
            info!("Skipping {}; it is already configured", key);
            return Ok(AddOutcome::AlreadyInPlace);
        }

        redir.apply(&self.env)?;

        let mut configured = get_configured_redirections(&self.env)?;
        configured.insert(key, redir);
        apply_redirection_configs(&self.env, configured.values())?;
        Ok(AddOutcome::Applied)
    }

    /// Retract the redirection at `repo_path` and forget it.
    pub fn del(&self, repo_path: &str) -> RedirectResult<()> {
        let key = lookup_key(repo_path, self.env.platform);
        let mut configured = get_configured_redirections(&self.env)?;

        if let Some(redir) = configured.remove(&key) {
            redir.remove_existing(&self.env, false)?;
            apply_redirection_configs(&self.env, configured.values())?;
            if redir.source == RedirectionSource::Repo {
                warn!(
                    "{} is declared by the repository profile; the next fixup restores it",
                    key
                );
            }
            return Ok(());
        }

        let effective = get_effective_redirections(&self.env)?;
        match effective.get(&key) {
            Some(redir) => Err(RedirectError::NotRemovable {
                repo_path: key,
                defined_by: redir.source.to_string(),
            }),
            None => Err(RedirectError::UnknownRedirection(key)),
        }
    }

    /// Retract every redirection, keeping the configuration.
    pub fn unmount(&self) -> RedirectResult<ReconcileReport> {
        let mut failures = Vec::new();
        for redir in get_effective_redirections(&self.env)?.values() {
            if let Err(e) = redir.remove_existing(&self.env, false) {
                error!("Failed to remove {}: {}", redir.repo_path.display(), e);
                failures.push(EntryFailure::new(redir, &e));
            }
        }

        let redirections = self.list()?;
        let success = redirections
            .iter()
            .all(|r| r.state != RedirectionState::MatchesConfiguration);
        Ok(ReconcileReport { redirections, failures, success })
    }

    /// Bring every redirection in line with the configuration.
    ///
    /// With `force_remount`, bind redirections that already match are torn
    /// down and mounted again.
    pub fn fixup(&self, force_remount: bool) -> RedirectResult<ReconcileReport> {
        let mut failures = Vec::new();
        for redir in get_effective_redirections(&self.env)?.values() {
            let healthy = redir.state == RedirectionState::MatchesConfiguration;
            if healthy && !(force_remount && redir.kind == RedirectionType::Bind) {
                continue;
            }

            info!("Fixing {} ({})", redir.repo_path.display(), redir.state);
            if let Err(e) = self.fix_one(redir) {
                error!("Failed to fix {}: {}", redir.repo_path.display(), e);
                failures.push(EntryFailure::new(redir, &e));
            }
        }

        let redirections = self.list()?;
        let success = redirections
            .iter()
            .all(|r| r.state == RedirectionState::MatchesConfiguration);
        Ok(ReconcileReport { redirections, failures, success })
    }

    fn fix_one(&self, redir: &Redirection) -> RedirectResult<()> {
        redir.remove_existing(&self.env, false)?;
        if redir.kind == RedirectionType::Unknown {
            return Ok(());
        }
        redir.apply(&self.env)
    }
}

impl EntryFailure {
    fn new(redir: &Redirection, err: &RedirectError) -> Self {
        Self { repo_path: redir.repo_path.clone(), message: err.to_string() }
    }
}

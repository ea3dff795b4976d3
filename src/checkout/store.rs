use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

use super::Checkout;
use crate::error::{RedirectError, RedirectResult};
use crate::redirect::RedirectionType;

/// Table holding the `repo_path -> type` map in both config documents.
pub const REDIRECTIONS_KEY: &str = "redirections";

/// The persisted per-checkout settings.
///
/// Only `redirections` is interpreted here; every other key of the document
/// is carried through untouched when the config is saved again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckoutConfig {
    pub redirections: BTreeMap<String, RedirectionType>,
    pub other: toml::Table,
}

impl CheckoutConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, String> {
        let mut other: toml::Table = toml::from_str(contents).map_err(|e| e.to_string())?;

        let redirections = match other.remove(REDIRECTIONS_KEY) {
            None => BTreeMap::new(),
            Some(toml::Value::Table(table)) => parse_redirection_table(table)?,
            Some(_) => return Err(format!("`{}` must be a table", REDIRECTIONS_KEY)),
        };

        Ok(Self { redirections, other })
    }

    pub fn to_toml_string(&self) -> Result<String, String> {
        let mut doc = self.other.clone();
        let redirections: toml::Table = self
            .redirections
            .iter()
            .map(|(path, kind)| (path.clone(), toml::Value::String(kind.as_str().to_string())))
            .collect();
        doc.insert(REDIRECTIONS_KEY.to_string(), toml::Value::Table(redirections));
        toml::to_string(&doc).map_err(|e| e.to_string())
    }

    /// Same settings with the redirection map replaced wholesale.
    pub fn with_redirections(&self, redirections: BTreeMap<String, RedirectionType>) -> Self {
        Self { redirections, other: self.other.clone() }
    }
}

fn parse_redirection_table(
    table: toml::Table,
) -> Result<BTreeMap<String, RedirectionType>, String> {
    table
        .into_iter()
        .map(|(path, value)| {
            let kind = value
                .as_str()
                .and_then(RedirectionType::parse_type)
                .ok_or_else(|| format!("{} is not a valid redirection type for {}", value, path))?;
            Ok((path, kind))
        })
        .collect()
}

/// A repo-committed redirection profile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectionProfile {
    #[serde(default)]
    pub redirections: BTreeMap<String, RedirectionType>,
}

#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait ConfigStore: Send + Sync {
    fn get_config(&self, checkout: &Checkout) -> RedirectResult<CheckoutConfig>;

    fn save_config(&self, checkout: &Checkout, config: &CheckoutConfig) -> RedirectResult<()>;

    /// Load the `repo_path -> type` map from a profile file.
    fn load_redirection_profile(
        &self,
        path: &Path,
    ) -> RedirectResult<BTreeMap<String, RedirectionType>>;
}

/// TOML files on local disk.
pub struct TomlConfigStore;

impl ConfigStore for TomlConfigStore {
    fn get_config(&self, checkout: &Checkout) -> RedirectResult<CheckoutConfig> {
        let path = checkout.config_path();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CheckoutConfig::default());
            }
            Err(e) => {
                return Err(RedirectError::io(format!("Failed to read {}", path.display()), e));
            }
        };

        CheckoutConfig::from_toml_str(&contents)
            .map_err(|message| RedirectError::ConfigParse { path, message })
    }

    fn save_config(&self, checkout: &Checkout, config: &CheckoutConfig) -> RedirectResult<()> {
        let state_dir = checkout.state_dir();
        std::fs::create_dir_all(&state_dir).map_err(|e| {
            RedirectError::io(format!("Failed to create {}", state_dir.display()), e)
        })?;

        let path = checkout.config_path();
        let contents = config
            .to_toml_string()
            .map_err(|message| RedirectError::ConfigParse { path: path.clone(), message })?;

        // Replace atomically; readers never observe a partial document.
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, contents)
            .map_err(|e| RedirectError::io(format!("Failed to write {}", tmp.display()), e))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| RedirectError::io(format!("Failed to replace {}", path.display()), e))?;

        tracing::debug!("Saved {}", path.display());
        Ok(())
    }

    fn load_redirection_profile(
        &self,
        path: &Path,
    ) -> RedirectResult<BTreeMap<String, RedirectionType>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RedirectError::io(format!("Failed to read {}", path.display()), e))?;
        let profile: RedirectionProfile = toml::from_str(&contents).map_err(|e| {
            RedirectError::ConfigParse { path: path.to_path_buf(), message: e.to_string() }
        })?;
        Ok(profile.redirections)
    }
}

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::store::{resolve_store_root, StoreLocation};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
    pub store: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn flag_is_enabled(&self, key: &str) -> bool {
        matches!(self.vars.get(key).map(String::as_str), Some("1"))
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug)]
pub struct Config {
    pub(crate) store: StoreConfig,
    pub(crate) runtime: RuntimeConfig,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if the update store root cannot be resolved.
    pub fn from_env(global: &GlobalOptions) -> anyhow::Result<Self> {
        let snapshot = EnvSnapshot::capture();
        Self::from_snapshot(&snapshot, global)
    }

    pub(crate) fn from_snapshot(
        snapshot: &EnvSnapshot,
        global: &GlobalOptions,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store: StoreConfig {
                root: resolve_store_root(global.store.as_deref(), snapshot)?,
            },
            runtime: RuntimeConfig {
                version: snapshot.var("OTTO_RUNTIME_VERSION").map(ToOwned::to_owned),
            },
        })
    }

    #[must_use]
    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    #[must_use]
    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }
}

#[derive(Debug)]
pub struct StoreConfig {
    pub root: StoreLocation,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_dir_env_override_wins_over_defaults() {
        let snapshot = EnvSnapshot::testing(&[("OTTO_STORE_DIR", "/srv/otto/store")]);
        let config = Config::from_snapshot(&snapshot, &GlobalOptions::default()).unwrap();
        assert_eq!(config.store().root.path, PathBuf::from("/srv/otto/store"));
        assert_eq!(config.store().root.source, "OTTO_STORE_DIR");
    }

    #[test]
    fn cli_store_flag_wins_over_env() {
        let snapshot = EnvSnapshot::testing(&[("OTTO_STORE_DIR", "/srv/otto/store")]);
        let global = GlobalOptions {
            store: Some(PathBuf::from("/opt/override")),
            ..GlobalOptions::default()
        };
        let config = Config::from_snapshot(&snapshot, &global).unwrap();
        assert_eq!(config.store().root.path, PathBuf::from("/opt/override"));
        assert_eq!(config.store().root.source, "--store");
    }

    #[test]
    fn runtime_version_comes_from_the_environment() {
        let snapshot = EnvSnapshot::testing(&[("OTTO_RUNTIME_VERSION", "1.4.0")]);
        let config = Config::from_snapshot(&snapshot, &GlobalOptions::default()).unwrap();
        assert_eq!(config.runtime().version.as_deref(), Some("1.4.0"));

        let snapshot = EnvSnapshot::testing(&[]);
        let config = Config::from_snapshot(&snapshot, &GlobalOptions::default()).unwrap();
        assert_eq!(config.runtime().version, None);
    }
}

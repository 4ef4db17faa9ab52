use std::fmt;
use std::sync::OnceLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{Config, EnvSnapshot, GlobalOptions};
use crate::store::{StoreLocation, UpdateStore};
use crate::ExecutionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandGroup {
    Init,
    Import,
    Stage,
    List,
    Launch,
    Reap,
    Doctor,
    Completions,
}

impl fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandGroup::Init => "init",
            CommandGroup::Import => "import",
            CommandGroup::Stage => "stage",
            CommandGroup::List => "list",
            CommandGroup::Launch => "launch",
            CommandGroup::Reap => "reap",
            CommandGroup::Doctor => "doctor",
            CommandGroup::Completions => "completions",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CommandInfo {
    pub group: CommandGroup,
    pub name: &'static str,
}

impl CommandInfo {
    #[must_use]
    pub const fn new(group: CommandGroup, name: &'static str) -> Self {
        Self { group, name }
    }
}

pub trait CommandHandler<R> {
    /// Executes a command handler within the provided context.
    ///
    /// # Errors
    /// Returns an error if command execution fails unexpectedly.
    fn handle(&self, ctx: &CommandContext, request: R) -> Result<ExecutionOutcome>;
}

pub struct CommandContext<'a> {
    pub global: &'a GlobalOptions,
    env: EnvSnapshot,
    config: Config,
    store: OnceLock<UpdateStore>,
}

impl<'a> CommandContext<'a> {
    /// Creates a new command context with the provided global options.
    ///
    /// # Errors
    /// Returns an error if the environment snapshot or configuration cannot be prepared.
    pub fn new(global: &'a GlobalOptions) -> Result<Self> {
        let env = EnvSnapshot::capture();
        let config = Config::from_snapshot(&env, global)?;
        Ok(Self {
            global,
            env,
            config,
            store: OnceLock::new(),
        })
    }

    /// Opens the update store at the configured root, creating its layout on
    /// first use. The handle is cached for the lifetime of the context.
    ///
    /// # Errors
    /// Returns an error if the store directory or its index cannot be opened.
    pub fn store(&self) -> Result<UpdateStore> {
        if let Some(store) = self.store.get() {
            Ok(store.clone())
        } else {
            let store = UpdateStore::open(&self.config.store().root.path)?;
            let _ = self.store.set(store.clone());
            Ok(store)
        }
    }

    pub fn store_root(&self) -> &StoreLocation {
        &self.config.store().root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn env_contains(&self, key: &str) -> bool {
        self.env.contains(key)
    }

    pub fn env_flag_enabled(&self, key: &str) -> bool {
        self.env.flag_is_enabled(key)
    }
}

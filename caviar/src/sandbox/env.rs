//! Child-process environment preparation.
//!
//! The child starts from an explicit allow-list inherited from the parent
//! plus the Caviar-managed variables, then environment-contributing plugins
//! get a chance to add to it through two primitives: `set_env` and
//! `inherit_env`. The Caviar-managed keys are reserved; neither primitive
//! may touch them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::context::{CAVIAR_CWD, CAVIAR_DEV};

/// Variables unconditionally forwarded from the parent process: debug-log
/// toggles and the executable search path.
pub const ESSENTIAL_ENV_KEYS: &[&str] = &["RUST_LOG", "RUST_BACKTRACE", "PATH"];

/// Caviar-managed keys that environment-contributing plugins may not set.
pub const PRIVATE_ENV_KEYS: &[&str] = &[CAVIAR_CWD, CAVIAR_DEV];

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("`{0}` is preserved by caviar and cannot be set by plugins")]
    PreservedEnvKey(String),

    #[error("invalid sandbox option `{key}`: {detail}")]
    InvalidOptions { key: &'static str, detail: String },

    #[error("`caviar.env` must compose into string values, got {0}")]
    InvalidEnvValue(String),
}

/// The environment under construction for one spawn, shared with async
/// environment-hook listeners. Writes happen only during preparation; once
/// the child is spawned nothing mutates it.
#[derive(Clone)]
pub struct EnvSetup {
    vars: Arc<Mutex<BTreeMap<String, String>>>,
    cwd: PathBuf,
}

impl EnvSetup {
    pub(crate) fn new(cwd: PathBuf) -> Self {
        Self {
            vars: Arc::new(Mutex::new(BTreeMap::new())),
            cwd,
        }
    }

    /// Working directory of the run, for listeners that derive paths.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Set a variable in the child environment. A `None` value is a no-op;
    /// reserved keys are rejected without mutating anything.
    pub fn set_env(&self, key: &str, value: Option<String>) -> Result<(), SandboxError> {
        if PRIVATE_ENV_KEYS.contains(&key) {
            return Err(SandboxError::PreservedEnvKey(key.to_string()));
        }
        if let Some(value) = value {
            self.vars
                .lock()
                .expect("env vars poisoned")
                .insert(key.to_string(), value);
        }
        Ok(())
    }

    /// Copy a variable from the parent process, rejecting reserved keys.
    /// Absent parent variables are a no-op.
    pub fn inherit_env(&self, key: &str) -> Result<(), SandboxError> {
        if PRIVATE_ENV_KEYS.contains(&key) {
            return Err(SandboxError::PreservedEnvKey(key.to_string()));
        }
        self.set_env(key, std::env::var(key).ok())
    }

    /// Forward the essential allow-list, regardless of plugin activity.
    pub(crate) fn ensure_essential(&self) {
        for key in ESSENTIAL_ENV_KEYS {
            // Essential keys are never reserved.
            let _ = self.inherit_env(key);
        }
    }

    /// Caviar-managed write path; bypasses the reserved-key guard.
    pub(crate) fn insert_managed(&self, key: &str, value: impl Into<String>) {
        self.vars
            .lock()
            .expect("env vars poisoned")
            .insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.vars.lock().expect("env vars poisoned").get(key).cloned()
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, String> {
        self.vars.lock().expect("env vars poisoned").clone()
    }
}

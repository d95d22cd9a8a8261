//! Config nodes and the collaborator traits that produce them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ConfigError;
use super::value::ConfigValue;

/// Default file name looked up at every chain level.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "caviar.toml";

/// One level of the chain: an existing directory plus the config file name
/// resolved at that level. Outermost nodes come first in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigNode {
    server_path: PathBuf,
    config_file_name: String,
}

impl ConfigNode {
    pub(crate) fn new(server_path: PathBuf, config_file_name: String) -> Self {
        Self {
            server_path,
            config_file_name,
        }
    }

    pub fn server_path(&self) -> &Path {
        &self.server_path
    }

    pub fn config_file_name(&self) -> &str {
        &self.config_file_name
    }

    /// Full path of the config source backing this node.
    pub fn config_file(&self) -> PathBuf {
        self.server_path.join(&self.config_file_name)
    }
}

/// An explicitly supplied chain level (the alternative to walking the
/// working directory upward). Framework layers implement this to contribute
/// a directory, optionally a config file name override, and optionally
/// in-memory values that replace reading a file at all.
pub trait ConfigLayer: Send + Sync {
    /// Directory this layer resolves to. Returning `None` is a load-time
    /// failure ([`ConfigError::PathGetterRequired`]).
    fn server_path(&self) -> Option<PathBuf>;

    /// Override the config file name for this level.
    fn config_file_name(&self) -> Option<String> {
        None
    }

    /// In-memory values for this level. When `None`, the chain reads the
    /// node's config file through the active [`ConfigSource`].
    fn values(&self) -> Option<ConfigValue> {
        None
    }
}

/// Parses one node's config file into a value tree. The on-disk format is a
/// collaborator concern; the chain only requires key/value pairs per node.
pub trait ConfigSource: Send + Sync {
    fn load(&self, node: &ConfigNode) -> Result<ConfigValue, ConfigError>;
}

/// Default source: TOML documents.
#[derive(Debug, Default)]
pub struct TomlSource;

impl ConfigSource for TomlSource {
    fn load(&self, node: &ConfigNode) -> Result<ConfigValue, ConfigError> {
        let path = node.config_file();
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let parsed: toml::Value =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?;
        Ok(ConfigValue::from_toml(parsed))
    }
}

pub(crate) fn default_source() -> Arc<dyn ConfigSource> {
    Arc::new(TomlSource)
}

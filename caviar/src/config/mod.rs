//! Hierarchical config resolution across nested project directories.
//!
//! A [`ConfigChain`] holds one [`ConfigNode`] per directory level, outermost
//! first, and resolves keys through three strategies: [`ConfigChain::compose`]
//! (fold every level), [`ConfigChain::bail_top`] (first defined value from
//! the outside in) and [`ConfigChain::bail_bottom`] (first defined value from
//! the inside out). [`ConfigChain::namespace`] produces a view scoped to a
//! key prefix; all strategies operate relative to it.

mod chain;
mod node;
mod value;

use std::path::PathBuf;

use thiserror::Error;

pub use chain::{ChainOptions, ConfigChain};
pub use node::{ConfigLayer, ConfigNode, ConfigSource, DEFAULT_CONFIG_FILE_NAME, TomlSource};
pub use value::ConfigValue;

/// Configuration-shape errors. All of these are fatal at load or resolution
/// time; nothing here is retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config layer yields no server path")]
    PathGetterRequired,

    #[error("invalid server path {0:?}: must be a non-empty absolute path")]
    InvalidServerPath(PathBuf),

    #[error("server path {0} does not exist")]
    ServerPathNotExists(PathBuf),

    #[error("invalid config file name {0:?}")]
    InvalidConfigFileName(String),

    #[error("config key `{0}` is not optional")]
    ConfigNotOptional(String),

    #[error("`plugins` of {0} must be a sequence")]
    InvalidPlugins(PathBuf),

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("compose callback failed for key `{key}` at {file}")]
    Compose {
        key: String,
        file: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

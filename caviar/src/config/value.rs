//! The value tree loaded from each config node.
//!
//! Plain data (anything a config file can express) is carried as
//! [`serde_json::Value`] leaves. Entries that are code in spirit — plugin
//! registrations and the binder constructor — cannot come from a data file,
//! so they get their own variants and are contributed by programmatic config
//! layers.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::binder::BinderFactory;
use crate::plugin::PluginSpec;

/// One value in a config node, possibly nested.
#[derive(Clone)]
pub enum ConfigValue {
    /// Plain data leaf.
    Data(Value),
    /// Ordered sequence; may mix data and code-bearing entries.
    List(Vec<ConfigValue>),
    /// Nested key/value section.
    Table(BTreeMap<String, ConfigValue>),
    /// A plugin registration contributed by a programmatic layer.
    Plugin(PluginSpec),
    /// The binder constructor contributed by a programmatic layer.
    Binder(BinderFactory),
}

impl ConfigValue {
    /// Descend through nested tables along `path`. An empty path returns `self`.
    pub fn get_path(&self, path: &[String]) -> Option<&ConfigValue> {
        let mut current = self;
        for key in path {
            match current {
                ConfigValue::Table(table) => current = table.get(key)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Data leaf accessor; `None` for any other variant.
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            ConfigValue::Data(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Table(table) => Some(table),
            _ => None,
        }
    }

    /// Convert a parsed TOML document into a config value tree.
    ///
    /// Tables become [`ConfigValue::Table`] and arrays [`ConfigValue::List`]
    /// so that namespacing and sequence validation see through file-sourced
    /// values exactly like programmatic ones.
    pub fn from_toml(value: toml::Value) -> ConfigValue {
        match value {
            toml::Value::Table(table) => ConfigValue::Table(
                table
                    .into_iter()
                    .map(|(key, value)| (key, ConfigValue::from_toml(value)))
                    .collect(),
            ),
            toml::Value::Array(items) => {
                ConfigValue::List(items.into_iter().map(ConfigValue::from_toml).collect())
            }
            toml::Value::String(s) => ConfigValue::Data(Value::String(s)),
            toml::Value::Integer(n) => ConfigValue::Data(Value::from(n)),
            toml::Value::Float(f) => ConfigValue::Data(Value::from(f)),
            toml::Value::Boolean(b) => ConfigValue::Data(Value::Bool(b)),
            toml::Value::Datetime(dt) => ConfigValue::Data(Value::String(dt.to_string())),
        }
    }

    /// Shorthand used by programmatic layers and tests.
    pub fn data(value: impl Into<Value>) -> ConfigValue {
        ConfigValue::Data(value.into())
    }

    pub fn table(entries: impl IntoIterator<Item = (String, ConfigValue)>) -> ConfigValue {
        ConfigValue::Table(entries.into_iter().collect())
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Data(value) => write!(f, "Data({value})"),
            ConfigValue::List(items) => f.debug_tuple("List").field(items).finish(),
            ConfigValue::Table(table) => f.debug_tuple("Table").field(table).finish(),
            ConfigValue::Plugin(_) => f.write_str("Plugin(..)"),
            ConfigValue::Binder(_) => f.write_str("Binder(..)"),
        }
    }
}

impl PartialEq for ConfigValue {
    /// Data compares structurally; code-bearing entries only by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConfigValue::Data(a), ConfigValue::Data(b)) => a == b,
            (ConfigValue::List(a), ConfigValue::List(b)) => a == b,
            (ConfigValue::Table(a), ConfigValue::Table(b)) => a == b,
            _ => false,
        }
    }
}

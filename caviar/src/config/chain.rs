//! Chain loading and the three retrieval strategies.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use super::ConfigError;
use super::node::{ConfigLayer, ConfigNode, ConfigSource, DEFAULT_CONFIG_FILE_NAME, default_source};
use super::value::ConfigValue;

/// How to locate and parse the chain.
pub struct ChainOptions {
    /// Working directory; the innermost chain level.
    pub cwd: PathBuf,
    /// Config file name looked up at every level.
    pub config_file_name: String,
    /// Explicit layer chain, outermost first. When empty, the chain walks
    /// the working directory upward instead.
    pub layers: Vec<Arc<dyn ConfigLayer>>,
    /// Parser for file-backed nodes.
    pub source: Arc<dyn ConfigSource>,
}

impl ChainOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            config_file_name: DEFAULT_CONFIG_FILE_NAME.to_string(),
            layers: Vec::new(),
            source: default_source(),
        }
    }

    pub fn config_file_name(mut self, name: impl Into<String>) -> Self {
        self.config_file_name = name.into();
        self
    }

    pub fn layer(mut self, layer: Arc<dyn ConfigLayer>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = source;
        self
    }
}

#[derive(Debug)]
struct LoadedNode {
    node: ConfigNode,
    value: ConfigValue,
}

#[derive(Debug)]
struct ChainInner {
    nodes: Vec<LoadedNode>,
}

/// The loaded chain. Cloning is cheap; [`ConfigChain::namespace`] returns a
/// view over the same loaded values scoped to a key prefix. Retrieval never
/// mutates the underlying values.
#[derive(Clone)]
pub struct ConfigChain {
    inner: Arc<ChainInner>,
    prefix: Vec<String>,
}

impl ConfigChain {
    /// Locate and parse every chain level. All configuration-shape errors
    /// surface here, before anything consumes the chain.
    pub fn load(options: ChainOptions) -> Result<Self, ConfigError> {
        let nodes = if options.layers.is_empty() {
            Self::walk_ancestry(&options)?
        } else {
            Self::resolve_layers(&options)?
        };

        debug!(levels = nodes.len(), "config chain loaded");
        Ok(Self {
            inner: Arc::new(ChainInner { nodes }),
            prefix: Vec::new(),
        })
    }

    /// Collect every contiguous ancestor of `cwd` (itself included) that
    /// carries a config source, outermost first.
    fn walk_ancestry(options: &ChainOptions) -> Result<Vec<LoadedNode>, ConfigError> {
        if !options.cwd.is_dir() {
            return Err(ConfigError::ServerPathNotExists(options.cwd.clone()));
        }

        let mut dirs = Vec::new();
        let mut current = Some(options.cwd.as_path());
        while let Some(dir) = current {
            if !dir.join(&options.config_file_name).is_file() {
                break;
            }
            dirs.push(dir.to_path_buf());
            current = dir.parent();
        }
        dirs.reverse();

        dirs.into_iter()
            .map(|dir| {
                let node = ConfigNode::new(dir, options.config_file_name.clone());
                let value = options.source.load(&node)?;
                Ok(LoadedNode { node, value })
            })
            .collect()
    }

    fn resolve_layers(options: &ChainOptions) -> Result<Vec<LoadedNode>, ConfigError> {
        options
            .layers
            .iter()
            .map(|layer| {
                let path = layer.server_path().ok_or(ConfigError::PathGetterRequired)?;
                if path.as_os_str().is_empty() || !path.is_absolute() {
                    return Err(ConfigError::InvalidServerPath(path));
                }
                if !path.is_dir() {
                    return Err(ConfigError::ServerPathNotExists(path));
                }

                let file_name = match layer.config_file_name() {
                    Some(name) => {
                        if name.is_empty() || name.contains(['/', '\\']) {
                            return Err(ConfigError::InvalidConfigFileName(name));
                        }
                        name
                    }
                    None => options.config_file_name.clone(),
                };

                let node = ConfigNode::new(path, file_name);
                let value = match layer.values() {
                    Some(value) => value,
                    None => options.source.load(&node)?,
                };
                Ok(LoadedNode { node, value })
            })
            .collect()
    }

    /// Chain levels, outermost first.
    pub fn nodes(&self) -> impl Iterator<Item = &ConfigNode> {
        self.inner.nodes.iter().map(|loaded| &loaded.node)
    }

    /// A view scoped to `key`; every retrieval strategy resolves relative to
    /// the accumulated prefix.
    pub fn namespace(&self, key: impl Into<String>) -> ConfigChain {
        let mut prefix = self.prefix.clone();
        prefix.push(key.into());
        ConfigChain {
            inner: Arc::clone(&self.inner),
            prefix,
        }
    }

    fn value_at<'a>(&self, loaded: &'a LoadedNode, key: &str) -> Option<&'a ConfigValue> {
        let mut path = self.prefix.clone();
        path.push(key.to_string());
        loaded.value.get_path(&path)
    }

    /// First defined value scanning from the outermost node inward.
    pub fn bail_top(&self, key: &str) -> Option<ConfigValue> {
        self.inner
            .nodes
            .iter()
            .find_map(|loaded| self.value_at(loaded, key))
            .cloned()
    }

    /// First defined value scanning from the innermost node outward.
    pub fn bail_bottom(&self, key: &str) -> Option<ConfigValue> {
        self.inner
            .nodes
            .iter()
            .rev()
            .find_map(|loaded| self.value_at(loaded, key))
            .cloned()
    }

    /// Fold every node's value for `key`, outer to inner, through `combine`,
    /// seeded with `initial`. The combining function also receives the
    /// contributing node so failures can name the offending config file.
    pub fn compose<F>(
        &self,
        key: &str,
        initial: Option<ConfigValue>,
        mut combine: F,
    ) -> Result<Option<ConfigValue>, ConfigError>
    where
        F: FnMut(Option<ConfigValue>, &ConfigValue, &ConfigNode) -> anyhow::Result<ConfigValue>,
    {
        let mut acc = initial;
        for loaded in &self.inner.nodes {
            if let Some(value) = self.value_at(loaded, key) {
                acc = Some(combine(acc.take(), value, &loaded.node).map_err(|source| {
                    ConfigError::Compose {
                        key: key.to_string(),
                        file: loaded.node.config_file(),
                        source,
                    }
                })?);
            }
        }
        Ok(acc)
    }

    /// Fail with [`ConfigError::ConfigNotOptional`] when a required key
    /// resolved to nothing.
    pub fn required(value: Option<ConfigValue>, key: &str) -> Result<ConfigValue, ConfigError> {
        value.ok_or_else(|| ConfigError::ConfigNotOptional(key.to_string()))
    }

    /// Resolve the composed plugin list for the current namespace: the
    /// concatenation of every node's `plugins` sequence, outer to inner,
    /// each entry paired with the file it came from. A node whose `plugins`
    /// value is not a sequence is fatal.
    pub fn plugins(&self) -> Result<Vec<(ConfigValue, PathBuf)>, ConfigError> {
        let mut entries = Vec::new();
        for loaded in &self.inner.nodes {
            let Some(value) = self.value_at(loaded, "plugins") else {
                continue;
            };
            let items = value
                .as_list()
                .ok_or_else(|| ConfigError::InvalidPlugins(loaded.node.config_file()))?;
            let file = loaded.node.config_file();
            entries.extend(items.iter().map(|item| (item.clone(), file.clone())));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    struct StaticLayer {
        path: Option<PathBuf>,
        file_name: Option<String>,
        values: Option<ConfigValue>,
    }

    impl StaticLayer {
        fn at(path: &Path, values: ConfigValue) -> Arc<dyn ConfigLayer> {
            Arc::new(Self {
                path: Some(path.to_path_buf()),
                file_name: None,
                values: Some(values),
            })
        }
    }

    impl ConfigLayer for StaticLayer {
        fn server_path(&self) -> Option<PathBuf> {
            self.path.clone()
        }

        fn config_file_name(&self) -> Option<String> {
            self.file_name.clone()
        }

        fn values(&self) -> Option<ConfigValue> {
            self.values.clone()
        }
    }

    fn seq(values: &[i64]) -> ConfigValue {
        ConfigValue::List(values.iter().map(|n| ConfigValue::data(json!(n))).collect())
    }

    fn concat(
        prev: Option<ConfigValue>,
        next: &ConfigValue,
        _node: &ConfigNode,
    ) -> anyhow::Result<ConfigValue> {
        let mut items = match prev {
            Some(ConfigValue::List(items)) => items,
            None => Vec::new(),
            Some(other) => anyhow::bail!("expected a sequence, got {other:?}"),
        };
        items.extend(next.as_list().map(<[_]>::to_vec).unwrap_or_default());
        Ok(ConfigValue::List(items))
    }

    fn three_level_chain(temp: &Path) -> ConfigChain {
        let options = ChainOptions::new(temp)
            .layer(StaticLayer::at(
                temp,
                ConfigValue::table([("k".to_string(), seq(&[1]))]),
            ))
            .layer(StaticLayer::at(
                temp,
                ConfigValue::table([("k".to_string(), seq(&[2]))]),
            ))
            .layer(StaticLayer::at(
                temp,
                ConfigValue::table([("k".to_string(), seq(&[3]))]),
            ));
        ConfigChain::load(options).expect("load")
    }

    #[test]
    fn ancestry_walk_produces_outer_to_inner_nodes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outer = temp.path().join("outer");
        let mid = outer.join("mid");
        let inner = mid.join("inner");
        fs::create_dir_all(&inner).expect("mkdirs");
        for dir in [&outer, &mid, &inner] {
            fs::write(dir.join(DEFAULT_CONFIG_FILE_NAME), "name = \"x\"\n").expect("write");
        }

        let chain = ConfigChain::load(ChainOptions::new(&inner)).expect("load");
        let paths: Vec<_> = chain.nodes().map(|n| n.server_path().to_path_buf()).collect();
        assert_eq!(paths, vec![outer, mid, inner]);
    }

    #[test]
    fn ancestry_walk_stops_at_first_gap() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = temp.path().join("app");
        fs::create_dir_all(&app).expect("mkdir");
        // Only the innermost directory declares a config source.
        fs::write(app.join(DEFAULT_CONFIG_FILE_NAME), "").expect("write");

        let chain = ConfigChain::load(ChainOptions::new(&app)).expect("load");
        assert_eq!(chain.nodes().count(), 1);
    }

    #[test]
    fn bail_top_and_bail_bottom_scan_opposite_ends() {
        let temp = tempfile::tempdir().expect("tempdir");
        let options = ChainOptions::new(temp.path())
            .layer(StaticLayer::at(
                temp.path(),
                ConfigValue::table([("k".to_string(), ConfigValue::data(json!("outermost")))]),
            ))
            .layer(StaticLayer::at(temp.path(), ConfigValue::table([])))
            .layer(StaticLayer::at(
                temp.path(),
                ConfigValue::table([("k".to_string(), ConfigValue::data(json!("innermost")))]),
            ));
        let chain = ConfigChain::load(options).expect("load");

        assert_eq!(chain.bail_top("k"), Some(ConfigValue::data(json!("outermost"))));
        assert_eq!(
            chain.bail_bottom("k"),
            Some(ConfigValue::data(json!("innermost")))
        );
        assert_eq!(chain.bail_top("absent"), None);
    }

    #[test]
    fn compose_folds_outer_to_inner() {
        let temp = tempfile::tempdir().expect("tempdir");
        let chain = three_level_chain(temp.path());

        let composed = chain
            .compose("k", None, concat)
            .expect("compose")
            .expect("defined");
        assert_eq!(composed, seq(&[1, 2, 3]));
    }

    #[test]
    fn compose_seeds_with_initial_value() {
        let temp = tempfile::tempdir().expect("tempdir");
        let chain = three_level_chain(temp.path());

        let composed = chain
            .compose("k", Some(seq(&[0])), concat)
            .expect("compose")
            .expect("defined");
        assert_eq!(composed, seq(&[0, 1, 2, 3]));
    }

    #[test]
    fn namespace_scopes_every_strategy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let options = ChainOptions::new(temp.path()).layer(StaticLayer::at(
            temp.path(),
            ConfigValue::table([(
                "caviar".to_string(),
                ConfigValue::table([("port".to_string(), ConfigValue::data(json!(3000)))]),
            )]),
        ));
        let chain = ConfigChain::load(options).expect("load");

        assert_eq!(chain.bail_bottom("port"), None);
        let scoped = chain.namespace("caviar");
        assert_eq!(scoped.bail_bottom("port"), Some(ConfigValue::data(json!(3000))));
    }

    #[test]
    fn required_rejects_undefined() {
        let err = ConfigChain::required(None, "server").err().expect("missing");
        assert!(matches!(err, ConfigError::ConfigNotOptional(key) if key == "server"));
    }

    #[test]
    fn non_sequence_plugins_fail_naming_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let options = ChainOptions::new(temp.path()).layer(StaticLayer::at(
            temp.path(),
            ConfigValue::table([("plugins".to_string(), ConfigValue::data(json!(42)))]),
        ));
        let chain = ConfigChain::load(options).expect("load");

        let err = chain.plugins().err().expect("non-sequence plugins");
        match err {
            ConfigError::InvalidPlugins(file) => {
                assert_eq!(file, temp.path().join(DEFAULT_CONFIG_FILE_NAME));
            }
            other => panic!("expected InvalidPlugins, got {other:?}"),
        }
    }

    #[test]
    fn layer_without_path_fails_at_load_time() {
        let layer = Arc::new(StaticLayer {
            path: None,
            file_name: None,
            values: None,
        });
        let err = ConfigChain::load(ChainOptions::new("/tmp").layer(layer)).err().expect("load");
        assert!(matches!(err, ConfigError::PathGetterRequired));
    }

    #[test]
    fn relative_layer_path_is_invalid() {
        let layer = Arc::new(StaticLayer {
            path: Some(PathBuf::from("relative/dir")),
            file_name: None,
            values: None,
        });
        let err = ConfigChain::load(ChainOptions::new("/tmp").layer(layer)).err().expect("load");
        assert!(matches!(err, ConfigError::InvalidServerPath(_)));
    }

    #[test]
    fn missing_layer_directory_is_invalid() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gone = temp.path().join("never-created");
        let layer = Arc::new(StaticLayer {
            path: Some(gone.clone()),
            file_name: None,
            values: None,
        });
        let err = ConfigChain::load(ChainOptions::new(temp.path()).layer(layer)).err().expect("load");
        assert!(matches!(err, ConfigError::ServerPathNotExists(path) if path == gone));
    }

    #[test]
    fn config_file_name_override_is_validated() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layer = Arc::new(StaticLayer {
            path: Some(temp.path().to_path_buf()),
            file_name: Some("nested/evil.toml".to_string()),
            values: Some(ConfigValue::table([])),
        });
        let err = ConfigChain::load(ChainOptions::new(temp.path()).layer(layer)).err().expect("load");
        assert!(matches!(err, ConfigError::InvalidConfigFileName(_)));
    }
}

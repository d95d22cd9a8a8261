//! Plugin normalization and application.
//!
//! A plugin is a closed, explicit interface: it must expose [`Plugin::apply`]
//! and may declare a hook extension and a sandbox attribute. Config entries
//! carry plugins as [`PluginSpec`]s — an instance, a factory, or either
//! paired with an activation condition — and are normalized once, at
//! application time, into a `(factory, condition)` pair.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::{ConfigChain, ConfigError, ConfigValue};
use crate::context::RunContext;
use crate::hooks::{HookExtension, HookRegistry, HooksHandle, TypeTag};

/// Third-party extension code tapping lifecycle events.
pub trait Plugin: Send + Sync {
    /// Diagnostic name; must be non-empty.
    fn name(&self) -> &str;

    /// Whether this plugin targets the sandbox environment phase. Read by
    /// caller activation predicates, not by the plugin system itself.
    fn sandbox(&self) -> bool {
        false
    }

    /// Extra hooks this plugin declares for a block type it does not
    /// construct.
    fn hook_extension(&self) -> Option<HookExtension> {
        None
    }

    /// Register hook listeners through the restricted handle.
    fn apply(&self, hooks: &HooksHandle<'_>) -> anyhow::Result<()>;
}

pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Predicate over the ambient run context deciding whether a plugin is
/// active for this run. Defaults to always-true.
#[derive(Clone)]
pub enum PluginCondition {
    Always,
    /// Declarative flag matching; each set field must match the context.
    Flags(ConditionFlags),
    Custom(Arc<dyn Fn(&RunContext) -> bool + Send + Sync>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionFlags {
    pub dev: Option<bool>,
    /// Whether the run is inside either sandbox half.
    pub sandbox: Option<bool>,
    pub child: Option<bool>,
    pub phase: Option<String>,
}

impl PluginCondition {
    pub fn evaluate(&self, ctx: &RunContext) -> bool {
        match self {
            PluginCondition::Always => true,
            PluginCondition::Flags(flags) => {
                flags.dev.is_none_or(|dev| dev == ctx.dev)
                    && flags
                        .sandbox
                        .is_none_or(|sandbox| sandbox == ctx.sandbox.is_some())
                    && flags.child.is_none_or(|child| child == ctx.child)
                    && flags
                        .phase
                        .as_ref()
                        .is_none_or(|phase| *phase == ctx.phase)
            }
            PluginCondition::Custom(predicate) => predicate(ctx),
        }
    }
}

/// Raw plugin entry as it appears in a config node's `plugins` sequence.
#[derive(Clone)]
pub enum PluginSpec {
    Instance(Arc<dyn Plugin>),
    Factory(PluginFactory),
    /// The `[plugin-or-factory, condition]` pair form.
    Conditional(Box<PluginSpec>, PluginCondition),
}

impl PluginSpec {
    pub fn instance(plugin: impl Plugin + 'static) -> Self {
        PluginSpec::Instance(Arc::new(plugin))
    }

    pub fn factory(factory: impl Fn() -> Arc<dyn Plugin> + Send + Sync + 'static) -> Self {
        PluginSpec::Factory(Arc::new(factory))
    }

    pub fn when(self, condition: PluginCondition) -> Self {
        PluginSpec::Conditional(Box::new(self), condition)
    }
}

/// Plugin-shape errors, fatal at the point the offending plugin is
/// processed. No partial application of a malformed plugin is attempted.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid plugin entry in {file}: {detail}")]
    InvalidPlugin { file: PathBuf, detail: String },

    #[error("invalid plugin condition in {0}")]
    InvalidCondition(PathBuf),

    #[error("plugin `{0}` failed to apply")]
    Apply(String, #[source] anyhow::Error),

    #[error("no hook `{hook}` is registered for type `{tag}`")]
    UnknownHook { tag: TypeTag, hook: String },

    #[error("hook `{hook}` for type `{tag}` is registered with a different kind")]
    HookKindMismatch { tag: TypeTag, hook: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Normalize a raw config entry into a `(factory, condition)` pair.
///
/// An instance is wrapped in a factory returning it unchanged; a pair
/// contributes its condition; everything else in the sequence is malformed.
pub fn normalize_plugin(
    raw: &ConfigValue,
    file: &Path,
) -> Result<(PluginFactory, PluginCondition), PluginError> {
    match raw {
        ConfigValue::Plugin(spec) => normalize_spec(spec, file),
        other => Err(PluginError::InvalidPlugin {
            file: file.to_path_buf(),
            detail: format!("expected a plugin entry, got {other:?}"),
        }),
    }
}

fn normalize_spec(
    spec: &PluginSpec,
    file: &Path,
) -> Result<(PluginFactory, PluginCondition), PluginError> {
    match spec {
        PluginSpec::Instance(plugin) => {
            check_plugin(plugin.as_ref(), file)?;
            let plugin = Arc::clone(plugin);
            Ok((
                Arc::new(move || Arc::clone(&plugin)),
                PluginCondition::Always,
            ))
        }
        PluginSpec::Factory(factory) => Ok((Arc::clone(factory), PluginCondition::Always)),
        PluginSpec::Conditional(inner, condition) => match inner.as_ref() {
            PluginSpec::Conditional(..) => Err(PluginError::InvalidCondition(file.to_path_buf())),
            inner => {
                let (factory, _) = normalize_spec(inner, file)?;
                Ok((factory, condition.clone()))
            }
        },
    }
}

/// Validate the minimal required plugin shape once, before invoking it.
fn check_plugin(plugin: &dyn Plugin, file: &Path) -> Result<(), PluginError> {
    if plugin.name().trim().is_empty() {
        return Err(PluginError::InvalidPlugin {
            file: file.to_path_buf(),
            detail: "plugin name must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Resolve the composed plugin list for `chain`'s namespace and apply each
/// active plugin, in chain order (outer to inner). Application order is a
/// stability contract: plugins may depend on earlier plugins having
/// registered hooks.
///
/// `activation` is the caller-supplied predicate over the instantiated
/// plugin — distinct from the plugin's own condition — used to restrict
/// eligibility per run mode (e.g. only sandbox plugins for the outer half).
#[instrument(skip_all)]
pub fn apply_plugins(
    chain: &ConfigChain,
    registry: &HookRegistry,
    ctx: &RunContext,
    activation: impl Fn(&dyn Plugin) -> bool,
) -> Result<(), PluginError> {
    for (raw, file) in chain.plugins()? {
        let (factory, condition) = normalize_plugin(&raw, &file)?;
        if !condition.evaluate(ctx) {
            continue;
        }

        let plugin = factory();
        check_plugin(plugin.as_ref(), &file)?;
        if !activation(plugin.as_ref()) {
            debug!(plugin = plugin.name(), "plugin not eligible for this run");
            continue;
        }

        if let Some(extension) = plugin.hook_extension() {
            registry.extend(&extension)?;
        }

        let handle = HooksHandle::new(registry);
        plugin
            .apply(&handle)
            .map_err(|source| PluginError::Apply(plugin.name().to_string(), source))?;
        debug!(plugin = plugin.name(), "plugin applied");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainOptions, ConfigLayer};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PluginLayer {
        path: PathBuf,
        plugins: Vec<PluginSpec>,
    }

    impl ConfigLayer for PluginLayer {
        fn server_path(&self) -> Option<PathBuf> {
            Some(self.path.clone())
        }

        fn values(&self) -> Option<ConfigValue> {
            Some(ConfigValue::table([(
                "plugins".to_string(),
                ConfigValue::List(
                    self.plugins
                        .iter()
                        .map(|spec| ConfigValue::Plugin(spec.clone()))
                        .collect(),
                ),
            )]))
        }
    }

    struct NamedPlugin {
        name: &'static str,
        sandbox: bool,
        applied: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Plugin for NamedPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn sandbox(&self) -> bool {
            self.sandbox
        }

        fn apply(&self, _hooks: &HooksHandle<'_>) -> anyhow::Result<()> {
            self.applied.lock().expect("lock").push(self.name);
            Ok(())
        }
    }

    fn chain_with(path: &Path, plugins: Vec<Vec<PluginSpec>>) -> ConfigChain {
        let mut options = ChainOptions::new(path);
        for layer_plugins in plugins {
            options = options.layer(Arc::new(PluginLayer {
                path: path.to_path_buf(),
                plugins: layer_plugins,
            }));
        }
        ConfigChain::load(options).expect("load")
    }

    fn ctx() -> RunContext {
        RunContext::new(PathBuf::from("/work"), false, "default", false)
    }

    #[test]
    fn instance_normalizes_to_identity_factory() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let spec = PluginSpec::instance(NamedPlugin {
            name: "solo",
            sandbox: false,
            applied: Arc::clone(&applied),
        });

        let (factory, condition) =
            normalize_spec(&spec, Path::new("/conf/caviar.toml")).expect("normalize");
        assert!(condition.evaluate(&ctx()));
        assert_eq!(factory().name(), "solo");
    }

    #[test]
    fn data_entry_in_plugin_list_is_malformed() {
        let err = normalize_plugin(
            &ConfigValue::data(json!("not-a-plugin")),
            Path::new("/conf/caviar.toml"),
        )
        .err().expect("malformed");
        assert!(matches!(err, PluginError::InvalidPlugin { .. }));
    }

    #[test]
    fn nested_conditions_are_invalid() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let spec = PluginSpec::instance(NamedPlugin {
            name: "p",
            sandbox: false,
            applied,
        })
        .when(PluginCondition::Always)
        .when(PluginCondition::Always);

        let err = normalize_spec(&spec, Path::new("/conf/caviar.toml")).err().expect("nested");
        assert!(matches!(err, PluginError::InvalidCondition(_)));
    }

    #[test]
    fn condition_flags_match_run_context() {
        let dev_only = PluginCondition::Flags(ConditionFlags {
            dev: Some(true),
            ..ConditionFlags::default()
        });
        assert!(!dev_only.evaluate(&ctx()));

        let dev_ctx = RunContext::new(PathBuf::from("/work"), true, "default", false);
        assert!(dev_only.evaluate(&dev_ctx));

        let phase_bound = PluginCondition::Flags(ConditionFlags {
            phase: Some("build".to_string()),
            ..ConditionFlags::default()
        });
        assert!(!phase_bound.evaluate(&dev_ctx));
    }

    #[test]
    fn application_order_is_chain_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let applied = Arc::new(Mutex::new(Vec::new()));
        let plugin = |name| {
            PluginSpec::instance(NamedPlugin {
                name,
                sandbox: false,
                applied: Arc::clone(&applied),
            })
        };
        let chain = chain_with(
            temp.path(),
            vec![vec![plugin("outer")], vec![plugin("inner")]],
        );

        let registry = HookRegistry::new();
        apply_plugins(&chain.namespace("caviar"), &registry, &ctx(), |_| true).expect("apply");
        // The namespace has no plugins; the root chain does.
        assert!(applied.lock().expect("lock").is_empty());

        apply_plugins(&chain, &registry, &ctx(), |_| true).expect("apply");
        assert_eq!(*applied.lock().expect("lock"), vec!["outer", "inner"]);
    }

    #[test]
    fn activation_predicate_filters_instantiated_plugins() {
        let temp = tempfile::tempdir().expect("tempdir");
        let applied = Arc::new(Mutex::new(Vec::new()));
        let chain = chain_with(
            temp.path(),
            vec![vec![
                PluginSpec::instance(NamedPlugin {
                    name: "normal",
                    sandbox: false,
                    applied: Arc::clone(&applied),
                }),
                PluginSpec::instance(NamedPlugin {
                    name: "sandboxed",
                    sandbox: true,
                    applied: Arc::clone(&applied),
                }),
            ]],
        );

        let registry = HookRegistry::new();
        apply_plugins(&chain, &registry, &ctx(), |plugin| !plugin.sandbox()).expect("apply");
        assert_eq!(*applied.lock().expect("lock"), vec!["normal"]);
    }

    #[test]
    fn inactive_condition_skips_factory_invocation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let built = Arc::new(AtomicUsize::new(0));
        let applied = Arc::new(Mutex::new(Vec::new()));
        let factory_builds = Arc::clone(&built);
        let factory_applied = Arc::clone(&applied);
        let spec = PluginSpec::factory(move || {
            factory_builds.fetch_add(1, Ordering::SeqCst);
            Arc::new(NamedPlugin {
                name: "lazy",
                sandbox: false,
                applied: Arc::clone(&factory_applied),
            })
        })
        .when(PluginCondition::Flags(ConditionFlags {
            dev: Some(true),
            ..ConditionFlags::default()
        }));
        let chain = chain_with(temp.path(), vec![vec![spec]]);

        let registry = HookRegistry::new();
        apply_plugins(&chain, &registry, &ctx(), |_| true).expect("apply");
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(applied.lock().expect("lock").is_empty());
    }
}

//! The per-run hook registry with type-tag-keyed extensions.
//!
//! Plugins may declare additional hooks scoped to a block type they do not
//! themselves construct. The registry keeps those extensions in an explicit
//! mapping from type tag to hook set, consulted when a block instance fires
//! its hooks, so later-constructed instances of that type automatically
//! expose the extra hooks to further plugins. Identity is the tag, not any
//! inheritance relationship.

use std::collections::HashMap;
use std::sync::RwLock;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use super::{AsyncHook, Hooks, SyncHook};
use crate::plugin::PluginError;

/// Stable identifier of a hook-extensible block type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag(pub &'static str);

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Sync,
    Async,
}

/// A plugin's declaration of extra hooks for one block type.
#[derive(Clone)]
pub struct HookExtension {
    pub tag: TypeTag,
    pub hooks: Vec<(String, HookKind)>,
}

enum ProxyHook {
    Sync(SyncHook<Value>),
    Async(AsyncHook<Value>),
}

impl ProxyHook {
    fn kind(&self) -> HookKind {
        match self {
            ProxyHook::Sync(_) => HookKind::Sync,
            ProxyHook::Async(_) => HookKind::Async,
        }
    }
}

/// Created at Caviar construction, lives for the whole run.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Hooks,
    extensions: RwLock<HashMap<TypeTag, HashMap<String, ProxyHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixed root hook set.
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Register a plugin-declared hook extension. Re-declaring an existing
    /// hook with the same kind is a no-op; with a different kind it is an
    /// error.
    pub(crate) fn extend(&self, extension: &HookExtension) -> Result<(), PluginError> {
        let mut extensions = self.extensions.write().expect("hook extensions poisoned");
        let slots = extensions.entry(extension.tag).or_default();
        for (name, kind) in &extension.hooks {
            match slots.get(name) {
                Some(existing) if existing.kind() != *kind => {
                    return Err(PluginError::HookKindMismatch {
                        tag: extension.tag,
                        hook: name.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    debug!(tag = %extension.tag, hook = %name, "registered extension hook");
                    slots.insert(
                        name.clone(),
                        match kind {
                            HookKind::Sync => ProxyHook::Sync(SyncHook::new()),
                            HookKind::Async => ProxyHook::Async(AsyncHook::new()),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Attach a listener to a declared sync extension hook.
    pub fn tap_sync(
        &self,
        tag: TypeTag,
        hook: &str,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Result<(), PluginError> {
        let extensions = self.extensions.read().expect("hook extensions poisoned");
        match extensions.get(&tag).and_then(|slots| slots.get(hook)) {
            Some(ProxyHook::Sync(slot)) => {
                slot.tap(listener);
                Ok(())
            }
            Some(ProxyHook::Async(_)) => Err(PluginError::HookKindMismatch {
                tag,
                hook: hook.to_string(),
            }),
            None => Err(PluginError::UnknownHook {
                tag,
                hook: hook.to_string(),
            }),
        }
    }

    /// Attach a listener to a declared async extension hook.
    pub fn tap_async(
        &self,
        tag: TypeTag,
        hook: &str,
        listener: impl Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    ) -> Result<(), PluginError> {
        let extensions = self.extensions.read().expect("hook extensions poisoned");
        match extensions.get(&tag).and_then(|slots| slots.get(hook)) {
            Some(ProxyHook::Async(slot)) => {
                slot.tap(listener);
                Ok(())
            }
            Some(ProxyHook::Sync(_)) => Err(PluginError::HookKindMismatch {
                tag,
                hook: hook.to_string(),
            }),
            None => Err(PluginError::UnknownHook {
                tag,
                hook: hook.to_string(),
            }),
        }
    }

    /// Fire a sync extension hook for `tag`. Firing a hook nobody declared
    /// is a no-op: the instance exposes it, nothing listens.
    pub fn call(&self, tag: TypeTag, hook: &str, payload: &Value) {
        let extensions = self.extensions.read().expect("hook extensions poisoned");
        if let Some(ProxyHook::Sync(slot)) = extensions.get(&tag).and_then(|slots| slots.get(hook))
        {
            slot.call(payload);
        }
    }

    /// Fire an async extension hook for `tag` and wait for every listener.
    pub async fn emit(&self, tag: TypeTag, hook: &str, payload: Value) -> anyhow::Result<()> {
        // Collect the listener futures under the read lock, await after.
        let pending = {
            let extensions = self.extensions.read().expect("hook extensions poisoned");
            match extensions.get(&tag).and_then(|slots| slots.get(hook)) {
                Some(ProxyHook::Async(slot)) => slot.begin(payload),
                _ => Vec::new(),
            }
        };
        let results = futures::future::join_all(pending).await;
        results.into_iter().collect::<anyhow::Result<Vec<_>>>()?;
        Ok(())
    }
}

/// The accessor handed to plugins: exposes the current hook set and listener
/// registration only. Plugins cannot mutate the registry's node set.
pub struct HooksHandle<'a> {
    registry: &'a HookRegistry,
}

impl<'a> HooksHandle<'a> {
    pub(crate) fn new(registry: &'a HookRegistry) -> Self {
        Self { registry }
    }

    pub fn hooks(&self) -> &Hooks {
        self.registry.hooks()
    }

    pub fn tap_sync(
        &self,
        tag: TypeTag,
        hook: &str,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Result<(), PluginError> {
        self.registry.tap_sync(tag, hook, listener)
    }

    pub fn tap_async(
        &self,
        tag: TypeTag,
        hook: &str,
        listener: impl Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    ) -> Result<(), PluginError> {
        self.registry.tap_async(tag, hook, listener)
    }
}

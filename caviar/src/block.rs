//! Blocks: configured, independently lifecycled units of orchestrated work.
//!
//! The [`Block`] trait is the surface block authors implement. Everything an
//! owning binder does to a block — config injection, driving `create` and
//! `ready`, advancing the state machine — lives on the crate-private
//! [`BlockSeat`], so those operations are simply not callable from outside
//! the crate. No naming conventions, no runtime hiding.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::binder::{BinderError, RunOptions};
use crate::config::{ConfigNode, ConfigValue};
use crate::hooks::{HookRegistry, TypeTag};

/// Combining function for a composed block config key.
pub type Composer = Arc<
    dyn Fn(Option<ConfigValue>, &ConfigValue, &ConfigNode) -> anyhow::Result<ConfigValue>
        + Send
        + Sync,
>;

/// Which retrieval strategy resolves one declared config key.
#[derive(Clone)]
pub enum ConfigGetter {
    Compose {
        composer: Composer,
        initial: Option<ConfigValue>,
    },
    BailTop,
    BailBottom,
}

#[derive(Clone)]
pub struct ConfigSetting {
    pub getter: ConfigGetter,
    pub optional: bool,
}

impl ConfigSetting {
    pub fn bail_top() -> Self {
        Self {
            getter: ConfigGetter::BailTop,
            optional: false,
        }
    }

    pub fn bail_bottom() -> Self {
        Self {
            getter: ConfigGetter::BailBottom,
            optional: false,
        }
    }

    pub fn compose(composer: Composer, initial: Option<ConfigValue>) -> Self {
        Self {
            getter: ConfigGetter::Compose { composer, initial },
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// A block's declared config keys, resolved by the binder at configure time.
pub type ConfigSchema = Vec<(String, ConfigSetting)>;

/// The resolved configuration slice injected into one block. Optional keys
/// that resolved to nothing are absent.
#[derive(Debug, Clone, Default)]
pub struct BlockConfig {
    values: BTreeMap<String, ConfigValue>,
}

impl BlockConfig {
    pub(crate) fn new(values: BTreeMap<String, ConfigValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Handle through which one block fires its extension hooks; all listener
/// lookups go through the registry keyed by the block's type tag.
#[derive(Clone)]
pub struct BlockHooks {
    registry: Arc<HookRegistry>,
    tag: TypeTag,
}

impl BlockHooks {
    pub(crate) fn new(registry: Arc<HookRegistry>, tag: TypeTag) -> Self {
        Self { registry, tag }
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Fire a sync extension hook declared for this block's type.
    pub fn call(&self, hook: &str, payload: &serde_json::Value) {
        self.registry.call(self.tag, hook, payload);
    }

    /// Fire an async extension hook and wait for every listener.
    pub async fn emit(&self, hook: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        self.registry.emit(self.tag, hook, payload).await
    }
}

/// Run options plus the block's hook handle, available from configuration
/// onwards.
pub struct BlockContext {
    pub options: RunOptions,
    pub hooks: BlockHooks,
}

/// The surface block authors implement.
#[async_trait]
pub trait Block: Send {
    /// Stable type identifier used for hook proxying.
    fn tag(&self) -> TypeTag;

    /// Config keys this block wants resolved. Unmapped keys default to
    /// same-named lookup.
    fn schema(&self) -> ConfigSchema {
        Vec::new()
    }

    /// Receive the resolved configuration slice.
    fn configure(&mut self, _config: BlockConfig, _ctx: &BlockContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Synchronous setup. Every block's `create` completes before any
    /// block's `ready` begins.
    fn create(&mut self, _ctx: &BlockContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Asynchronous setup; runs concurrently with sibling blocks.
    async fn ready(&mut self, _ctx: &BlockContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Downcast support for the binder's orchestration step.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub type BlockFactory = Arc<dyn Fn() -> Box<dyn Block> + Send + Sync>;

/// Static declaration of one block in a binder's set.
#[derive(Clone)]
pub struct BlockDescriptor {
    pub factory: BlockFactory,
    /// Config namespace the block's keys resolve under.
    pub namespace: Option<String>,
    /// Explicit schema-key → config-key mapping; identity over the schema
    /// when absent.
    pub config_map: Option<Vec<(String, String)>>,
}

impl BlockDescriptor {
    pub fn new(factory: impl Fn() -> Box<dyn Block> + Send + Sync + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            namespace: None,
            config_map: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn config_map(
        mut self,
        map: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.config_map = Some(
            map.into_iter()
                .map(|(key, mapped)| (key.into(), mapped.into()))
                .collect(),
        );
        self
    }
}

/// Named block declarations in insertion order.
#[derive(Clone, Default)]
pub struct BlockSet {
    entries: Vec<(String, BlockDescriptor)>,
}

impl BlockSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, descriptor: BlockDescriptor) -> Self {
        self.entries.push((name.into(), descriptor));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, BlockDescriptor)> {
        self.entries
    }
}

/// Block lifecycle states. Transitions only move forward; a block is
/// single-use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockState {
    Constructed,
    Configured,
    Oriented,
    Created,
    Ready,
}

/// Owner-side wrapper around one block instance. Only the binder holds
/// seats; block references never escape its orchestration step.
pub(crate) struct BlockSeat {
    name: String,
    block: Box<dyn Block>,
    state: BlockState,
    ctx: BlockContext,
}

impl BlockSeat {
    pub(crate) fn new(name: String, block: Box<dyn Block>, ctx: BlockContext) -> Self {
        Self {
            name,
            block,
            state: BlockState::Constructed,
            ctx,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn block_mut(&mut self) -> &mut dyn Block {
        self.block.as_mut()
    }

    fn advance(&mut self, from: &[BlockState], to: BlockState) -> Result<(), BinderError> {
        if !from.contains(&self.state) {
            return Err(BinderError::BlockState {
                block: self.name.clone(),
                state: format!("{:?}", self.state),
                operation: format!("{to:?}"),
            });
        }
        self.state = to;
        Ok(())
    }

    pub(crate) fn configure(&mut self, config: BlockConfig) -> anyhow::Result<()> {
        self.advance(&[BlockState::Constructed], BlockState::Configured)?;
        self.block.configure(config, &self.ctx)
    }

    /// Cross-block wiring happened; the orientation step is optional but the
    /// transition is always recorded.
    pub(crate) fn orient(&mut self) -> Result<(), BinderError> {
        self.advance(&[BlockState::Configured], BlockState::Oriented)
    }

    pub(crate) fn create(&mut self) -> anyhow::Result<()> {
        self.advance(
            &[BlockState::Configured, BlockState::Oriented],
            BlockState::Created,
        )?;
        self.block.create(&self.ctx)?;
        self.ctx.hooks.call("created", &json!({ "block": self.name }));
        Ok(())
    }

    pub(crate) async fn ready(&mut self) -> anyhow::Result<()> {
        self.advance(&[BlockState::Created], BlockState::Ready)?;
        self.block.ready(&self.ctx).await
    }
}

/// The named blocks handed to a binder's orchestration step. Orchestrators
/// wire relationships between blocks here, typically by downcasting.
pub struct BlockMap {
    seats: Vec<(String, BlockSeat)>,
}

impl BlockMap {
    pub(crate) fn new(seats: Vec<(String, BlockSeat)>) -> Self {
        Self { seats }
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.seats.iter().map(|(name, _)| name.as_str())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut dyn Block> {
        self.seats
            .iter_mut()
            .find(|(seat_name, _)| seat_name == name)
            .map(|(_, seat)| seat.block_mut())
    }

    /// Downcast one named block to its concrete type.
    pub fn downcast_mut<T: Block + 'static>(&mut self, name: &str) -> Option<&mut T> {
        self.get_mut(name)?.as_any_mut().downcast_mut::<T>()
    }

    pub(crate) fn seats_mut(&mut self) -> impl Iterator<Item = &mut BlockSeat> {
        self.seats.iter_mut().map(|(_, seat)| seat)
    }
}

//! The binder: owner and driver of a named block set.
//!
//! `ready()` runs the whole block lifecycle in four steps:
//!
//! 1. build and fully configure every declared block, synchronously;
//! 2. hand the named blocks to the subclass-provided orchestration step;
//! 3. `create()` every block sequentially, in insertion order, so every
//!    block's synchronous setup (and its `created` hook side effects) has
//!    finished before any asynchronous readiness begins;
//! 4. await every block's `ready()` concurrently, failing fast on the first
//!    rejection with no rollback of already-ready blocks.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use futures::future::try_join_all;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::block::{
    BlockConfig, BlockContext, BlockDescriptor, BlockHooks, BlockMap, BlockSeat, BlockSet,
    ConfigGetter, ConfigSetting,
};
use crate::config::{ConfigChain, ConfigError, ConfigValue};
use crate::hooks::HookRegistry;

/// Options every block and orchestration step receives.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cwd: PathBuf,
    pub dev: bool,
}

/// Everything a binder is constructed from.
pub struct BinderOptions {
    pub options: RunOptions,
    pub chain: ConfigChain,
    pub hooks: Arc<HookRegistry>,
}

/// Orchestration errors. `NotImplemented` means a base binder was used
/// directly — a programmer error, always fatal.
#[derive(Debug, Error)]
pub enum BinderError {
    #[error("`{0}` is not implemented; a concrete binder must override it")]
    NotImplemented(&'static str),

    #[error("no blocks were assigned to the binder")]
    BlocksNotAssigned,

    #[error("block `{block}` declares no config key `{key}`")]
    UnknownConfigKey { block: String, key: String },

    #[error("block `{block}` cannot enter {operation} from state {state}")]
    BlockState {
        block: String,
        state: String,
        operation: String,
    },

    #[error("config does not locate a binder (`caviar.binder`)")]
    BinderRequired,

    #[error("`caviar.binder` must be a binder constructor")]
    InvalidBinder,
}

/// The subclass surface: wire relationships between named blocks. The base
/// implementation fails, so a binder without an orchestration step cannot be
/// driven.
#[async_trait]
pub trait Orchestrate: Send + Sync {
    async fn orchestrate(&self, _blocks: &mut BlockMap, _options: &RunOptions) -> anyhow::Result<()> {
        Err(BinderError::NotImplemented("orchestrate").into())
    }
}

/// Constructs a binder for one run. Located through the config chain.
pub type BinderFactory = Arc<dyn Fn(BinderOptions) -> anyhow::Result<Binder> + Send + Sync>;

pub struct Binder {
    options: RunOptions,
    chain: ConfigChain,
    hooks: Arc<HookRegistry>,
    blocks: Option<BlockSet>,
    orchestrator: Box<dyn Orchestrate>,
}

impl Binder {
    pub fn new(options: BinderOptions, orchestrator: Box<dyn Orchestrate>) -> Self {
        Self {
            options: options.options,
            chain: options.chain,
            hooks: options.hooks,
            blocks: None,
            orchestrator,
        }
    }

    /// Assign the block declarations. Separate from construction so a
    /// concrete binder can compute its set after it exists.
    pub fn set_blocks(&mut self, blocks: BlockSet) {
        self.blocks = Some(blocks);
    }

    /// Instantiate one block and resolve its configuration slice: every
    /// declared key goes through exactly one retrieval strategy, against the
    /// block's namespace view when one is declared.
    fn build_seat(&self, name: &str, descriptor: &BlockDescriptor) -> anyhow::Result<BlockSeat> {
        let block = (descriptor.factory)();
        let tag = block.tag();

        let hooks = BlockHooks::new(Arc::clone(&self.hooks), tag);
        let ctx = BlockContext {
            options: self.options.clone(),
            hooks,
        };

        let chain = match &descriptor.namespace {
            Some(namespace) => self.chain.namespace(namespace.clone()),
            None => self.chain.clone(),
        };

        let schema = block.schema();
        let config_map: Vec<(String, String)> = match &descriptor.config_map {
            Some(map) => map.clone(),
            None => schema
                .iter()
                .map(|(key, _)| (key.clone(), key.clone()))
                .collect(),
        };

        let mut values = BTreeMap::new();
        for (key, mapped_key) in config_map {
            let setting =
                schema
                    .iter()
                    .find(|(schema_key, _)| *schema_key == key)
                    .map(|(_, setting)| setting)
                    .ok_or_else(|| BinderError::UnknownConfigKey {
                        block: name.to_string(),
                        key: key.clone(),
                    })?;
            if let Some(value) = resolve_config(&chain, &mapped_key, setting)? {
                values.insert(key, value);
            }
        }

        let mut seat = BlockSeat::new(name.to_string(), block, ctx);
        seat.configure(BlockConfig::new(values))
            .with_context(|| format!("configure block `{name}`"))?;
        Ok(seat)
    }

    /// Drive every declared block through its whole lifecycle.
    #[instrument(skip_all)]
    pub async fn ready(&mut self) -> anyhow::Result<()> {
        let declared = self.blocks.take().ok_or(BinderError::BlocksNotAssigned)?;

        // Step 1: the full name → block map is built and configured before
        // orchestration begins.
        let mut seats = Vec::new();
        for (name, descriptor) in declared.into_entries() {
            let seat = self.build_seat(&name, &descriptor)?;
            seats.push((name, seat));
        }
        let mut blocks = BlockMap::new(seats);
        debug!(blocks = blocks.len(), "blocks configured");

        // Step 2: subclass wiring.
        self.orchestrator
            .orchestrate(&mut blocks, &self.options)
            .await?;
        for seat in blocks.seats_mut() {
            seat.orient()?;
        }

        // Step 3: sequential create, insertion order.
        for seat in blocks.seats_mut() {
            seat.create()
                .with_context(|| format!("create block `{}`", seat.name()))?;
        }

        // Step 4: concurrent readiness, fail-fast, no rollback.
        try_join_all(blocks.seats_mut().map(BlockSeat::ready)).await?;
        debug!("all blocks ready");
        Ok(())
    }
}

/// Resolve one config key through its declared strategy. A required key that
/// resolves to nothing is fatal.
fn resolve_config(
    chain: &ConfigChain,
    key: &str,
    setting: &ConfigSetting,
) -> Result<Option<ConfigValue>, ConfigError> {
    let value = match &setting.getter {
        ConfigGetter::Compose { composer, initial } => {
            chain.compose(key, initial.clone(), |prev, next, node| {
                composer(prev, next, node)
            })?
        }
        ConfigGetter::BailTop => chain.bail_top(key),
        ConfigGetter::BailBottom => chain.bail_bottom(key),
    };

    if value.is_none() && !setting.optional {
        return Err(ConfigError::ConfigNotOptional(key.to_string()));
    }
    Ok(value)
}

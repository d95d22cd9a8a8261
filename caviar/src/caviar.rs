//! The top level: glue for one invocation.
//!
//! A [`Caviar`] loads the chain, applies the plugin system, locates the
//! configured binder and drives one lifecycle phase. When this process is
//! the sandbox inner half, a completed run emits the completion handshake
//! before returning.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::binder::{BinderError, BinderOptions, RunOptions};
use crate::config::{ChainOptions, ConfigChain, ConfigLayer, ConfigSource, ConfigValue};
use crate::context::RunContext;
use crate::hooks::HookRegistry;
use crate::plugin::{Plugin, apply_plugins};
use crate::sandbox::send_complete;

#[derive(Debug, Error)]
pub enum CaviarError {
    #[error("invalid phase name {0:?}")]
    InvalidPhase(String),
}

pub struct CaviarOptions {
    pub cwd: PathBuf,
    pub dev: bool,
    /// Whether this process is the spawned sandbox child.
    pub child: bool,
    pub config_file_name: Option<String>,
    /// Explicit config layers; ancestry walk when empty.
    pub layers: Vec<Arc<dyn ConfigLayer>>,
    /// Config source override; TOML files by default.
    pub source: Option<Arc<dyn ConfigSource>>,
}

impl CaviarOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            dev: false,
            child: false,
            config_file_name: None,
            layers: Vec::new(),
            source: None,
        }
    }
}

pub struct Caviar {
    cwd: PathBuf,
    dev: bool,
    child: bool,
    chain: ConfigChain,
    caviar_ns: ConfigChain,
    hooks: Arc<HookRegistry>,
}

impl Caviar {
    /// Load the chain and create the per-run hook registry. All
    /// configuration-shape failures surface here.
    pub fn new(options: CaviarOptions) -> anyhow::Result<Self> {
        let mut chain_options = ChainOptions::new(&options.cwd);
        if let Some(name) = &options.config_file_name {
            chain_options = chain_options.config_file_name(name.clone());
        }
        for layer in &options.layers {
            chain_options = chain_options.layer(Arc::clone(layer));
        }
        if let Some(source) = &options.source {
            chain_options = chain_options.source(Arc::clone(source));
        }
        let chain = ConfigChain::load(chain_options).context("load config chain")?;
        let caviar_ns = chain.namespace("caviar");

        Ok(Self {
            cwd: options.cwd,
            dev: options.dev,
            child: options.child,
            chain,
            caviar_ns,
            hooks: Arc::new(HookRegistry::new()),
        })
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn chain(&self) -> &ConfigChain {
        &self.chain
    }

    /// Run one lifecycle phase.
    #[instrument(skip_all, fields(phase = %phase))]
    pub async fn run(&self, phase: &str) -> anyhow::Result<()> {
        if phase.trim().is_empty() {
            return Err(CaviarError::InvalidPhase(phase.to_string()).into());
        }

        let ctx = RunContext::new(self.cwd.clone(), self.dev, phase, self.child);
        debug!(dev = ctx.dev, child = ctx.child, "run context initialized");

        // Sandbox plugins belong to the outer half's environment phase.
        apply_plugins(&self.caviar_ns, &self.hooks, &ctx, |plugin: &dyn Plugin| {
            !plugin.sandbox()
        })?;

        let hooks = self.hooks.hooks();
        hooks.after_plugins.call(&());
        hooks.start.call(&());

        let factory = match self.caviar_ns.bail_bottom("binder") {
            Some(ConfigValue::Binder(factory)) => factory,
            Some(_) => return Err(BinderError::InvalidBinder.into()),
            None => return Err(BinderError::BinderRequired.into()),
        };
        let mut binder = factory(BinderOptions {
            options: RunOptions {
                cwd: self.cwd.clone(),
                dev: self.dev,
            },
            chain: self.chain.clone(),
            hooks: Arc::clone(&self.hooks),
        })?;

        binder.ready().await.with_context(|| format!("run phase `{phase}`"))?;

        if self.child {
            send_complete().await.context("send completion message")?;
        }

        info!(phase, "run finished");
        Ok(())
    }
}

//! Extensible process-orchestration framework.
//!
//! One invocation resolves a hierarchical, mergeable configuration across
//! nested project directories, composes a dynamically registered plugin set
//! against it, wires configured units of work (blocks) through a two-phase
//! lifecycle, and optionally executes the whole run inside an isolated child
//! process with a controlled environment and a completion handshake back to
//! the parent. The moving parts:
//!
//! - **[`config`]**: the chain — per-directory config nodes with compose /
//!   bail-top / bail-bottom retrieval and namespacing.
//! - **[`plugin`] + [`hooks`]**: third-party code tapping lifecycle events
//!   without static coupling, including type-tagged hook extensions.
//! - **[`block`] + [`binder`]**: named blocks driven through
//!   configure → orchestrate → create → ready.
//! - **[`sandbox`]**: sanitized child environment, spawn, and typed
//!   completion/failure supervision.
//! - **[`caviar`]**: the top-level glue running one lifecycle phase.

pub mod binder;
pub mod block;
pub mod caviar;
pub mod config;
pub mod context;
pub mod hooks;
pub mod logging;
pub mod plugin;
pub mod sandbox;
pub mod server;
pub mod spawner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use binder::{Binder, BinderError, BinderFactory, BinderOptions, Orchestrate, RunOptions};
pub use block::{
    Block, BlockConfig, BlockContext, BlockDescriptor, BlockMap, BlockSet, ConfigSchema,
    ConfigSetting,
};
pub use crate::caviar::{Caviar, CaviarError, CaviarOptions};
pub use config::{ChainOptions, ConfigChain, ConfigError, ConfigLayer, ConfigValue};
pub use context::{RunContext, SandboxHalf};
pub use hooks::{HookExtension, HookKind, HookRegistry, HooksHandle, TypeTag};
pub use plugin::{Plugin, PluginCondition, PluginError, PluginSpec};
pub use sandbox::{ChildProcessError, Sandbox, SandboxError, SandboxOptions};
pub use server::{Server, ServerRegistry};
pub use spawner::SpawnOptions;

//! Isolated child-process execution of the orchestration.
//!
//! The sandbox builds a sanitized environment, spawns a child running the
//! same orchestration entry point with the assembled options serialized as
//! its sole argument, and supervises it: the run resolves only on the
//! child's typed completion message and rejects on any other termination.
//!
//! State machine per run: idle → environment-prepared → spawned →
//! {completed | failed}.

mod child;
mod env;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument};

use crate::config::{ChainOptions, ConfigChain, ConfigLayer, ConfigNode, ConfigValue};
use crate::context::{
    CAVIAR_CWD, CAVIAR_DEV, CAVIAR_IPC, CAVIAR_PHASE, CAVIAR_SANDBOX, RunContext, SANDBOX_INNER,
};
use crate::hooks::HookRegistry;
use crate::plugin::{Plugin, apply_plugins};
use crate::spawner::SpawnOptions;

pub use child::{ChildMessage, ChildProcessError, CompletionListener, send_complete, send_complete_to, supervise};
pub use env::{ESSENTIAL_ENV_KEYS, EnvSetup, PRIVATE_ENV_KEYS, SandboxError};

/// Stdio wiring for the child. Inherited unless the caller chooses
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    #[default]
    Inherit,
    Null,
    Piped,
}

impl StdioMode {
    fn to_stdio(self) -> Stdio {
        match self {
            StdioMode::Inherit => Stdio::inherit(),
            StdioMode::Null => Stdio::null(),
            StdioMode::Piped => Stdio::piped(),
        }
    }
}

/// What to run and where.
pub struct SandboxOptions {
    /// Server reference the child resolves and starts.
    pub server: String,
    /// Working directory; also the innermost config chain level.
    pub cwd: PathBuf,
    /// Source root handed through to the server.
    pub src: PathBuf,
    pub dev: bool,
    pub port: Option<u16>,
    /// Config file name override for the chain.
    pub config_file_name: Option<String>,
    /// Explicit config layers; ancestry walk when empty.
    pub layers: Vec<Arc<dyn ConfigLayer>>,
    /// The spawner command; the serialized options become its last argument.
    pub command: Vec<String>,
    pub stdio: StdioMode,
}

impl SandboxOptions {
    pub fn new(server: impl Into<String>, cwd: impl Into<PathBuf>, src: impl Into<PathBuf>) -> Self {
        Self {
            server: server.into(),
            cwd: cwd.into(),
            src: src.into(),
            dev: false,
            port: None,
            config_file_name: None,
            layers: Vec::new(),
            command: vec!["caviar-spawn".to_string()],
            stdio: StdioMode::default(),
        }
    }
}

/// Sanitizes and injects the environment of the child process, then
/// supervises it to completion.
pub struct Sandbox {
    options: SandboxOptions,
    chain: ConfigChain,
    hooks: Arc<HookRegistry>,
}

impl Sandbox {
    pub fn new(options: SandboxOptions) -> anyhow::Result<Self> {
        if options.server.trim().is_empty() {
            return Err(SandboxError::InvalidOptions {
                key: "server",
                detail: "server reference must not be empty".to_string(),
            }
            .into());
        }
        if options.src.as_os_str().is_empty() {
            return Err(SandboxError::InvalidOptions {
                key: "src",
                detail: "source root must not be empty".to_string(),
            }
            .into());
        }
        if options.command.is_empty() {
            return Err(SandboxError::InvalidOptions {
                key: "command",
                detail: "spawner command must not be empty".to_string(),
            }
            .into());
        }

        let mut chain_options = ChainOptions::new(&options.cwd);
        if let Some(name) = &options.config_file_name {
            chain_options = chain_options.config_file_name(name.clone());
        }
        for layer in &options.layers {
            chain_options = chain_options.layer(Arc::clone(layer));
        }
        let chain = ConfigChain::load(chain_options).context("load config chain")?;

        Ok(Self {
            options,
            chain,
            hooks: Arc::new(HookRegistry::new()),
        })
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Assemble the child environment: reserved keys first, then the
    /// essential allow-list, then the composed `caviar.env` section, then
    /// whatever the active sandbox plugins contribute through the
    /// environment hook.
    async fn prepare_env(&self, ctx: &RunContext) -> anyhow::Result<EnvSetup> {
        let env = EnvSetup::new(self.options.cwd.clone());

        env.insert_managed(CAVIAR_CWD, self.options.cwd.display().to_string());
        if self.options.dev {
            env.insert_managed(CAVIAR_DEV, "true");
        }
        env.ensure_essential();

        let caviar = self.chain.namespace("caviar");
        if let Some(composed) = caviar.compose("env", None, compose_envs)? {
            apply_env_table(&env, &composed)?;
        }

        apply_plugins(&caviar, &self.hooks, ctx, |plugin: &dyn Plugin| plugin.sandbox())?;
        self.hooks.hooks().environment.emit(env.clone()).await?;

        debug!("child environment prepared");
        Ok(env)
    }

    /// Prepare the environment and spawn the child, handing back the
    /// completion listener for supervision.
    #[instrument(skip_all, fields(phase = %phase))]
    pub async fn start(&self, phase: &str) -> anyhow::Result<(Child, CompletionListener)> {
        let ctx = RunContext::sandbox_outer(self.options.cwd.clone(), self.options.dev, phase);
        let env = self.prepare_env(&ctx).await?;

        let listener = CompletionListener::bind()?;
        env.insert_managed(CAVIAR_SANDBOX, SANDBOX_INNER);
        env.insert_managed(CAVIAR_PHASE, phase);
        env.insert_managed(CAVIAR_IPC, listener.path().display().to_string());

        let child = self.spawn(phase, &env)?;
        Ok((child, listener))
    }

    /// Run the whole sandboxed lifecycle: environment preparation, spawn,
    /// supervision until the completion handshake or a failure.
    pub async fn run(&self, phase: &str) -> anyhow::Result<()> {
        let (child, listener) = self.start(phase).await?;
        supervise(child, &listener)
            .await
            .context("sandboxed run failed")?;
        info!("sandboxed run completed");
        Ok(())
    }

    fn spawn(&self, phase: &str, env: &EnvSetup) -> Result<Child, ChildProcessError> {
        let spawn_options = SpawnOptions {
            server: self.options.server.clone(),
            cwd: self.options.cwd.clone(),
            src: self.options.src.clone(),
            dev: self.options.dev,
            port: self.options.port,
            phase: phase.to_string(),
            config_file_name: self.options.config_file_name.clone(),
        };
        let payload = serde_json::to_string(&spawn_options)
            .map_err(|err| ChildProcessError::Error(err.to_string()))?;

        let (program, args) = match self.options.command.split_first() {
            Some(parts) => parts,
            None => return Err(ChildProcessError::Error("empty spawner command".to_string())),
        };

        debug!(command = %program, "spawning sandbox child");
        Command::new(program)
            .args(args)
            .arg(payload)
            .env_clear()
            .envs(env.snapshot())
            .stdin(self.options.stdio.to_stdio())
            .stdout(self.options.stdio.to_stdio())
            .stderr(self.options.stdio.to_stdio())
            .spawn()
            .map_err(|err| ChildProcessError::Error(format!("spawn failed: {err}")))
    }
}

/// Merge `caviar.env` sections across the chain, inner levels overriding
/// outer ones key by key.
fn compose_envs(
    prev: Option<ConfigValue>,
    next: &ConfigValue,
    _node: &ConfigNode,
) -> anyhow::Result<ConfigValue> {
    let mut merged = match prev {
        Some(ConfigValue::Table(table)) => table,
        None => BTreeMap::new(),
        Some(other) => anyhow::bail!("expected an env table, got {other:?}"),
    };
    let next = next
        .as_table()
        .ok_or_else(|| anyhow::anyhow!("expected an env table, got {next:?}"))?;
    for (key, value) in next {
        merged.insert(key.clone(), value.clone());
    }
    Ok(ConfigValue::Table(merged))
}

fn apply_env_table(env: &EnvSetup, composed: &ConfigValue) -> anyhow::Result<()> {
    let table = composed
        .as_table()
        .ok_or_else(|| SandboxError::InvalidEnvValue(format!("{composed:?}")))?;
    for (key, value) in table {
        let value = value
            .as_data()
            .and_then(|data| data.as_str())
            .ok_or_else(|| SandboxError::InvalidEnvValue(format!("{value:?}")))?;
        env.set_env(key, Some(value.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EnvLayer {
        path: PathBuf,
        env: Vec<(&'static str, &'static str)>,
    }

    impl ConfigLayer for EnvLayer {
        fn server_path(&self) -> Option<PathBuf> {
            Some(self.path.clone())
        }

        fn values(&self) -> Option<ConfigValue> {
            Some(ConfigValue::table([(
                "caviar".to_string(),
                ConfigValue::table([(
                    "env".to_string(),
                    ConfigValue::table(
                        self.env
                            .iter()
                            .map(|(k, v)| (k.to_string(), ConfigValue::data(json!(v)))),
                    ),
                )]),
            )]))
        }
    }

    fn sandbox_with_layers(temp: &std::path::Path, layers: Vec<Arc<dyn ConfigLayer>>) -> Sandbox {
        let mut options = SandboxOptions::new("caviar", temp, temp.join("src"));
        options.layers = layers;
        Sandbox::new(options).expect("sandbox")
    }

    #[test]
    fn empty_server_reference_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Sandbox::new(SandboxOptions::new("", temp.path(), "src")).err().expect("invalid");
        let sandbox_err = err.downcast_ref::<SandboxError>().expect("sandbox error");
        assert!(matches!(
            sandbox_err,
            SandboxError::InvalidOptions { key: "server", .. }
        ));
    }

    #[tokio::test]
    async fn prepared_env_carries_reserved_and_composed_keys() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = sandbox_with_layers(
            temp.path(),
            vec![
                Arc::new(EnvLayer {
                    path: temp.path().to_path_buf(),
                    env: vec![("APP_MODE", "outer"), ("SHARED", "base")],
                }),
                Arc::new(EnvLayer {
                    path: temp.path().to_path_buf(),
                    env: vec![("APP_MODE", "inner")],
                }),
            ],
        );

        let ctx = RunContext::sandbox_outer(temp.path().to_path_buf(), true, "default");
        let env = sandbox.prepare_env(&ctx).await.expect("prepare");

        assert_eq!(
            env.get(CAVIAR_CWD),
            Some(temp.path().display().to_string())
        );
        assert_eq!(env.get(CAVIAR_DEV), Some("true".to_string()));
        // Inner level overrides the outer one key by key.
        assert_eq!(env.get("APP_MODE"), Some("inner".to_string()));
        assert_eq!(env.get("SHARED"), Some("base".to_string()));
        assert_eq!(env.get("PATH"), std::env::var("PATH").ok());
    }

    #[tokio::test]
    async fn config_env_cannot_shadow_reserved_keys() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = sandbox_with_layers(
            temp.path(),
            vec![Arc::new(EnvLayer {
                path: temp.path().to_path_buf(),
                env: vec![(CAVIAR_CWD, "/elsewhere")],
            })],
        );

        let ctx = RunContext::sandbox_outer(temp.path().to_path_buf(), false, "default");
        let err = sandbox.prepare_env(&ctx).await.err().expect("reserved");
        let sandbox_err = err.downcast_ref::<SandboxError>().expect("sandbox error");
        assert!(matches!(sandbox_err, SandboxError::PreservedEnvKey(_)));
    }
}

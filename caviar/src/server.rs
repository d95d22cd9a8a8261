//! The server seam: the concrete build/dev-server implementation the
//! framework drives is an external collaborator, specified only here.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::caviar::{Caviar, CaviarOptions};
use crate::spawner::SpawnOptions;

/// Whatever the framework ultimately runs inside the child process.
#[async_trait]
pub trait Server: Send {
    async fn start(&mut self) -> anyhow::Result<()>;
}

pub type ServerFactory = Arc<dyn Fn(SpawnOptions) -> anyhow::Result<Box<dyn Server>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no server is registered under `{0}`")]
    UnknownServer(String),
}

/// Name → server constructor. The spawn argument carries a name, never code;
/// the child resolves it here.
#[derive(Default)]
pub struct ServerRegistry {
    factories: BTreeMap<String, ServerFactory>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `caviar` server that runs the inner-half
    /// orchestration.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("caviar", |options| {
            Ok(Box::new(CaviarServer { options }) as Box<dyn Server>)
        });
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(SpawnOptions) -> anyhow::Result<Box<dyn Server>> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn resolve(&self, name: &str) -> Result<&ServerFactory, ServerError> {
        self.factories
            .get(name)
            .ok_or_else(|| ServerError::UnknownServer(name.to_string()))
    }
}

/// The built-in server: a copy of the orchestrator running as the sandbox
/// inner half. Its completed run emits the completion handshake.
pub struct CaviarServer {
    options: SpawnOptions,
}

#[async_trait]
impl Server for CaviarServer {
    async fn start(&mut self) -> anyhow::Result<()> {
        let mut caviar_options = CaviarOptions::new(self.options.cwd.clone());
        caviar_options.dev = self.options.dev;
        caviar_options.child = true;
        caviar_options.config_file_name = self.options.config_file_name.clone();

        let caviar = Caviar::new(caviar_options)?;
        caviar.run(&self.options.phase).await
    }
}

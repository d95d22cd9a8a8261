//! Child-side entry point of the sandbox protocol.
//!
//! The parent spawns `caviar-spawn <options-json>`: one serialized blob as
//! the sole positional argument, deserializing to the same run options the
//! parent used plus the server reference to resolve and start.

use std::path::PathBuf;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::server::ServerRegistry;

/// The spawn argument. Everything the child needs to reproduce the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnOptions {
    /// Name of the server implementation to resolve and run.
    pub server: String,
    pub cwd: PathBuf,
    pub src: PathBuf,
    #[serde(default)]
    pub dev: bool,
    #[serde(default)]
    pub port: Option<u16>,
    pub phase: String,
    #[serde(default)]
    pub config_file_name: Option<String>,
}

/// Parse the spawn argument and start the named server.
pub async fn run(registry: &ServerRegistry) -> anyhow::Result<()> {
    let payload = std::env::args()
        .nth(1)
        .context("missing spawn options argument")?;
    let options = parse_options(&payload)?;
    start(registry, options).await
}

pub(crate) fn parse_options(payload: &str) -> anyhow::Result<SpawnOptions> {
    serde_json::from_str(payload).context("parse spawn options")
}

async fn start(registry: &ServerRegistry, options: SpawnOptions) -> anyhow::Result<()> {
    debug!(server = %options.server, phase = %options.phase, "spawner starting");
    let factory = registry.resolve(&options.server)?;
    let mut server = factory(options)?;
    server.start().await
}

//! Test-only helpers: in-memory config layers and scripted blocks.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::block::{Block, BlockConfig, BlockContext, ConfigSchema};
use crate::config::{ConfigLayer, ConfigValue};
use crate::hooks::TypeTag;

/// A config layer with a fixed directory and in-memory values.
pub struct StaticLayer {
    path: PathBuf,
    values: ConfigValue,
}

impl StaticLayer {
    pub fn new(path: &Path, values: ConfigValue) -> Arc<dyn ConfigLayer> {
        Arc::new(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    /// A layer whose values live under the `caviar` namespace.
    pub fn caviar(path: &Path, entries: Vec<(String, ConfigValue)>) -> Arc<dyn ConfigLayer> {
        Self::new(
            path,
            ConfigValue::table([("caviar".to_string(), ConfigValue::table(entries))]),
        )
    }
}

impl ConfigLayer for StaticLayer {
    fn server_path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }

    fn values(&self) -> Option<ConfigValue> {
        Some(self.values.clone())
    }
}

/// Create a nested directory ancestry where every level carries a config
/// file with the given contents. Returns the temp root guard and the
/// innermost directory.
pub fn config_ancestry(
    levels: &[&str],
    file_name: &str,
    contents: &str,
) -> anyhow::Result<(tempfile::TempDir, PathBuf)> {
    let temp = tempfile::tempdir()?;
    let mut dir = temp.path().to_path_buf();
    for level in levels {
        dir = dir.join(level);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(file_name), contents)?;
    }
    Ok((temp, dir))
}

/// Shared event log asserting lifecycle ordering across blocks.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn record(log: &EventLog, event: impl Into<String>) {
    log.lock().expect("event log").push(event.into());
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().expect("event log").clone()
}

/// A block that records every lifecycle step it goes through and can be
/// scripted to fail at readiness.
pub struct RecordingBlock {
    pub name: &'static str,
    pub tag: TypeTag,
    pub log: EventLog,
    pub schema: ConfigSchema,
    pub fail_ready: bool,
    pub config: Option<BlockConfig>,
}

impl RecordingBlock {
    pub fn new(name: &'static str, log: EventLog) -> Self {
        Self {
            name,
            tag: TypeTag("recording"),
            log,
            schema: Vec::new(),
            fail_ready: false,
            config: None,
        }
    }
}

#[async_trait]
impl Block for RecordingBlock {
    fn tag(&self) -> TypeTag {
        self.tag
    }

    fn schema(&self) -> ConfigSchema {
        self.schema.clone()
    }

    fn configure(&mut self, config: BlockConfig, _ctx: &BlockContext) -> anyhow::Result<()> {
        self.config = Some(config);
        record(&self.log, format!("{}:configure", self.name));
        Ok(())
    }

    fn create(&mut self, _ctx: &BlockContext) -> anyhow::Result<()> {
        record(&self.log, format!("{}:create", self.name));
        Ok(())
    }

    async fn ready(&mut self, _ctx: &BlockContext) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        if self.fail_ready {
            record(&self.log, format!("{}:ready-failed", self.name));
            anyhow::bail!("block `{}` failed to become ready", self.name);
        }
        record(&self.log, format!("{}:ready", self.name));
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

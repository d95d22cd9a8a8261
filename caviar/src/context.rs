//! Process-wide run-mode state.
//!
//! Four orthogonal facts distinguish a run: the dev flag, which half of the
//! sandbox (if any) this process is, whether it is the spawned child, and
//! the active lifecycle phase. Inside one process these travel as an
//! explicit [`RunContext`] value; across the process boundary they travel as
//! the `CAVIAR_*` marker variables, written once into the child's spawn
//! environment and read-only afterwards. They are never persisted to disk.

use std::path::PathBuf;

use anyhow::Context as _;

/// Working directory of the run. Reserved: plugins may not set it.
pub const CAVIAR_CWD: &str = "CAVIAR_CWD";
/// Dev-mode flag, present iff dev. Reserved: plugins may not set it.
pub const CAVIAR_DEV: &str = "CAVIAR_DEV";
/// Which sandbox half a process is: [`SANDBOX_OUTER`] or [`SANDBOX_INNER`].
pub const CAVIAR_SANDBOX: &str = "CAVIAR_SANDBOX";
/// Active lifecycle phase name.
pub const CAVIAR_PHASE: &str = "CAVIAR_PHASE";
/// Path of the completion-handshake socket handed to the child.
pub const CAVIAR_IPC: &str = "CAVIAR_IPC";

pub const SANDBOX_OUTER: &str = "outer";
pub const SANDBOX_INNER: &str = "inner";

/// Phase used when the caller does not name one.
pub const PHASE_DEFAULT: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxHalf {
    /// The supervising parent process.
    Outer,
    /// The spawned child running the orchestration.
    Inner,
}

impl SandboxHalf {
    pub fn as_str(self) -> &'static str {
        match self {
            SandboxHalf::Outer => SANDBOX_OUTER,
            SandboxHalf::Inner => SANDBOX_INNER,
        }
    }
}

/// Ambient run state read by plugin conditions and sandbox logic.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub cwd: PathBuf,
    pub dev: bool,
    pub sandbox: Option<SandboxHalf>,
    pub child: bool,
    pub phase: String,
}

impl RunContext {
    /// Context for an in-process run. A child process is always the inner
    /// sandbox half.
    pub fn new(cwd: PathBuf, dev: bool, phase: &str, child: bool) -> Self {
        Self {
            cwd,
            dev,
            sandbox: child.then_some(SandboxHalf::Inner),
            child,
            phase: phase.to_string(),
        }
    }

    /// Context for the outer half supervising a sandboxed child.
    pub fn sandbox_outer(cwd: PathBuf, dev: bool, phase: &str) -> Self {
        Self {
            cwd,
            dev,
            sandbox: Some(SandboxHalf::Outer),
            child: false,
            phase: phase.to_string(),
        }
    }

    /// Reconstruct the context a parent stamped into this process's spawn
    /// environment. Used by the child-side entry point.
    pub fn from_env() -> anyhow::Result<Self> {
        let cwd = std::env::var(CAVIAR_CWD).context("CAVIAR_CWD is not set")?;
        let dev = std::env::var(CAVIAR_DEV).is_ok();
        let sandbox = match std::env::var(CAVIAR_SANDBOX).ok() {
            Some(half) if half == SANDBOX_OUTER => Some(SandboxHalf::Outer),
            Some(half) if half == SANDBOX_INNER => Some(SandboxHalf::Inner),
            Some(half) => anyhow::bail!("unrecognized CAVIAR_SANDBOX value {half:?}"),
            None => None,
        };
        let phase = std::env::var(CAVIAR_PHASE).unwrap_or_else(|_| PHASE_DEFAULT.to_string());

        Ok(Self {
            cwd: PathBuf::from(cwd),
            dev,
            child: matches!(sandbox, Some(SandboxHalf::Inner)),
            sandbox,
            phase,
        })
    }
}

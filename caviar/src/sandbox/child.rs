//! Child-process supervision and the completion handshake.
//!
//! The parent resolves only on the child's explicit completion message; any
//! other termination is classified and rejected. The message travels over a
//! per-run Unix domain socket whose path the child finds in `CAVIAR_IPC`.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::Child;
use tracing::{debug, warn};

use crate::context::CAVIAR_IPC;

/// How long after a clean exit the supervisor still drains the socket for a
/// completion message that raced the exit.
const COMPLETION_GRACE: Duration = Duration::from_millis(250);

/// The typed parent/child protocol. One `complete` message, nothing else.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildMessage {
    Complete,
}

/// Why a supervised child did not complete.
#[derive(Debug, Error)]
pub enum ChildProcessError {
    #[error("child process failed: {0}")]
    Error(String),

    #[error("child process was killed by {name}")]
    Killed { signal: i32, name: String },

    #[error("child process exited with code {0}")]
    NonZeroExitCode(i32),

    #[error("child process closed without sending completion")]
    Unexpected,
}

/// Render the common signal numbers the way operators know them.
pub(crate) fn signal_name(signal: i32) -> String {
    match signal {
        1 => "SIGHUP".to_string(),
        2 => "SIGINT".to_string(),
        6 => "SIGABRT".to_string(),
        9 => "SIGKILL".to_string(),
        15 => "SIGTERM".to_string(),
        other => format!("signal {other}"),
    }
}

static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

/// Parent-side endpoint of the completion handshake.
pub struct CompletionListener {
    listener: UnixListener,
    path: PathBuf,
}

impl CompletionListener {
    /// Bind a fresh per-run socket under the system temp directory.
    pub fn bind() -> anyhow::Result<Self> {
        let dir = std::env::temp_dir().join(format!(
            "caviar-{}-{}",
            std::process::id(),
            SOCKET_SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create ipc directory {}", dir.display()))?;
        let path = dir.join("complete.sock");
        let listener = UnixListener::bind(&path)
            .with_context(|| format!("bind ipc socket {}", path.display()))?;
        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept one connection and read one message line.
    async fn recv(&self) -> anyhow::Result<ChildMessage> {
        let (stream, _addr) = self.listener.accept().await.context("accept ipc")?;
        let mut line = String::new();
        BufReader::new(stream)
            .read_line(&mut line)
            .await
            .context("read ipc message")?;
        serde_json::from_str(line.trim()).context("parse ipc message")
    }
}

impl Drop for CompletionListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        if let Some(dir) = self.path.parent() {
            let _ = std::fs::remove_dir(dir);
        }
    }
}

/// Child-side half of the handshake: report successful completion to the
/// supervising parent named by `CAVIAR_IPC`.
pub async fn send_complete() -> anyhow::Result<()> {
    let path = std::env::var(CAVIAR_IPC).context("CAVIAR_IPC is not set")?;
    send_complete_to(Path::new(&path)).await
}

pub async fn send_complete_to(path: &Path) -> anyhow::Result<()> {
    let mut stream = UnixStream::connect(path)
        .await
        .with_context(|| format!("connect ipc socket {}", path.display()))?;
    let mut message = serde_json::to_string(&ChildMessage::Complete).context("encode complete")?;
    message.push('\n');
    stream
        .write_all(message.as_bytes())
        .await
        .context("send complete")?;
    stream.flush().await.context("flush complete")?;
    debug!("completion message sent");
    Ok(())
}

/// Classify how a terminated child went down. Only the reject half of the
/// protocol: completion arrives over the socket, never from the exit status.
fn classify_exit(status: std::process::ExitStatus) -> Result<(), ChildProcessError> {
    if let Some(signal) = status.signal() {
        return Err(ChildProcessError::Killed {
            signal,
            name: signal_name(signal),
        });
    }
    match status.code() {
        Some(0) | None => Ok(()),
        Some(code) => Err(ChildProcessError::NonZeroExitCode(code)),
    }
}

/// Supervise a spawned child until it completes or terminates.
///
/// Resolves only on the explicit completion message. Rejects with `Killed`
/// on a signal, `NonZeroExitCode` on a nonzero status, `Unexpected` when the
/// child goes away without ever completing, and `Error` when the channel or
/// the wait itself fails. Exactly one terminal outcome is ever produced,
/// even when several terminal events arrive.
pub async fn supervise(
    mut child: Child,
    listener: &CompletionListener,
) -> Result<(), ChildProcessError> {
    let status = tokio::select! {
        biased;
        message = listener.recv() => {
            return match message {
                Ok(ChildMessage::Complete) => Ok(()),
                Err(err) => Err(ChildProcessError::Error(format!("{err:#}"))),
            };
        }
        status = child.wait() => {
            status.map_err(|err| ChildProcessError::Error(err.to_string()))?
        }
    };

    classify_exit(status)?;

    // Clean exit before the message was observed: the write can race the
    // exit, so drain the socket briefly before calling it unexpected.
    match tokio::time::timeout(COMPLETION_GRACE, listener.recv()).await {
        Ok(Ok(ChildMessage::Complete)) => Ok(()),
        Ok(Err(err)) => {
            warn!(err = %err, "ipc drain failed after clean exit");
            Err(ChildProcessError::Unexpected)
        }
        Err(_elapsed) => Err(ChildProcessError::Unexpected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_message_round_trips_as_one_line() {
        let encoded = serde_json::to_string(&ChildMessage::Complete).expect("encode");
        assert_eq!(encoded, r#"{"type":"complete"}"#);
        let decoded: ChildMessage = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, ChildMessage::Complete);
    }

    #[test]
    fn signal_names_cover_the_usual_suspects() {
        assert_eq!(signal_name(9), "SIGKILL");
        assert_eq!(signal_name(15), "SIGTERM");
        assert_eq!(signal_name(42), "signal 42");
    }
}

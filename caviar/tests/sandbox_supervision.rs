//! Child-process supervision: termination classification and the completion
//! handshake, driven with real child processes.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use caviar::config::{ConfigLayer, ConfigValue};
use caviar::hooks::HooksHandle;
use caviar::plugin::{Plugin, PluginSpec};
use caviar::sandbox::{
    ChildProcessError, CompletionListener, Sandbox, SandboxOptions, send_complete_to, supervise,
};
use futures::FutureExt;
use tokio::process::Command;

fn sh(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

#[tokio::test]
async fn nonzero_exit_carries_the_code() {
    let listener = CompletionListener::bind().expect("bind");
    let child = sh("exit 2").spawn().expect("spawn");

    let err = supervise(child, &listener).await.expect_err("exit 2");
    assert!(matches!(err, ChildProcessError::NonZeroExitCode(2)), "{err}");
}

#[tokio::test]
async fn signal_kill_carries_the_signal_name() {
    let listener = CompletionListener::bind().expect("bind");
    let child = sh("kill -9 $$").spawn().expect("spawn");

    let err = supervise(child, &listener).await.expect_err("killed");
    match err {
        ChildProcessError::Killed { signal, name } => {
            assert_eq!(signal, 9);
            assert_eq!(name, "SIGKILL");
        }
        other => panic!("expected Killed, got {other}"),
    }
}

#[tokio::test]
async fn clean_exit_without_completion_is_unexpected() {
    let listener = CompletionListener::bind().expect("bind");
    let child = sh("true").spawn().expect("spawn");

    let err = supervise(child, &listener).await.expect_err("silent exit");
    assert!(matches!(err, ChildProcessError::Unexpected), "{err}");
}

#[tokio::test]
async fn completion_message_resolves_the_run() {
    let listener = CompletionListener::bind().expect("bind");
    let child = sh("sleep 5").spawn().expect("spawn");

    let path = listener.path().to_path_buf();
    let sender = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        send_complete_to(&path).await
    });

    supervise(child, &listener).await.expect("completion wins");
    sender.await.expect("join").expect("send");
}

#[tokio::test]
async fn completion_racing_a_clean_exit_still_resolves() {
    let listener = CompletionListener::bind().expect("bind");
    let child = sh("true").spawn().expect("spawn");

    let path = listener.path().to_path_buf();
    let sender = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        send_complete_to(&path).await
    });

    // The child is long gone before the message arrives; the drain window
    // still observes it.
    supervise(child, &listener).await.expect("drained completion");
    sender.await.expect("join").expect("send");
}

#[tokio::test]
async fn unspawnable_child_is_an_error() {
    let listener = CompletionListener::bind().expect("bind");
    let result = Command::new("/nonexistent/caviar-spawn").spawn();
    match result {
        Err(_) => {} // spawn failures surface before supervision
        Ok(child) => {
            let err = supervise(child, &listener).await.expect_err("error");
            assert!(matches!(err, ChildProcessError::Error(_)));
        }
    }
}

/// A sandbox-flagged plugin contributing one variable through `set_env` and
/// inheriting another.
struct EnvPlugin;

impl Plugin for EnvPlugin {
    fn name(&self) -> &str {
        "env-plugin"
    }

    fn sandbox(&self) -> bool {
        true
    }

    fn apply(&self, hooks: &HooksHandle<'_>) -> anyhow::Result<()> {
        hooks.hooks().environment.tap(|env| {
            async move {
                env.set_env("FROM_PLUGIN", Some("yes".to_string()))?;
                env.set_env("SKIPPED", None)?;
                env.inherit_env("PATH")?;
                Ok(())
            }
            .boxed()
        });
        Ok(())
    }
}

struct PluginLayer {
    path: PathBuf,
}

impl ConfigLayer for PluginLayer {
    fn server_path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }

    fn values(&self) -> Option<ConfigValue> {
        Some(ConfigValue::table([(
            "caviar".to_string(),
            ConfigValue::table([(
                "plugins".to_string(),
                ConfigValue::List(vec![ConfigValue::Plugin(PluginSpec::instance(EnvPlugin))]),
            )]),
        )]))
    }
}

#[tokio::test]
async fn spawned_child_sees_the_sanitized_environment() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = temp.path().join("env.txt");

    let mut options = SandboxOptions::new("caviar", temp.path(), temp.path().join("src"));
    options.dev = true;
    options.layers = vec![Arc::new(PluginLayer {
        path: temp.path().to_path_buf(),
    })];
    // The child dumps the variables under test and exits without the
    // handshake, so supervision classifies it as unexpected.
    options.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "printf '%s\\n%s\\n%s\\n%s\\n%s\\n' \
             \"$CAVIAR_CWD\" \"$CAVIAR_SANDBOX\" \"$CAVIAR_PHASE\" \"$FROM_PLUGIN\" \"${{SKIPPED-unset}}\" > {}",
            out.display()
        ),
    ];

    let sandbox = Sandbox::new(options).expect("sandbox");
    let err = sandbox.run("serve").await.expect_err("no handshake");
    let child_err = err
        .downcast_ref::<ChildProcessError>()
        .expect("child process error");
    assert!(matches!(child_err, ChildProcessError::Unexpected));

    let dumped = fs::read_to_string(&out).expect("read env dump");
    let lines: Vec<&str> = dumped.lines().collect();
    assert_eq!(lines[0], temp.path().display().to_string());
    assert_eq!(lines[1], "inner");
    assert_eq!(lines[2], "serve");
    assert_eq!(lines[3], "yes");
    assert_eq!(lines[4], "unset", "undefined set_env must stay a no-op");
}

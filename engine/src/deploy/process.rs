//! Build subprocess execution with streamed output

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::EngineError;

/// Receives output lines as the command produces them
pub type LogSink = mpsc::UnboundedSender<String>;

/// Result of a finished command; its output went to the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `command` through `sh -c` rooted at `working_dir`.
///
/// The inherited environment is extended with `env`. Every line of stdout
/// and stderr is forwarded to `sink` as soon as it is read.
pub async fn run_shell(
    command: &str,
    working_dir: &Path,
    env: &HashMap<String, String>,
    sink: LogSink,
) -> Result<CommandOutput, EngineError> {
    debug!("Running `{}` in {}", command, working_dir.display());

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::BuildError(format!("Failed to start `{}`: {}", command, e)))?;

    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(stdout, sink.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(stderr, sink.clone())));
    }
    drop(sink);
    futures::future::join_all(readers).await;

    let status = child
        .wait()
        .await
        .map_err(|e| EngineError::BuildError(format!("Failed to wait for `{}`: {}", command, e)))?;

    Ok(CommandOutput {
        exit_code: status.code(),
    })
}

async fn forward_lines<R>(reader: R, tx: LogSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let mut line = String::from_utf8_lossy(&buf).into_owned();
                if !line.ends_with('\n') {
                    line.push('\n');
                }
                // Keep draining the pipe even if nobody listens
                let _ = tx.send(line);
            }
        }
    }
}

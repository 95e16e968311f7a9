//! Process execution with merged output capture.

use portlane_core::executor::RecipeOutput;
use portlane_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8192;

/// Run `command` to completion, collecting stdout and stderr into one buffer
/// in the order the chunks arrive.
pub(crate) async fn run_captured(mut command: Command) -> Result<RecipeOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| Error::ExecutionFailed(format!("Failed to start recipe: {}", e)))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward(stderr, tx.clone()));
    }
    drop(tx);

    let mut output = Vec::new();
    while let Some(chunk) = rx.recv().await {
        output.extend_from_slice(&chunk);
    }

    let status = child
        .wait()
        .await
        .map_err(|e| Error::ExecutionFailed(format!("Failed to wait for recipe: {}", e)))?;

    debug!(status = %status, bytes = output.len(), "Recipe exited");

    Ok(RecipeOutput {
        exit_code: status.code(),
        output,
    })
}

async fn forward<R>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read recipe output");
                break;
            }
        }
    }
}

//! Line-oriented JSON output shared by intake replies and signal lines.
//!
//! Every writer sends whole lines through one channel to a single task, so
//! concurrent producers never interleave bytes on stdout.

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct LineWriter {
    tx: mpsc::UnboundedSender<String>,
}

impl LineWriter {
    /// Spawn a task writing lines to `writer`. It ends once every clone of
    /// the returned handle is dropped.
    pub fn spawn<W>(mut writer: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (line_writer, mut rx) = Self::channel();
        let handle = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    warn!("Output closed: {}", e);
                    break;
                }
            }
        });
        (line_writer, handle)
    }

    pub fn stdout() -> (Self, JoinHandle<()>) {
        Self::spawn(tokio::io::stdout())
    }

    /// Writer whose lines land in the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn write_json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string(value) {
            Ok(line) => {
                if self.tx.send(line).is_err() {
                    warn!("Output task stopped; line dropped");
                }
            }
            Err(e) => warn!("Failed to serialize output line: {}", e),
        }
    }
}

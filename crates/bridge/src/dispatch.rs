//! Newline-delimited JSON command channel.
//!
//! Each input line is `{"id"?, "command", "params"?}`. Each produces exactly
//! one output line, `{"id", "result"}` or `{"id", "error": {"kind", "code"?,
//! "message"}}`, with `id` echoed verbatim (`null` when absent). Requests run
//! concurrently, so replies may come back in a different order.

use std::future::Future;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use gb_connection::{BridgeError, Connection};

const REPLY_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
struct Envelope {
    command: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Reply {
    Success { id: Value, result: Value },
    Failure { id: Value, error: ReplyError },
}

#[derive(Debug, Serialize)]
struct ReplyError {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    message: String,
}

impl ReplyError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: "invalid_request",
            code: None,
            message: message.into(),
        }
    }
}

impl From<BridgeError> for ReplyError {
    fn from(err: BridgeError) -> Self {
        let kind = err.kind();
        match err {
            BridgeError::Command { code, message } => Self {
                kind,
                code: Some(code),
                message,
            },
            other => Self {
                kind,
                code: None,
                message: other.to_string(),
            },
        }
    }
}

/// Routes request lines to the injected [`Connection`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    conn: Connection,
}

impl Dispatcher {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Handle one raw input line. Bytes that are not UTF-8 get an
    /// `invalid_request` reply like any other unparseable line.
    pub async fn handle_bytes(&self, raw: &[u8]) -> Option<String> {
        match std::str::from_utf8(raw) {
            Ok(line) => self.handle_line(line).await,
            Err(e) => encode_reply(&Reply::Failure {
                id: Value::Null,
                error: ReplyError::invalid_request(format!("request is not valid UTF-8: {e}")),
            }),
        }
    }

    /// Handle one input line. Returns `None` for blank lines.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let reply = match serde_json::from_str::<Value>(line) {
            Err(e) => Reply::Failure {
                id: Value::Null,
                error: ReplyError::invalid_request(format!("invalid JSON: {e}")),
            },
            Ok(mut raw) => {
                let id = raw
                    .as_object_mut()
                    .and_then(|obj| obj.remove("id"))
                    .unwrap_or(Value::Null);
                match serde_json::from_value::<Envelope>(raw) {
                    Err(e) => Reply::Failure {
                        id,
                        error: ReplyError::invalid_request(e.to_string()),
                    },
                    Ok(req) => self.execute(id, req).await,
                }
            }
        };

        encode_reply(&reply)
    }

    async fn execute(&self, id: Value, req: Envelope) -> Reply {
        match self.conn.send_command(&req.command, req.params).await {
            Ok(result) => Reply::Success { id, result },
            Err(e) => {
                tracing::debug!(command = %req.command, kind = e.kind(), error = %e, "command failed");
                Reply::Failure {
                    id,
                    error: e.into(),
                }
            }
        }
    }

    /// Serve `input` until EOF or `shutdown` resolves.
    ///
    /// On EOF, in-flight requests finish and their replies are written; on
    /// shutdown they are abandoned.
    pub async fn run<R, W, S>(&self, mut input: R, output: W, shutdown: S) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = ()>,
    {
        let (reply_tx, reply_rx) = mpsc::channel::<String>(REPLY_CAPACITY);
        let writer = tokio::spawn(write_replies(output, reply_rx));

        // Partial reads stay in `buf` if another branch wins the select.
        let mut buf = Vec::new();
        let mut inflight = JoinSet::new();
        let mut interrupted = false;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    interrupted = true;
                    break;
                }
                read = input.read_until(b'\n', &mut buf) => {
                    if read.context("reading request line")? == 0 {
                        break;
                    }
                    let raw = std::mem::take(&mut buf);
                    let dispatcher = self.clone();
                    let tx = reply_tx.clone();
                    inflight.spawn(async move {
                        if let Some(reply) = dispatcher.handle_bytes(&raw).await {
                            let _ = tx.send(reply).await;
                        }
                    });
                }
                Some(done) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = done {
                        tracing::error!(error = %e, "request task failed");
                    }
                }
            }
        }

        if interrupted {
            tracing::info!(abandoned = inflight.len(), "stopping dispatcher");
            inflight.abort_all();
        } else {
            while let Some(done) = inflight.join_next().await {
                if let Err(e) = done {
                    tracing::error!(error = %e, "request task failed");
                }
            }
        }

        drop(reply_tx);
        writer
            .await
            .context("reply writer task failed")?
            .context("writing reply")?;
        Ok(())
    }
}

fn encode_reply(reply: &Reply) -> Option<String> {
    match serde_json::to_string(reply) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize reply");
            None
        }
    }
}

async fn write_replies<W>(mut output: W, mut replies: mpsc::Receiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut reply) = replies.recv().await {
        reply.push('\n');
        output.write_all(reply.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}

//! In-flight request table.
//!
//! Each entry owns the one-shot completion channel for a request and its
//! expiry timer. Resolution, rejection and expiry all remove the entry under
//! the same lock, so exactly one of them completes any given request.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::timer::{self, TimerHandle};
use crate::types::BridgeError;

pub type Completion = Result<Value, BridgeError>;

struct PendingEntry {
    command: String,
    tx: oneshot::Sender<Completion>,
    timer: TimerHandle,
}

type Entries = Mutex<HashMap<String, PendingEntry>>;

#[derive(Clone, Default)]
pub struct PendingTable {
    entries: Arc<Entries>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track request `id` and arm its expiry timer.
    ///
    /// When `timeout` elapses without a reply, the receiver yields
    /// [`BridgeError::Timeout`] and the entry is removed.
    pub fn register(
        &self,
        id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Completion>, BridgeError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            tracing::error!(request_id = %id, command, "duplicate request id");
            return Err(BridgeError::DuplicateRequestId(id.to_owned()));
        }

        let (tx, rx) = oneshot::channel();
        let weak = Arc::downgrade(&self.entries);
        let timer = timer::schedule(timeout, expire(weak, id.to_owned(), timeout));
        entries.insert(
            id.to_owned(),
            PendingEntry {
                command: command.to_owned(),
                tx,
                timer,
            },
        );
        Ok(rx)
    }

    /// Complete `id` successfully. Returns `false` if no such request is
    /// pending (already expired, or never ours).
    pub fn resolve(&self, id: &str, result: Value) -> bool {
        self.complete(id, Ok(result))
    }

    /// Fail `id`. Returns `false` if no such request is pending.
    pub fn reject(&self, id: &str, err: BridgeError) -> bool {
        self.complete(id, Err(err))
    }

    /// Fail every pending request with `err`. Returns how many were failed.
    pub fn reject_all(&self, err: BridgeError) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            entry.timer.cancel();
            tracing::debug!(request_id = %id, command = %entry.command, "failing pending request");
            let _ = entry.tx.send(Err(err.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn complete(&self, id: &str, outcome: Completion) -> bool {
        let Some(entry) = self.entries.lock().remove(id) else {
            return false;
        };
        entry.timer.cancel();
        // The caller may have stopped waiting; that still counts as handled.
        let _ = entry.tx.send(outcome);
        true
    }
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("len", &self.len())
            .finish()
    }
}

async fn expire(entries: Weak<Entries>, id: String, timeout: Duration) {
    let Some(entries) = entries.upgrade() else {
        return;
    };
    let Some(entry) = entries.lock().remove(&id) else {
        return;
    };
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    tracing::warn!(request_id = %id, command = %entry.command, timeout_ms, "request timed out");
    let _ = entry.tx.send(Err(BridgeError::Timeout {
        command: entry.command,
        timeout_ms,
    }));
}

//! Logs connection lifecycle events for the operator.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use gb_connection::{ConnectionEvent, LogLimiter};

const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Spawn a task that logs every event from `events` until the connection is
/// dropped. The task yields the number of events it saw.
pub fn spawn(mut events: broadcast::Receiver<ConnectionEvent>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let limiter = LogLimiter::new();
        let mut seen = 0;
        loop {
            match events.recv().await {
                Ok(event) => {
                    seen += 1;
                    log_event(&limiter, &event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
        seen
    })
}

/// Wait for the event log to flush what is left once every `Connection`
/// clone has been dropped. Gives up after a short grace period.
pub async fn drain(mut handle: JoinHandle<u64>) -> u64 {
    match tokio::time::timeout(DRAIN_GRACE, &mut handle).await {
        Ok(Ok(seen)) => seen,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "event log task failed");
            0
        }
        Err(_) => {
            tracing::warn!("event log still open at shutdown; a connection handle is still alive");
            handle.abort();
            0
        }
    }
}

fn log_event(limiter: &LogLimiter, event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Connected => tracing::info!("editor connected"),
        ConnectionEvent::Disconnected => {
            if limiter.allow("disconnected") {
                tracing::info!("editor disconnected");
            }
        }
        ConnectionEvent::Reconnecting { attempt, delay } => {
            if limiter.allow("reconnecting") {
                tracing::info!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "waiting to reconnect"
                );
            }
        }
        ConnectionEvent::Error { message } => {
            if limiter.allow("error") {
                tracing::warn!(error = %message, "editor connection error");
            }
        }
        ConnectionEvent::VersionMismatch {
            server_version,
            addon_version,
            project_path,
        } => tracing::warn!(
            bridge_version = %server_version,
            addon_version = %addon_version,
            project_path = %project_path,
            "version mismatch: update the addon in this project or the bridge so they match"
        ),
        ConnectionEvent::HandshakeFailed { error } => tracing::warn!(
            error = %error,
            "handshake failed; the addon may be outdated, commands are still sent"
        ),
    }
}

//! Liveness probing for an open socket.
//!
//! Every `interval` the monitor queues a WebSocket Ping whose payload is a
//! sequence number, then waits up to `deadline` for the matching Pong. A
//! missed deadline fires the `on_dead` callback once and stops the monitor.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            deadline: Duration::from_secs(10),
        }
    }
}

/// Running keepalive loop for one socket. Stops on drop.
#[derive(Debug)]
pub struct KeepaliveMonitor {
    acks: mpsc::UnboundedSender<Vec<u8>>,
    task: JoinHandle<()>,
}

impl KeepaliveMonitor {
    /// Start probing. Pings are pushed into `outbound`, which the socket
    /// writer drains; the loop ends quietly once that channel closes.
    pub fn start<F>(config: KeepaliveConfig, outbound: mpsc::Sender<Message>, on_dead: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (acks, acks_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(config, outbound, acks_rx, on_dead));
        Self { acks, task }
    }

    /// Feed a received Pong payload to the monitor.
    pub fn acknowledge(&self, payload: Vec<u8>) {
        let _ = self.acks.send(payload);
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for KeepaliveMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<F>(
    config: KeepaliveConfig,
    outbound: mpsc::Sender<Message>,
    mut acks: mpsc::UnboundedReceiver<Vec<u8>>,
    on_dead: F,
) where
    F: FnOnce() + Send + 'static,
{
    let start = tokio::time::Instant::now() + config.interval;
    let mut ticker = tokio::time::interval_at(start, config.interval);
    let mut seq: u64 = 0;

    loop {
        ticker.tick().await;
        seq = seq.wrapping_add(1);
        let payload = seq.to_be_bytes().to_vec();

        // Stale acks from earlier probes are irrelevant now.
        while acks.try_recv().is_ok() {}

        if outbound.send(Message::Ping(payload.clone())).await.is_err() {
            return;
        }
        tracing::trace!(seq, "keepalive ping sent");

        let answered = tokio::time::timeout(config.deadline, async {
            while let Some(ack) = acks.recv().await {
                if ack == payload {
                    return true;
                }
            }
            false
        })
        .await;

        match answered {
            Ok(true) => tracing::trace!(seq, "keepalive pong received"),
            Ok(false) => return,
            Err(_) => {
                tracing::debug!(
                    seq,
                    deadline_ms = u64::try_from(config.deadline.as_millis()).unwrap_or(u64::MAX),
                    "keepalive deadline missed"
                );
                on_dead();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn config() -> KeepaliveConfig {
        KeepaliveConfig {
            interval: Duration::from_secs(30),
            deadline: Duration::from_secs(10),
        }
    }

    fn ping_payload(msg: Message) -> Vec<u8> {
        match msg {
            Message::Ping(p) => p,
            other => panic!("expected ping, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_ping_waits_one_interval() {
        let (tx, mut rx) = mpsc::channel(8);
        let _monitor = KeepaliveMonitor::start(config(), tx, || {});

        tokio::time::advance(Duration::from_secs(29)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        let msg = rx.recv().await.unwrap();
        assert_eq!(ping_payload(msg), 1u64.to_be_bytes().to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn answered_ping_keeps_connection_alive() {
        let dead = Arc::new(AtomicBool::new(false));
        let flag = dead.clone();
        let (tx, mut rx) = mpsc::channel(8);
        let monitor = KeepaliveMonitor::start(config(), tx, move || {
            flag.store(true, Ordering::SeqCst);
        });

        for _ in 0..3 {
            let payload = ping_payload(rx.recv().await.unwrap());
            monitor.acknowledge(payload);
        }
        assert!(!dead.load(Ordering::SeqCst));
        assert!(monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn missed_pong_declares_dead() {
        let dead = Arc::new(AtomicBool::new(false));
        let flag = dead.clone();
        let (tx, mut rx) = mpsc::channel(8);
        let monitor = KeepaliveMonitor::start(config(), tx, move || {
            flag.store(true, Ordering::SeqCst);
        });

        let _ = rx.recv().await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(dead.load(Ordering::SeqCst));
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_pong_does_not_count() {
        let dead = Arc::new(AtomicBool::new(false));
        let flag = dead.clone();
        let (tx, mut rx) = mpsc::channel(8);
        let monitor = KeepaliveMonitor::start(config(), tx, move || {
            flag.store(true, Ordering::SeqCst);
        });

        let _ = rx.recv().await.unwrap();
        monitor.acknowledge(b"someone else".to_vec());
        tokio::time::advance(Duration::from_secs(11)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(dead.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_writer_is_gone() {
        let (tx, rx) = mpsc::channel(8);
        let monitor = KeepaliveMonitor::start(config(), tx, || panic!("must not fire"));
        drop(rx);
        tokio::time::advance(Duration::from_secs(31)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!monitor.is_running());
    }
}

//! Keepalive daemon (spec §4.8, §9 "Coroutine-like streaming" is unrelated
//! — this is the background worker per §5 "one background keepalive
//! worker per connection").
//!
//! Mirrors `nlds/rabbit/keepalive.py`'s `KeepaliveDaemon`: idle unless
//! told to poll, pumps the connection at `max(heartbeat/2, 1)` seconds
//! while polling, and is killed (not merely dropped) at consumer
//! shutdown. The Rust translation swaps the original's `threading.Event`
//! pair for `tokio::sync::watch` channels and a spawned task instead of
//! an OS thread.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

type PumpFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A background task that periodically invokes a "pump" closure (the
/// moral equivalent of `process_data_events()`) while polling is active.
pub struct KeepaliveDaemon {
    poll_tx: watch::Sender<bool>,
    kill_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl KeepaliveDaemon {
    /// Spawn the daemon. `heartbeat` is the AMQP heartbeat interval; the
    /// daemon pumps at `max(heartbeat/2, 1s)` whenever polling is active.
    pub fn spawn<F>(heartbeat: Duration, pump: F) -> Self
    where
        F: Fn() -> PumpFuture + Send + Sync + 'static,
    {
        let (poll_tx, mut poll_rx) = watch::channel(false);
        let (kill_tx, mut kill_rx) = watch::channel(false);
        let interval = std::cmp::max(heartbeat / 2, Duration::from_secs(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if *poll_rx.borrow_and_update() {
                            pump().await;
                        }
                    }
                    changed = kill_rx.changed() => {
                        if changed.is_err() || *kill_rx.borrow() {
                            debug!("keepalive daemon exiting");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            poll_tx,
            kill_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Start pumping on every tick. Called when a consumer begins
    /// awaiting a message and stopped once it has one to process, so the
    /// daemon is idle exactly when the main loop is not suspended on the
    /// bus.
    pub fn start_polling(&self) {
        let _ = self.poll_tx.send(true);
    }

    pub fn stop_polling(&self) {
        let _ = self.poll_tx.send(false);
    }

    pub fn is_polling(&self) -> bool {
        *self.poll_tx.borrow()
    }

    /// Signal the daemon to exit. Spec: "the keepalive daemon is
    /// signalled by a kill-event and joins within one heartbeat".
    pub async fn kill(&self) {
        let _ = self.kill_tx.send(true);
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for KeepaliveDaemon {
    fn drop(&mut self) {
        let _ = self.kill_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn idle_daemon_never_pumps() {
        let pumps = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&pumps);
        let daemon = KeepaliveDaemon::spawn(Duration::from_millis(20), move || {
            let counted = Arc::clone(&counted);
            Box::pin(async move {
                counted.fetch_add(1, Ordering::SeqCst);
            })
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(pumps.load(Ordering::SeqCst), 0);
        daemon.kill().await;
    }

    #[tokio::test]
    async fn polling_daemon_pumps_repeatedly() {
        let pumps = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&pumps);
        let daemon = KeepaliveDaemon::spawn(Duration::from_millis(10), move || {
            let counted = Arc::clone(&counted);
            Box::pin(async move {
                counted.fetch_add(1, Ordering::SeqCst);
            })
        });
        daemon.start_polling();
        tokio::time::sleep(Duration::from_millis(100)).await;
        daemon.stop_polling();
        let count_after_stop = pumps.load(Ordering::SeqCst);
        assert!(count_after_stop >= 3);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(pumps.load(Ordering::SeqCst), count_after_stop);
        daemon.kill().await;
    }
}

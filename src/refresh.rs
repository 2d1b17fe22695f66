//! Background task that periodically pulls new records into the store

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::manager::DatasetManager;

/// Sent after every successful tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub tick: u64,
    pub new_records: usize,
}

pub struct RefreshDriver {
    manager: Arc<DatasetManager>,
    interval: Duration,
}

impl RefreshDriver {
    pub fn new(manager: Arc<DatasetManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Starts the loop on the current runtime. The first tick fires one
    /// interval from now; a tick that overruns skips the missed ones.
    pub fn spawn(self) -> RefreshHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(shutdown_rx, report_tx));
        RefreshHandle {
            shutdown: shutdown_tx,
            reports: report_rx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>, reports: mpsc::UnboundedSender<RefreshReport>) {
        log::info!("Starting refresh driver with interval {:?}", self.interval);

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The initial load just ran; skip the immediate first tick.
        ticker.tick().await;

        let mut tick = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                // A dropped handle counts as a shutdown request.
                _ = shutdown.changed() => break,
            }
            tick += 1;

            let manager = Arc::clone(&self.manager);
            match tokio::task::spawn_blocking(move || manager.refresh_once()).await {
                Ok(Ok(new_records)) => {
                    if new_records > 0 {
                        log::debug!("Refresh tick {}: {} new records", tick, new_records);
                    }
                    // Nobody listening is fine; the store is still updated.
                    let _ = reports.send(RefreshReport { tick, new_records });
                }
                Ok(Err(e)) => log::warn!("Refresh tick {} failed, retrying next tick: {}", tick, e),
                Err(e) => log::error!("Refresh tick {} aborted: {}", tick, e),
            }
        }

        log::info!("Refresh driver stopped after {} ticks", tick);
    }
}

/// Owner of a running refresh loop.
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    reports: mpsc::UnboundedReceiver<RefreshReport>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Next report, `None` once the loop has stopped.
    pub async fn next_report(&mut self) -> Option<RefreshReport> {
        self.reports.recv().await
    }

    /// Stops the loop and waits for it. A tick already in progress runs to
    /// completion first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            log::error!("Refresh driver task failed: {}", e);
        }
    }
}

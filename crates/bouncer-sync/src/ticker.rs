//! Background refresh ticker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::engine::SyncEngine;

/// Handle to a running ticker.
///
/// Dropping the handle detaches the ticker; it keeps running until the
/// runtime shuts down.
#[derive(Debug)]
pub struct TickerHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl TickerHandle {
    /// Stops scheduling new cycles. Cycles already spawned run to completion.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the scheduling loop to exit.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the ticker and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}

/// Spawns the loop firing a refresh cycle every `period`, first one
/// `period` from now.
pub(crate) fn spawn(engine: Arc<SyncEngine>, period: Duration) -> TickerHandle {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut shutdown_rx = shutdown_tx.subscribe();
    let keepalive = shutdown_tx.clone();

    let handle = tokio::spawn(async move {
        let _keepalive = keepalive;
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = period.as_secs(), "Refresh ticker started");
        loop {
            tokio::select! {
                _ = ticks.tick() => {
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move {
                        // Outcome is logged and folded into health by refresh().
                        let _ = engine.refresh().await;
                    });
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Refresh ticker stopped");
                    break;
                }
            }
        }
    });

    TickerHandle {
        shutdown_tx,
        handle,
    }
}

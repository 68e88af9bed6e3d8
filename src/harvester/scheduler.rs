//! Periodic harvest task.

use super::{instant_after, Harvester, Inner};
use crate::core::Result;
use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, MissedTickBehavior};

/// Handle to the running ticker.
pub(super) struct HarvestScheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HarvestScheduler {
    /// Spawn the ticker. It holds only a weak reference so dropping the last
    /// harvester handle also ends the task.
    pub(super) fn spawn(runtime: &Handle, inner: Weak<Inner>, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(run(inner, period, shutdown_rx));
        tracing::debug!(period = ?period, "harvest scheduler started");
        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signal the ticker and wait until it and its in-flight harvests finish.
    pub(super) async fn stop(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.handle.await?;
        Ok(())
    }
}

async fn run(inner: Weak<Inner>, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    // First harvest one full period after start.
    let mut ticker = interval_at(instant_after(period), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let harvester = Harvester { inner };
                in_flight.spawn(async move {
                    harvester.harvest_now().await;
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "scheduled harvest task failed");
                }
            }
        }
    }

    let pending = in_flight.len();
    if pending > 0 {
        tracing::debug!(pending, "waiting for in-flight harvests");
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "scheduled harvest task failed");
        }
    }
}

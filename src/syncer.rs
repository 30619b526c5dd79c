//! Background flush task: periodically drains the active segment's write
//! buffer so callers get durability without syncing on every append.

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::log::WalInner;

pub(crate) struct Syncer {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Syncer {
    /// Spawns the periodic sync loop. A message on `rearm_rx` (sent whenever
    /// the engine syncs on its own) pushes the next tick a full interval out.
    pub(crate) fn start(
        inner: Arc<Mutex<WalInner>>,
        interval: Duration,
        mut rearm_rx: mpsc::Receiver<()>,
    ) -> Syncer {
        let (stop_tx, mut stop_rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of an interval completes immediately; push it
            // one full period out.
            ticker.reset();

            loop {
                select! {
                    _ = stop_rx.recv() => {
                        break;
                    }

                    _ = rearm_rx.recv() => {
                        ticker.reset();
                    }

                    _ = ticker.tick() => {
                        // No caller is waiting on a background sync; log and
                        // keep ticking.
                        if let Err(e) = inner.lock().await.sync().await {
                            error!("background sync failed: {e}");
                        }
                    }
                }
            }

            debug!("sync task stopped");
        });

        Syncer { stop_tx, handle }
    }

    /// Signals the loop and joins it; once this returns no further background
    /// sync can run.
    pub(crate) async fn stop(self) {
        let _ = self.stop_tx.send(()).await;

        if let Err(e) = self.handle.await {
            error!("sync task join failed: {e}");
        }
    }
}

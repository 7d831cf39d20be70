//! Periodic progress reporting while a batch runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::types::{BatchPhase, Event};

use super::Shared;

/// One ticker per batch; never restarted once stopped
pub(crate) struct ProgressTicker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressTicker {
    /// Spawn a task that publishes a `Progress` event every `period`
    ///
    /// Ticks are skipped until the size probes have drained once. The task
    /// exits on its own as soon as it observes the batch is no longer running.
    pub(crate) fn spawn(shared: Arc<Shared>, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if shared.phase() != BatchPhase::Running {
                            tracing::debug!("batch no longer running, progress ticker exiting");
                            break;
                        }
                        if !shared.progress.size_probe_complete() {
                            continue;
                        }

                        // publish() never blocks, so a slow subscriber cannot stall the tick
                        shared.publish(Event::Progress {
                            progress: shared.progress.snapshot(shared.files_remaining()),
                        });
                    }
                    _ = token.cancelled() => {
                        break;
                    }
                }
            }
        });

        Self { cancel, handle }
    }

    /// Stop the ticker and wait until it can no longer publish
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await
            && e.is_panic()
        {
            tracing::error!(error = %e, "progress ticker panicked");
        }
    }
}

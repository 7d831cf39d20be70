//! Batch state machine.
//!
//! One task owns every batch transition and handles [`Command`]s strictly in
//! order. Pool drain notifications arrive as commands too, so completion and
//! cancellation can never interleave: whichever command is processed first
//! wins, and a stale drain (wrong generation, batch no longer running, or new
//! work queued in the meantime) is ignored.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::PoolConfig;
use crate::pool::WorkerPool;
use crate::types::{BatchPhase, Event, Request};
use crate::utils;

use super::download_task::DownloadJob;
use super::probe_task::ProbeJob;
use super::ticker::ProgressTicker;
use super::{Pools, Shared};

pub(crate) enum Command {
    Submit(Vec<Request>),
    Cancel,
    /// The download pool of the given generation went idle
    DownloadsDrained(u64),
    /// The probe pool of the given generation went idle
    ProbesDrained(u64),
    Shutdown(oneshot::Sender<()>),
}

/// Build both pools for `generation`, wiring their drained hooks back to the coordinator
///
/// The hooks hold a weak sender so idle pools never keep the coordinator alive.
pub(crate) fn build_pools(
    config: &PoolConfig,
    generation: u64,
    commands: &mpsc::WeakUnboundedSender<Command>,
) -> Pools {
    let downloads_tx = commands.clone();
    let probes_tx = commands.clone();

    Pools {
        downloads: WorkerPool::new(
            "downloads",
            generation,
            config.clone(),
            Box::new(move |generation| {
                if let Some(tx) = downloads_tx.upgrade() {
                    tx.send(Command::DownloadsDrained(generation)).ok();
                }
            }),
        ),
        probes: WorkerPool::new(
            "probes",
            generation,
            config.clone(),
            Box::new(move |generation| {
                if let Some(tx) = probes_tx.upgrade() {
                    tx.send(Command::ProbesDrained(generation)).ok();
                }
            }),
        ),
    }
}

enum Outcome {
    Complete,
    Cancelled,
}

pub(crate) struct Coordinator {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    weak: mpsc::WeakUnboundedSender<Command>,
    ticker: Option<ProgressTicker>,
    generation: u64,
}

impl Coordinator {
    pub(crate) fn new(
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<Command>,
        weak: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        let generation = shared.pools().downloads.generation();
        Self {
            shared,
            commands,
            weak,
            ticker: None,
            generation,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Submit(requests) => self.on_submit(requests).await,
                Command::Cancel => self.on_cancel().await,
                Command::DownloadsDrained(generation) => {
                    self.on_downloads_drained(generation).await
                }
                Command::ProbesDrained(generation) => self.on_probes_drained(generation),
                Command::Shutdown(reply) => {
                    self.stop().await;
                    reply.send(()).ok();
                    return;
                }
            }
        }

        tracing::debug!("all handles dropped, stopping coordinator");
        self.stop().await;
    }

    async fn on_submit(&mut self, requests: Vec<Request>) {
        if self.shared.phase() == BatchPhase::Idle {
            self.start_batch(requests.len()).await;
        }

        let pools = self.shared.pools();
        for request in requests {
            let task_id = self.shared.next_task_id();
            tracing::debug!(task_id, url = request.url(), "queueing request");

            pools
                .probes
                .execute(ProbeJob::new(Arc::clone(&self.shared), request.url()));
            pools.downloads.execute(DownloadJob::new(
                task_id,
                request,
                Arc::clone(&self.shared),
                Arc::downgrade(&pools.downloads),
            ));
        }
    }

    async fn start_batch(&mut self, requests: usize) {
        // A previous ticker has normally exited on its own already
        self.stop_ticker().await;

        self.shared.set_phase(BatchPhase::Running);
        tracing::info!(generation = self.generation, requests, "batch started");

        self.shared.publish(Event::Calculating {
            progress: self.shared.progress.snapshot(requests),
        });
        self.ticker = Some(ProgressTicker::spawn(
            Arc::clone(&self.shared),
            self.shared.config.progress.interval,
        ));
    }

    async fn on_downloads_drained(&mut self, generation: u64) {
        if self.shared.phase() != BatchPhase::Running || generation != self.generation {
            tracing::debug!(generation, "ignoring stale download drain");
            return;
        }

        let pools = self.shared.pools();
        if pools.downloads.pending() > 0 {
            // New work joined the batch after the drain was signalled
            return;
        }

        self.stop_ticker().await;
        if pools.probes.pending() > 0 {
            tracing::debug!(
                pending = pools.probes.pending(),
                "abandoning unfinished size probes"
            );
            self.retire_pools().await;
        }
        self.finish(Outcome::Complete).await;
    }

    fn on_probes_drained(&mut self, generation: u64) {
        if self.shared.phase() != BatchPhase::Running || generation != self.generation {
            return;
        }
        if self.shared.pools().probes.pending() == 0 {
            self.shared.progress.mark_size_probe_complete();
            tracing::debug!(
                total_expected_bytes = self.shared.progress.total_expected_bytes(),
                "size probes complete"
            );
        }
    }

    async fn on_cancel(&mut self) {
        if self.shared.phase() == BatchPhase::Idle {
            // Nothing to drain, but every cancel is still answered
            tracing::debug!("cancel requested while idle");
            self.finish(Outcome::Cancelled).await;
            return;
        }

        self.shared.set_phase(BatchPhase::Cancelling);
        tracing::info!(generation = self.generation, "cancelling batch");

        self.stop_ticker().await;
        self.retire_pools().await;
        self.finish(Outcome::Cancelled).await;
    }

    /// Swap in a fresh pool generation, then shut the old one down and wait for it
    async fn retire_pools(&mut self) {
        self.generation += 1;
        let fresh = build_pools(&self.shared.config.pool, self.generation, &self.weak);
        let old = self.shared.replace_pools(fresh);

        self.shared.set_retiring(Some(Arc::clone(&old.downloads)));
        let dropped_downloads = old.downloads.shutdown_now();
        let dropped_probes = old.probes.shutdown_now();
        tracing::debug!(
            generation = old.downloads.generation(),
            dropped_downloads,
            dropped_probes,
            download_workers = old.downloads.workers(),
            probe_workers = old.probes.workers(),
            "waiting for retired pools to terminate"
        );

        old.downloads.terminated_token().cancelled().await;
        old.probes.terminated_token().cancelled().await;
        self.shared.set_retiring(None);
    }

    /// Reset shared state and publish the terminal event of the batch
    async fn finish(&mut self, outcome: Outcome) {
        // Snapshot first; the event must describe the batch, not the reset
        let progress = self.shared.progress.snapshot(0);
        self.reset().await;
        self.shared.set_phase(BatchPhase::Idle);

        let event = match outcome {
            Outcome::Complete => {
                tracing::info!(
                    bytes_downloaded = progress.bytes_downloaded,
                    errors = progress.error_count,
                    "batch complete"
                );
                Event::Complete { progress }
            }
            Outcome::Cancelled => {
                tracing::info!(
                    bytes_downloaded = progress.bytes_downloaded,
                    "batch cancelled"
                );
                Event::Cancelled { progress }
            }
        };
        self.shared.publish(event);
    }

    async fn reset(&self) {
        self.shared.progress.reset();
        match utils::clear_directory(&self.shared.staging_dir).await {
            Ok(removed) if removed > 0 => {
                tracing::debug!(removed, "cleared staging directory")
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(
                staging_dir = %self.shared.staging_dir.display(),
                error = %e,
                "failed to clear staging directory"
            ),
        }
    }

    async fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop().await;
        }
    }

    /// Cancel any running batch and terminate the current pools for good
    async fn stop(&mut self) {
        if self.shared.phase() != BatchPhase::Idle {
            self.on_cancel().await;
        }
        self.stop_ticker().await;

        let pools = self.shared.pools();
        pools.downloads.shutdown_now();
        pools.probes.shutdown_now();
        pools.downloads.terminated_token().cancelled().await;
        pools.probes.terminated_token().cancelled().await;

        tracing::debug!("coordinator stopped");
    }
}

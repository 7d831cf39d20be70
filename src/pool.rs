//! Bounded worker pool with race-free "last job finished" detection.
//!
//! Both the download pool and the size-probe pool are instances of
//! [`WorkerPool`]. A pool owns a FIFO queue and a set of tokio worker tasks:
//!
//! - Up to `core_workers` workers are spawned eagerly as jobs arrive; one more
//!   burst worker (up to `max_workers`) is spawned when no worker is idle.
//! - Idle workers retire after `keep_alive` without work.
//! - Every change to the queue, the worker count and the active count happens
//!   under the pool lock; `active` is additionally an atomic so
//!   [`WorkerPool::active`] can be read without locking.
//! - When a worker finishes a job and the queue is empty it decrements
//!   `active`; the one worker that moves it from 1 to 0 fires the drained hook.
//! - [`WorkerPool::shutdown_now`] drops every queued job, cancels the token
//!   handed to running jobs and refuses new work. The pool is then dead; the
//!   owner builds a new generation.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;

/// Unit of work executed by a [`WorkerPool`]
pub(crate) trait Job: Send + 'static {
    /// Run to completion, stopping early once `cancel` fires
    fn run(self, cancel: CancellationToken) -> impl Future<Output = ()> + Send;
}

/// Called with the pool generation when the pool goes from busy to empty
pub(crate) type DrainedHook = Box<dyn Fn(u64) + Send + Sync>;

struct PoolState<J> {
    queue: VecDeque<J>,
    /// Live worker tasks
    workers: usize,
    /// Live workers not currently holding a job
    idle: usize,
}

pub(crate) struct WorkerPool<J: Job> {
    name: &'static str,
    generation: u64,
    config: PoolConfig,
    state: Mutex<PoolState<J>>,
    active: AtomicUsize,
    wakeup: Notify,
    shutdown: CancellationToken,
    terminated: CancellationToken,
    on_drained: DrainedHook,
}

impl<J: Job> WorkerPool<J> {
    pub(crate) fn new(
        name: &'static str,
        generation: u64,
        config: PoolConfig,
        on_drained: DrainedHook,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            generation,
            config,
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                workers: 0,
                idle: 0,
            }),
            active: AtomicUsize::new(0),
            wakeup: Notify::new(),
            shutdown: CancellationToken::new(),
            terminated: CancellationToken::new(),
            on_drained,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<J>> {
        // Jobs run outside the lock, so a poisoned guard still holds consistent counters
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Enqueue a job; returns false if the pool has been shut down
    pub(crate) fn execute(self: &Arc<Self>, job: J) -> bool {
        let spawn = {
            let mut state = self.lock_state();
            if self.shutdown.is_cancelled() {
                return false;
            }
            state.queue.push_back(job);

            let spawn = state.workers < self.config.core_workers
                || (state.idle == 0 && state.workers < self.config.max_workers);
            if spawn {
                state.workers += 1;
                state.idle += 1;
            }
            spawn
        };

        if spawn {
            tracing::debug!(
                pool = self.name,
                generation = self.generation,
                "spawning worker"
            );
            tokio::spawn(Arc::clone(self).worker_loop());
        } else {
            self.wakeup.notify_one();
        }
        true
    }

    /// Jobs currently executing (lock-free read)
    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Queued plus executing jobs, read under one lock so it is never torn
    pub(crate) fn pending(&self) -> usize {
        let state = self.lock_state();
        state.queue.len() + self.active.load(Ordering::Acquire)
    }

    /// Live worker tasks
    pub(crate) fn workers(&self) -> usize {
        self.lock_state().workers
    }

    #[cfg(test)]
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Drop queued jobs, signal running jobs to stop and refuse new work
    ///
    /// Returns the number of queued jobs that were dropped unexecuted.
    pub(crate) fn shutdown_now(&self) -> usize {
        let dropped = {
            let mut state = self.lock_state();
            self.shutdown.cancel();
            if state.workers == 0 {
                self.terminated.cancel();
            }
            std::mem::take(&mut state.queue)
        };

        tracing::debug!(
            pool = self.name,
            generation = self.generation,
            dropped = dropped.len(),
            active = self.active(),
            "pool shutdown requested"
        );
        dropped.len()
    }

    /// Token that is cancelled once the pool has shut down and every worker exited
    pub(crate) fn terminated_token(&self) -> CancellationToken {
        self.terminated.clone()
    }

    async fn worker_loop(self: Arc<Self>) {
        let mut next = None;
        loop {
            let job = match next.take() {
                Some(job) => job,
                None => match self.next_job().await {
                    Some(job) => job,
                    None => break,
                },
            };

            let result = AssertUnwindSafe(job.run(self.shutdown.clone()))
                .catch_unwind()
                .await;
            if result.is_err() {
                tracing::error!(
                    pool = self.name,
                    generation = self.generation,
                    "job panicked"
                );
            }

            next = self.finish_job();
        }

        tracing::debug!(
            pool = self.name,
            generation = self.generation,
            "worker exited"
        );
    }

    /// Wait for the next queued job, or retire
    async fn next_job(&self) -> Option<J> {
        loop {
            {
                let mut state = self.lock_state();
                if self.shutdown.is_cancelled() {
                    self.retire(&mut state);
                    return None;
                }
                if let Some(job) = state.queue.pop_front() {
                    state.idle -= 1;
                    self.active.fetch_add(1, Ordering::AcqRel);
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Permits coalesce; pass the wakeup along
                        self.wakeup.notify_one();
                    }
                    return Some(job);
                }
            }

            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = self.shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.config.keep_alive) => {
                    let mut state = self.lock_state();
                    if state.queue.is_empty() {
                        self.retire(&mut state);
                        return None;
                    }
                }
            }
        }
    }

    /// Epilogue of a job: hand the worker the next job, or go idle
    fn finish_job(&self) -> Option<J> {
        let mut state = self.lock_state();
        if !self.shutdown.is_cancelled()
            && let Some(job) = state.queue.pop_front()
        {
            return Some(job);
        }

        state.idle += 1;
        let was_last = self.active.fetch_sub(1, Ordering::AcqRel) == 1;
        let drained = was_last && !self.shutdown.is_cancelled();
        drop(state);

        if drained {
            tracing::debug!(
                pool = self.name,
                generation = self.generation,
                "pool drained"
            );
            (self.on_drained)(self.generation);
        }
        None
    }

    fn retire(&self, state: &mut PoolState<J>) {
        state.workers -= 1;
        state.idle -= 1;
        if state.workers == 0 && self.shutdown.is_cancelled() {
            self.terminated.cancel();
        }
    }
}

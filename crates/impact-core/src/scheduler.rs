// ─────────────────────────────────────────────────────────────────────
// SCPN Impact Core — Scheduler
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Shared-memory scheduling abstraction.
//!
//! The whole core is data-parallel over particles; the scheduler
//! provides the three primitives it needs (`parallel_for`,
//! `parallel_invoke`, `submit`) behind a narrow trait so that tests can
//! force sequential execution while production runs use a fixed-size
//! work-stealing pool.

use impact_types::error::{ImpactError, ImpactResult};
use std::ops::Range;
use std::sync::mpsc;
use std::sync::Mutex;

pub trait Scheduler: Send + Sync {
    /// Number of worker threads; one for the sequential scheduler.
    fn thread_count(&self) -> usize;

    /// Index of the calling worker thread, zero outside the pool.
    fn thread_index(&self) -> usize;

    /// Bulk loop over `[from, to)` split into chunks of `granularity`.
    fn parallel_for(
        &self,
        from: usize,
        to: usize,
        granularity: usize,
        body: &(dyn Fn(Range<usize>) + Sync),
    );

    /// Fork-join pair, used by tree builds.
    fn parallel_invoke(&self, a: &(dyn Fn() + Sync), b: &(dyn Fn() + Sync));

    /// Detached task; the handle blocks until completion.
    fn submit(&self, task: Box<dyn FnOnce() + Send>) -> TaskHandle;
}

pub struct TaskHandle {
    receiver: Option<mpsc::Receiver<()>>,
}

impl TaskHandle {
    fn finished() -> Self {
        TaskHandle { receiver: None }
    }

    pub fn wait(self) {
        if let Some(receiver) = self.receiver {
            // a disconnected channel means the task already finished
            let _ = receiver.recv();
        }
    }
}

/// Runs everything inline on the calling thread.
#[derive(Debug, Default)]
pub struct SequentialScheduler;

impl Scheduler for SequentialScheduler {
    fn thread_count(&self) -> usize {
        1
    }

    fn thread_index(&self) -> usize {
        0
    }

    fn parallel_for(
        &self,
        from: usize,
        to: usize,
        _granularity: usize,
        body: &(dyn Fn(Range<usize>) + Sync),
    ) {
        if from < to {
            body(from..to);
        }
    }

    fn parallel_invoke(&self, a: &(dyn Fn() + Sync), b: &(dyn Fn() + Sync)) {
        a();
        b();
    }

    fn submit(&self, task: Box<dyn FnOnce() + Send>) -> TaskHandle {
        task();
        TaskHandle::finished()
    }
}

/// Fixed-thread-count pool with work stealing.
pub struct RayonScheduler {
    pool: rayon::ThreadPool,
}

impl RayonScheduler {
    /// `threads == 0` selects the hardware concurrency.
    pub fn new(threads: usize) -> ImpactResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|err| ImpactError::ResourceFailure(err.to_string()))?;
        Ok(RayonScheduler { pool })
    }
}

impl Scheduler for RayonScheduler {
    fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn thread_index(&self) -> usize {
        rayon::current_thread_index().unwrap_or(0)
    }

    fn parallel_for(
        &self,
        from: usize,
        to: usize,
        granularity: usize,
        body: &(dyn Fn(Range<usize>) + Sync),
    ) {
        if from >= to {
            return;
        }
        let granularity = granularity.max(1);
        let chunks: Vec<Range<usize>> = (from..to)
            .step_by(granularity)
            .map(|start| start..(start + granularity).min(to))
            .collect();
        self.pool.install(|| {
            rayon::scope(|scope| {
                for chunk in chunks {
                    scope.spawn(move |_| body(chunk));
                }
            });
        });
    }

    fn parallel_invoke(&self, a: &(dyn Fn() + Sync), b: &(dyn Fn() + Sync)) {
        self.pool.install(|| {
            rayon::join(|| a(), || b());
        });
    }

    fn submit(&self, task: Box<dyn FnOnce() + Send>) -> TaskHandle {
        let (sender, receiver) = mpsc::channel();
        self.pool.spawn(move || {
            task();
            let _ = sender.send(());
        });
        TaskHandle {
            receiver: Some(receiver),
        }
    }
}

/// Per-worker-thread values, reduced in slot order after a parallel
/// loop so that the result is deterministic for a fixed partition.
pub struct ThreadLocal<T> {
    slots: Vec<Mutex<T>>,
}

impl<T> ThreadLocal<T> {
    pub fn new(scheduler: &dyn Scheduler, make: impl Fn() -> T) -> Self {
        let count = scheduler.thread_count().max(1);
        ThreadLocal {
            slots: (0..count).map(|_| Mutex::new(make())).collect(),
        }
    }

    /// Access the slot of the calling worker thread.
    pub fn with<R>(&self, scheduler: &dyn Scheduler, f: impl FnOnce(&mut T) -> R) -> R {
        let index = scheduler.thread_index() % self.slots.len();
        let mut guard = self.slots[index].lock().expect("thread-local poisoned");
        f(&mut guard)
    }

    /// Drain the slots in index order.
    pub fn into_values(self) -> Vec<T> {
        self.slots
            .into_iter()
            .map(|slot| slot.into_inner().expect("thread-local poisoned"))
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots
            .iter_mut()
            .map(|slot| slot.get_mut().expect("thread-local poisoned"))
    }
}

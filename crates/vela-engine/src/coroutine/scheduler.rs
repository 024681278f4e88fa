//! Coroutine scheduler
//!
//! N:M over a fixed worker pool. The scheduler only queues: a global
//! injector for worker-agnostic launches and one affinity injector per
//! worker for `SameWorker` launches. A registry of pending coroutines keeps
//! their queued argument values visible to the collector until a worker
//! picks them up.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_deque::Injector;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::coroutine::coroutine::Coroutine;
use crate::coroutine::worker::Worker;
use crate::error::{ExceptionKind, VelaException};
use crate::object::ObjPtr;
use crate::vm::Vm;

pub(crate) struct Shared {
    pub injector: Injector<Arc<Coroutine>>,
    pub affinity: Vec<Injector<Arc<Coroutine>>>,
    pub registry: Mutex<FxHashMap<u64, Arc<Coroutine>>>,
    pub pending: AtomicUsize,
    pub shutdown: AtomicBool,
    pub vm: RwLock<Weak<Vm>>,
}

impl Shared {
    /// Called by a worker after a coroutine has run and settled.
    pub fn finish(&self, id: u64) {
        self.registry.lock().remove(&id);
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The fixed-pool coroutine scheduler of one runtime.
pub struct CoroScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<Worker>>,
    next_id: AtomicU64,
    worker_count: usize,
    max_pending: usize,
}

impl CoroScheduler {
    /// Create a scheduler with `workers` pool threads (not yet started) and
    /// a cap of `max_pending` enqueued-but-unfinished coroutines.
    pub fn new(workers: usize, max_pending: usize) -> Self {
        let worker_count = workers.max(1);
        Self {
            shared: Arc::new(Shared {
                injector: Injector::new(),
                affinity: (0..worker_count).map(|_| Injector::new()).collect(),
                registry: Mutex::new(FxHashMap::default()),
                pending: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                vm: RwLock::new(Weak::new()),
            }),
            workers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            worker_count,
            max_pending,
        }
    }

    /// Start the worker pool against `vm`.
    pub fn start(&self, vm: Weak<Vm>) {
        *self.shared.vm.write() = vm;
        let mut workers = self.workers.lock();
        debug_assert!(workers.is_empty(), "scheduler started twice");
        for id in 0..self.worker_count {
            let mut w = Worker::new(id, self.shared.clone());
            w.start();
            workers.push(w);
        }
    }

    /// Number of pool workers.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Allocate a coroutine identifier.
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Enqueue `coroutine`, optionally pinned to one worker's queue.
    /// Fails with `OutOfMemory` when the pending cap is reached.
    pub(crate) fn schedule(
        &self,
        coroutine: Arc<Coroutine>,
        worker_hint: Option<usize>,
    ) -> Result<(), VelaException> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(VelaException::new(
                ExceptionKind::InvalidOperation,
                "scheduler is shut down",
            ));
        }
        let reserved = self
            .shared
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_pending).then_some(n + 1)
            });
        if reserved.is_err() {
            return Err(VelaException::out_of_memory(format!(
                "scheduler at capacity ({} pending coroutines)",
                self.max_pending
            )));
        }

        self.shared
            .registry
            .lock()
            .insert(coroutine.id(), coroutine.clone());
        match worker_hint {
            Some(idx) => self.shared.affinity[idx % self.worker_count].push(coroutine),
            None => self.shared.injector.push(coroutine),
        }
        Ok(())
    }

    /// Number of enqueued-but-unfinished coroutines.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// GC roots held by pending coroutines: their queued argument objects.
    pub fn pending_roots(&self) -> Vec<ObjPtr> {
        let registry = self.shared.registry.lock();
        registry
            .values()
            .flat_map(|c| c.arg_roots().collect::<Vec<_>>())
            .collect()
    }

    /// Stop and join the worker pool. Already-running coroutines finish;
    /// still-queued ones are dropped with their events, whose drop guard
    /// releases the target references and leaves the targets pending.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let mut workers = self.workers.lock();
        for w in workers.iter_mut() {
            w.stop();
        }
        workers.clear();
    }
}

//! Worker thread that executes coroutines
//!
//! Workers drain their own affinity queue first (so `SameWorker` launches
//! land where they were pinned), then the global injector. Idle workers
//! sleep briefly instead of spinning.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_deque::{Injector, Steal};

use crate::coroutine::coroutine::Coroutine;
use crate::coroutine::scheduler::Shared;

pub(crate) struct Worker {
    id: usize,
    shared: Arc<Shared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    pub fn new(id: usize, shared: Arc<Shared>) -> Self {
        Self {
            id,
            shared,
            handle: None,
        }
    }

    /// Start the worker thread.
    pub fn start(&mut self) {
        let id = self.id;
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(format!("vela-worker-{id}"))
            .spawn(move || Worker::run_loop(id, shared))
            .expect("failed to spawn worker thread");
        self.handle = Some(handle);
    }

    /// Join the worker thread. The scheduler sets the shutdown flag first.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("worker {} panicked", self.id);
            }
        }
    }

    fn run_loop(id: usize, shared: Arc<Shared>) {
        loop {
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            let coroutine = match Self::find_work(id, &shared) {
                Some(c) => c,
                None => {
                    thread::sleep(Duration::from_micros(100));
                    continue;
                }
            };
            let Some(vm) = shared.vm.read().upgrade() else {
                // Runtime is tearing down; the shutdown flag follows shortly
                thread::sleep(Duration::from_micros(100));
                continue;
            };

            log::trace!("worker {id} running coroutine {}", coroutine.id());
            coroutine.run(&vm, id);
            shared.finish(coroutine.id());
        }
        log::trace!("worker {id} shutting down");
    }

    /// Find work: own affinity queue first, then the global injector.
    fn find_work(id: usize, shared: &Shared) -> Option<Arc<Coroutine>> {
        if let Some(c) = Self::take(&shared.affinity[id]) {
            return Some(c);
        }
        Self::take(&shared.injector)
    }

    fn take(injector: &Injector<Arc<Coroutine>>) -> Option<Arc<Coroutine>> {
        loop {
            match injector.steal() {
                Steal::Success(c) => return Some(c),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

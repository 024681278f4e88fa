//! A launched unit of work
//!
//! A [`Coroutine`] carries everything a worker needs to run one invocation:
//! the resolved method, the already-marshalled invocation values, the launch
//! mode, and the completion event that settles its Promise/Job. Between
//! enqueue and execution the scheduler's registry keeps the coroutine (and
//! through [`Coroutine::arg_roots`], its raw argument pointers) visible to
//! the collector.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::class::Method;
use crate::coroutine::event::CompletionEvent;
use crate::coroutine::launcher::LaunchMode;
use crate::env::NapiEnv;
use crate::guard::ScopedManagedCode;
use crate::invoke::{invoke, InvokeResult};
use crate::object::ObjPtr;
use crate::value::Value;
use crate::vm::Vm;

/// One enqueued or running coroutine.
pub struct Coroutine {
    id: u64,
    method: Arc<Method>,
    args: Vec<Value>,
    mode: LaunchMode,
    event: Mutex<Option<CompletionEvent>>,
}

impl Coroutine {
    pub(crate) fn new(
        id: u64,
        method: Arc<Method>,
        args: Vec<Value>,
        mode: LaunchMode,
        event: CompletionEvent,
    ) -> Self {
        Self {
            id,
            method,
            args,
            mode,
            event: Mutex::new(Some(event)),
        }
    }

    /// Scheduler-assigned identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Launch mode requested at enqueue time.
    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    /// Take the completion event back. The launcher uses this on the
    /// failure path to destroy an event the scheduler never accepted.
    pub(crate) fn take_event(&self) -> Option<CompletionEvent> {
        self.event.lock().take()
    }

    /// Raw object pointers held in the queued argument values. These must
    /// be treated as GC roots while the coroutine is pending.
    pub(crate) fn arg_roots(&self) -> impl Iterator<Item = ObjPtr> + '_ {
        self.args.iter().filter_map(|v| match v {
            Value::Ref(Some(p)) => Some(*p),
            _ => None,
        })
    }

    /// Execute on a worker and settle the completion event.
    pub(crate) fn run(&self, vm: &Arc<Vm>, worker: usize) {
        let mut env = NapiEnv::with_worker(vm.clone(), worker);
        let outcome = {
            let mut guard = ScopedManagedCode::new(&mut env);
            invoke(&mut guard, &self.method, &self.args).and_then(|res| match res {
                InvokeResult::Void => Ok(Value::Ref(None)),
                InvokeResult::Prim(v) => Ok(v),
                InvokeResult::Ref(r) => Ok(Value::Ref(guard.to_internal(r)?)),
            })
        };

        let Some(event) = self.event.lock().take() else {
            debug_assert!(false, "coroutine {} lost its completion event", self.id);
            return;
        };
        let settled = match outcome {
            Ok(value) => event.resolve(value),
            Err(exc) => {
                log::debug!("coroutine {} terminated with {exc}", self.id);
                let error = match vm.alloc_string(&exc.to_string()) {
                    Ok(ptr) => Value::Ref(Some(ptr)),
                    Err(_) => Value::Ref(None),
                };
                event.reject(error)
            }
        };
        if let Err(e) = settled {
            log::error!("coroutine {} could not settle its target: {e}", self.id);
        }
    }
}

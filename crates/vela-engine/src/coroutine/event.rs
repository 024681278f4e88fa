//! Completion events
//!
//! A [`CompletionEvent`] links a launched coroutine's termination to the
//! settlement of its Promise/Job. It owns a Global reference to the target,
//! keeping it alive from launch until settlement regardless of what the
//! launching frame does. The event is consumed by exactly one of
//! [`CompletionEvent::resolve`], [`CompletionEvent::reject`], or, on the
//! launch-failure path where it was never handed to the scheduler,
//! [`CompletionEvent::destroy`].

use std::sync::Arc;

use crate::coroutine::promise;
use crate::error::VelaException;
use crate::object::{ObjPtr, PromiseState};
use crate::value::Value;
use crate::vm::Vm;
use vela_sdk::NapiRef;

/// One-shot notifier over a Global reference to a pending Promise/Job.
pub struct CompletionEvent {
    vm: Arc<Vm>,
    target: Option<NapiRef>,
}

impl CompletionEvent {
    /// Bind an event to `target`, minting the Global reference it owns.
    pub fn new(vm: Arc<Vm>, target: ObjPtr) -> Result<Self, VelaException> {
        let r = vm.globals().new_ref(target, false)?;
        Ok(Self {
            vm,
            target: Some(r),
        })
    }

    /// The Promise/Job this event will settle.
    pub fn target(&self) -> Result<ObjPtr, VelaException> {
        let r = self
            .target
            .ok_or_else(|| VelaException::invalid_reference("completion event already consumed"))?;
        self.vm
            .globals()
            .get(r)?
            .ok_or_else(|| VelaException::invalid_reference("completion target cleared"))
    }

    /// Fulfill the target and release the event's reference. The reference
    /// is held across the terminal-state write so the target stays rooted
    /// until it is settled; waiters are woken only after the release, so an
    /// observer of the settlement never sees the event's reference.
    pub fn resolve(mut self, value: Value) -> Result<(), VelaException> {
        self.settle_with(PromiseState::Fulfilled(value))
    }

    /// Reject the target and release the event's reference.
    pub fn reject(mut self, error: Value) -> Result<(), VelaException> {
        self.settle_with(PromiseState::Rejected(error))
    }

    fn settle_with(&mut self, next: PromiseState) -> Result<(), VelaException> {
        let target = self.target()?;
        let settled = promise::write_terminal(&self.vm, target, next);
        self.release();
        self.vm.notify_settled();
        settled
    }

    /// Release the event without settling its target. Launch-failure path
    /// only; the target stays Pending.
    pub fn destroy(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(r) = self.target.take() {
            if let Err(e) = self.vm.globals().remove(r) {
                log::error!("completion event held a stale target reference: {e}");
            }
        }
    }
}

impl Drop for CompletionEvent {
    fn drop(&mut self) {
        if self.target.is_some() {
            log::warn!("completion event dropped without settling its target");
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::promise::{self, PromiseOutcome, ResultFlavor};
    use crate::vm::VmOptions;

    #[test]
    fn test_event_resolves_target() {
        let vm = Vm::new(VmOptions::default());
        let p = promise::create(&vm, ResultFlavor::Promise).unwrap();
        let event = CompletionEvent::new(vm.clone(), p).unwrap();
        assert_eq!(vm.globals().live_count(), 1);

        event.resolve(Value::I64(9)).unwrap();
        assert_eq!(vm.globals().live_count(), 0);
        assert_eq!(
            promise::outcome(&vm, p).unwrap(),
            Some(PromiseOutcome::Fulfilled(Value::I64(9)))
        );
    }

    #[test]
    fn test_event_reference_roots_target() {
        let vm = Vm::new(VmOptions::default());
        let p = promise::create(&vm, ResultFlavor::Job).unwrap();
        let event = CompletionEvent::new(vm.clone(), p).unwrap();

        vm.collect([]);
        assert!(vm.heap().lock().is_valid(p));

        event.destroy();
        vm.collect([]);
        assert!(!vm.heap().lock().is_valid(p));
    }

    #[test]
    fn test_settlement_holds_root_under_concurrent_collection() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let vm = Vm::new(VmOptions::default());
        let stop = Arc::new(AtomicBool::new(false));
        let collector = {
            let vm = vm.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    vm.collect([]);
                }
            })
        };

        // The event's reference is each target's only strong root; a
        // settlement must never observe a dead target.
        for i in 0..2000 {
            let p = promise::create(&vm, ResultFlavor::Promise).unwrap();
            let event = CompletionEvent::new(vm.clone(), p).unwrap();
            event.resolve(Value::I64(i)).unwrap();
        }

        stop.store(true, Ordering::Release);
        collector.join().unwrap();
    }

    #[test]
    fn test_destroy_leaves_target_pending() {
        let vm = Vm::new(VmOptions::default());
        let p = promise::create(&vm, ResultFlavor::Promise).unwrap();
        let event = CompletionEvent::new(vm.clone(), p).unwrap();

        event.destroy();
        assert_eq!(vm.globals().live_count(), 0);
        assert_eq!(promise::outcome(&vm, p).unwrap(), None);
    }
}

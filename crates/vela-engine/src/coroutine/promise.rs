//! Promise/Job state machine
//!
//! A Promise (or its eager sibling, the Job) is a three-state future:
//! `Pending -> Fulfilled(value) | Pending -> Rejected(error)`. The state is
//! terminal once transitioned; settling an already-settled target is a
//! programming error and is rejected, never silently overwritten.

use crate::error::{ExceptionKind, VelaException};
use crate::object::{ObjBody, ObjPtr, PromiseState};
use crate::value::Value;
use crate::vm::Vm;

/// Which completion object a call site produces.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResultFlavor {
    /// `std/core/Promise`: the general awaitable
    Promise,
    /// `std/core/Job`: the eager launch handle
    Job,
}

/// Terminal state of a settled Promise/Job.
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseOutcome {
    /// Settled with a result value
    Fulfilled(Value),
    /// Settled with an error value
    Rejected(Value),
}

/// Allocate a pending Promise/Job object.
pub fn create(vm: &Vm, flavor: ResultFlavor) -> Result<ObjPtr, VelaException> {
    let class = vm.promise_class(flavor);
    vm.heap()
        .lock()
        .alloc(class, ObjBody::Promise(PromiseState::Pending))
        .ok_or_else(|| VelaException::out_of_memory("could not allocate a completion object"))
}

/// Fulfill a pending Promise/Job with `value`.
pub fn resolve(vm: &Vm, target: ObjPtr, value: Value) -> Result<(), VelaException> {
    settle(vm, target, PromiseState::Fulfilled(value))
}

/// Reject a pending Promise/Job with `error`.
pub fn reject(vm: &Vm, target: ObjPtr, error: Value) -> Result<(), VelaException> {
    settle(vm, target, PromiseState::Rejected(error))
}

fn settle(vm: &Vm, target: ObjPtr, next: PromiseState) -> Result<(), VelaException> {
    write_terminal(vm, target, next)?;
    vm.notify_settled();
    Ok(())
}

/// Write the terminal state without waking waiters. Callers that must
/// release a rooting reference before observers run use this, then notify.
pub(crate) fn write_terminal(
    vm: &Vm,
    target: ObjPtr,
    next: PromiseState,
) -> Result<(), VelaException> {
    let mut heap = vm.heap().lock();
    let obj = heap
        .get_mut(target)
        .ok_or_else(|| VelaException::invalid_reference("dead completion object"))?;
    let state = match &mut obj.body {
        ObjBody::Promise(state) => state,
        _ => {
            return Err(VelaException::new(
                ExceptionKind::InvalidOperation,
                "settle target is not a Promise/Job",
            ))
        }
    };
    if state.is_settled() {
        debug_assert!(false, "completion object settled twice");
        return Err(VelaException::new(
            ExceptionKind::InvalidOperation,
            "completion object is already settled",
        ));
    }
    *state = next;
    Ok(())
}

/// Read the outcome of a Promise/Job, `None` while still pending.
pub fn outcome(vm: &Vm, target: ObjPtr) -> Result<Option<PromiseOutcome>, VelaException> {
    let heap = vm.heap().lock();
    let obj = heap
        .get(target)
        .ok_or_else(|| VelaException::invalid_reference("dead completion object"))?;
    match &obj.body {
        ObjBody::Promise(PromiseState::Pending) => Ok(None),
        ObjBody::Promise(PromiseState::Fulfilled(v)) => Ok(Some(PromiseOutcome::Fulfilled(*v))),
        ObjBody::Promise(PromiseState::Rejected(e)) => Ok(Some(PromiseOutcome::Rejected(*e))),
        _ => Err(VelaException::new(
            ExceptionKind::InvalidOperation,
            "outcome target is not a Promise/Job",
        )),
    }
}

/// Block the calling OS thread until `target` settles. Host/test-side
/// observation only; worker coroutines never park here.
pub fn wait(vm: &Vm, target: ObjPtr) -> Result<PromiseOutcome, VelaException> {
    loop {
        let mut epoch = vm.settle_epoch.lock();
        if let Some(out) = outcome(vm, target)? {
            return Ok(out);
        }
        vm.settle_cv.wait(&mut epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::VmOptions;

    #[test]
    fn test_settle_exactly_once() {
        let vm = Vm::new(VmOptions::default());
        let p = create(&vm, ResultFlavor::Promise).unwrap();

        assert_eq!(outcome(&vm, p).unwrap(), None);
        resolve(&vm, p, Value::I32(7)).unwrap();
        assert_eq!(
            outcome(&vm, p).unwrap(),
            Some(PromiseOutcome::Fulfilled(Value::I32(7)))
        );

        // Second settlement must not overwrite
        let err = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            reject(&vm, p, Value::Ref(None))
        }));
        match err {
            // debug builds assert
            Err(_) => {}
            Ok(r) => {
                assert_eq!(r.unwrap_err().kind, ExceptionKind::InvalidOperation);
            }
        }
        assert_eq!(
            outcome(&vm, p).unwrap(),
            Some(PromiseOutcome::Fulfilled(Value::I32(7)))
        );
    }

    #[test]
    fn test_wait_returns_settled() {
        let vm = Vm::new(VmOptions::default());
        let p = create(&vm, ResultFlavor::Job).unwrap();
        resolve(&vm, p, Value::Bool(true)).unwrap();
        assert_eq!(
            wait(&vm, p).unwrap(),
            PromiseOutcome::Fulfilled(Value::Bool(true))
        );
    }
}

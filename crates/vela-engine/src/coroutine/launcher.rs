//! Coroutine launcher
//!
//! Binds a callable object to a fresh coroutine and enqueues it, returning
//! a Global reference to the pending Promise/Job. Allocation order is load
//! bearing: the completion object and event are created *before* argument
//! extraction, because the extracted values hold raw object addresses that
//! no GC-triggering operation may follow until the coroutine owns them.

use std::sync::Arc;

use crate::coroutine::coroutine::Coroutine;
use crate::coroutine::event::CompletionEvent;
use crate::coroutine::promise::{self, ResultFlavor};
use crate::error::{ExceptionKind, VelaException};
use crate::guard::ScopedManagedCode;
use crate::marshal::create_args_vector;
use vela_sdk::NapiRef;

/// Name of the designated entry method of a callable object.
pub const INVOKE_METHOD: &str = "invoke";

/// Where a launched coroutine may run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// Any pool worker
    Default,
    /// The launching worker's own queue, for synchronous-looking async
    /// call forms
    SameWorker,
}

/// Launch `callable` as a new coroutine with the given boxed-object
/// arguments. Returns a Global reference to the pending Promise/Job;
/// the caller owns (and must eventually delete) that reference.
pub fn launch(
    guard: &mut ScopedManagedCode<'_>,
    callable: Option<NapiRef>,
    args: &[Option<NapiRef>],
    mode: LaunchMode,
    flavor: ResultFlavor,
) -> Result<NapiRef, VelaException> {
    let target = guard
        .to_internal(callable)?
        .ok_or_else(|| VelaException::null_pointer("null callable in coroutine launch"))?;
    if guard.env().switching_disabled() {
        return Err(VelaException::new(
            ExceptionKind::InvalidOperation,
            "coroutine switching is disabled in this context",
        ));
    }

    let vm = guard.env().vm().clone();
    let worker_hint = match mode {
        LaunchMode::Default => None,
        // A launch from outside the pool pins to worker 0
        LaunchMode::SameWorker => Some(guard.env().worker.unwrap_or(0)),
    };

    // Resolve the callable's entry method against its dynamic class
    let callable_class = {
        let heap = vm.heap().lock();
        heap.get(target)
            .ok_or_else(|| VelaException::invalid_reference("dead callable object"))?
            .class
    };
    let method = vm
        .classes()
        .read()
        .find_method(callable_class, INVOKE_METHOD, None, false)
        .ok_or_else(|| {
            VelaException::new(
                ExceptionKind::Verification,
                "callable has no invoke method",
            )
        })?;
    if method.is_abstract || !method.verified {
        return Err(VelaException::new(
            ExceptionKind::Verification,
            format!("invoke method of callable is {}", if method.is_abstract {
                "abstract"
            } else {
                "unverified"
            }),
        ));
    }

    // Completion object, caller's reference, and event are all allocated
    // before argument extraction per the GC-ordering rule
    let target_promise = promise::create(&vm, flavor)?;
    let caller_ref = vm.globals().new_ref(target_promise, false)?;
    let event = match CompletionEvent::new(vm.clone(), target_promise) {
        Ok(e) => e,
        Err(e) => {
            let _ = vm.globals().remove(caller_ref);
            return Err(e);
        }
    };

    // Argument extraction: raw addresses from here to enqueue
    let values = {
        let mut arg_ptrs = Vec::with_capacity(args.len());
        for a in args {
            arg_ptrs.push(guard.to_internal(*a)?);
        }
        let heap = vm.heap().lock();
        create_args_vector(&heap, &method.shorty, Some(target), &arg_ptrs)
    };
    let values = match values {
        Ok(v) => v,
        Err(e) => {
            event.destroy();
            let _ = vm.globals().remove(caller_ref);
            return Err(e);
        }
    };

    let scheduler = vm.scheduler();
    let coroutine = Arc::new(Coroutine::new(
        scheduler.next_id(),
        method,
        values,
        mode,
        event,
    ));
    if let Err(e) = scheduler.schedule(coroutine.clone(), worker_hint) {
        // Never handed over: the launcher is the only owner left, so the
        // event must be destroyed inline
        if let Some(event) = coroutine.take_event() {
            event.destroy();
        }
        let _ = vm.globals().remove(caller_ref);
        return Err(e);
    }
    Ok(caller_ref)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::class::MethodBody;
    use crate::env::NapiEnv;
    use crate::object::ObjBody;
    use crate::shorty::Shorty;
    use crate::value::Value;
    use crate::vm::{Vm, VmOptions};

    fn idle_callable(vm: &Arc<Vm>) -> crate::object::ObjPtr {
        let class = vm
            .define_class("demo/Idle", Some(vm.core().object), Vec::new())
            .unwrap();
        let shorty = Shorty::parse(":V").unwrap();
        vm.classes().write().add_method(
            class,
            INVOKE_METHOD,
            shorty,
            false,
            false,
            true,
            MethodBody::Managed(Arc::new(|_, _| Ok(Value::Ref(None)))),
        );
        vm.heap()
            .lock()
            .alloc(class, ObjBody::Instance { fields: vec![] })
            .unwrap()
    }

    #[test]
    fn test_null_callable_reported_before_switching_state() {
        let vm = Vm::new(VmOptions::default());
        let mut env = NapiEnv::new(vm);
        env.disable_switching();
        let mut guard = ScopedManagedCode::new(&mut env);
        let err = launch(&mut guard, None, &[], LaunchMode::Default, ResultFlavor::Job)
            .unwrap_err();
        assert_eq!(err.kind, ExceptionKind::NullPointer);
    }

    #[test]
    fn test_switching_disabled_blocks_launch() {
        let vm = Vm::new(VmOptions::default());
        let ptr = idle_callable(&vm);
        let mut env = NapiEnv::new(vm.clone());
        let callable = env.locals_mut().new_ref(ptr).unwrap();
        env.disable_switching();
        let mut guard = ScopedManagedCode::new(&mut env);
        let err = launch(
            &mut guard,
            Some(callable),
            &[],
            LaunchMode::Default,
            ResultFlavor::Job,
        )
        .unwrap_err();
        assert_eq!(err.kind, ExceptionKind::InvalidOperation);
        assert_eq!(vm.globals().live_count(), 0);
        assert_eq!(vm.scheduler().pending_count(), 0);
    }
}

//! Integration tests for coroutine launch end to end: callable resolution,
//! completion objects, worker execution, and the launch failure paths.

use std::sync::Arc;

use vela_engine::coroutine::promise;
use vela_engine::{
    ClassId, LaunchMode, MethodBody, NapiEnv, NapiRef, PromiseOutcome, ResultFlavor,
    ScopedManagedCode, ExceptionKind, ObjBody, Shorty, TypeTag, Value, VelaException, Vm,
    VmOptions,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Define a callable class whose `invoke` method runs `body`.
fn define_callable(
    vm: &Arc<Vm>,
    name: &str,
    signature: &str,
    body: MethodBody,
) -> ClassId {
    let class = vm.define_class(name, Some(vm.core().object), Vec::new()).unwrap();
    let shorty = Shorty::parse(signature).unwrap();
    vm.classes()
        .write()
        .add_method(class, "invoke", shorty, false, false, true, body);
    class
}

fn new_instance(env: &mut NapiEnv, class: &str) -> NapiRef {
    let mirror = env.find_class(class).unwrap();
    env.new_object(mirror).unwrap()
}

fn local_ref_to(env: &mut NapiEnv, ptr: vela_engine::ObjPtr) -> NapiRef {
    let mut guard = ScopedManagedCode::new(env);
    guard.add_local_ref(ptr).unwrap()
}

fn target_of(env: &mut NapiEnv, r: NapiRef) -> vela_engine::ObjPtr {
    let guard = ScopedManagedCode::new(env);
    guard.to_internal(Some(r)).unwrap().unwrap()
}

#[test]
fn test_launch_fulfills_with_method_return() {
    init_logging();
    let vm = Vm::new(VmOptions::default());
    define_callable(
        &vm,
        "demo/AddOneIfTrue",
        "IZ:J",
        MethodBody::Managed(Arc::new(|_, args| {
            // args[0] is the callable itself
            let base = i64::from(args[1].as_i32().unwrap());
            Ok(Value::I64(if args[2].as_bool().unwrap() {
                base + 1
            } else {
                base
            }))
        })),
    );

    let mut env = NapiEnv::new(vm.clone());
    let callable = new_instance(&mut env, "demo/AddOneIfTrue");
    let a = {
        let ptr = vm.alloc_boxed(Value::I32(41), TypeTag::I32).unwrap();
        local_ref_to(&mut env, ptr)
    };
    let b = {
        let ptr = vm.alloc_boxed(Value::Bool(true), TypeTag::Bool).unwrap();
        local_ref_to(&mut env, ptr)
    };

    let job = env
        .launch(
            Some(callable),
            &[Some(a), Some(b)],
            LaunchMode::Default,
            ResultFlavor::Job,
        )
        .unwrap();

    let target = target_of(&mut env, job);
    assert_eq!(
        promise::wait(&vm, target).unwrap(),
        PromiseOutcome::Fulfilled(Value::I64(42))
    );

    // The event's reference is gone; only the caller's remains
    assert_eq!(vm.globals().live_count(), 1);
    env.delete_global_ref(job).unwrap();
    assert_eq!(vm.globals().live_count(), 0);
}

#[test]
fn test_launch_null_callable_yields_no_job() {
    init_logging();
    let vm = Vm::new(VmOptions::default());
    let mut env = NapiEnv::new(vm.clone());

    let err = env
        .launch(None, &[], LaunchMode::Default, ResultFlavor::Job)
        .unwrap_err();
    assert_eq!(err.kind, ExceptionKind::NullPointer);

    // Pending exception on the context, no completion object anywhere
    assert!(env.error_check());
    assert_eq!(vm.globals().live_count(), 0);
    assert_eq!(vm.scheduler().pending_count(), 0);
}

#[test]
fn test_launch_capacity_failure_has_no_leak() {
    init_logging();
    let vm = Vm::new(VmOptions {
        max_pending_coroutines: 0,
        ..VmOptions::default()
    });
    define_callable(
        &vm,
        "demo/NeverRuns",
        ":V",
        MethodBody::Managed(Arc::new(|_, _| Ok(Value::Ref(None)))),
    );

    let mut env = NapiEnv::new(vm.clone());
    let callable = new_instance(&mut env, "demo/NeverRuns");

    let before = vm.heap().lock().live_count();
    let err = env
        .launch(Some(callable), &[], LaunchMode::Default, ResultFlavor::Promise)
        .unwrap_err();
    assert_eq!(err.kind, ExceptionKind::OutOfMemory);
    assert!(env.error_check());

    // CompletionEvent and caller reference both released inline
    assert_eq!(vm.globals().live_count(), 0);
    // The orphaned pending promise is unrooted and collectable
    vm.collect(env.locals().roots().collect::<Vec<_>>());
    assert_eq!(vm.heap().lock().live_count(), before);
}

#[test]
fn test_launch_unboxable_argument_fails_before_enqueue() {
    init_logging();
    let vm = Vm::new(VmOptions::default());
    define_callable(
        &vm,
        "demo/WantsInt",
        "I:V",
        MethodBody::Managed(Arc::new(|_, _| Ok(Value::Ref(None)))),
    );

    let mut env = NapiEnv::new(vm.clone());
    let callable = new_instance(&mut env, "demo/WantsInt");

    // Null where a primitive is declared
    let err = env
        .launch(Some(callable), &[None], LaunchMode::Default, ResultFlavor::Job)
        .unwrap_err();
    assert_eq!(err.kind, ExceptionKind::NullPointer);
    assert_eq!(vm.globals().live_count(), 0);
    assert_eq!(vm.scheduler().pending_count(), 0);
}

#[test]
fn test_launch_callable_without_invoke_is_verification() {
    init_logging();
    let vm = Vm::new(VmOptions::default());
    vm.define_class("demo/NotCallable", Some(vm.core().object), Vec::new())
        .unwrap();

    let mut env = NapiEnv::new(vm.clone());
    let callable = new_instance(&mut env, "demo/NotCallable");
    let err = env
        .launch(Some(callable), &[], LaunchMode::Default, ResultFlavor::Promise)
        .unwrap_err();
    assert_eq!(err.kind, ExceptionKind::Verification);
}

#[test]
fn test_launch_rejects_with_error_string_on_body_failure() {
    init_logging();
    let vm = Vm::new(VmOptions::default());
    define_callable(
        &vm,
        "demo/Failing",
        ":V",
        MethodBody::Managed(Arc::new(|_, _| {
            Err(VelaException::null_pointer("it was null all along"))
        })),
    );

    let mut env = NapiEnv::new(vm.clone());
    let callable = new_instance(&mut env, "demo/Failing");
    let promise_ref = env
        .launch(Some(callable), &[], LaunchMode::Default, ResultFlavor::Promise)
        .unwrap();

    let target = target_of(&mut env, promise_ref);
    let outcome = promise::wait(&vm, target).unwrap();
    let PromiseOutcome::Rejected(Value::Ref(Some(err_ptr))) = outcome else {
        panic!("expected a rejected promise with an error object, got {outcome:?}");
    };
    let heap = vm.heap().lock();
    match &heap.get(err_ptr).unwrap().body {
        ObjBody::Str(s) => assert!(s.contains("NullPointerError")),
        other => panic!("unexpected error body: {other:?}"),
    }
    drop(heap);
    env.delete_global_ref(promise_ref).unwrap();
}

#[test]
fn test_launch_same_worker_pins_to_worker_zero() {
    // From outside the pool, SameWorker pins to worker 0
    init_logging();
    let vm = Vm::new(VmOptions {
        workers: 4,
        ..VmOptions::default()
    });
    define_callable(
        &vm,
        "demo/WhereAmI",
        ":I",
        MethodBody::Managed(Arc::new(|_, _| {
            let worker: i32 = std::thread::current()
                .name()
                .and_then(|n| n.strip_prefix("vela-worker-"))
                .and_then(|n| n.parse().ok())
                .unwrap_or(-1);
            Ok(Value::I32(worker))
        })),
    );

    let mut env = NapiEnv::new(vm.clone());
    let callable = new_instance(&mut env, "demo/WhereAmI");
    let job = env
        .launch(Some(callable), &[], LaunchMode::SameWorker, ResultFlavor::Job)
        .unwrap();

    let target = target_of(&mut env, job);
    assert_eq!(
        promise::wait(&vm, target).unwrap(),
        PromiseOutcome::Fulfilled(Value::I32(0))
    );
    env.delete_global_ref(job).unwrap();
}

#[test]
fn test_pending_launch_arguments_survive_collection() {
    // A single worker parked behind a gated coroutine keeps the second
    // launch queued long enough to collect while it is pending
    init_logging();
    let vm = Vm::new(VmOptions {
        workers: 1,
        ..VmOptions::default()
    });

    let gate = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let gate_in_body = gate.clone();
    define_callable(
        &vm,
        "demo/Blocker",
        ":V",
        MethodBody::Managed(Arc::new(move |_, _| {
            while !gate_in_body.load(std::sync::atomic::Ordering::Acquire) {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            Ok(Value::Ref(None))
        })),
    );
    define_callable(
        &vm,
        "demo/EchoString",
        "Lstd/core/String;:Lstd/core/String;",
        MethodBody::Managed(Arc::new(|_, args| Ok(args[1]))),
    );

    let mut env = NapiEnv::new(vm.clone());
    let blocker = new_instance(&mut env, "demo/Blocker");
    let echo = new_instance(&mut env, "demo/EchoString");

    let first = env
        .launch(Some(blocker), &[], LaunchMode::Default, ResultFlavor::Job)
        .unwrap();

    // While the single worker is blocked, enqueue a second coroutine whose
    // argument is otherwise unrooted
    let arg_ptr = vm.alloc_string("queued argument").unwrap();
    let arg = local_ref_to(&mut env, arg_ptr);
    let second = env
        .launch(
            Some(echo),
            &[Some(arg)],
            LaunchMode::Default,
            ResultFlavor::Job,
        )
        .unwrap();

    // Collect without the context's frames as roots: the pending-coroutine
    // registry alone must keep the queued argument alive
    vm.collect([]);
    assert!(vm.heap().lock().is_valid(arg_ptr));

    gate.store(true, std::sync::atomic::Ordering::Release);

    let target = target_of(&mut env, second);
    let outcome = promise::wait(&vm, target).unwrap();
    match outcome {
        PromiseOutcome::Fulfilled(Value::Ref(Some(p))) => {
            let heap = vm.heap().lock();
            match &heap.get(p).unwrap().body {
                ObjBody::Str(s) => assert_eq!(s, "queued argument"),
                other => panic!("unexpected body: {other:?}"),
            }
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let first_target = target_of(&mut env, first);
    promise::wait(&vm, first_target).unwrap();
    env.delete_global_ref(first).unwrap();
    env.delete_global_ref(second).unwrap();
}

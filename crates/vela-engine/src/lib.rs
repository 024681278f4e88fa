//! Vela VM native interop and coroutine-launch runtime
//!
//! This crate is the boundary layer between native ("foreign") code and the
//! managed Vela runtime:
//!
//! - GC-safe reference storage (frame-scoped locals, shared global/weak tables)
//! - Scoped managed-code transition guards with deferred exception raising
//! - Argument marshalling between ABI slots / NAPI value unions and typed
//!   invocation values, directed by compact method shorties
//! - Method invocation with virtual resolution and verification checks
//! - Coroutine launch with Promise/Job completion events over a fixed
//!   worker pool
//!
//! The object model, collector, and interpreter are external collaborators;
//! this crate carries minimal stand-ins that honor exactly the contracts the
//! interop layer requires (stable object identity under live handles, weak
//! clearing, pinning for raw buffer access, host-closure method bodies).

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod coroutine;
pub mod env;
pub mod error;
pub mod guard;
pub mod invoke;
pub mod marshal;
pub mod napi;
pub mod object;
pub mod refs;
pub mod shorty;
pub mod trampoline;
pub mod value;
pub mod vm;

// Re-export SDK types (canonical definitions live in vela-sdk)
pub use vela_sdk::{
    ArgReader, ArgWriter, NapiRef, NapiStatus, NapiValue, NativeFlags, RefKind, SlotBuffer,
    CRITICAL_PREFIX, FAST_PREFIX, NAPI_VERSION_1_0,
};

pub use class::{Class, ClassId, ClassRegistry, Method, MethodBody, MethodId, NativeImpl};
pub use coroutine::{CompletionEvent, CoroScheduler, LaunchMode, PromiseOutcome, ResultFlavor};
pub use env::{ExecState, NapiEnv};
pub use error::{ExceptionKind, VelaException};
pub use guard::{FastNativeScope, ScopedManagedCode};
pub use invoke::InvokeResult;
pub use napi::PinnedArray;
pub use object::{ArrayData, Heap, HeapObject, ObjBody, ObjPtr, PromiseState};
pub use refs::{GlobalRefTable, LocalFrames};
pub use shorty::{Shorty, ShortyError, TypeTag};
pub use trampoline::native_entry;
pub use value::Value;
pub use vm::{CoreClasses, Vm, VmOptions};

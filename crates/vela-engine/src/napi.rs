//! The native interface surface
//!
//! Boundary operations native code calls against a [`NapiEnv`]. Every
//! operation runs under a [`ScopedManagedCode`] guard; failures are both
//! returned to the caller and deferred onto the guard, so the managed side
//! observes them as a pending exception. Apart from the error channel and
//! state queries, no operation runs while an exception is already pending.

use std::sync::Arc;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::class::{ClassId, MethodId, NativeImpl};
use crate::coroutine::{self, promise, LaunchMode, ResultFlavor};
use crate::env::NapiEnv;
use crate::error::{ExceptionKind, VelaException};
use crate::guard::ScopedManagedCode;
use crate::invoke::{invoke, InvokeResult};
use crate::marshal::get_arg_values;
use crate::object::{ArrayData, ObjBody, ObjPtr, PromiseState};
use crate::shorty::{Shorty, TypeTag};
use crate::value::Value;
use crate::vm::Vm;
use vela_sdk::{NapiRef, NapiValue, NativeFlags, NAPI_VERSION_1_0};

impl NapiEnv {
    /// Interface version implemented by this engine.
    pub fn get_version(&self) -> i32 {
        NAPI_VERSION_1_0
    }

    fn guarded<T>(
        &mut self,
        op: impl FnOnce(&mut ScopedManagedCode<'_>) -> Result<T, VelaException>,
    ) -> Result<T, VelaException> {
        if let Some(pending) = self.pending_exception() {
            return Err(pending.clone());
        }
        let mut guard = ScopedManagedCode::new(self);
        match op(&mut guard) {
            Ok(v) => Ok(v),
            Err(e) => {
                guard.defer_exception(e.clone());
                Err(e)
            }
        }
    }

    // ---- classes and methods ----

    /// Resolve a class by descriptor; returns a Local reference to its
    /// class object.
    pub fn find_class(&mut self, name: &str) -> Result<NapiRef, VelaException> {
        self.guarded(|guard| {
            let vm = guard.env().vm().clone();
            let mirror = {
                let classes = vm.classes().read();
                let class = classes.find_class(name).ok_or_else(|| {
                    VelaException::new(
                        ExceptionKind::Verification,
                        format!("class {name} not found"),
                    )
                })?;
                class.mirror.ok_or_else(|| {
                    VelaException::new(
                        ExceptionKind::Verification,
                        format!("class {name} has no class object"),
                    )
                })?
            };
            guard.add_local_ref(mirror)
        })
    }

    /// Resolve a primitive type's class object by its full type name.
    pub fn get_primitive_class(&mut self, name: &str) -> Result<NapiRef, VelaException> {
        static DESCRIPTORS: Lazy<FxHashMap<&'static str, &'static str>> = Lazy::new(|| {
            FxHashMap::from_iter([
                ("boolean", "std/core/Boolean"),
                ("byte", "std/core/Byte"),
                ("short", "std/core/Short"),
                ("char", "std/core/Char"),
                ("int", "std/core/Int"),
                ("long", "std/core/Long"),
                ("float", "std/core/Float"),
                ("double", "std/core/Double"),
            ])
        });
        match DESCRIPTORS.get(name) {
            Some(descriptor) => self.find_class(descriptor),
            None => self.guarded(|_| {
                Err(VelaException::new(
                    ExceptionKind::Verification,
                    format!("unknown primitive type {name}"),
                ))
            }),
        }
    }

    /// Look up a static method by name and `params:return` signature.
    pub fn get_static_method(
        &mut self,
        class: NapiRef,
        name: &str,
        signature: &str,
    ) -> Result<MethodId, VelaException> {
        self.guarded(|guard| lookup_method(guard, class, name, signature, true))
    }

    /// Look up an instance method by name and `params:return` signature.
    pub fn get_instance_method(
        &mut self,
        class: NapiRef,
        name: &str,
        signature: &str,
    ) -> Result<MethodId, VelaException> {
        self.guarded(|guard| lookup_method(guard, class, name, signature, false))
    }

    /// Register a native implementation on a class. The signature may carry
    /// a `#F$` or `#C$` convention prefix.
    pub fn register_native(
        &mut self,
        class: NapiRef,
        name: &str,
        signature: &str,
        is_static: bool,
        imp: NativeImpl,
    ) -> Result<MethodId, VelaException> {
        self.guarded(|guard| {
            let (flags, bare) = NativeFlags::strip_prefix(signature);
            let shorty = Shorty::parse(bare).map_err(|e| {
                VelaException::new(ExceptionKind::Verification, e.to_string())
            })?;
            match (&imp, flags.critical) {
                (NativeImpl::Critical(_), true) | (NativeImpl::Standard(_), false) => {}
                _ => {
                    return Err(VelaException::new(
                        ExceptionKind::Verification,
                        format!("implementation of {name} does not match its convention prefix"),
                    ))
                }
            }
            let class = expect_class(guard, class)?;
            let vm = guard.env().vm().clone();
            let id = vm.classes().write().add_method(
                class,
                name,
                shorty,
                is_static,
                false,
                true,
                crate::class::MethodBody::Native { flags, imp },
            );
            Ok(id)
        })
    }

    // ---- calls ----

    /// General call path: resolve (virtually for instance methods), marshal,
    /// invoke.
    pub fn call_method(
        &mut self,
        receiver: Option<NapiRef>,
        method: MethodId,
        args: &[NapiValue],
    ) -> Result<InvokeResult, VelaException> {
        self.guarded(|guard| call_in(guard, receiver, method, args))
    }

    /// Call a static method returning `int`.
    pub fn call_static_int_method(
        &mut self,
        method: MethodId,
        args: &[NapiValue],
    ) -> Result<i32, VelaException> {
        match self.call_method(None, method, args)? {
            InvokeResult::Prim(Value::I32(v)) => Ok(v),
            other => Err(self.raise_wrapper_mismatch("int", &other)),
        }
    }

    /// Call an instance method returning a reference.
    pub fn call_object_method(
        &mut self,
        receiver: NapiRef,
        method: MethodId,
        args: &[NapiValue],
    ) -> Result<Option<NapiRef>, VelaException> {
        match self.call_method(Some(receiver), method, args)? {
            InvokeResult::Ref(r) => Ok(r),
            other => Err(self.raise_wrapper_mismatch("object", &other)),
        }
    }

    /// Call an instance method returning `void`.
    pub fn call_void_method(
        &mut self,
        receiver: NapiRef,
        method: MethodId,
        args: &[NapiValue],
    ) -> Result<(), VelaException> {
        match self.call_method(Some(receiver), method, args)? {
            InvokeResult::Void => Ok(()),
            other => Err(self.raise_wrapper_mismatch("void", &other)),
        }
    }

    fn raise_wrapper_mismatch(&mut self, expected: &str, got: &InvokeResult) -> VelaException {
        let exc = VelaException::new(
            ExceptionKind::Verification,
            format!("typed call wrapper expected {expected}, method produced {got:?}"),
        );
        self.raise(exc.clone());
        exc
    }

    // ---- object, string, array constructors ----

    /// Allocate an instance of `class` with default-initialized fields.
    pub fn new_object(&mut self, class: NapiRef) -> Result<NapiRef, VelaException> {
        self.guarded(|guard| {
            let class = expect_class(guard, class)?;
            let vm = guard.env().vm().clone();
            let fields = vec![Value::Ref(None); vm.classes().read().field_count(class)];
            let ptr = vm
                .heap()
                .lock()
                .alloc(class, ObjBody::Instance { fields })
                .ok_or_else(|| VelaException::out_of_memory("could not allocate an object"))?;
            guard.add_local_ref(ptr)
        })
    }

    /// Allocate a managed string.
    pub fn new_string(&mut self, s: &str) -> Result<NapiRef, VelaException> {
        self.guarded(|guard| {
            let ptr = guard.env().vm().alloc_string(s)?;
            guard.add_local_ref(ptr)
        })
    }

    /// Allocate a primitive array of `len` zeroed elements.
    pub fn new_array(&mut self, tag: TypeTag, len: usize) -> Result<NapiRef, VelaException> {
        self.guarded(|guard| {
            let data = match tag {
                TypeTag::Bool => ArrayData::Bool(vec![false; len]),
                TypeTag::I8 | TypeTag::U8 => ArrayData::I8(vec![0; len]),
                TypeTag::I16 => ArrayData::I16(vec![0; len]),
                TypeTag::U16 => ArrayData::U16(vec![0; len]),
                TypeTag::I32 | TypeTag::U32 => ArrayData::I32(vec![0; len]),
                TypeTag::I64 | TypeTag::U64 => ArrayData::I64(vec![0; len]),
                TypeTag::F32 => ArrayData::F32(vec![0.0; len]),
                TypeTag::F64 => ArrayData::F64(vec![0.0; len]),
                TypeTag::Void | TypeTag::Ref => {
                    return Err(VelaException::new(
                        ExceptionKind::InvalidOperation,
                        "primitive array constructor needs a primitive element type",
                    ))
                }
            };
            alloc_array(guard, data)
        })
    }

    /// Allocate a reference array of `len` nulls with the given element
    /// class.
    pub fn new_ref_array(
        &mut self,
        elem_class: NapiRef,
        len: usize,
    ) -> Result<NapiRef, VelaException> {
        self.guarded(|guard| {
            let elem_class = expect_class(guard, elem_class)?;
            alloc_array(
                guard,
                ArrayData::Ref {
                    elem_class,
                    items: vec![None; len],
                },
            )
        })
    }

    /// Element count of an array.
    pub fn array_length(&mut self, array: NapiRef) -> Result<usize, VelaException> {
        self.guarded(|guard| with_array(guard, array, |data| Ok(data.len())))
    }

    // ---- region copies ----

    /// Copy UTF-16 units `[start, start + buf.len())` of a string into
    /// `buf`.
    pub fn get_string_region(
        &mut self,
        string: NapiRef,
        start: usize,
        buf: &mut [u16],
    ) -> Result<(), VelaException> {
        self.guarded(|guard| {
            let ptr = deref(guard, string)?;
            let vm = guard.env().vm().clone();
            let heap = vm.heap().lock();
            let obj = heap
                .get(ptr)
                .ok_or_else(|| VelaException::invalid_reference("dead string object"))?;
            let s = match &obj.body {
                ObjBody::Str(s) => s,
                _ => {
                    return Err(VelaException::new(
                        ExceptionKind::InvalidOperation,
                        "region source is not a string",
                    ))
                }
            };
            let units: Vec<u16> = s.encode_utf16().collect();
            let end = start.checked_add(buf.len()).filter(|e| *e <= units.len());
            let end = end.ok_or_else(|| {
                VelaException::new(
                    ExceptionKind::StringIndexOutOfBounds,
                    format!(
                        "region [{start}, {}) outside string of length {}",
                        start + buf.len(),
                        units.len()
                    ),
                )
            })?;
            buf.copy_from_slice(&units[start..end]);
            Ok(())
        })
    }

    /// Copy `int[]` elements `[start, start + buf.len())` into `buf`.
    pub fn get_int_array_region(
        &mut self,
        array: NapiRef,
        start: usize,
        buf: &mut [i32],
    ) -> Result<(), VelaException> {
        self.guarded(|guard| {
            with_array(guard, array, |data| {
                let src = match data {
                    ArrayData::I32(v) => v,
                    _ => return Err(not_an_int_array()),
                };
                let range = check_bounds(start, buf.len(), src.len())?;
                buf.copy_from_slice(&src[range]);
                Ok(())
            })
        })
    }

    /// Copy `buf` into `int[]` elements `[start, start + buf.len())`.
    pub fn set_int_array_region(
        &mut self,
        array: NapiRef,
        start: usize,
        buf: &[i32],
    ) -> Result<(), VelaException> {
        self.guarded(|guard| {
            with_array_mut(guard, array, |data| {
                let dst = match data {
                    ArrayData::I32(v) => v,
                    _ => return Err(not_an_int_array()),
                };
                let range = check_bounds(start, buf.len(), dst.len())?;
                dst[range].copy_from_slice(buf);
                Ok(())
            })
        })
    }

    /// Copy `double[]` elements `[start, start + buf.len())` into `buf`.
    pub fn get_double_array_region(
        &mut self,
        array: NapiRef,
        start: usize,
        buf: &mut [f64],
    ) -> Result<(), VelaException> {
        self.guarded(|guard| {
            with_array(guard, array, |data| {
                let src = match data {
                    ArrayData::F64(v) => v,
                    _ => {
                        return Err(VelaException::new(
                            ExceptionKind::InvalidOperation,
                            "region target is not a double array",
                        ))
                    }
                };
                let range = check_bounds(start, buf.len(), src.len())?;
                buf.copy_from_slice(&src[range]);
                Ok(())
            })
        })
    }

    /// Read one element of a reference array as a Local reference.
    pub fn get_ref_array_element(
        &mut self,
        array: NapiRef,
        index: usize,
    ) -> Result<Option<NapiRef>, VelaException> {
        self.guarded(|guard| {
            let item = with_array(guard, array, |data| {
                let items = match data {
                    ArrayData::Ref { items, .. } => items,
                    _ => return Err(not_a_ref_array()),
                };
                check_bounds(index, 1, items.len())?;
                Ok(items[index])
            })?;
            match item {
                None => Ok(None),
                Some(ptr) => Ok(Some(guard.add_local_ref(ptr)?)),
            }
        })
    }

    /// Store into a reference array, checking the element class.
    pub fn set_ref_array_element(
        &mut self,
        array: NapiRef,
        index: usize,
        value: Option<NapiRef>,
    ) -> Result<(), VelaException> {
        self.guarded(|guard| {
            let value = guard.to_internal(value)?;
            let vm = guard.env().vm().clone();

            // Class check before the store, outside the heap borrow
            if let Some(ptr) = value {
                let elem_class = with_array(guard, array, |data| match data {
                    ArrayData::Ref { elem_class, .. } => Ok(*elem_class),
                    _ => Err(not_a_ref_array()),
                })?;
                let stored_class = vm
                    .heap()
                    .lock()
                    .get(ptr)
                    .ok_or_else(|| VelaException::invalid_reference("dead element object"))?
                    .class;
                if !is_subclass(&vm, stored_class, elem_class) {
                    return Err(VelaException::new(
                        ExceptionKind::ArrayStore,
                        "element class does not match the array's element type",
                    ));
                }
            }

            with_array_mut(guard, array, |data| {
                let items = match data {
                    ArrayData::Ref { items, .. } => items,
                    _ => return Err(not_a_ref_array()),
                };
                check_bounds(index, 1, items.len())?;
                items[index] = value;
                Ok(())
            })
        })
    }

    // ---- pinning ----

    /// Pin an array's backing storage for raw access. The pin is released
    /// when the returned guard drops.
    pub fn pin_array(&mut self, array: NapiRef) -> Result<PinnedArray, VelaException> {
        self.guarded(|guard| {
            let ptr = deref(guard, array)?;
            let vm = guard.env().vm().clone();
            let mut heap = vm.heap().lock();
            match heap.get(ptr).map(|o| &o.body) {
                Some(ObjBody::Array(_)) => {}
                Some(_) => {
                    return Err(VelaException::new(
                        ExceptionKind::InvalidOperation,
                        "pin target is not an array",
                    ))
                }
                None => return Err(VelaException::invalid_reference("dead array object")),
            }
            heap.pin(ptr);
            drop(heap);
            Ok(PinnedArray { vm, ptr })
        })
    }

    // ---- references and frames ----

    /// True when `a` and `b` name the same object (or are both null).
    pub fn is_same_object(
        &mut self,
        a: Option<NapiRef>,
        b: Option<NapiRef>,
    ) -> Result<bool, VelaException> {
        self.guarded(|guard| Ok(guard.to_internal(a)? == guard.to_internal(b)?))
    }

    /// Mint a new Local reference to the object `r` names.
    pub fn new_local_ref(&mut self, r: NapiRef) -> Result<NapiRef, VelaException> {
        self.guarded(|guard| {
            let ptr = deref(guard, r)?;
            guard.add_local_ref(ptr)
        })
    }

    /// Mint a Global reference to the object `r` names.
    pub fn new_global_ref(&mut self, r: NapiRef) -> Result<NapiRef, VelaException> {
        self.guarded(|guard| {
            let ptr = deref(guard, r)?;
            guard.add_global_ref(ptr)
        })
    }

    /// Mint a Weak reference to the object `r` names.
    pub fn new_weak_ref(&mut self, r: NapiRef) -> Result<NapiRef, VelaException> {
        self.guarded(|guard| {
            let ptr = deref(guard, r)?;
            guard.add_weak_ref(ptr)
        })
    }

    /// Release a Global or Weak reference.
    pub fn delete_global_ref(&mut self, r: NapiRef) -> Result<(), VelaException> {
        self.guarded(|guard| guard.del_global_ref(r))
    }

    /// Open a nested Local frame of at least `capacity` slots.
    pub fn push_local_frame(&mut self, capacity: usize) -> Result<(), VelaException> {
        self.guarded(|guard| guard.env_mut().locals_mut().push_frame(capacity))
    }

    /// Close the current Local frame, optionally promoting `result` into
    /// the parent frame.
    pub fn pop_local_frame(
        &mut self,
        result: Option<NapiRef>,
    ) -> Result<Option<NapiRef>, VelaException> {
        self.guarded(|guard| guard.env_mut().locals_mut().pop_frame(result))
    }

    /// Grow the current Local frame to hold at least `n` references.
    pub fn ensure_local_capacity(&mut self, n: usize) -> Result<(), VelaException> {
        self.guarded(|guard| guard.env_mut().locals_mut().ensure_capacity(n))
    }

    // ---- error channel ----

    /// True when an exception is pending on this context.
    pub fn error_check(&self) -> bool {
        self.has_pending_exception()
    }

    /// The pending exception, if any.
    pub fn error_occurred(&self) -> Option<VelaException> {
        self.pending_exception().cloned()
    }

    /// Clear the pending exception.
    pub fn error_clear(&mut self) {
        self.clear_pending_exception();
    }

    /// Raise an exception on this context.
    pub fn throw(&mut self, exc: VelaException) {
        self.raise(exc);
    }

    /// Raise a new exception of `kind` with `message`.
    pub fn throw_new(&mut self, kind: ExceptionKind, message: impl Into<String>) {
        self.raise(VelaException::new(kind, message));
    }

    // ---- promise/deferred ----

    /// Create a pending Promise. Returns `(deferred, promise)`: the deferred
    /// is a Global reference consumed by exactly one resolve/reject; the
    /// promise is a Local reference for the caller to hand out.
    pub fn promise_create(&mut self) -> Result<(NapiRef, NapiRef), VelaException> {
        self.guarded(|guard| {
            let vm = guard.env().vm().clone();
            let target = promise::create(&vm, ResultFlavor::Promise)?;
            let deferred = guard.add_global_ref(target)?;
            let local = match guard.add_local_ref(target) {
                Ok(r) => r,
                Err(e) => {
                    let _ = guard.del_global_ref(deferred);
                    return Err(e);
                }
            };
            Ok((deferred, local))
        })
    }

    /// Fulfill the promise behind `deferred`, consuming it. The deferred's
    /// Global reference is held across the settlement so the target stays
    /// rooted until its terminal state is written; only then is it removed.
    pub fn deferred_resolve(
        &mut self,
        deferred: NapiRef,
        value: NapiValue,
    ) -> Result<(), VelaException> {
        self.guarded(|guard| {
            let value = value_in(guard, value)?;
            let vm = guard.env().vm().clone();
            settle_deferred(&vm, deferred, PromiseState::Fulfilled(value))
        })
    }

    /// Reject the promise behind `deferred`, consuming it.
    pub fn deferred_reject(
        &mut self,
        deferred: NapiRef,
        error: NapiValue,
    ) -> Result<(), VelaException> {
        self.guarded(|guard| {
            let error = value_in(guard, error)?;
            let vm = guard.env().vm().clone();
            settle_deferred(&vm, deferred, PromiseState::Rejected(error))
        })
    }

    // ---- coroutine launch ----

    /// Launch `callable` as a coroutine. Returns the caller's Global
    /// reference to the pending Promise/Job.
    pub fn launch(
        &mut self,
        callable: Option<NapiRef>,
        args: &[Option<NapiRef>],
        mode: LaunchMode,
        flavor: ResultFlavor,
    ) -> Result<NapiRef, VelaException> {
        self.guarded(|guard| coroutine::launch(guard, callable, args, mode, flavor))
    }
}

/// Scoped pin over an array's backing storage.
pub struct PinnedArray {
    vm: Arc<Vm>,
    ptr: ObjPtr,
}

impl PinnedArray {
    /// Read the pinned array's data.
    pub fn with_data<R>(&self, f: impl FnOnce(&ArrayData) -> R) -> Result<R, VelaException> {
        let heap = self.vm.heap().lock();
        let obj = heap
            .get(self.ptr)
            .ok_or_else(|| VelaException::invalid_reference("pinned array vanished"))?;
        match &obj.body {
            ObjBody::Array(data) => Ok(f(data)),
            _ => Err(VelaException::new(
                ExceptionKind::InvalidOperation,
                "pinned object is not an array",
            )),
        }
    }

    /// Mutate the pinned array's data.
    pub fn with_data_mut<R>(
        &self,
        f: impl FnOnce(&mut ArrayData) -> R,
    ) -> Result<R, VelaException> {
        let mut heap = self.vm.heap().lock();
        let obj = heap
            .get_mut(self.ptr)
            .ok_or_else(|| VelaException::invalid_reference("pinned array vanished"))?;
        match &mut obj.body {
            ObjBody::Array(data) => Ok(f(data)),
            _ => Err(VelaException::new(
                ExceptionKind::InvalidOperation,
                "pinned object is not an array",
            )),
        }
    }
}

impl Drop for PinnedArray {
    fn drop(&mut self) {
        self.vm.heap().lock().unpin(self.ptr);
    }
}

// ---- helpers ----

fn deref(guard: &ScopedManagedCode<'_>, r: NapiRef) -> Result<ObjPtr, VelaException> {
    guard
        .to_internal(Some(r))?
        .ok_or_else(|| VelaException::null_pointer("null reference"))
}

fn expect_class(guard: &ScopedManagedCode<'_>, r: NapiRef) -> Result<ClassId, VelaException> {
    let ptr = deref(guard, r)?;
    let vm = guard.env().vm();
    let heap = vm.heap().lock();
    match heap.get(ptr).map(|o| &o.body) {
        Some(ObjBody::ClassMirror(id)) => Ok(*id),
        Some(_) => Err(VelaException::new(
            ExceptionKind::InvalidOperation,
            "reference is not a class object",
        )),
        None => Err(VelaException::invalid_reference("dead class object")),
    }
}

fn lookup_method(
    guard: &ScopedManagedCode<'_>,
    class: NapiRef,
    name: &str,
    signature: &str,
    is_static: bool,
) -> Result<MethodId, VelaException> {
    let class = expect_class(guard, class)?;
    let shorty = Shorty::parse(signature)
        .map_err(|e| VelaException::new(ExceptionKind::Verification, e.to_string()))?;
    let vm = guard.env().vm();
    vm.classes()
        .read()
        .find_method(class, name, Some(&shorty), is_static)
        .map(|m| m.id)
        .ok_or_else(|| {
            VelaException::new(
                ExceptionKind::Verification,
                format!("no {name}{signature} on the given class"),
            )
        })
}

fn call_in(
    guard: &mut ScopedManagedCode<'_>,
    receiver: Option<NapiRef>,
    method: MethodId,
    args: &[NapiValue],
) -> Result<InvokeResult, VelaException> {
    let vm = guard.env().vm().clone();
    let declared = vm.classes().read().method(method).ok_or_else(|| {
        VelaException::new(ExceptionKind::Verification, "unknown method identifier")
    })?;

    if declared.is_static {
        let values = get_arg_values(guard, &declared.shorty, args)?;
        return invoke(guard, &declared, &values);
    }

    let recv_ptr = guard
        .to_internal(receiver)?
        .ok_or_else(|| VelaException::null_pointer("null receiver"))?;
    let dynamic_class = vm
        .heap()
        .lock()
        .get(recv_ptr)
        .ok_or_else(|| VelaException::invalid_reference("dead receiver"))?
        .class;
    let resolved = vm
        .classes()
        .read()
        .resolve_virtual(dynamic_class, &declared)
        .ok_or_else(|| {
            VelaException::new(
                ExceptionKind::Verification,
                format!("no concrete override of {} on the receiver", declared.name),
            )
        })?;

    let mut values = Vec::with_capacity(args.len() + 1);
    values.push(Value::Ref(Some(recv_ptr)));
    values.extend(get_arg_values(guard, &resolved.shorty, args)?);
    invoke(guard, &resolved, &values)
}

fn value_in(guard: &ScopedManagedCode<'_>, v: NapiValue) -> Result<Value, VelaException> {
    Ok(match v {
        NapiValue::Bool(v) => Value::Bool(v),
        NapiValue::Byte(v) => Value::I8(v),
        NapiValue::Short(v) => Value::I16(v),
        NapiValue::Char(v) => Value::U16(v),
        NapiValue::Int(v) => Value::I32(v),
        NapiValue::Long(v) => Value::I64(v),
        NapiValue::Float(v) => Value::from_f32(v),
        NapiValue::Double(v) => Value::from_f64(v),
        NapiValue::Ref(r) => Value::Ref(guard.to_internal(r)?),
    })
}

/// Settle the promise behind a deferred and consume it. The deferred's
/// Global reference roots the target across the terminal-state write; it is
/// removed before waiters are woken.
fn settle_deferred(
    vm: &Vm,
    deferred: NapiRef,
    next: PromiseState,
) -> Result<(), VelaException> {
    let target = vm
        .globals()
        .get(deferred)?
        .ok_or_else(|| VelaException::invalid_reference("deferred target cleared"))?;
    promise::write_terminal(vm, target, next)?;
    vm.globals().remove(deferred)?;
    vm.notify_settled();
    Ok(())
}

fn alloc_array(
    guard: &mut ScopedManagedCode<'_>,
    data: ArrayData,
) -> Result<NapiRef, VelaException> {
    let vm = guard.env().vm().clone();
    let class = vm.core().array;
    let ptr = vm
        .heap()
        .lock()
        .alloc(class, ObjBody::Array(data))
        .ok_or_else(|| VelaException::out_of_memory("could not allocate an array"))?;
    guard.add_local_ref(ptr)
}

fn with_array<R>(
    guard: &ScopedManagedCode<'_>,
    array: NapiRef,
    f: impl FnOnce(&ArrayData) -> Result<R, VelaException>,
) -> Result<R, VelaException> {
    let ptr = deref(guard, array)?;
    let vm = guard.env().vm();
    let heap = vm.heap().lock();
    match heap.get(ptr).map(|o| &o.body) {
        Some(ObjBody::Array(data)) => f(data),
        Some(_) => Err(VelaException::new(
            ExceptionKind::InvalidOperation,
            "reference is not an array",
        )),
        None => Err(VelaException::invalid_reference("dead array object")),
    }
}

fn with_array_mut<R>(
    guard: &mut ScopedManagedCode<'_>,
    array: NapiRef,
    f: impl FnOnce(&mut ArrayData) -> Result<R, VelaException>,
) -> Result<R, VelaException> {
    let ptr = deref(guard, array)?;
    let vm = guard.env().vm().clone();
    let mut heap = vm.heap().lock();
    match heap.get_mut(ptr).map(|o| &mut o.body) {
        Some(ObjBody::Array(data)) => f(data),
        Some(_) => Err(VelaException::new(
            ExceptionKind::InvalidOperation,
            "reference is not an array",
        )),
        None => Err(VelaException::invalid_reference("dead array object")),
    }
}

fn check_bounds(
    start: usize,
    len: usize,
    total: usize,
) -> Result<std::ops::Range<usize>, VelaException> {
    match start.checked_add(len) {
        Some(end) if end <= total => Ok(start..end),
        _ => Err(VelaException::new(
            ExceptionKind::ArrayIndexOutOfBounds,
            format!("region [{start}, {start}+{len}) outside array of length {total}"),
        )),
    }
}

fn not_an_int_array() -> VelaException {
    VelaException::new(
        ExceptionKind::InvalidOperation,
        "region target is not an int array",
    )
}

fn not_a_ref_array() -> VelaException {
    VelaException::new(
        ExceptionKind::InvalidOperation,
        "target is not a reference array",
    )
}

fn is_subclass(vm: &Vm, class: ClassId, ancestor: ClassId) -> bool {
    let classes = vm.classes().read();
    let mut cursor = Some(class);
    while let Some(cid) = cursor {
        if cid == ancestor {
            return true;
        }
        cursor = classes.class(cid).and_then(|c| c.super_class);
    }
    false
}

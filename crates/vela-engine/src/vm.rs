//! Runtime root
//!
//! [`Vm`] owns the shared halves of the runtime: the object heap, the
//! global/weak reference table, the class registry, and the coroutine
//! scheduler. Per-context state (local frames, execution state, pending
//! exception) lives in [`crate::env::NapiEnv`] instead.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::class::{ClassId, ClassRegistry};
use crate::coroutine::{CoroScheduler, ResultFlavor};
use crate::error::VelaException;
use crate::object::{Heap, ObjBody, ObjPtr};
use crate::refs::GlobalRefTable;
use crate::shorty::TypeTag;
use crate::value::Value;

/// Construction-time limits and pool sizing.
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Worker pool size
    pub workers: usize,
    /// Live-object cap of the heap
    pub max_heap_objects: usize,
    /// Per-context cap on frame-scoped references
    pub max_local_refs: usize,
    /// Runtime-wide cap on global/weak references
    pub max_global_refs: usize,
    /// Cap on enqueued-but-unfinished coroutines
    pub max_pending_coroutines: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            max_heap_objects: 4096,
            max_local_refs: 1024,
            max_global_refs: 1024,
            max_pending_coroutines: 1024,
        }
    }
}

/// Identifiers of the always-present core classes.
pub struct CoreClasses {
    /// `std/core/Object`
    pub object: ClassId,
    /// `std/core/String`
    pub string: ClassId,
    /// `std/core/Array`
    pub array: ClassId,
    /// `std/core/Promise`
    pub promise: ClassId,
    /// `std/core/Job`
    pub job: ClassId,
    /// `std/core/Boolean`
    pub boxed_bool: ClassId,
    /// `std/core/Byte`
    pub boxed_byte: ClassId,
    /// `std/core/Short`
    pub boxed_short: ClassId,
    /// `std/core/Char`
    pub boxed_char: ClassId,
    /// `std/core/Int`
    pub boxed_int: ClassId,
    /// `std/core/Long`
    pub boxed_long: ClassId,
    /// `std/core/Float`
    pub boxed_float: ClassId,
    /// `std/core/Double`
    pub boxed_double: ClassId,
}

impl CoreClasses {
    /// Box class for a primitive type tag.
    pub fn box_class(&self, tag: TypeTag) -> Option<ClassId> {
        match tag {
            TypeTag::Bool => Some(self.boxed_bool),
            TypeTag::I8 | TypeTag::U8 => Some(self.boxed_byte),
            TypeTag::I16 => Some(self.boxed_short),
            TypeTag::U16 => Some(self.boxed_char),
            TypeTag::I32 | TypeTag::U32 => Some(self.boxed_int),
            TypeTag::I64 | TypeTag::U64 => Some(self.boxed_long),
            TypeTag::F32 => Some(self.boxed_float),
            TypeTag::F64 => Some(self.boxed_double),
            TypeTag::Void | TypeTag::Ref => None,
        }
    }
}

/// The shared runtime.
pub struct Vm {
    options: VmOptions,
    heap: Mutex<Heap>,
    globals: GlobalRefTable,
    classes: RwLock<ClassRegistry>,
    scheduler: CoroScheduler,
    core: CoreClasses,
    pub(crate) settle_epoch: Mutex<u64>,
    pub(crate) settle_cv: Condvar,
}

impl Vm {
    /// Build the runtime, register the core classes, and start the worker
    /// pool.
    pub fn new(options: VmOptions) -> Arc<Self> {
        let mut heap = Heap::new(options.max_heap_objects);
        let mut classes = ClassRegistry::new();
        let core = Self::register_core(&mut classes, &mut heap);

        let vm = Arc::new(Self {
            globals: GlobalRefTable::new(options.max_global_refs),
            scheduler: CoroScheduler::new(options.workers, options.max_pending_coroutines),
            heap: Mutex::new(heap),
            classes: RwLock::new(classes),
            core,
            settle_epoch: Mutex::new(0),
            settle_cv: Condvar::new(),
            options,
        });
        vm.scheduler.start(Arc::downgrade(&vm));
        vm
    }

    fn register_core(classes: &mut ClassRegistry, heap: &mut Heap) -> CoreClasses {
        let mut define = |name: &str, super_class| {
            let id = classes.add_class(name, super_class, Vec::new());
            if let Some(mirror) = heap.alloc(id, ObjBody::ClassMirror(id)) {
                classes.set_mirror(id, mirror);
            }
            id
        };
        let object = define("std/core/Object", None);
        CoreClasses {
            object,
            string: define("std/core/String", Some(object)),
            array: define("std/core/Array", Some(object)),
            promise: define("std/core/Promise", Some(object)),
            job: define("std/core/Job", Some(object)),
            boxed_bool: define("std/core/Boolean", Some(object)),
            boxed_byte: define("std/core/Byte", Some(object)),
            boxed_short: define("std/core/Short", Some(object)),
            boxed_char: define("std/core/Char", Some(object)),
            boxed_int: define("std/core/Int", Some(object)),
            boxed_long: define("std/core/Long", Some(object)),
            boxed_float: define("std/core/Float", Some(object)),
            boxed_double: define("std/core/Double", Some(object)),
        }
    }

    /// Construction-time limits.
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// The managed object heap.
    pub fn heap(&self) -> &Mutex<Heap> {
        &self.heap
    }

    /// The runtime-wide global/weak reference table.
    pub fn globals(&self) -> &GlobalRefTable {
        &self.globals
    }

    /// The class/method registry.
    pub fn classes(&self) -> &RwLock<ClassRegistry> {
        &self.classes
    }

    /// The coroutine scheduler.
    pub fn scheduler(&self) -> &CoroScheduler {
        &self.scheduler
    }

    /// Identifiers of the core classes.
    pub fn core(&self) -> &CoreClasses {
        &self.core
    }

    /// Completion-object class for a launch flavor.
    pub fn promise_class(&self, flavor: ResultFlavor) -> ClassId {
        match flavor {
            ResultFlavor::Promise => self.core.promise,
            ResultFlavor::Job => self.core.job,
        }
    }

    /// Register an embedder class and mint its mirror object.
    pub fn define_class(
        &self,
        name: &str,
        super_class: Option<ClassId>,
        field_names: Vec<String>,
    ) -> Result<ClassId, VelaException> {
        let mut classes = self.classes.write();
        let id = classes.add_class(name, super_class, field_names);
        let mirror = self
            .heap
            .lock()
            .alloc(id, ObjBody::ClassMirror(id))
            .ok_or_else(|| VelaException::out_of_memory("could not allocate a class mirror"))?;
        classes.set_mirror(id, mirror);
        Ok(id)
    }

    /// Heap mirror of a class.
    pub fn class_mirror(&self, class: ClassId) -> Option<ObjPtr> {
        self.classes.read().class(class).and_then(|c| c.mirror)
    }

    /// Allocate a managed string.
    pub fn alloc_string(&self, s: &str) -> Result<ObjPtr, VelaException> {
        self.heap
            .lock()
            .alloc(self.core.string, ObjBody::Str(s.to_string()))
            .ok_or_else(|| VelaException::out_of_memory("could not allocate a string"))
    }

    /// Allocate a boxed primitive wrapper.
    pub fn alloc_boxed(&self, value: Value, tag: TypeTag) -> Result<ObjPtr, VelaException> {
        let class = self
            .core
            .box_class(tag)
            .ok_or_else(|| VelaException::out_of_memory("no box class for this tag"))?;
        self.heap
            .lock()
            .alloc(class, ObjBody::Boxed(value))
            .ok_or_else(|| VelaException::out_of_memory("could not allocate a box"))
    }

    /// Wake everyone blocked on a Promise/Job settlement.
    pub(crate) fn notify_settled(&self) {
        let mut epoch = self.settle_epoch.lock();
        *epoch = epoch.wrapping_add(1);
        self.settle_cv.notify_all();
    }

    /// Run a collection. Roots are the global strong references, every
    /// class mirror, the arguments of pending coroutines, and `extra_roots`
    /// supplied by the caller (typically a context's local frames). Weak
    /// references to reclaimed objects are cleared. Returns the number of
    /// objects freed.
    pub fn collect(&self, extra_roots: impl IntoIterator<Item = ObjPtr>) -> usize {
        let mut roots = self.globals.strong_roots();
        roots.extend(self.classes.read().mirrors());
        roots.extend(self.scheduler.pending_roots());
        roots.extend(extra_roots);

        let mut heap = self.heap.lock();
        let freed = heap.collect(roots);
        self.globals.clear_dead_weaks(|p| heap.is_valid(p));
        freed
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_classes_registered() {
        let vm = Vm::new(VmOptions::default());
        let classes = vm.classes().read();
        assert!(classes.find_class("std/core/Promise").is_some());
        assert!(classes.find_class("std/core/Job").is_some());
        assert_eq!(
            classes.find_class("std/core/String").unwrap().super_class,
            Some(vm.core().object)
        );
    }

    #[test]
    fn test_mirrors_survive_collection() {
        let vm = Vm::new(VmOptions::default());
        let mirror = vm.class_mirror(vm.core().string).unwrap();
        vm.collect([]);
        assert!(vm.heap().lock().is_valid(mirror));
    }

    #[test]
    fn test_collect_honors_extra_roots() {
        let vm = Vm::new(VmOptions::default());
        let kept = vm.alloc_string("kept").unwrap();
        let dropped = vm.alloc_string("dropped").unwrap();

        vm.collect([kept]);
        let heap = vm.heap().lock();
        assert!(heap.is_valid(kept));
        assert!(!heap.is_valid(dropped));
    }

    #[test]
    fn test_weak_cleared_by_collection() {
        let vm = Vm::new(VmOptions::default());
        let ptr = vm.alloc_string("soon gone").unwrap();
        let w = vm.globals().new_ref(ptr, true).unwrap();

        vm.collect([]);
        assert_eq!(vm.globals().get(w).unwrap(), None);
    }
}

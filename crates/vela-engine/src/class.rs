//! Class and method model
//!
//! The interop layer needs only the sliver of the object/class model its
//! contract names: class lookup by descriptor, method lookup by name and
//! signature, virtual dispatch resolution, and per-method shorties. Class
//! loading proper lives elsewhere; the embedder populates this registry.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::env::NapiEnv;
use crate::error::VelaException;
use crate::object::ObjPtr;
use crate::shorty::Shorty;
use crate::value::Value;
use crate::vm::Vm;
use vela_sdk::{NapiRef, NapiValue, NativeFlags};

/// Identifier of a registered class.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ClassId(u32);

impl ClassId {
    /// Build from a raw index. Registry-internal callers and tests only.
    pub fn from_raw(raw: u32) -> Self {
        ClassId(raw)
    }

    /// Raw index value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Identifier of a registered method.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MethodId(u32);

impl MethodId {
    /// Build from a raw index. Registry-internal callers and tests only.
    pub fn from_raw(raw: u32) -> Self {
        MethodId(raw)
    }

    /// Raw index value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Interpreter entry point for a managed method body.
///
/// The interpreter/JIT is an external collaborator; a host closure stands in
/// for compiled code. It receives the invocation value sequence produced by
/// the marshaller (receiver first for instance methods).
pub type ManagedFn = Arc<dyn Fn(&Arc<Vm>, &[Value]) -> Result<Value, VelaException> + Send + Sync>;

/// A standard or fast native implementation: environment, receiver (class
/// mirror for statics), declared arguments.
pub type StandardNativeFn = Arc<
    dyn Fn(&mut NapiEnv, Option<NapiRef>, &[NapiValue]) -> Result<NapiValue, VelaException>
        + Send
        + Sync,
>;

/// A critical native implementation: no environment, no receiver.
pub type CriticalNativeFn =
    Arc<dyn Fn(&[NapiValue]) -> Result<NapiValue, VelaException> + Send + Sync>;

/// Registered native implementation, shaped by its calling convention.
#[derive(Clone)]
pub enum NativeImpl {
    /// Full or fast convention (receives environment and receiver)
    Standard(StandardNativeFn),
    /// Critical convention (receives declared arguments only)
    Critical(CriticalNativeFn),
}

/// What runs when a method is invoked.
#[derive(Clone)]
pub enum MethodBody {
    /// Managed bytecode, stood in for by a host closure
    Managed(ManagedFn),
    /// Registered native implementation
    Native {
        /// Calling-convention flags
        flags: NativeFlags,
        /// The implementation
        imp: NativeImpl,
    },
    /// Abstract: must be virtually resolved to a concrete override
    Abstract,
}

/// A resolved method.
pub struct Method {
    /// Registry identifier
    pub id: MethodId,
    /// Declaring class
    pub class: ClassId,
    /// Simple name
    pub name: String,
    /// Compact signature, created at resolution time, immutable
    pub shorty: Shorty,
    /// True for static methods (no receiver slot)
    pub is_static: bool,
    /// True for abstract declarations
    pub is_abstract: bool,
    /// False until the verifier has accepted the body
    pub verified: bool,
    /// The body
    pub body: MethodBody,
}

/// A registered class.
pub struct Class {
    /// Registry identifier
    pub id: ClassId,
    /// Fully qualified descriptor, e.g. `std/core/String`
    pub name: String,
    /// Superclass, if any
    pub super_class: Option<ClassId>,
    /// Methods declared directly on this class
    pub methods: Vec<MethodId>,
    /// Field slot names, defining the instance layout
    pub field_names: Vec<String>,
    /// Heap mirror object for this class, minted at registration
    pub mirror: Option<ObjPtr>,
}

/// Registry of classes and methods, shared across the runtime.
#[derive(Default)]
pub struct ClassRegistry {
    classes: Vec<Class>,
    methods: Vec<Arc<Method>>,
    by_name: FxHashMap<String, ClassId>,
}

impl ClassRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. The descriptor must be unique.
    pub fn add_class(
        &mut self,
        name: impl Into<String>,
        super_class: Option<ClassId>,
        field_names: Vec<String>,
    ) -> ClassId {
        let name = name.into();
        debug_assert!(
            !self.by_name.contains_key(&name),
            "duplicate class descriptor {name}"
        );
        let id = ClassId(self.classes.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.classes.push(Class {
            id,
            name,
            super_class,
            methods: Vec::new(),
            field_names,
            mirror: None,
        });
        id
    }

    /// Attach the heap mirror object of a class.
    pub fn set_mirror(&mut self, class: ClassId, mirror: ObjPtr) {
        self.classes[class.0 as usize].mirror = Some(mirror);
    }

    /// Register a method on a class.
    #[allow(clippy::too_many_arguments)]
    pub fn add_method(
        &mut self,
        class: ClassId,
        name: impl Into<String>,
        shorty: Shorty,
        is_static: bool,
        is_abstract: bool,
        verified: bool,
        body: MethodBody,
    ) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(Arc::new(Method {
            id,
            class,
            name: name.into(),
            shorty,
            is_static,
            is_abstract,
            verified,
            body,
        }));
        self.classes[class.0 as usize].methods.push(id);
        id
    }

    /// Look up a class by identifier.
    pub fn class(&self, id: ClassId) -> Option<&Class> {
        self.classes.get(id.0 as usize)
    }

    /// Look up a class by descriptor.
    pub fn find_class(&self, name: &str) -> Option<&Class> {
        self.by_name.get(name).map(|id| &self.classes[id.0 as usize])
    }

    /// Look up a method by identifier.
    pub fn method(&self, id: MethodId) -> Option<Arc<Method>> {
        self.methods.get(id.0 as usize).cloned()
    }

    /// Find a method by name (and optionally signature) on a class or its
    /// superclasses.
    pub fn find_method(
        &self,
        class: ClassId,
        name: &str,
        shorty: Option<&Shorty>,
        is_static: bool,
    ) -> Option<Arc<Method>> {
        let mut cursor = Some(class);
        while let Some(cid) = cursor {
            let cls = self.class(cid)?;
            for mid in &cls.methods {
                let m = &self.methods[mid.0 as usize];
                if m.name == name
                    && m.is_static == is_static
                    && shorty.map_or(true, |s| &m.shorty == s)
                {
                    return Some(m.clone());
                }
            }
            cursor = cls.super_class;
        }
        None
    }

    /// Resolve a (possibly abstract) method against the dynamic class of a
    /// receiver: find the most-derived override with the same name and
    /// signature, walking from `receiver_class` up the superclass chain.
    pub fn resolve_virtual(
        &self,
        receiver_class: ClassId,
        declared: &Method,
    ) -> Option<Arc<Method>> {
        self.find_method(receiver_class, &declared.name, Some(&declared.shorty), false)
    }

    /// Field slot count of a class (its own declared fields).
    pub fn field_count(&self, class: ClassId) -> usize {
        self.class(class).map_or(0, |c| c.field_names.len())
    }

    /// Iterate the mirror objects of every registered class.
    pub fn mirrors(&self) -> impl Iterator<Item = ObjPtr> + '_ {
        self.classes.iter().filter_map(|c| c.mirror)
    }
}

//! Managed object heap
//!
//! The collector and full object model are external collaborators. This
//! module carries the minimal concrete stand-in the interop layer needs,
//! honoring exactly the contract it requires:
//!
//! - object identity ([`ObjPtr`]) is stable while any strong reference is
//!   live (the store is non-moving),
//! - [`Heap::collect`] frees objects unreachable from the supplied strong
//!   roots, so weak-reference clearing is observable,
//! - pinned objects are never reclaimed, making raw buffer access over a
//!   pin/unpin pair safe.
//!
//! Slots carry generations, so a dangling `ObjPtr` is detected instead of
//! aliasing a reused slot.

use crate::class::ClassId;
use crate::value::Value;

/// Raw pointer to a heap object: slot index plus slot generation.
///
/// This is the address form invocation [`Value`]s carry. It is *not*
/// GC-tracked; holding one across a collection is only sound if the object
/// is reachable from a strong root or pinned.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ObjPtr {
    slot: u32,
    generation: u32,
}

impl ObjPtr {
    /// Slot index within the heap.
    #[inline]
    pub fn slot(self) -> u32 {
        self.slot
    }

    /// Generation of the slot at mint time.
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// State machine of a Promise/Job object.
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
    /// Not yet settled
    Pending,
    /// Settled with a result value
    Fulfilled(Value),
    /// Settled with an error value
    Rejected(Value),
}

impl PromiseState {
    /// True once the promise has reached a terminal state.
    #[inline]
    pub fn is_settled(&self) -> bool {
        !matches!(self, PromiseState::Pending)
    }
}

/// Typed backing storage of an array object.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// boolean[]
    Bool(Vec<bool>),
    /// byte[]
    I8(Vec<i8>),
    /// short[]
    I16(Vec<i16>),
    /// char[]
    U16(Vec<u16>),
    /// int[]
    I32(Vec<i32>),
    /// long[]
    I64(Vec<i64>),
    /// float[]
    F32(Vec<f32>),
    /// double[]
    F64(Vec<f64>),
    /// T[] for reference element types
    Ref {
        /// Declared element class
        elem_class: ClassId,
        /// Elements; `None` is managed null
        items: Vec<Option<ObjPtr>>,
    },
}

impl ArrayData {
    /// Element count.
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::I8(v) => v.len(),
            ArrayData::I16(v) => v.len(),
            ArrayData::U16(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
            ArrayData::Ref { items, .. } => items.len(),
        }
    }

    /// True when the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Body of a managed object.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjBody {
    /// Plain instance with dynamically typed field slots
    Instance {
        /// Field values, indexed per the class layout
        fields: Vec<Value>,
    },
    /// Managed string
    Str(String),
    /// Managed array
    Array(ArrayData),
    /// Boxed primitive wrapper
    Boxed(Value),
    /// Promise/Job completion object
    Promise(PromiseState),
    /// Class mirror object (the reflection-side face of a class)
    ClassMirror(ClassId),
}

/// One managed object: class, pin count, body.
#[derive(Debug, Clone)]
pub struct HeapObject {
    /// Class of the object
    pub class: ClassId,
    /// Raw-buffer pin count; a pinned object is never reclaimed or moved
    pub pin_count: u32,
    /// Object payload
    pub body: ObjBody,
}

struct HeapSlot {
    generation: u32,
    object: Option<HeapObject>,
}

/// Slot-indexed, non-moving object store with a mark/sweep collection.
pub struct Heap {
    slots: Vec<HeapSlot>,
    free: Vec<u32>,
    live: usize,
    max_objects: usize,
}

impl Heap {
    /// Create a heap capped at `max_objects` live objects.
    pub fn new(max_objects: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            max_objects,
        }
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Allocate an object. Returns `None` when the heap is at capacity;
    /// the caller surfaces that as `OutOfMemory`.
    pub fn alloc(&mut self, class: ClassId, body: ObjBody) -> Option<ObjPtr> {
        if self.live >= self.max_objects {
            return None;
        }
        let obj = HeapObject {
            class,
            pin_count: 0,
            body,
        };
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            let s = &mut self.slots[slot as usize];
            s.object = Some(obj);
            Some(ObjPtr {
                slot,
                generation: s.generation,
            })
        } else {
            let slot = self.slots.len() as u32;
            self.slots.push(HeapSlot {
                generation: 1,
                object: Some(obj),
            });
            Some(ObjPtr {
                slot,
                generation: 1,
            })
        }
    }

    /// True if `ptr` still names a live object.
    pub fn is_valid(&self, ptr: ObjPtr) -> bool {
        self.slot_of(ptr).is_some()
    }

    fn slot_of(&self, ptr: ObjPtr) -> Option<usize> {
        let idx = ptr.slot as usize;
        let slot = self.slots.get(idx)?;
        if slot.generation == ptr.generation && slot.object.is_some() {
            Some(idx)
        } else {
            None
        }
    }

    /// Borrow a live object.
    pub fn get(&self, ptr: ObjPtr) -> Option<&HeapObject> {
        let idx = self.slot_of(ptr)?;
        self.slots[idx].object.as_ref()
    }

    /// Mutably borrow a live object.
    pub fn get_mut(&mut self, ptr: ObjPtr) -> Option<&mut HeapObject> {
        let idx = self.slot_of(ptr)?;
        self.slots[idx].object.as_mut()
    }

    /// Increment the pin count of an object, preventing reclamation for the
    /// scope of a raw buffer access. Must be paired with [`Heap::unpin`].
    pub fn pin(&mut self, ptr: ObjPtr) -> bool {
        match self.get_mut(ptr) {
            Some(obj) => {
                obj.pin_count += 1;
                true
            }
            None => false,
        }
    }

    /// Decrement the pin count of an object.
    pub fn unpin(&mut self, ptr: ObjPtr) {
        if let Some(obj) = self.get_mut(ptr) {
            debug_assert!(obj.pin_count > 0, "unbalanced unpin");
            obj.pin_count = obj.pin_count.saturating_sub(1);
        }
    }

    /// Mark from `roots` (plus every pinned object) and sweep the rest.
    /// Returns the number of objects reclaimed.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = ObjPtr>) -> usize {
        let mut marked = vec![false; self.slots.len()];
        let mut worklist: Vec<u32> = Vec::new();

        for ptr in roots {
            if let Some(idx) = self.slot_of(ptr) {
                if !marked[idx] {
                    marked[idx] = true;
                    worklist.push(idx as u32);
                }
            }
        }
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(obj) = &slot.object {
                if obj.pin_count > 0 && !marked[idx] {
                    marked[idx] = true;
                    worklist.push(idx as u32);
                }
            }
        }

        while let Some(idx) = worklist.pop() {
            let refs = match &self.slots[idx as usize].object {
                Some(obj) => Self::trace(obj),
                None => continue,
            };
            for ptr in refs {
                if let Some(ridx) = self.slot_of(ptr) {
                    if !marked[ridx] {
                        marked[ridx] = true;
                        worklist.push(ridx as u32);
                    }
                }
            }
        }

        let mut freed = 0;
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_some() && !marked[idx] {
                slot.object = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(idx as u32);
                freed += 1;
            }
        }
        self.live -= freed;
        freed
    }

    fn trace(obj: &HeapObject) -> Vec<ObjPtr> {
        let mut out = Vec::new();
        let mut push_value = |v: &Value| {
            if let Value::Ref(Some(p)) = v {
                out.push(*p);
            }
        };
        match &obj.body {
            ObjBody::Instance { fields } => fields.iter().for_each(&mut push_value),
            ObjBody::Array(ArrayData::Ref { items, .. }) => {
                out.extend(items.iter().flatten().copied())
            }
            ObjBody::Boxed(v) => push_value(v),
            ObjBody::Promise(PromiseState::Fulfilled(v))
            | ObjBody::Promise(PromiseState::Rejected(v)) => push_value(v),
            _ => {}
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_class() -> ClassId {
        ClassId::from_raw(0)
    }

    fn alloc_str(heap: &mut Heap, s: &str) -> ObjPtr {
        heap.alloc(test_class(), ObjBody::Str(s.to_string())).unwrap()
    }

    #[test]
    fn test_alloc_and_get() {
        let mut heap = Heap::new(16);
        let p = alloc_str(&mut heap, "hello");
        match &heap.get(p).unwrap().body {
            ObjBody::Str(s) => assert_eq!(s, "hello"),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_alloc_capacity() {
        let mut heap = Heap::new(2);
        alloc_str(&mut heap, "a");
        alloc_str(&mut heap, "b");
        assert!(heap.alloc(test_class(), ObjBody::Str("c".into())).is_none());
    }

    #[test]
    fn test_collect_frees_unrooted() {
        let mut heap = Heap::new(16);
        let kept = alloc_str(&mut heap, "kept");
        let dropped = alloc_str(&mut heap, "dropped");

        let freed = heap.collect([kept]);
        assert_eq!(freed, 1);
        assert!(heap.is_valid(kept));
        assert!(!heap.is_valid(dropped));
    }

    #[test]
    fn test_collect_traces_fields() {
        let mut heap = Heap::new(16);
        let inner = alloc_str(&mut heap, "inner");
        let outer = heap
            .alloc(
                test_class(),
                ObjBody::Instance {
                    fields: vec![Value::Ref(Some(inner)), Value::I32(1)],
                },
            )
            .unwrap();

        heap.collect([outer]);
        assert!(heap.is_valid(inner));
    }

    #[test]
    fn test_stale_ptr_detected_after_reuse() {
        let mut heap = Heap::new(16);
        let old = alloc_str(&mut heap, "old");
        heap.collect([]);
        // Reuse the freed slot
        let new = alloc_str(&mut heap, "new");
        assert_eq!(old.slot(), new.slot());
        assert!(!heap.is_valid(old));
        assert!(heap.is_valid(new));
    }

    #[test]
    fn test_pinned_survives_collect() {
        let mut heap = Heap::new(16);
        let p = alloc_str(&mut heap, "pinned");
        assert!(heap.pin(p));

        heap.collect([]);
        assert!(heap.is_valid(p));

        heap.unpin(p);
        heap.collect([]);
        assert!(!heap.is_valid(p));
    }
}

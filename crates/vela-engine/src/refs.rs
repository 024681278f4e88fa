//! Reference storage
//!
//! Two stores back the four reference kinds:
//!
//! - [`LocalFrames`] — per-execution-context, frame-scoped slots for Stack
//!   and Local references. Frames nest with strict stack discipline; popping
//!   a frame invalidates every reference minted in it, optionally promoting
//!   one chosen reference into the parent frame.
//! - [`GlobalRefTable`] — a runtime-wide, internally synchronized free-list
//!   table for Global and Weak references, released only by explicit delete.
//!
//! Handles carry the generation of their frame or table slot; every stale
//! handle is a checked `InvalidReference`, never a dangling read.

use parking_lot::Mutex;

use crate::error::{ExceptionKind, VelaException};
use crate::object::ObjPtr;
use vela_sdk::{NapiRef, RefKind};

/// Default capacity of the entry frame a transition guard establishes.
pub const ENTRY_FRAME_CAPACITY: usize = 64;

struct Frame {
    base: usize,
    capacity: usize,
    generation: u32,
    kind: RefKind,
}

/// Frame-scoped storage for Stack/Local references of one execution context.
///
/// Not shared: each context owns its own frame stack, so no locking happens
/// here.
pub struct LocalFrames {
    slots: Vec<Option<ObjPtr>>,
    frames: Vec<Frame>,
    next_generation: u32,
    max_slots: usize,
}

impl LocalFrames {
    /// Create the store with its entry frame already open.
    pub fn new(max_slots: usize) -> Self {
        let mut frames = Self {
            slots: Vec::new(),
            frames: Vec::new(),
            next_generation: 1,
            max_slots,
        };
        // The entry frame mints Stack references; it exists for the lifetime
        // of the context and is never popped.
        frames
            .push_frame_kind(ENTRY_FRAME_CAPACITY, RefKind::Stack)
            .expect("entry frame capacity exceeds context limit");
        frames
    }

    fn push_frame_kind(&mut self, capacity: usize, kind: RefKind) -> Result<(), VelaException> {
        if self.slots.len() + capacity > self.max_slots {
            return Err(VelaException::out_of_memory(format!(
                "could not reserve a local frame of {capacity} references"
            )));
        }
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        self.frames.push(Frame {
            base: self.slots.len(),
            capacity,
            generation,
            kind,
        });
        Ok(())
    }

    /// Open a nested Local frame able to hold at least `capacity` references.
    pub fn push_frame(&mut self, capacity: usize) -> Result<(), VelaException> {
        self.push_frame_kind(capacity, RefKind::Local)
    }

    /// Close the most recently opened frame, invalidating every reference
    /// minted in it. If `result` names a reference from the popped frame,
    /// it is re-homed into the parent frame and the new handle returned so
    /// the caller can keep using the object. A `result` from an outer frame
    /// passes through unchanged.
    pub fn pop_frame(
        &mut self,
        result: Option<NapiRef>,
    ) -> Result<Option<NapiRef>, VelaException> {
        if self.frames.len() <= 1 {
            return Err(VelaException::new(
                ExceptionKind::InvalidOperation,
                "no local frame to pop",
            ));
        }
        // Resolve the survivor before the pop invalidates its slot.
        let survivor = match result {
            Some(r) => {
                let frame = self.frames.last().expect("frame stack underflow");
                let from_popped = r.generation() == frame.generation;
                let target = self.get(r)?;
                Some((r, from_popped, target))
            }
            None => None,
        };

        let frame = self.frames.pop().expect("frame stack underflow");
        self.slots.truncate(frame.base);

        match survivor {
            None => Ok(None),
            Some((r, false, _)) => Ok(Some(r)),
            Some((_, true, target)) => match target {
                None => Ok(None),
                Some(ptr) => Ok(Some(self.new_ref(ptr)?)),
            },
        }
    }

    /// Grow the current frame so it can hold at least `n` references.
    pub fn ensure_capacity(&mut self, n: usize) -> Result<(), VelaException> {
        let frame = self.frames.last_mut().expect("no current frame");
        let used = self.slots.len() - frame.base;
        if n <= frame.capacity {
            return Ok(());
        }
        if frame.base + n > self.max_slots {
            return Err(VelaException::out_of_memory(format!(
                "could not ensure capacity for {n} references (used {used})"
            )));
        }
        frame.capacity = n;
        Ok(())
    }

    /// Mint a reference to `ptr` in the current frame. Fails with
    /// `OutOfMemory` when the frame is full; callers grow deliberately via
    /// [`LocalFrames::ensure_capacity`].
    pub fn new_ref(&mut self, ptr: ObjPtr) -> Result<NapiRef, VelaException> {
        let frame = self.frames.last().expect("no current frame");
        let used = self.slots.len() - frame.base;
        if used >= frame.capacity {
            return Err(VelaException::out_of_memory(format!(
                "local frame exhausted ({} references)",
                frame.capacity
            )));
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Some(ptr));
        Ok(NapiRef::pack(frame.kind, frame.generation, slot))
    }

    /// Dereference a frame-scoped handle.
    pub fn get(&self, r: NapiRef) -> Result<Option<ObjPtr>, VelaException> {
        debug_assert!(r.is_frame_scoped());
        let frame = self
            .frames
            .iter()
            .rev()
            .find(|f| f.generation == r.generation())
            .ok_or_else(|| {
                VelaException::invalid_reference("reference outlived its frame")
            })?;
        let slot = r.slot() as usize;
        let end = self
            .frames
            .iter()
            .find(|f| f.base > frame.base)
            .map_or(self.slots.len(), |f| f.base);
        if slot < frame.base || slot >= end {
            return Err(VelaException::invalid_reference(
                "reference slot outside its frame",
            ));
        }
        Ok(self.slots[slot])
    }

    /// Depth of the frame stack (entry frame included).
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Every live strong root in this context's frames.
    pub fn roots(&self) -> impl Iterator<Item = ObjPtr> + '_ {
        self.slots.iter().flatten().copied()
    }
}

struct GlobalEntry {
    generation: u32,
    target: Option<ObjPtr>,
    weak: bool,
    live: bool,
}

struct GlobalInner {
    entries: Vec<GlobalEntry>,
    free: Vec<u32>,
    live: usize,
}

/// Runtime-wide table of Global and Weak references.
///
/// Safe for concurrent mint/delete/get from multiple execution contexts.
pub struct GlobalRefTable {
    inner: Mutex<GlobalInner>,
    max_entries: usize,
}

impl GlobalRefTable {
    /// Create a table capped at `max_entries` live references.
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(GlobalInner {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
            max_entries,
        }
    }

    /// Mint a Global (strong) or Weak reference to `ptr`.
    pub fn new_ref(&self, ptr: ObjPtr, weak: bool) -> Result<NapiRef, VelaException> {
        let kind = if weak { RefKind::Weak } else { RefKind::Global };
        let mut inner = self.inner.lock();
        if inner.live >= self.max_entries {
            return Err(VelaException::out_of_memory(
                "global reference table exhausted",
            ));
        }
        inner.live += 1;
        if let Some(slot) = inner.free.pop() {
            let e = &mut inner.entries[slot as usize];
            e.target = Some(ptr);
            e.weak = weak;
            e.live = true;
            Ok(NapiRef::pack(kind, e.generation, slot))
        } else {
            let slot = inner.entries.len() as u32;
            inner.entries.push(GlobalEntry {
                generation: 1,
                target: Some(ptr),
                weak,
                live: true,
            });
            Ok(NapiRef::pack(kind, 1, slot))
        }
    }

    fn entry_index(inner: &GlobalInner, r: NapiRef) -> Result<usize, VelaException> {
        let idx = r.slot() as usize;
        match inner.entries.get(idx) {
            Some(e) if e.live && e.generation == r.generation() => Ok(idx),
            _ => Err(VelaException::invalid_reference(
                "stale global/weak reference",
            )),
        }
    }

    /// Dereference. A cleared Weak target reads as `Ok(None)` ("empty"),
    /// distinct from the `InvalidReference` a deleted slot produces.
    pub fn get(&self, r: NapiRef) -> Result<Option<ObjPtr>, VelaException> {
        debug_assert!(!r.is_frame_scoped());
        let inner = self.inner.lock();
        let idx = Self::entry_index(&inner, r)?;
        Ok(inner.entries[idx].target)
    }

    /// Explicitly release a Global/Weak slot. Returns the last target.
    pub fn remove(&self, r: NapiRef) -> Result<Option<ObjPtr>, VelaException> {
        debug_assert!(!r.is_frame_scoped());
        let mut inner = self.inner.lock();
        let idx = Self::entry_index(&inner, r)?;
        let e = &mut inner.entries[idx];
        let target = e.target.take();
        e.live = false;
        e.generation = e.generation.wrapping_add(1);
        inner.free.push(idx as u32);
        inner.live -= 1;
        Ok(target)
    }

    /// Strong roots for the collector: every live non-weak target.
    pub fn strong_roots(&self) -> Vec<ObjPtr> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|e| e.live && !e.weak)
            .filter_map(|e| e.target)
            .collect()
    }

    /// Clear weak targets the collector proved dead.
    pub fn clear_dead_weaks(&self, is_live: impl Fn(ObjPtr) -> bool) {
        let mut inner = self.inner.lock();
        for e in inner.entries.iter_mut() {
            if e.live && e.weak {
                if let Some(t) = e.target {
                    if !is_live(t) {
                        e.target = None;
                    }
                }
            }
        }
    }

    /// Number of live entries (strong and weak).
    pub fn live_count(&self) -> usize {
        self.inner.lock().live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassId;
    use crate::object::{Heap, ObjBody};

    fn alloc(heap: &mut Heap) -> ObjPtr {
        heap.alloc(ClassId::from_raw(0), ObjBody::Str("x".into()))
            .unwrap()
    }

    #[test]
    fn test_entry_frame_mints_stack_refs() {
        let mut heap = Heap::new(16);
        let mut frames = LocalFrames::new(256);
        let r = frames.new_ref(alloc(&mut heap)).unwrap();
        assert_eq!(r.kind(), RefKind::Stack);
    }

    #[test]
    fn test_nested_frames_mint_local_refs() {
        let mut heap = Heap::new(16);
        let mut frames = LocalFrames::new(256);
        frames.push_frame(4).unwrap();
        let r = frames.new_ref(alloc(&mut heap)).unwrap();
        assert_eq!(r.kind(), RefKind::Local);
    }

    #[test]
    fn test_frame_discipline() {
        let mut heap = Heap::new(16);
        let mut frames = LocalFrames::new(256);
        let ptr = alloc(&mut heap);

        frames.push_frame(4).unwrap();
        let r = frames.new_ref(ptr).unwrap();
        assert_eq!(frames.get(r).unwrap(), Some(ptr));

        frames.pop_frame(None).unwrap();
        let err = frames.get(r).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::InvalidReference);
    }

    #[test]
    fn test_pop_with_promotion() {
        let mut heap = Heap::new(16);
        let mut frames = LocalFrames::new(256);
        let ptr = alloc(&mut heap);

        frames.push_frame(4).unwrap();
        let inner = frames.new_ref(ptr).unwrap();
        let promoted = frames.pop_frame(Some(inner)).unwrap().unwrap();

        // Old handle is dead, promoted one lives in the parent frame
        assert!(frames.get(inner).is_err());
        assert_eq!(frames.get(promoted).unwrap(), Some(ptr));
        assert_eq!(promoted.kind(), RefKind::Stack);
    }

    #[test]
    fn test_pop_passes_outer_ref_through() {
        let mut heap = Heap::new(16);
        let mut frames = LocalFrames::new(256);
        let outer = frames.new_ref(alloc(&mut heap)).unwrap();

        frames.push_frame(4).unwrap();
        let out = frames.pop_frame(Some(outer)).unwrap().unwrap();
        assert_eq!(out, outer);
        assert!(frames.get(out).is_ok());
    }

    #[test]
    fn test_fixed_frame_capacity_exhausts_on_fifth() {
        let mut heap = Heap::new(16);
        let mut frames = LocalFrames::new(256);
        frames.push_frame(4).unwrap();

        let mut refs = Vec::new();
        for _ in 0..4 {
            refs.push(frames.new_ref(alloc(&mut heap)).unwrap());
        }
        let err = frames.new_ref(alloc(&mut heap)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::OutOfMemory);

        // The first four stay valid
        for r in refs {
            assert!(frames.get(r).unwrap().is_some());
        }
    }

    #[test]
    fn test_ensure_capacity_grows_current_frame() {
        let mut heap = Heap::new(32);
        let mut frames = LocalFrames::new(256);
        frames.push_frame(2).unwrap();
        frames.ensure_capacity(8).unwrap();
        for _ in 0..8 {
            frames.new_ref(alloc(&mut heap)).unwrap();
        }
        assert!(frames.new_ref(alloc(&mut heap)).is_err());
    }

    #[test]
    fn test_push_frame_over_context_limit() {
        let mut frames = LocalFrames::new(80);
        let err = frames.push_frame(100).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::OutOfMemory);
    }

    #[test]
    fn test_cannot_pop_entry_frame() {
        let mut frames = LocalFrames::new(256);
        let err = frames.pop_frame(None).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::InvalidOperation);
    }

    #[test]
    fn test_global_mint_get_remove() {
        let mut heap = Heap::new(16);
        let table = GlobalRefTable::new(8);
        let ptr = alloc(&mut heap);

        let g = table.new_ref(ptr, false).unwrap();
        assert_eq!(g.kind(), RefKind::Global);
        assert_eq!(table.get(g).unwrap(), Some(ptr));

        assert_eq!(table.remove(g).unwrap(), Some(ptr));
        assert!(table.get(g).is_err());
        // Double delete is a checked error
        assert!(table.remove(g).is_err());
    }

    #[test]
    fn test_global_slot_reuse_is_stale_safe() {
        let mut heap = Heap::new(16);
        let table = GlobalRefTable::new(8);
        let a = table.new_ref(alloc(&mut heap), false).unwrap();
        table.remove(a).unwrap();
        let b = table.new_ref(alloc(&mut heap), false).unwrap();
        assert_eq!(a.slot(), b.slot());
        assert!(table.get(a).is_err());
        assert!(table.get(b).is_ok());
    }

    #[test]
    fn test_weak_clears_but_slot_survives() {
        let mut heap = Heap::new(16);
        let table = GlobalRefTable::new(8);
        let ptr = alloc(&mut heap);
        let w = table.new_ref(ptr, true).unwrap();
        assert_eq!(w.kind(), RefKind::Weak);

        // Weak refs are not strong roots
        assert!(table.strong_roots().is_empty());

        heap.collect([]);
        table.clear_dead_weaks(|p| heap.is_valid(p));

        assert_eq!(table.get(w).unwrap(), None);
        table.remove(w).unwrap();
    }

    #[test]
    fn test_global_capacity() {
        let mut heap = Heap::new(16);
        let table = GlobalRefTable::new(1);
        table.new_ref(alloc(&mut heap), false).unwrap();
        let err = table.new_ref(alloc(&mut heap), false).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::OutOfMemory);
    }
}

//! NapiRef — the opaque reference handle
//!
//! A reference is a packed u64: kind discriminant, frame/table generation,
//! and slot index into the engine's reference storage. Native code treats it
//! as fully opaque; the engine decodes it with total, checked conversions.
//! There is no pointer inside — a stale handle can never be dereferenced,
//! only rejected.
//!
//! # Encoding
//!
//! ```text
//! bits 62..64  kind       (Stack | Local | Global | Weak)
//! bits 32..62  generation (frame or table-slot generation)
//! bits  0..32  slot       (index into the owning storage)
//! ```

use thiserror::Error;

const KIND_SHIFT: u64 = 62;
const GEN_SHIFT: u64 = 32;
const GEN_MASK: u64 = 0x3FFF_FFFF;
const SLOT_MASK: u64 = 0xFFFF_FFFF;

/// Lifetime class of a reference.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RefKind {
    /// Created in the entry frame a managed-code transition establishes;
    /// valid for the dynamic extent of that transition.
    Stack = 0,
    /// Created in an explicitly pushed local frame; released by the matching
    /// frame pop.
    Local = 1,
    /// Valid until explicitly deleted; a GC root.
    Global = 2,
    /// Valid until explicitly deleted, but does not keep its target alive;
    /// the target may be cleared by the collector at any safepoint.
    Weak = 3,
}

impl RefKind {
    fn from_bits(bits: u64) -> RefKind {
        match bits {
            0 => RefKind::Stack,
            1 => RefKind::Local,
            2 => RefKind::Global,
            _ => RefKind::Weak,
        }
    }
}

/// Error produced when a handle fails structural validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed reference handle: {reason}")]
pub struct RefDecodeError {
    /// What was wrong with the handle
    pub reason: &'static str,
}

/// An opaque, GC-safe handle over a managed object.
///
/// Exclusively minted and interpreted by the engine's reference storage.
/// Copyable; copying the handle does not extend the referent's lifetime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NapiRef(u64);

impl NapiRef {
    /// Pack a reference from its parts. Engine-internal callers only;
    /// native code receives handles, it never forges them.
    #[inline]
    pub fn pack(kind: RefKind, generation: u32, slot: u32) -> Self {
        debug_assert!(u64::from(generation) <= GEN_MASK);
        NapiRef(
            ((kind as u64) << KIND_SHIFT)
                | ((u64::from(generation) & GEN_MASK) << GEN_SHIFT)
                | u64::from(slot),
        )
    }

    /// The reference's lifetime class.
    #[inline]
    pub fn kind(self) -> RefKind {
        RefKind::from_bits(self.0 >> KIND_SHIFT)
    }

    /// Generation stamp of the frame or table slot that minted this handle.
    #[inline]
    pub fn generation(self) -> u32 {
        ((self.0 >> GEN_SHIFT) & GEN_MASK) as u32
    }

    /// Slot index into the owning storage.
    #[inline]
    pub fn slot(self) -> u32 {
        (self.0 & SLOT_MASK) as u32
    }

    /// Raw bits, for tracing only.
    #[inline]
    pub fn to_bits(self) -> u64 {
        self.0
    }

    /// Rebuild from raw bits. All four kind encodings are valid; zero is
    /// the ABI null encoding and never a handle.
    pub fn from_bits(bits: u64) -> Result<Self, RefDecodeError> {
        if bits == 0 {
            return Err(RefDecodeError {
                reason: "zero bits encode null, not a handle",
            });
        }
        Ok(NapiRef(bits))
    }

    /// True for frame-scoped kinds (Stack or Local).
    #[inline]
    pub fn is_frame_scoped(self) -> bool {
        matches!(self.kind(), RefKind::Stack | RefKind::Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_round_trip() {
        for kind in [RefKind::Stack, RefKind::Local, RefKind::Global, RefKind::Weak] {
            let r = NapiRef::pack(kind, 0x1234_5678 & 0x3FFF_FFFF, 0xDEAD_BEEF);
            assert_eq!(r.kind(), kind);
            assert_eq!(r.generation(), 0x1234_5678 & 0x3FFF_FFFF);
            assert_eq!(r.slot(), 0xDEAD_BEEF);
        }
    }

    #[test]
    fn test_from_bits_total() {
        // Every kind bit pattern decodes to a valid kind
        let r = NapiRef::pack(RefKind::Weak, 7, 42);
        let r2 = NapiRef::from_bits(r.to_bits()).unwrap();
        assert_eq!(r, r2);
    }

    #[test]
    fn test_frame_scoped() {
        assert!(NapiRef::pack(RefKind::Stack, 0, 0).is_frame_scoped());
        assert!(NapiRef::pack(RefKind::Local, 0, 0).is_frame_scoped());
        assert!(!NapiRef::pack(RefKind::Global, 0, 0).is_frame_scoped());
        assert!(!NapiRef::pack(RefKind::Weak, 0, 0).is_frame_scoped());
    }
}

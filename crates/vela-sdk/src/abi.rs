//! ArgReader / ArgWriter — the trampoline slot contract
//!
//! The architecture-specific entry trampoline receives arguments in
//! registers and stack slots. The portable core never sees that encoding;
//! it consumes a sequential [`ArgReader`] and produces its result through an
//! [`ArgWriter`]. Each target architecture implements the pair over its own
//! register/stack layout; [`SlotBuffer`] is the portable implementation used
//! by hosts without a hand-written trampoline and by tests.
//!
//! Floating point values cross this seam as reinterpreted same-width integer
//! bits (`f32::to_bits` / `f64::to_bits`), never value-converted.

use thiserror::Error;

/// Error produced when a reader runs out of slots.
///
/// A trampoline that underflows its argument area indicates an ABI mismatch
/// between caller and method descriptor; the engine treats it as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("argument slot underflow at index {index}")]
pub struct SlotUnderflow {
    /// Slot index of the failed read
    pub index: usize,
}

/// Sequential source of ABI argument slots.
///
/// Integral types narrower than 32 bits are widened to a full slot by the
/// native calling convention; the reader surfaces them as the widened slot
/// and the marshaller truncates per the method's shorty.
pub trait ArgReader {
    /// Read one 32-bit slot (bool/char/byte/short/int, widened).
    fn read_u32(&mut self) -> Result<u32, SlotUnderflow>;

    /// Read one 64-bit slot (long, or double as IEEE bits).
    fn read_u64(&mut self) -> Result<u64, SlotUnderflow>;

    /// Read one reference slot (an opaque handle's raw bits; 0 is null).
    fn read_ref_bits(&mut self) -> Result<u64, SlotUnderflow>;
}

/// Sequential sink for the ABI return slot.
pub trait ArgWriter {
    /// Write a 32-bit result slot.
    fn write_u32(&mut self, v: u32);

    /// Write a 64-bit result slot.
    fn write_u64(&mut self, v: u64);

    /// Write a reference result slot (raw handle bits; 0 is null).
    fn write_ref_bits(&mut self, v: u64);
}

/// Portable slot buffer implementing both sides of the contract.
///
/// Every slot is stored as a u64; 32-bit reads consume a whole slot, as a
/// register-based convention would.
#[derive(Debug, Default, Clone)]
pub struct SlotBuffer {
    slots: Vec<u64>,
    cursor: usize,
}

impl SlotBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a 32-bit slot (widened).
    pub fn push_u32(&mut self, v: u32) -> &mut Self {
        self.slots.push(u64::from(v));
        self
    }

    /// Append a 64-bit slot.
    pub fn push_u64(&mut self, v: u64) -> &mut Self {
        self.slots.push(v);
        self
    }

    /// Append an f32 slot as its IEEE bit pattern.
    pub fn push_f32(&mut self, v: f32) -> &mut Self {
        self.push_u32(v.to_bits())
    }

    /// Append an f64 slot as its IEEE bit pattern.
    pub fn push_f64(&mut self, v: f64) -> &mut Self {
        self.push_u64(v.to_bits())
    }

    /// Append a reference slot from raw handle bits (0 for null).
    pub fn push_ref_bits(&mut self, v: u64) -> &mut Self {
        self.slots.push(v);
        self
    }

    /// Number of slots not yet consumed.
    pub fn remaining(&self) -> usize {
        self.slots.len().saturating_sub(self.cursor)
    }

    fn take(&mut self) -> Result<u64, SlotUnderflow> {
        let index = self.cursor;
        let v = self.slots.get(index).copied().ok_or(SlotUnderflow { index })?;
        self.cursor += 1;
        Ok(v)
    }
}

impl ArgReader for SlotBuffer {
    fn read_u32(&mut self) -> Result<u32, SlotUnderflow> {
        Ok(self.take()? as u32)
    }

    fn read_u64(&mut self) -> Result<u64, SlotUnderflow> {
        self.take()
    }

    fn read_ref_bits(&mut self) -> Result<u64, SlotUnderflow> {
        self.take()
    }
}

impl ArgWriter for SlotBuffer {
    fn write_u32(&mut self, v: u32) {
        self.slots.push(u64::from(v));
    }

    fn write_u64(&mut self, v: u64) {
        self.slots.push(v);
    }

    fn write_ref_bits(&mut self, v: u64) {
        self.slots.push(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_buffer_sequential_reads() {
        let mut buf = SlotBuffer::new();
        buf.push_u32(41).push_u64(1 << 40).push_f32(1.5);

        assert_eq!(buf.read_u32().unwrap(), 41);
        assert_eq!(buf.read_u64().unwrap(), 1 << 40);
        assert_eq!(f32::from_bits(buf.read_u32().unwrap()), 1.5);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_slot_buffer_underflow() {
        let mut buf = SlotBuffer::new();
        buf.push_u32(1);
        buf.read_u32().unwrap();
        let err = buf.read_u32().unwrap_err();
        assert_eq!(err.index, 1);
    }

    #[test]
    fn test_float_bits_round_trip() {
        let mut buf = SlotBuffer::new();
        buf.push_f64(-0.25);
        assert_eq!(f64::from_bits(buf.read_u64().unwrap()), -0.25);
    }
}

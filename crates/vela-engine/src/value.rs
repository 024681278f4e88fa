//! Invocation values
//!
//! [`Value`] is the tagged union the marshaller produces and the invoker
//! consumes: one slot per receiver/parameter, transient for the duration of
//! a single invocation. Floating point slots hold the IEEE bit pattern of
//! the source value, reinterpreted, never value-converted — the invoker
//! stores every slot uniformly and only the final consumer reinterprets.
//!
//! Reference slots hold raw object pointers, not GC-tracked handles. A
//! `Value` sequence must therefore never outlive its invocation, and no
//! GC-triggering operation may occur between extraction and dispatch.

use crate::object::ObjPtr;

/// One invocation argument or result slot.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Value {
    /// Boolean slot
    Bool(bool),
    /// 8-bit signed slot
    I8(i8),
    /// 8-bit unsigned slot
    U8(u8),
    /// 16-bit signed slot
    I16(i16),
    /// 16-bit unsigned slot (managed char)
    U16(u16),
    /// 32-bit signed slot
    I32(i32),
    /// 32-bit unsigned slot
    U32(u32),
    /// 64-bit signed slot
    I64(i64),
    /// 64-bit unsigned slot
    U64(u64),
    /// 32-bit float slot, held as IEEE bits
    F32(u32),
    /// 64-bit float slot, held as IEEE bits
    F64(u64),
    /// Reference slot holding a raw object pointer; `None` is managed null
    Ref(Option<ObjPtr>),
}

impl Value {
    /// Build a float slot from an `f32`, reinterpreting to bits.
    #[inline]
    pub fn from_f32(v: f32) -> Self {
        Value::F32(v.to_bits())
    }

    /// Build a float slot from an `f64`, reinterpreting to bits.
    #[inline]
    pub fn from_f64(v: f64) -> Self {
        Value::F64(v.to_bits())
    }

    /// Read back an `f32` slot.
    #[inline]
    pub fn as_f32(self) -> Option<f32> {
        match self {
            Value::F32(bits) => Some(f32::from_bits(bits)),
            _ => None,
        }
    }

    /// Read back an `f64` slot.
    #[inline]
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Value::F64(bits) => Some(f64::from_bits(bits)),
            _ => None,
        }
    }

    /// Read back an `i32` slot.
    #[inline]
    pub fn as_i32(self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(v),
            _ => None,
        }
    }

    /// Read back an `i64` slot.
    #[inline]
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Read back a boolean slot.
    #[inline]
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Read back a reference slot.
    #[inline]
    pub fn as_ref_ptr(self) -> Option<Option<ObjPtr>> {
        match self {
            Value::Ref(p) => Some(p),
            _ => None,
        }
    }

    /// True if this is a reference slot.
    #[inline]
    pub fn is_ref(self) -> bool {
        matches!(self, Value::Ref(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_bits_reinterpreted() {
        let v = Value::from_f32(1.5);
        assert_eq!(v, Value::F32(1.5f32.to_bits()));
        assert_eq!(v.as_f32(), Some(1.5));

        let d = Value::from_f64(-2.25);
        assert_eq!(d.as_f64(), Some(-2.25));
    }

    #[test]
    fn test_nan_bits_preserved() {
        // A payload-carrying NaN must round-trip bit-exact
        let bits = 0x7FC0_DEAD_u32;
        let v = Value::F32(bits);
        assert_eq!(v.as_f32().unwrap().to_bits(), bits);
    }

    #[test]
    fn test_accessor_mismatch() {
        assert_eq!(Value::I32(3).as_f32(), None);
        assert_eq!(Value::Bool(true).as_i32(), None);
    }
}

//! NapiValue — the typed argument union
//!
//! The flat-array form of native call arguments: one `NapiValue` per declared
//! parameter, in declaration order. The engine's marshaller checks each
//! element against the method's shorty; a variant/tag mismatch is a caller
//! contract violation, not user input.

use crate::reference::NapiRef;

/// One argument slot in a flat native argument array.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum NapiValue {
    /// Boolean parameter
    Bool(bool),
    /// 8-bit signed integer parameter
    Byte(i8),
    /// 16-bit signed integer parameter
    Short(i16),
    /// 16-bit unsigned character parameter
    Char(u16),
    /// 32-bit signed integer parameter
    Int(i32),
    /// 64-bit signed integer parameter
    Long(i64),
    /// 32-bit floating point parameter
    Float(f32),
    /// 64-bit floating point parameter
    Double(f64),
    /// Reference parameter; `None` is the managed null
    Ref(Option<NapiRef>),
}

impl NapiValue {
    /// Short tag name, for diagnostics.
    pub fn tag_name(&self) -> &'static str {
        match self {
            NapiValue::Bool(_) => "bool",
            NapiValue::Byte(_) => "byte",
            NapiValue::Short(_) => "short",
            NapiValue::Char(_) => "char",
            NapiValue::Int(_) => "int",
            NapiValue::Long(_) => "long",
            NapiValue::Float(_) => "float",
            NapiValue::Double(_) => "double",
            NapiValue::Ref(_) => "ref",
        }
    }
}

impl From<bool> for NapiValue {
    fn from(v: bool) -> Self {
        NapiValue::Bool(v)
    }
}

impl From<i32> for NapiValue {
    fn from(v: i32) -> Self {
        NapiValue::Int(v)
    }
}

impl From<i64> for NapiValue {
    fn from(v: i64) -> Self {
        NapiValue::Long(v)
    }
}

impl From<f32> for NapiValue {
    fn from(v: f32) -> Self {
        NapiValue::Float(v)
    }
}

impl From<f64> for NapiValue {
    fn from(v: f64) -> Self {
        NapiValue::Double(v)
    }
}

impl From<Option<NapiRef>> for NapiValue {
    fn from(v: Option<NapiRef>) -> Self {
        NapiValue::Ref(v)
    }
}

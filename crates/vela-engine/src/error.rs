//! Managed exception types
//!
//! Errors detected in this layer travel one of two ways: deferred onto the
//! active transition guard and raised as a managed exception at scope exit,
//! or returned as a narrow status to the native caller when no managed
//! context exists yet. Internal contract violations (unknown shorty tag at an
//! ABI seam, argument count mismatch) are build defects and panic instead.

use thiserror::Error;

/// The closed set of managed exception classes this layer can raise.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// A null reference where a non-null one is required
    NullPointer,
    /// The operation is not permitted in the current execution context
    /// (e.g. coroutine switching is disabled)
    InvalidOperation,
    /// A method could not be resolved or did not pass verification
    Verification,
    /// Allocation failure, frame/table capacity exhaustion, or scheduler
    /// at capacity
    OutOfMemory,
    /// A stale or malformed reference handle
    InvalidReference,
    /// Array region access out of bounds
    ArrayIndexOutOfBounds,
    /// String region access out of bounds
    StringIndexOutOfBounds,
    /// Element type mismatch on a reference-array store
    ArrayStore,
}

impl ExceptionKind {
    /// Managed class descriptor of this exception kind.
    pub fn descriptor(self) -> &'static str {
        match self {
            ExceptionKind::NullPointer => "std/core/NullPointerError",
            ExceptionKind::InvalidOperation => "std/core/InvalidOperationError",
            ExceptionKind::Verification => "std/core/VerificationError",
            ExceptionKind::OutOfMemory => "std/core/OutOfMemoryError",
            ExceptionKind::InvalidReference => "std/core/InvalidReferenceError",
            ExceptionKind::ArrayIndexOutOfBounds => "std/core/ArrayIndexOutOfBoundsError",
            ExceptionKind::StringIndexOutOfBounds => "std/core/StringIndexOutOfBoundsError",
            ExceptionKind::ArrayStore => "std/core/ArrayStoreError",
        }
    }
}

/// A managed exception produced by the interop layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}: {message}", kind.descriptor())]
pub struct VelaException {
    /// Exception class
    pub kind: ExceptionKind,
    /// Human-readable detail message
    pub message: String,
}

impl VelaException {
    /// Create an exception with the given kind and message.
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a null-pointer exception.
    pub fn null_pointer(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::NullPointer, message)
    }

    /// Shorthand for an out-of-memory exception.
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::OutOfMemory, message)
    }

    /// Shorthand for a stale/invalid reference exception.
    pub fn invalid_reference(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::InvalidReference, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_display() {
        let e = VelaException::new(ExceptionKind::OutOfMemory, "could not allocate 5 slots");
        let s = e.to_string();
        assert!(s.contains("OutOfMemoryError"));
        assert!(s.contains("could not allocate 5 slots"));
    }
}

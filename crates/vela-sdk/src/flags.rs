//! Native method flags and signature prefixes
//!
//! A registered native may opt into a tighter calling convention:
//!
//! - *fast* — the entry point is statically known to run in managed-code
//!   context already; the full transition guard is asserted, not performed.
//! - *critical* — additionally forgoes the environment handle and the
//!   receiver/class argument entirely; no reference-frame machinery at all.
//!
//! The convention is selected by prefixing the registered signature string
//! with [`FAST_PREFIX`] or [`CRITICAL_PREFIX`].

/// Signature prefix selecting the fast calling convention.
pub const FAST_PREFIX: &str = "#F$";

/// Signature prefix selecting the critical calling convention.
pub const CRITICAL_PREFIX: &str = "#C$";

/// Calling-convention flags of a registered native method.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct NativeFlags {
    /// Entry is statically known to run in managed context
    pub fast: bool,
    /// No environment handle, no receiver/class argument
    pub critical: bool,
}

impl NativeFlags {
    /// Strip a convention prefix from a signature string, returning the
    /// flags it selects and the bare signature.
    ///
    /// Critical natives are also fast: they never perform the transition.
    pub fn strip_prefix(signature: &str) -> (NativeFlags, &str) {
        if let Some(rest) = signature.strip_prefix(CRITICAL_PREFIX) {
            (
                NativeFlags {
                    fast: true,
                    critical: true,
                },
                rest,
            )
        } else if let Some(rest) = signature.strip_prefix(FAST_PREFIX) {
            (
                NativeFlags {
                    fast: true,
                    critical: false,
                },
                rest,
            )
        } else {
            (NativeFlags::default(), signature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fast_prefix() {
        let (flags, sig) = NativeFlags::strip_prefix("#F$IZ:J");
        assert!(flags.fast);
        assert!(!flags.critical);
        assert_eq!(sig, "IZ:J");
    }

    #[test]
    fn test_strip_critical_prefix() {
        let (flags, sig) = NativeFlags::strip_prefix("#C$II:I");
        assert!(flags.fast);
        assert!(flags.critical);
        assert_eq!(sig, "II:I");
    }

    #[test]
    fn test_no_prefix() {
        let (flags, sig) = NativeFlags::strip_prefix("I:I");
        assert_eq!(flags, NativeFlags::default());
        assert_eq!(sig, "I:I");
    }
}

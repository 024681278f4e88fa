//! Status codes returned across the native boundary

/// Result status of a NAPI operation.
///
/// A deliberately small, closed set: detailed failure information travels
/// through the managed exception channel, never through the status code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i32)]
pub enum NapiStatus {
    /// Operation succeeded
    Ok = 0,
    /// Generic failure
    Error = 1,
    /// An argument was invalid (null where non-null required, bad handle)
    InvalidArgs = 2,
    /// An exception is already pending on this execution context
    PendingError = 3,
}

impl NapiStatus {
    /// True if the status is [`NapiStatus::Ok`]
    #[inline]
    pub fn is_ok(self) -> bool {
        self == NapiStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_ok() {
        assert!(NapiStatus::Ok.is_ok());
        assert!(!NapiStatus::Error.is_ok());
        assert!(!NapiStatus::InvalidArgs.is_ok());
        assert!(!NapiStatus::PendingError.is_ok());
    }
}

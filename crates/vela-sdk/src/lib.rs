//! Vela Native Interop SDK
//!
//! This crate is the surface a native extension compiles against. It carries
//! no engine internals — only the ABI-level vocabulary shared between native
//! code and the VM:
//!
//! - [`NapiStatus`] — the closed status set returned across the boundary
//! - [`NapiRef`] — the opaque, GC-safe reference handle
//! - [`NapiValue`] — the typed argument union for flat argument arrays
//! - [`NativeFlags`] — fast/critical calling-convention flags and the
//!   `#F$` / `#C$` signature prefixes selecting them
//! - [`ArgReader`] / [`ArgWriter`] — the trampoline's sequential slot
//!   contract, with [`SlotBuffer`] as the portable implementation
//!
//! Raw language panics never cross the boundary; everything here is plain
//! data plus total, checked conversions.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod abi;
mod flags;
mod reference;
mod status;
mod value;

pub use abi::{ArgReader, ArgWriter, SlotBuffer, SlotUnderflow};
pub use flags::{NativeFlags, CRITICAL_PREFIX, FAST_PREFIX};
pub use reference::{NapiRef, RefDecodeError, RefKind};
pub use status::NapiStatus;
pub use value::NapiValue;

/// Version constant reported by the interop interface.
pub const NAPI_VERSION_1_0: i32 = 0x0001_0000;

//! Native entry trampoline contract
//!
//! The architecture-specific trampoline hands the portable core a method
//! identifier plus sequential ABI slots. [`native_entry`] is that portable
//! core: transition guard, its own local frame, shorty-directed slot
//! decoding, invocation, and the return slot written back through the
//! caller's [`ArgWriter`]. Failures come back as a narrow status; the
//! exception itself is deferred onto the context.

use crate::class::{Method, MethodId};
use crate::env::NapiEnv;
use crate::error::VelaException;
use crate::guard::ScopedManagedCode;
use crate::invoke::{invoke, InvokeResult};
use crate::marshal::get_arg_values_abi;
use crate::value::Value;
use vela_sdk::{ArgReader, ArgWriter, NapiRef, NapiStatus};

/// Portable core of the native entry trampoline.
pub fn native_entry(
    env: &mut NapiEnv,
    method: MethodId,
    reader: &mut dyn ArgReader,
    writer: &mut dyn ArgWriter,
) -> NapiStatus {
    if env.has_pending_exception() {
        return NapiStatus::PendingError;
    }
    let Some(method) = env.vm().classes().read().method(method) else {
        return NapiStatus::InvalidArgs;
    };

    let mut guard = ScopedManagedCode::new(env);
    match entry_in(&mut guard, &method, reader, writer) {
        Ok(()) => NapiStatus::Ok,
        Err(exc) => {
            guard.defer_exception(exc);
            NapiStatus::Error
        }
    }
}

fn entry_in(
    guard: &mut ScopedManagedCode<'_>,
    method: &Method,
    reader: &mut dyn ArgReader,
    writer: &mut dyn ArgWriter,
) -> Result<(), VelaException> {
    // A frame of our own: everything homed during the call dies on exit,
    // except the one promoted result reference
    guard
        .env_mut()
        .locals_mut()
        .push_frame(method.shorty.num_params() + 2)?;

    let result = decode_and_invoke(guard, method, reader);

    match result {
        Ok(InvokeResult::Void) => {
            guard.env_mut().locals_mut().pop_frame(None)?;
            Ok(())
        }
        Ok(InvokeResult::Prim(v)) => {
            guard.env_mut().locals_mut().pop_frame(None)?;
            write_prim(writer, v);
            Ok(())
        }
        Ok(InvokeResult::Ref(r)) => {
            let promoted = guard.env_mut().locals_mut().pop_frame(r)?;
            writer.write_ref_bits(promoted.map_or(0, NapiRef::to_bits));
            Ok(())
        }
        Err(exc) => {
            let _ = guard.env_mut().locals_mut().pop_frame(None);
            Err(exc)
        }
    }
}

fn decode_and_invoke(
    guard: &mut ScopedManagedCode<'_>,
    method: &Method,
    reader: &mut dyn ArgReader,
) -> Result<InvokeResult, VelaException> {
    let mut values = Vec::with_capacity(method.shorty.num_params() + 1);
    if !method.is_static {
        let bits = reader
            .read_ref_bits()
            .unwrap_or_else(|e| panic!("trampoline argument area underflow: {e}"));
        let receiver = if bits == 0 {
            None
        } else {
            let r = NapiRef::from_bits(bits)
                .map_err(|e| VelaException::invalid_reference(e.to_string()))?;
            guard.to_internal(Some(r))?
        };
        values.push(Value::Ref(receiver));
    }
    values.extend(get_arg_values_abi(guard, &method.shorty, reader)?);
    invoke(guard, method, &values)
}

fn write_prim(writer: &mut dyn ArgWriter, v: Value) {
    match v {
        Value::Bool(v) => writer.write_u32(u32::from(v)),
        // Narrow integers are widened to a full slot, sign-extended
        Value::I8(v) => writer.write_u32(v as i32 as u32),
        Value::U8(v) => writer.write_u32(u32::from(v)),
        Value::I16(v) => writer.write_u32(v as i32 as u32),
        Value::U16(v) => writer.write_u32(u32::from(v)),
        Value::I32(v) => writer.write_u32(v as u32),
        Value::U32(v) => writer.write_u32(v),
        Value::I64(v) => writer.write_u64(v as u64),
        Value::U64(v) => writer.write_u64(v),
        Value::F32(bits) => writer.write_u32(bits),
        Value::F64(bits) => writer.write_u64(bits),
        Value::Ref(_) => panic!("reference result typed as primitive"),
    }
}

//! Method invocation
//!
//! One entry point, [`invoke`], executes a resolved method over a typed
//! invocation value sequence, under an active managed-code guard. Managed
//! bodies run through the interpreter seam; native bodies are dispatched per
//! their registered calling convention (standard, fast, critical).
//!
//! Reference results are homed into the caller's current local frame before
//! returning, so the raw pointer a body produced is never the only thing
//! keeping its object alive.

use crate::class::{Method, MethodBody, NativeImpl};
use crate::env::ExecState;
use crate::error::{ExceptionKind, VelaException};
use crate::guard::{FastNativeScope, ScopedManagedCode};
use crate::shorty::TypeTag;
use crate::value::Value;
use vela_sdk::{NapiRef, NapiValue};

/// Typed result of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeResult {
    /// Void method completed
    Void,
    /// Primitive result slot
    Prim(Value),
    /// Reference result, homed as a frame-scoped handle (`None` is null)
    Ref(Option<NapiRef>),
}

/// Execute `method` over `args` (receiver first for instance methods).
pub fn invoke(
    guard: &mut ScopedManagedCode<'_>,
    method: &Method,
    args: &[Value],
) -> Result<InvokeResult, VelaException> {
    if !method.verified {
        return Err(VelaException::new(
            ExceptionKind::Verification,
            format!("method {} failed or skipped verification", method.name),
        ));
    }
    match &method.body {
        MethodBody::Abstract => Err(VelaException::new(
            ExceptionKind::Verification,
            format!("abstract method {} invoked without resolution", method.name),
        )),
        MethodBody::Managed(f) => {
            let vm = guard.env().vm().clone();
            let ret = f(&vm, args)?;
            type_result(guard, method, ret)
        }
        MethodBody::Native { flags, imp } => dispatch_native(guard, method, args, *flags, imp),
    }
}

fn type_result(
    guard: &mut ScopedManagedCode<'_>,
    method: &Method,
    ret: Value,
) -> Result<InvokeResult, VelaException> {
    match method.shorty.return_tag() {
        TypeTag::Void => Ok(InvokeResult::Void),
        TypeTag::Ref => match ret {
            Value::Ref(None) => Ok(InvokeResult::Ref(None)),
            Value::Ref(Some(ptr)) => Ok(InvokeResult::Ref(Some(guard.add_local_ref(ptr)?))),
            other => panic!(
                "method {} returned {other:?} where a reference is declared",
                method.name
            ),
        },
        _ => Ok(InvokeResult::Prim(ret)),
    }
}

fn dispatch_native(
    guard: &mut ScopedManagedCode<'_>,
    method: &Method,
    args: &[Value],
    flags: vela_sdk::NativeFlags,
    imp: &NativeImpl,
) -> Result<InvokeResult, VelaException> {
    // Split the receiver off and re-home every reference slot as a handle
    // the native side can hold across its own boundary calls.
    let (receiver, declared) = if method.is_static {
        let mirror = guard
            .env()
            .vm()
            .class_mirror(method.class)
            .ok_or_else(|| {
                VelaException::new(
                    ExceptionKind::Verification,
                    format!("class of static native {} has no mirror", method.name),
                )
            })?;
        (Some(guard.add_local_ref(mirror)?), args)
    } else {
        let ptr = args
            .first()
            .and_then(|v| v.as_ref_ptr())
            .unwrap_or_else(|| panic!("instance native {} missing receiver slot", method.name));
        let r = match ptr {
            Some(p) => Some(guard.add_local_ref(p)?),
            None => {
                return Err(VelaException::null_pointer(format!(
                    "null receiver for native {}",
                    method.name
                )))
            }
        };
        (r, &args[1..])
    };

    let mut napi_args = Vec::with_capacity(declared.len());
    for v in declared {
        napi_args.push(to_napi_value(guard, *v)?);
    }

    let ret = match imp {
        NativeImpl::Critical(f) => {
            // Critical convention: no environment, no receiver, no managed
            // operations. Direct call.
            f(&napi_args)?
        }
        NativeImpl::Standard(f) if flags.fast => {
            let f = f.clone();
            let mut scope = FastNativeScope::new(guard.env_mut());
            f(scope.env_mut(), receiver, &napi_args)?
        }
        NativeImpl::Standard(f) => {
            // Full convention: the body observes native state and makes its
            // own managed transitions through the NAPI surface.
            let f = f.clone();
            let env = guard.env_mut();
            env.set_state(ExecState::Native);
            let ret = f(env, receiver, &napi_args);
            env.set_state(ExecState::Managed);
            ret?
        }
    };

    match method.shorty.return_tag() {
        TypeTag::Void => Ok(InvokeResult::Void),
        TypeTag::Ref => match ret {
            NapiValue::Ref(r) => Ok(InvokeResult::Ref(r)),
            other => panic!(
                "native {} returned {} where a reference is declared",
                method.name,
                other.tag_name()
            ),
        },
        _ => Ok(InvokeResult::Prim(from_napi_prim(ret))),
    }
}

fn to_napi_value(
    guard: &mut ScopedManagedCode<'_>,
    v: Value,
) -> Result<NapiValue, VelaException> {
    Ok(match v {
        Value::Bool(v) => NapiValue::Bool(v),
        Value::I8(v) => NapiValue::Byte(v),
        Value::U8(v) => NapiValue::Byte(v as i8),
        Value::I16(v) => NapiValue::Short(v),
        Value::U16(v) => NapiValue::Char(v),
        Value::I32(v) => NapiValue::Int(v),
        Value::U32(v) => NapiValue::Int(v as i32),
        Value::I64(v) => NapiValue::Long(v),
        Value::U64(v) => NapiValue::Long(v as i64),
        Value::F32(bits) => NapiValue::Float(f32::from_bits(bits)),
        Value::F64(bits) => NapiValue::Double(f64::from_bits(bits)),
        Value::Ref(None) => NapiValue::Ref(None),
        Value::Ref(Some(ptr)) => NapiValue::Ref(Some(guard.add_local_ref(ptr)?)),
    })
}

fn from_napi_prim(v: NapiValue) -> Value {
    match v {
        NapiValue::Bool(v) => Value::Bool(v),
        NapiValue::Byte(v) => Value::I8(v),
        NapiValue::Short(v) => Value::I16(v),
        NapiValue::Char(v) => Value::U16(v),
        NapiValue::Int(v) => Value::I32(v),
        NapiValue::Long(v) => Value::I64(v),
        NapiValue::Float(v) => Value::from_f32(v),
        NapiValue::Double(v) => Value::from_f64(v),
        NapiValue::Ref(_) => panic!("reference result typed as primitive"),
    }
}

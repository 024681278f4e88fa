//! Argument marshalling
//!
//! Three producers of invocation [`Value`] sequences, all directed by the
//! method's shorty:
//!
//! - [`get_arg_values`] decodes a flat [`NapiValue`] array,
//! - [`get_arg_values_abi`] decodes raw ABI slots from an [`ArgReader`],
//! - [`create_args_vector`] unboxes a managed object-argument array for a
//!   coroutine launch.
//!
//! A count or tag mismatch between caller and shorty is a contract violation
//! of the build, not user input, and panics. Stale handles and null boxed
//! primitives are runtime conditions and surface as managed exceptions.

use crate::error::{ExceptionKind, VelaException};
use crate::guard::ScopedManagedCode;
use crate::object::{Heap, ObjBody, ObjPtr};
use crate::shorty::{Shorty, TypeTag};
use crate::value::Value;
use vela_sdk::{ArgReader, NapiRef, NapiValue};

/// Decode a flat argument array against `shorty`.
pub fn get_arg_values(
    guard: &ScopedManagedCode<'_>,
    shorty: &Shorty,
    args: &[NapiValue],
) -> Result<Vec<Value>, VelaException> {
    if args.len() != shorty.num_params() {
        panic!(
            "argument count mismatch: {} supplied, shorty declares {}",
            args.len(),
            shorty.num_params()
        );
    }
    let mut out = Vec::with_capacity(args.len());
    for (tag, arg) in shorty.params().iter().zip(args) {
        let v = match (*tag, *arg) {
            (TypeTag::Bool, NapiValue::Bool(v)) => Value::Bool(v),
            (TypeTag::I8, NapiValue::Byte(v)) => Value::I8(v),
            (TypeTag::U8, NapiValue::Byte(v)) => Value::U8(v as u8),
            (TypeTag::I16, NapiValue::Short(v)) => Value::I16(v),
            (TypeTag::U16, NapiValue::Char(v)) => Value::U16(v),
            (TypeTag::I32, NapiValue::Int(v)) => Value::I32(v),
            (TypeTag::U32, NapiValue::Int(v)) => Value::U32(v as u32),
            (TypeTag::I64, NapiValue::Long(v)) => Value::I64(v),
            (TypeTag::U64, NapiValue::Long(v)) => Value::U64(v as u64),
            (TypeTag::F32, NapiValue::Float(v)) => Value::from_f32(v),
            (TypeTag::F64, NapiValue::Double(v)) => Value::from_f64(v),
            (TypeTag::Ref, NapiValue::Ref(r)) => Value::Ref(guard.to_internal(r)?),
            (tag, arg) => panic!(
                "argument tag mismatch: {} supplied where shorty declares {tag:?}",
                arg.tag_name()
            ),
        };
        out.push(v);
    }
    Ok(out)
}

/// Decode raw ABI slots against `shorty`.
///
/// Integral types narrower than 32 bits arrive widened to a full slot and
/// are truncated here; floats arrive as reinterpreted bits and stay bits.
pub fn get_arg_values_abi(
    guard: &ScopedManagedCode<'_>,
    shorty: &Shorty,
    reader: &mut dyn ArgReader,
) -> Result<Vec<Value>, VelaException> {
    let mut out = Vec::with_capacity(shorty.num_params());
    for tag in shorty.params() {
        let v = match tag {
            TypeTag::Void => unreachable!("void parameter tag"),
            TypeTag::Bool => Value::Bool(read32(reader) as u8 != 0),
            TypeTag::I8 => Value::I8(read32(reader) as i8),
            TypeTag::U8 => Value::U8(read32(reader) as u8),
            TypeTag::I16 => Value::I16(read32(reader) as i16),
            TypeTag::U16 => Value::U16(read32(reader) as u16),
            TypeTag::I32 => Value::I32(read32(reader) as i32),
            TypeTag::U32 => Value::U32(read32(reader)),
            TypeTag::I64 => Value::I64(read64(reader) as i64),
            TypeTag::U64 => Value::U64(read64(reader)),
            TypeTag::F32 => Value::F32(read32(reader)),
            TypeTag::F64 => Value::F64(read64(reader)),
            TypeTag::Ref => {
                let bits = match reader.read_ref_bits() {
                    Ok(bits) => bits,
                    Err(e) => panic!("trampoline argument area underflow: {e}"),
                };
                if bits == 0 {
                    Value::Ref(None)
                } else {
                    let r = NapiRef::from_bits(bits).map_err(|e| {
                        VelaException::invalid_reference(e.to_string())
                    })?;
                    Value::Ref(guard.to_internal(Some(r))?)
                }
            }
        };
        out.push(v);
    }
    Ok(out)
}

fn read32(reader: &mut dyn ArgReader) -> u32 {
    match reader.read_u32() {
        Ok(v) => v,
        Err(e) => panic!("trampoline argument area underflow: {e}"),
    }
}

fn read64(reader: &mut dyn ArgReader) -> u64 {
    match reader.read_u64() {
        Ok(v) => v,
        Err(e) => panic!("trampoline argument area underflow: {e}"),
    }
}

/// Build the invocation sequence for a launch from a managed
/// object-argument array: receiver first (when given), then each argument
/// unboxed per the shorty. A null object where a primitive parameter is
/// declared raises `NullPointer`; a reference parameter passes through.
pub fn create_args_vector(
    heap: &Heap,
    shorty: &Shorty,
    receiver: Option<ObjPtr>,
    args: &[Option<ObjPtr>],
) -> Result<Vec<Value>, VelaException> {
    if args.len() != shorty.num_params() {
        panic!(
            "argument count mismatch: {} supplied, shorty declares {}",
            args.len(),
            shorty.num_params()
        );
    }
    let mut out = Vec::with_capacity(args.len() + usize::from(receiver.is_some()));
    if let Some(r) = receiver {
        out.push(Value::Ref(Some(r)));
    }
    for (idx, (tag, arg)) in shorty.params().iter().zip(args).enumerate() {
        if *tag == TypeTag::Ref {
            out.push(Value::Ref(*arg));
            continue;
        }
        let ptr = arg.ok_or_else(|| {
            VelaException::null_pointer(format!(
                "null argument {idx} where a {tag:?} value is required"
            ))
        })?;
        let obj = heap.get(ptr).ok_or_else(|| {
            VelaException::invalid_reference(format!("dead argument object at index {idx}"))
        })?;
        let boxed = match &obj.body {
            ObjBody::Boxed(v) => *v,
            _ => {
                return Err(VelaException::new(
                    ExceptionKind::Verification,
                    format!("argument {idx} is not a boxed {tag:?} value"),
                ))
            }
        };
        if !value_matches(boxed, *tag) {
            return Err(VelaException::new(
                ExceptionKind::Verification,
                format!("argument {idx} boxes the wrong type for {tag:?}"),
            ));
        }
        out.push(boxed);
    }
    Ok(out)
}

fn value_matches(v: Value, tag: TypeTag) -> bool {
    matches!(
        (v, tag),
        (Value::Bool(_), TypeTag::Bool)
            | (Value::I8(_), TypeTag::I8)
            | (Value::U8(_), TypeTag::U8)
            | (Value::I16(_), TypeTag::I16)
            | (Value::U16(_), TypeTag::U16)
            | (Value::I32(_), TypeTag::I32)
            | (Value::U32(_), TypeTag::U32)
            | (Value::I64(_), TypeTag::I64)
            | (Value::U64(_), TypeTag::U64)
            | (Value::F32(_), TypeTag::F32)
            | (Value::F64(_), TypeTag::F64)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassId;
    use crate::env::NapiEnv;
    use crate::vm::{Vm, VmOptions};
    use vela_sdk::SlotBuffer;

    fn test_vm() -> std::sync::Arc<Vm> {
        Vm::new(VmOptions::default())
    }

    #[test]
    fn test_union_marshalling() {
        let vm = test_vm();
        let mut env = NapiEnv::new(vm);
        let guard = ScopedManagedCode::new(&mut env);

        let shorty = Shorty::parse("IZF:V").unwrap();
        let vals = get_arg_values(
            &guard,
            &shorty,
            &[
                NapiValue::Int(41),
                NapiValue::Bool(true),
                NapiValue::Float(1.5),
            ],
        )
        .unwrap();

        assert_eq!(
            vals,
            vec![Value::I32(41), Value::Bool(true), Value::F32(1.5f32.to_bits())]
        );
    }

    #[test]
    fn test_union_marshalling_resolves_refs() {
        let vm = test_vm();
        let ptr = vm
            .heap()
            .lock()
            .alloc(ClassId::from_raw(0), ObjBody::Str("s".into()))
            .unwrap();
        let mut env = NapiEnv::new(vm);
        let r = env.locals_mut().new_ref(ptr).unwrap();
        let guard = ScopedManagedCode::new(&mut env);

        let shorty = Shorty::parse("Lstd/core/String;:V").unwrap();
        let vals = get_arg_values(&guard, &shorty, &[NapiValue::Ref(Some(r))]).unwrap();
        assert_eq!(vals, vec![Value::Ref(Some(ptr))]);

        // Managed null passes through
        let vals = get_arg_values(&guard, &shorty, &[NapiValue::Ref(None)]).unwrap();
        assert_eq!(vals, vec![Value::Ref(None)]);
    }

    #[test]
    #[should_panic(expected = "argument count mismatch")]
    fn test_union_count_mismatch_panics() {
        let vm = test_vm();
        let mut env = NapiEnv::new(vm);
        let guard = ScopedManagedCode::new(&mut env);
        let shorty = Shorty::parse("I:V").unwrap();
        let _ = get_arg_values(&guard, &shorty, &[]);
    }

    #[test]
    #[should_panic(expected = "argument tag mismatch")]
    fn test_union_tag_mismatch_panics() {
        let vm = test_vm();
        let mut env = NapiEnv::new(vm);
        let guard = ScopedManagedCode::new(&mut env);
        let shorty = Shorty::parse("I:V").unwrap();
        let _ = get_arg_values(&guard, &shorty, &[NapiValue::Long(1)]);
    }

    #[test]
    fn test_abi_marshalling_widened_and_bits() {
        let vm = test_vm();
        let mut env = NapiEnv::new(vm);
        let guard = ScopedManagedCode::new(&mut env);

        let shorty = Shorty::parse("ZBSIJFD:V").unwrap();
        let mut buf = SlotBuffer::new();
        buf.push_u32(1)
            .push_u32((-2i8 as u8).into())
            .push_u32((-300i16 as u16).into())
            .push_u32(7)
            .push_u64(1 << 40)
            .push_f32(1.5)
            .push_f64(-0.25);

        let vals = get_arg_values_abi(&guard, &shorty, &mut buf).unwrap();
        assert_eq!(
            vals,
            vec![
                Value::Bool(true),
                Value::I8(-2),
                Value::I16(-300),
                Value::I32(7),
                Value::I64(1 << 40),
                Value::F32(1.5f32.to_bits()),
                Value::F64((-0.25f64).to_bits()),
            ]
        );
    }

    #[test]
    fn test_abi_null_ref_slot() {
        let vm = test_vm();
        let mut env = NapiEnv::new(vm);
        let guard = ScopedManagedCode::new(&mut env);

        let shorty = Shorty::parse("Lstd/core/Object;:V").unwrap();
        let mut buf = SlotBuffer::new();
        buf.push_ref_bits(0);
        let vals = get_arg_values_abi(&guard, &shorty, &mut buf).unwrap();
        assert_eq!(vals, vec![Value::Ref(None)]);
    }

    #[test]
    fn test_abi_stale_ref_is_checked() {
        let vm = test_vm();
        let mut env = NapiEnv::new(vm);
        // A handle forged against a frame that never existed
        let stale = NapiRef::pack(vela_sdk::RefKind::Local, 999, 3);
        let guard = ScopedManagedCode::new(&mut env);

        let shorty = Shorty::parse("Lstd/core/Object;:V").unwrap();
        let mut buf = SlotBuffer::new();
        buf.push_ref_bits(stale.to_bits());
        let err = get_arg_values_abi(&guard, &shorty, &mut buf).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::InvalidReference);
    }

    #[test]
    fn test_create_args_vector_unboxes() {
        let vm = test_vm();
        let mut heap = vm.heap().lock();
        let a = heap
            .alloc(ClassId::from_raw(0), ObjBody::Boxed(Value::I32(41)))
            .unwrap();
        let b = heap
            .alloc(ClassId::from_raw(0), ObjBody::Boxed(Value::Bool(true)))
            .unwrap();

        let shorty = Shorty::parse("IZ:I").unwrap();
        let vals = create_args_vector(&heap, &shorty, None, &[Some(a), Some(b)]).unwrap();
        assert_eq!(vals, vec![Value::I32(41), Value::Bool(true)]);
    }

    #[test]
    fn test_create_args_vector_null_primitive() {
        let vm = test_vm();
        let heap = vm.heap().lock();
        let shorty = Shorty::parse("I:V").unwrap();
        let err = create_args_vector(&heap, &shorty, None, &[None]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::NullPointer);
    }

    #[test]
    fn test_create_args_vector_receiver_first() {
        let vm = test_vm();
        let mut heap = vm.heap().lock();
        let recv = heap
            .alloc(ClassId::from_raw(0), ObjBody::Instance { fields: vec![] })
            .unwrap();
        let shorty = Shorty::parse("Lstd/core/Object;:V").unwrap();
        let vals = create_args_vector(&heap, &shorty, Some(recv), &[None]).unwrap();
        assert_eq!(vals, vec![Value::Ref(Some(recv)), Value::Ref(None)]);
    }
}

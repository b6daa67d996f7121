//! The reflection helpers synthesized code calls.
//!
//! Each [`Intrinsic`] behaves like the core library member it stands for, restricted to what
//! rewritten bodies need. Reflection objects are interned per member, so resolving the same
//! token twice yields the same object.

use crate::{
    assembly::{Intrinsic, OpCode},
    emulation::{
        engine::{
            address_value, tagged, untagged, Frame, HeapKind, Reflected, Runtime, StepResult,
            FUNCTION_POINTER_TAG, METHOD_HANDLE_TAG, NULL_REFERENCE_MESSAGE, TYPE_HANDLE_TAG,
        },
        EmValue, EmulationError,
    },
    metadata::token::Token,
    Result,
};

/// Token carried by an `int32` operand pushed with `ldc.i4`
fn token_argument(value: &EmValue) -> Result<Token> {
    let raw = value.as_i32()?;
    Ok(Token::new(u32::from_ne_bytes(raw.to_ne_bytes())))
}

impl Runtime {
    /// Executes a helper call; `constrained` is the type of a preceding `constrained.` prefix
    pub(crate) fn intrinsic(
        &mut self,
        frame: &mut Frame,
        intrinsic: Intrinsic,
        constrained: Option<Token>,
    ) -> Result<StepResult> {
        let arguments = frame.pop_many(intrinsic.pops(), OpCode::Call)?;
        let core = *self.registry.core();

        let result = match intrinsic {
            Intrinsic::ResolveType => {
                let token = token_argument(&arguments[0])?;
                self.registry.type_def(token)?;
                EmValue::ObjectRef(self.reflection_object(Reflected::Type(token))?)
            }
            Intrinsic::ResolveField => {
                let token = token_argument(&arguments[0])?;
                self.registry.field(token)?;
                EmValue::ObjectRef(self.reflection_object(Reflected::Field(token))?)
            }
            Intrinsic::ResolveMethod => {
                let token = token_argument(&arguments[0])?;
                self.registry.method(token)?;
                EmValue::ObjectRef(self.reflection_object(Reflected::Method(token))?)
            }
            Intrinsic::FieldGetValue => {
                let field = self.reflected_field(&arguments[0])?;
                let instance = &arguments[1];
                if !self.registry.field(field)?.is_static() && instance.as_object()?.is_none() {
                    return self.throw_null_reference();
                }
                let value = self.get_field(instance, field)?;
                let field_type = self.field_type(field)?;
                self.box_value(field_type, &value)?
            }
            Intrinsic::FieldSetValue => {
                let field = self.reflected_field(&arguments[0])?;
                let instance = &arguments[1];
                if !self.registry.field(field)?.is_static() && instance.as_object()?.is_none() {
                    return self.throw_null_reference();
                }
                let field_type = self.field_type(field)?;
                let value = if self.registry.is_value_type(field_type) {
                    self.unbox_value(&arguments[2], field_type)?
                } else {
                    arguments[2].clone()
                };
                self.set_field(instance, field, &value)?;
                return Ok(StepResult::Continue);
            }
            Intrinsic::IsInstanceOfType => {
                let ty = self.reflected_type(&arguments[0])?;
                let matches = match arguments[1].as_object()? {
                    Some(object) => {
                        let actual = self.object(object)?.ty;
                        self.is_assignable(actual, ty)?
                    }
                    None => false,
                };
                EmValue::from(matches)
            }
            Intrinsic::CreateArray => {
                let element = self.reflected_type(&arguments[0])?;
                let Ok(length) = usize::try_from(arguments[1].as_i64()?) else {
                    return self.throw_new(core.exception, "Non-negative number required.");
                };
                EmValue::ObjectRef(self.new_array(element, length)?)
            }
            Intrinsic::GetType => {
                let Some(object) = arguments[0].as_object()? else {
                    return self.throw_null_reference();
                };
                let ty = self.object(object)?.ty;
                EmValue::ObjectRef(self.reflection_object(Reflected::Type(ty))?)
            }
            Intrinsic::MemberwiseClone => self.memberwise_clone(&arguments[0], constrained)?,
            Intrinsic::GetMethodHandle => {
                let method = self.reflected_method(&arguments[0])?;
                EmValue::ValueType {
                    ty: core.runtime_method_handle,
                    bytes: tagged(METHOD_HANDLE_TAG, method).to_le_bytes().to_vec(),
                }
            }
            Intrinsic::GetFunctionPointer => {
                let handle = match &arguments[0] {
                    EmValue::ValueType { bytes, .. } if bytes.len() == 8 => {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(bytes);
                        u64::from_le_bytes(raw)
                    }
                    other => self.memory.read_u64(other.as_address()?)?,
                };
                let method = untagged(METHOD_HANDLE_TAG, address_value(handle))
                    .ok_or(EmulationError::InvalidFunctionPointer(handle))?;
                EmValue::NativeInt(tagged(FUNCTION_POINTER_TAG, method))
            }
            Intrinsic::ResolveVirtual => {
                let ty = self.reflected_type(&arguments[0])?;
                let method = self.reflected_method(&arguments[1])?;
                let target = self.resolve_virtual(ty, method)?;
                EmValue::ObjectRef(self.reflection_object(Reflected::Method(target))?)
            }
            Intrinsic::TypeHandleValue => {
                let ty = self.reflected_type(&arguments[0])?;
                EmValue::NativeInt(tagged(TYPE_HANDLE_TAG, ty))
            }
            Intrinsic::FormatString => {
                let format = self.render(&arguments[0])?;
                let first = self.render(&arguments[1])?;
                let second = self.render(&arguments[2])?;
                let text = format.replace("{0}", &first).replace("{1}", &second);
                self.new_string(&text)?
            }
            Intrinsic::NewNullReferenceException => EmValue::ObjectRef(
                self.new_exception(core.null_reference_exception, NULL_REFERENCE_MESSAGE)?,
            ),
            Intrinsic::NewInvalidCastException => {
                let message = self.read_string(&arguments[0]).unwrap_or_default();
                EmValue::ObjectRef(self.new_exception(core.invalid_cast_exception, &message)?)
            }
        };
        frame.push(result);
        Ok(StepResult::Continue)
    }

    fn reflected(&self, value: &EmValue, expected: &'static str) -> Result<Reflected> {
        let address = value.as_object()?.unwrap_or(0);
        match self.objects.get(&address).map(|object| &object.kind) {
            Some(HeapKind::Reflection(reflected)) => Ok(*reflected),
            _ => Err(EmulationError::NotReflectionObject(address, expected).into()),
        }
    }

    fn reflected_type(&self, value: &EmValue) -> Result<Token> {
        match self.reflected(value, "Type")? {
            Reflected::Type(token) => Ok(token),
            _ => Err(EmulationError::NotReflectionObject(value.as_address()?, "Type").into()),
        }
    }

    fn reflected_field(&self, value: &EmValue) -> Result<Token> {
        match self.reflected(value, "FieldInfo")? {
            Reflected::Field(token) => Ok(token),
            _ => Err(EmulationError::NotReflectionObject(value.as_address()?, "FieldInfo").into()),
        }
    }

    fn reflected_method(&self, value: &EmValue) -> Result<Token> {
        match self.reflected(value, "MethodBase")? {
            Reflected::Method(token) => Ok(token),
            _ => Err(EmulationError::NotReflectionObject(value.as_address()?, "MethodBase").into()),
        }
    }

    /// Shallow copy of an object; under `constrained.` a value type receiver is an address
    /// and the copy is a new box
    fn memberwise_clone(&mut self, receiver: &EmValue, constrained: Option<Token>) -> Result<EmValue> {
        let receiver = match constrained {
            Some(ty) if self.registry.is_value_type(ty) => {
                let value = self.read_value(receiver.as_address()?, ty)?;
                return self.box_value(ty, &value);
            }
            Some(_) => match self.memory.read_u64(receiver.as_address()?)? {
                0 => EmValue::Null,
                object => EmValue::ObjectRef(object),
            },
            None => receiver.clone(),
        };
        let Some(object) = receiver.as_object()? else {
            return Err(EmulationError::TypeMismatch {
                expected: "object",
                found: "null",
            }
            .into());
        };
        let original = self.object(object)?.clone();
        let copy = self.allocate_object(original.ty, original.payload_size, original.kind)?;
        let (from, to) = (self.payload(object), self.payload(copy));
        self.memory.copy(from, to, original.payload_size)?;
        Ok(EmValue::ObjectRef(copy))
    }
}

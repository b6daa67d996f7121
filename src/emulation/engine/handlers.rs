//! Per-opcode semantics.
//!
//! [`Runtime::step`] executes one instruction against the current [`Frame`]. Conditions a
//! verifiable program can raise at run time (null dereference, failed cast, index out of
//! range, division by zero) become managed exceptions; everything else is a hard fault.

use crate::{
    assembly::{Immediate, Instruction, Label, OpCode, Operand},
    emulation::{
        engine::{
            address_value, tagged, untagged, ExecutionOutcome, Frame, HeapKind, Runtime, Slot,
            StepResult, DIVIDE_BY_ZERO_MESSAGE, FUNCTION_POINTER_TAG, INDEX_OUT_OF_RANGE_MESSAGE,
            METHOD_HANDLE_TAG, TYPE_HANDLE_TAG,
        },
        ops::{BinaryOp, CompareOp, ConversionType},
        EmValue, EmulationError,
    },
    metadata::{
        members::{MethodSignature, TypeKind},
        token::Token,
    },
    rewrite::INVALID_CAST_FORMAT,
    Error, Result,
};

fn token_operand(instruction: &Instruction) -> Result<Token> {
    instruction.member().ok_or_else(|| {
        EmulationError::InvalidOperand {
            opcode: instruction.opcode,
            expected: "member token",
        }
        .into()
    })
}

fn target_operand(instruction: &Instruction) -> Result<Label> {
    match instruction.operand {
        Operand::Target(label) => Ok(label),
        _ => Err(EmulationError::InvalidOperand {
            opcode: instruction.opcode,
            expected: "branch target",
        }
        .into()),
    }
}

fn index_operand(instruction: &Instruction) -> Result<usize> {
    match instruction.operand {
        Operand::Local(index) | Operand::Argument(index) => Ok(usize::from(index)),
        _ => Err(EmulationError::InvalidOperand {
            opcode: instruction.opcode,
            expected: "variable index",
        }
        .into()),
    }
}

fn signature_operand(instruction: &Instruction) -> Result<&MethodSignature> {
    match &instruction.operand {
        Operand::Signature(signature) => Ok(signature),
        _ => Err(EmulationError::InvalidOperand {
            opcode: instruction.opcode,
            expected: "call-site signature",
        }
        .into()),
    }
}

fn compare_op(opcode: OpCode) -> Option<CompareOp> {
    Some(match opcode {
        OpCode::Beq | OpCode::Ceq => CompareOp::Eq,
        OpCode::BneUn => CompareOp::NeUn,
        OpCode::Blt | OpCode::Clt => CompareOp::Lt,
        OpCode::Bge => CompareOp::Ge,
        OpCode::Cgt => CompareOp::Gt,
        _ => return None,
    })
}

impl Runtime {
    /// Executes one instruction
    pub(crate) fn step(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<StepResult> {
        let opcode = instruction.opcode;
        let constrained = if opcode.is_prefix() {
            None
        } else {
            frame.constrained.take()
        };

        match opcode {
            OpCode::Nop | OpCode::MarkLabel => {}
            OpCode::Constrained => frame.constrained = Some(token_operand(instruction)?),

            OpCode::Ldarg | OpCode::Ldloc => {
                let slot = self.variable(frame, instruction)?;
                let value = self.read_value(slot.address, slot.ty)?;
                frame.push(value);
            }
            OpCode::Ldarga | OpCode::Ldloca => {
                let slot = self.variable(frame, instruction)?;
                frame.push(EmValue::NativeInt(address_value(slot.address)));
            }
            OpCode::Starg | OpCode::Stloc => {
                let slot = self.variable(frame, instruction)?;
                let value = frame.pop(opcode)?;
                self.write_value(slot.address, slot.ty, &value)?;
            }

            OpCode::Ldnull => frame.push(EmValue::Null),
            OpCode::LdcI4 | OpCode::LdcI8 | OpCode::LdcR8 => match instruction.operand {
                Operand::Immediate(Immediate::Int32(value)) => frame.push(EmValue::I32(value)),
                Operand::Immediate(Immediate::Int64(value)) => frame.push(EmValue::I64(value)),
                Operand::Immediate(Immediate::Float64(value)) => frame.push(EmValue::F64(value)),
                _ => {
                    return Err(EmulationError::InvalidOperand {
                        opcode,
                        expected: "immediate",
                    }
                    .into())
                }
            },
            OpCode::Ldstr => {
                let Operand::String(value) = &instruction.operand else {
                    return Err(EmulationError::InvalidOperand {
                        opcode,
                        expected: "string literal",
                    }
                    .into());
                };
                let object = self.literal(value)?;
                frame.push(EmValue::ObjectRef(object));
            }
            OpCode::Dup => {
                let value = frame.peek(opcode)?.clone();
                frame.push(value);
            }
            OpCode::Pop => {
                frame.pop(opcode)?;
            }

            OpCode::Ret => {
                let value = if frame.returns {
                    Some(frame.pop(opcode)?)
                } else {
                    None
                };
                return Ok(StepResult::Return(value));
            }
            OpCode::Br => return Ok(StepResult::Branch(target_operand(instruction)?)),
            OpCode::Brfalse | OpCode::Brtrue => {
                let condition = frame.pop(opcode)?.is_truthy();
                if condition == (opcode == OpCode::Brtrue) {
                    return Ok(StepResult::Branch(target_operand(instruction)?));
                }
            }
            OpCode::Beq | OpCode::BneUn | OpCode::Blt | OpCode::Bge => {
                let right = frame.pop(opcode)?;
                let left = frame.pop(opcode)?;
                let op = compare_op(opcode).ok_or(EmulationError::InvalidOperand {
                    opcode,
                    expected: "comparison",
                })?;
                if left.compare(&right, op)? {
                    return Ok(StepResult::Branch(target_operand(instruction)?));
                }
            }
            OpCode::Ceq | OpCode::Cgt | OpCode::Clt => {
                let right = frame.pop(opcode)?;
                let left = frame.pop(opcode)?;
                let op = compare_op(opcode).ok_or(EmulationError::InvalidOperand {
                    opcode,
                    expected: "comparison",
                })?;
                frame.push(EmValue::from(left.compare(&right, op)?));
            }

            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Rem => {
                let right = frame.pop(opcode)?;
                let left = frame.pop(opcode)?;
                let op = BinaryOp::from_opcode(opcode).ok_or(EmulationError::InvalidOperand {
                    opcode,
                    expected: "arithmetic",
                })?;
                match left.binary_op(&right, op) {
                    Ok(value) => frame.push(value),
                    Err(Error::Emulation(EmulationError::DivideByZero)) => {
                        let exception = self.registry.core().exception;
                        return self.throw_new(exception, DIVIDE_BY_ZERO_MESSAGE);
                    }
                    Err(error) => return Err(error),
                }
            }
            OpCode::Neg => {
                let value = frame.pop(opcode)?.negate()?;
                frame.push(value);
            }
            OpCode::ConvI4 | OpCode::ConvI8 | OpCode::ConvR8 | OpCode::ConvI | OpCode::ConvU => {
                let target = match opcode {
                    OpCode::ConvI4 => ConversionType::I4,
                    OpCode::ConvI8 => ConversionType::I8,
                    OpCode::ConvR8 => ConversionType::R8,
                    _ => ConversionType::NativeInt,
                };
                let value = frame.pop(opcode)?.convert(target)?;
                frame.push(value);
            }

            OpCode::LdindI | OpCode::LdindI4 | OpCode::LdindI8 | OpCode::LdindRef => {
                let address = frame.pop(opcode)?.as_address()?;
                let ty = self.indirect_type(opcode);
                let value = self.read_value(address, ty)?;
                frame.push(value);
            }
            OpCode::StindI | OpCode::StindI4 | OpCode::StindI8 | OpCode::StindRef => {
                let value = frame.pop(opcode)?;
                let address = frame.pop(opcode)?.as_address()?;
                let ty = self.indirect_type(opcode);
                self.write_value(address, ty, &value)?;
            }
            OpCode::Ldobj => {
                let ty = token_operand(instruction)?;
                let address = frame.pop(opcode)?.as_address()?;
                let value = self.read_value(address, ty)?;
                frame.push(value);
            }
            OpCode::Stobj => {
                let ty = token_operand(instruction)?;
                let value = frame.pop(opcode)?;
                let address = frame.pop(opcode)?.as_address()?;
                self.write_value(address, ty, &value)?;
            }
            OpCode::Initobj => {
                let ty = token_operand(instruction)?;
                let address = frame.pop(opcode)?.as_address()?;
                let size = self.storage(ty)?.size();
                self.memory.zero(address, size)?;
            }
            OpCode::Sizeof => {
                let ty = token_operand(instruction)?;
                let size = self.storage(ty)?.size();
                frame.push(EmValue::I32(i32::try_from(size).unwrap_or(i32::MAX)));
            }

            OpCode::Call => {
                if let Operand::Intrinsic(intrinsic) = instruction.operand {
                    return self.intrinsic(frame, intrinsic, constrained);
                }
                let method = token_operand(instruction)?;
                let count = self.registry.signature_of(method)?.argument_count();
                let arguments = frame.pop_many(count, opcode)?;
                return self.call_with(frame, method, arguments);
            }
            OpCode::Callvirt => {
                if let Operand::Intrinsic(intrinsic) = instruction.operand {
                    return self.intrinsic(frame, intrinsic, constrained);
                }
                let method = token_operand(instruction)?;
                return self.call_virtual(frame, method, constrained);
            }
            OpCode::Calli => {
                let signature = signature_operand(instruction)?.clone();
                let pointer = frame.pop(opcode)?.as_address()?;
                let method = untagged(FUNCTION_POINTER_TAG, address_value(pointer))
                    .ok_or(EmulationError::InvalidFunctionPointer(pointer))?;
                let arguments = frame.pop_many(signature.argument_count(), opcode)?;
                return self.call_with(frame, method, arguments);
            }
            OpCode::Newobj => {
                let constructor = token_operand(instruction)?;
                return self.new_object(frame, constructor);
            }

            OpCode::Newarr => {
                let element = token_operand(instruction)?;
                let length = frame.pop(opcode)?.as_i64()?;
                let Ok(length) = usize::try_from(length) else {
                    let exception = self.registry.core().exception;
                    return self.throw_new(exception, "Arithmetic operation resulted in an overflow.");
                };
                let array = self.new_array(element, length)?;
                frame.push(EmValue::ObjectRef(array));
            }
            OpCode::Ldlen => {
                let Some(array) = frame.pop(opcode)?.as_object()? else {
                    return self.throw_null_reference();
                };
                let (_, length) = self.array_shape(array)?;
                frame.push(EmValue::NativeInt(i64::try_from(length).unwrap_or(i64::MAX)));
            }
            OpCode::Ldelem | OpCode::Stelem => {
                let value = if opcode == OpCode::Stelem {
                    Some(frame.pop(opcode)?)
                } else {
                    None
                };
                let index = frame.pop(opcode)?.as_i64()?;
                let Some(array) = frame.pop(opcode)?.as_object()? else {
                    return self.throw_null_reference();
                };
                let Some(address) = self.element_address(array, index)? else {
                    let exception = self.registry.core().exception;
                    return self.throw_new(exception, INDEX_OUT_OF_RANGE_MESSAGE);
                };
                let (element, _) = self.array_shape(array)?;
                match value {
                    Some(value) => self.write_value(address, element, &value)?,
                    None => {
                        let value = self.read_value(address, element)?;
                        frame.push(value);
                    }
                }
            }

            OpCode::Ldfld | OpCode::Ldflda => {
                let field = token_operand(instruction)?;
                let instance = frame.pop(opcode)?;
                if matches!(instance, EmValue::Null | EmValue::ObjectRef(0)) {
                    return self.throw_null_reference();
                }
                if opcode == OpCode::Ldflda {
                    let address = self.field_address(&instance, field)?;
                    frame.push(EmValue::NativeInt(address_value(address)));
                } else {
                    let value = self.get_field(&instance, field)?;
                    frame.push(value);
                }
            }
            OpCode::Stfld => {
                let field = token_operand(instruction)?;
                let value = frame.pop(opcode)?;
                let instance = frame.pop(opcode)?;
                if matches!(instance, EmValue::Null | EmValue::ObjectRef(0)) {
                    return self.throw_null_reference();
                }
                self.set_field(&instance, field, &value)?;
            }
            OpCode::Ldsfld => {
                let field = token_operand(instruction)?;
                let value = self.get_field(&EmValue::Null, field)?;
                frame.push(value);
            }
            OpCode::Ldsflda => {
                let field = token_operand(instruction)?;
                let address = self.field_address(&EmValue::Null, field)?;
                frame.push(EmValue::NativeInt(address_value(address)));
            }
            OpCode::Stsfld => {
                let field = token_operand(instruction)?;
                let value = frame.pop(opcode)?;
                self.set_field(&EmValue::Null, field, &value)?;
            }

            OpCode::Box => {
                let ty = token_operand(instruction)?;
                let value = frame.pop(opcode)?;
                let boxed = self.box_value(ty, &value)?;
                frame.push(boxed);
            }
            OpCode::Unbox | OpCode::UnboxAny if self.registry.is_value_type(token_operand(instruction)?) => {
                let ty = token_operand(instruction)?;
                let Some(object) = frame.pop(opcode)?.as_object()? else {
                    return self.throw_null_reference();
                };
                let actual = self.object(object)?.ty;
                if actual != ty || self.object(object)?.kind != HeapKind::Boxed {
                    return self.throw_invalid_cast(actual, ty);
                }
                let payload = self.payload(object);
                if opcode == OpCode::Unbox {
                    frame.push(EmValue::NativeInt(address_value(payload)));
                } else {
                    let value = self.read_value(payload, ty)?;
                    frame.push(value);
                }
            }
            OpCode::Unbox => {
                return Err(EmulationError::InvalidOperand {
                    opcode,
                    expected: "value type",
                }
                .into())
            }
            OpCode::UnboxAny | OpCode::Castclass | OpCode::Isinst => {
                let ty = token_operand(instruction)?;
                let value = frame.pop(opcode)?;
                let Some(object) = value.as_object()? else {
                    frame.push(EmValue::Null);
                    return Ok(StepResult::Continue);
                };
                let actual = self.object(object)?.ty;
                if self.is_assignable(actual, ty)? {
                    frame.push(value);
                } else if opcode == OpCode::Isinst {
                    frame.push(EmValue::Null);
                } else {
                    return self.throw_invalid_cast(actual, ty);
                }
            }
            OpCode::Throw => {
                let Some(object) = frame.pop(opcode)?.as_object()? else {
                    return self.throw_null_reference();
                };
                return Ok(StepResult::Throw(object));
            }

            OpCode::Ldtoken => {
                let token = token_operand(instruction)?;
                let tag = if token.is_method() {
                    METHOD_HANDLE_TAG
                } else {
                    TYPE_HANDLE_TAG
                };
                frame.push(EmValue::NativeInt(tagged(tag, token)));
            }
            OpCode::Ldftn => {
                let method = token_operand(instruction)?;
                frame.push(EmValue::NativeInt(tagged(FUNCTION_POINTER_TAG, method)));
            }
            OpCode::Ldvirtftn => {
                let method = token_operand(instruction)?;
                let Some(object) = frame.pop(opcode)?.as_object()? else {
                    return self.throw_null_reference();
                };
                let actual = self.object(object)?.ty;
                let target = self.resolve_virtual(actual, method)?;
                frame.push(EmValue::NativeInt(tagged(FUNCTION_POINTER_TAG, target)));
            }

            OpCode::Mkrefany => {
                let ty = token_operand(instruction)?;
                let address = frame.pop(opcode)?.as_address()?;
                let bytes = self.make_typed_reference(address, ty)?;
                frame.push(EmValue::ValueType {
                    ty: self.registry.core().typed_reference,
                    bytes,
                });
            }
            OpCode::Refanyval => {
                let ty = token_operand(instruction)?;
                let reference = frame.pop(opcode)?;
                let layout = self.family.typed_reference_layout();
                let handle = typed_reference_word(&reference, layout.type_offset)?;
                if address_value(handle) != tagged(TYPE_HANDLE_TAG, ty) {
                    let message = format!(
                        "Typed reference does not refer to an instance of '{}'.",
                        self.registry.display_name(ty)
                    );
                    let exception = self.registry.core().invalid_cast_exception;
                    return self.throw_new(exception, &message);
                }
                let address = typed_reference_word(&reference, layout.value_offset)?;
                frame.push(EmValue::NativeInt(address_value(address)));
            }
            OpCode::Refanytype => {
                let reference = frame.pop(opcode)?;
                let layout = self.family.typed_reference_layout();
                let handle = typed_reference_word(&reference, layout.type_offset)?;
                frame.push(EmValue::NativeInt(address_value(handle)));
            }
        }
        Ok(StepResult::Continue)
    }

    fn variable(&self, frame: &Frame, instruction: &Instruction) -> Result<Slot> {
        let index = index_operand(instruction)?;
        let slots = match instruction.opcode {
            OpCode::Ldarg | OpCode::Ldarga | OpCode::Starg => &frame.arguments,
            _ => &frame.locals,
        };
        slots.get(index).copied().ok_or_else(|| {
            EmulationError::InvalidOperand {
                opcode: instruction.opcode,
                expected: "declared variable",
            }
            .into()
        })
    }

    fn indirect_type(&self, opcode: OpCode) -> Token {
        let core = self.registry.core();
        match opcode {
            OpCode::LdindI4 | OpCode::StindI4 => core.int32,
            OpCode::LdindI8 | OpCode::StindI8 => core.int64,
            OpCode::LdindRef | OpCode::StindRef => core.object,
            _ => core.intptr,
        }
    }

    fn call_virtual(
        &mut self,
        frame: &mut Frame,
        method: Token,
        constrained: Option<Token>,
    ) -> Result<StepResult> {
        let count = self.registry.signature_of(method)?.argument_count();
        let mut arguments = frame.pop_many(count, OpCode::Callvirt)?;
        let Some(receiver) = arguments.first().cloned() else {
            return Err(EmulationError::StackUnderflow(OpCode::Callvirt).into());
        };

        if let Some(ty) = constrained {
            let address = receiver.as_address()?;
            if self.registry.is_value_type(ty) {
                let target = self.resolve_virtual(ty, method)?;
                if self.registry.method(target)?.declaring == ty {
                    return self.call_with(frame, target, arguments);
                }
                let value = self.read_value(address, ty)?;
                arguments[0] = self.box_value(ty, &value)?;
                return self.call_with(frame, target, arguments);
            }
            let object = self.memory.read_u64(address)?;
            arguments[0] = if object == 0 {
                EmValue::Null
            } else {
                EmValue::ObjectRef(object)
            };
        }

        let Some(object) = arguments[0].as_object()? else {
            return self.throw_null_reference();
        };
        let actual = self.object(object)?.ty;
        let target = self.resolve_virtual(actual, method)?;
        self.call_with(frame, target, arguments)
    }

    fn new_object(&mut self, frame: &mut Frame, constructor: Token) -> Result<StepResult> {
        let count = self.registry.signature_of(constructor)?.parameters.len();
        let mut arguments = frame.pop_many(count, OpCode::Newobj)?;
        let declaring = self.registry.method(constructor)?.declaring;

        let (receiver, result) = if self.registry.is_value_type(declaring) {
            let size = self.storage(declaring)?.size();
            let slot = self.memory.allocate(size);
            (EmValue::NativeInt(address_value(slot)), Some(slot))
        } else {
            (EmValue::ObjectRef(self.allocate_instance(declaring)?), None)
        };
        arguments.insert(0, receiver.clone());

        match self.execute(constructor, arguments)? {
            ExecutionOutcome::Returned(_) => {
                let value = match result {
                    Some(slot) => self.read_value(slot, declaring)?,
                    None => receiver,
                };
                frame.push(value);
                Ok(StepResult::Continue)
            }
            ExecutionOutcome::Threw(exception) => {
                Ok(StepResult::Throw(exception.object.as_address()?))
            }
        }
    }

    /// Allocates a zeroed single-dimensional array
    pub(crate) fn new_array(&mut self, element: Token, length: usize) -> Result<u64> {
        let array_type = self.registry.intern_type(TypeKind::Array { element })?;
        let size = self.storage(element)?.size();
        self.allocate_object(
            array_type,
            size * length,
            HeapKind::Array { element, length },
        )
    }

    fn array_shape(&self, array: u64) -> Result<(Token, usize)> {
        match self.object(array)?.kind {
            HeapKind::Array { element, length } => Ok((element, length)),
            _ => Err(EmulationError::TypeMismatch {
                expected: "array",
                found: "object",
            }
            .into()),
        }
    }

    fn element_address(&mut self, array: u64, index: i64) -> Result<Option<u64>> {
        let (element, length) = self.array_shape(array)?;
        let Ok(index) = usize::try_from(index) else {
            return Ok(None);
        };
        if index >= length {
            return Ok(None);
        }
        let size = self.storage(element)?.size();
        Ok(Some(self.payload(array) + (index * size) as u64))
    }

    /// Raises `InvalidCastException` with the runtime's standard message
    pub(crate) fn throw_invalid_cast(&mut self, actual: Token, target: Token) -> Result<StepResult> {
        let message = INVALID_CAST_FORMAT
            .replace("{0}", &self.registry.display_name(actual))
            .replace("{1}", &self.registry.display_name(target));
        let exception = self.registry.core().invalid_cast_exception;
        self.throw_new(exception, &message)
    }
}

fn typed_reference_word(reference: &EmValue, offset: i32) -> Result<u64> {
    let EmValue::ValueType { bytes, .. } = reference else {
        return Err(EmulationError::TypeMismatch {
            expected: "typed reference",
            found: reference.kind_name(),
        }
        .into());
    };
    let start = usize::try_from(offset).unwrap_or(usize::MAX);
    let word = bytes
        .get(start..start.saturating_add(8))
        .ok_or(EmulationError::InvalidAddress {
            address: u64::from(offset.unsigned_abs()),
            size: 8,
        })?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(word);
    Ok(u64::from_le_bytes(raw))
}

//! The interpreter and its object model.
//!
//! [`Runtime`] executes [`MethodBody`] instruction lists one [`Frame`] at a time. Arguments
//! and locals live in the flat [`AddressSpace`] so their addresses can be taken, and every
//! heap object starts with a family-specific header whose first word is the type handle.
//!
//! # Key Components
//!
//! - [`Runtime`] - Object model, call machinery and public entry points
//! - [`EmulationLimits`] - Instruction and call-depth budget
//! - `handlers` - Per-opcode dispatch
//! - `intrinsics` - The reflection helpers synthesized code calls

mod error;
mod handlers;
mod intrinsics;
mod layout;
mod result;

use std::{collections::HashMap, sync::Arc};

pub use error::EmulationError;
pub use result::{ExecutionOutcome, ManagedException};
pub(crate) use result::StepResult;

use crate::{
    assembly::{Label, OpCode},
    emulation::{memory::AddressSpace, EmValue},
    metadata::{
        members::{MethodBody, TypeKind},
        registry::MemberRegistry,
        token::Token,
    },
    rewrite::RuntimeFamily,
    Result,
};

use layout::InstanceLayout;

/// Tag of type handle values (`RuntimeTypeHandle.Value`)
pub const TYPE_HANDLE_TAG: i64 = 0x7E00_0000_0000;
/// Tag of function pointer values
pub const FUNCTION_POINTER_TAG: i64 = 0x7F00_0000_0000;
/// Tag of method handle values
pub const METHOD_HANDLE_TAG: i64 = 0x7D00_0000_0000;

const TAG_MASK: i64 = 0x7F00_0000_0000;
const TOKEN_MASK: i64 = 0xFFFF_FFFF;

pub(crate) const NULL_REFERENCE_MESSAGE: &str = "Object reference not set to an instance of an object.";
pub(crate) const INDEX_OUT_OF_RANGE_MESSAGE: &str = "Index was outside the bounds of the array.";
pub(crate) const DIVIDE_BY_ZERO_MESSAGE: &str = "Attempted to divide by zero.";

/// Tags a token as a handle value
#[must_use]
pub fn tagged(tag: i64, token: Token) -> i64 {
    tag | i64::from(token.value())
}

/// Recovers the token of a handle value carrying `tag`
#[must_use]
pub fn untagged(tag: i64, value: i64) -> Option<Token> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    (value & TAG_MASK == tag).then(|| Token::new((value & TOKEN_MASK) as u32))
}

/// Execution budget of a [`Runtime`]
#[derive(Debug, Clone, Copy)]
pub struct EmulationLimits {
    /// Instructions executed over the runtime's lifetime
    pub max_instructions: u64,
    /// Nested calls
    pub max_call_depth: usize,
}

impl Default for EmulationLimits {
    fn default() -> Self {
        EmulationLimits {
            max_instructions: 5_000_000,
            max_call_depth: 256,
        }
    }
}

/// A reflection object handed out by the token resolution helpers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Reflected {
    Type(Token),
    Field(Token),
    Method(Token),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HeapKind {
    Instance,
    Boxed,
    Array { element: Token, length: usize },
    String(String),
    Reflection(Reflected),
    Exception { message: Option<String> },
}

#[derive(Debug, Clone)]
pub(crate) struct HeapObject {
    pub ty: Token,
    pub payload_size: usize,
    pub kind: HeapKind,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Slot {
    pub address: u64,
    pub ty: Token,
}

/// Activation record of one executing method
pub(crate) struct Frame {
    pub method: Token,
    pub arguments: Vec<Slot>,
    pub locals: Vec<Slot>,
    pub stack: Vec<EmValue>,
    /// Type of a pending `constrained.` prefix
    pub constrained: Option<Token>,
    /// The method leaves a value on `ret`
    pub returns: bool,
}

impl Frame {
    pub fn push(&mut self, value: EmValue) {
        self.stack.push(value);
    }

    pub fn pop(&mut self, opcode: OpCode) -> Result<EmValue> {
        self.stack
            .pop()
            .ok_or_else(|| EmulationError::StackUnderflow(opcode).into())
    }

    /// Pops `count` values, returned in push order
    pub fn pop_many(&mut self, count: usize, opcode: OpCode) -> Result<Vec<EmValue>> {
        if self.stack.len() < count {
            return Err(EmulationError::StackUnderflow(opcode).into());
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    pub fn peek(&self, opcode: OpCode) -> Result<&EmValue> {
        self.stack
            .last()
            .ok_or_else(|| EmulationError::StackUnderflow(opcode).into())
    }
}

/// Reference CIL runtime.
///
/// Objects are never collected or moved. The runtime keeps the [`MemberRegistry`] it was
/// created with, so it executes original and generated members alike.
pub struct Runtime {
    registry: Arc<MemberRegistry>,
    family: RuntimeFamily,
    limits: EmulationLimits,
    memory: AddressSpace,
    objects: HashMap<u64, HeapObject>,
    reflection: HashMap<Reflected, u64>,
    literals: HashMap<String, u64>,
    statics: HashMap<Token, u64>,
    layouts: HashMap<Token, Arc<InstanceLayout>>,
    executed: u64,
    depth: usize,
}

impl Runtime {
    /// Creates a runtime with default limits
    #[must_use]
    pub fn new(registry: Arc<MemberRegistry>, family: RuntimeFamily) -> Self {
        Self::with_limits(registry, family, EmulationLimits::default())
    }

    /// Creates a runtime with explicit limits
    #[must_use]
    pub fn with_limits(
        registry: Arc<MemberRegistry>,
        family: RuntimeFamily,
        limits: EmulationLimits,
    ) -> Self {
        Runtime {
            registry,
            family,
            limits,
            memory: AddressSpace::new(),
            objects: HashMap::new(),
            reflection: HashMap::new(),
            literals: HashMap::new(),
            statics: HashMap::new(),
            layouts: HashMap::new(),
            executed: 0,
            depth: 0,
        }
    }

    /// The runtime family whose layouts this runtime reproduces
    #[must_use]
    pub fn family(&self) -> RuntimeFamily {
        self.family
    }

    /// The registry members are resolved in
    #[must_use]
    pub fn registry(&self) -> &Arc<MemberRegistry> {
        &self.registry
    }

    /// Instructions executed so far
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Invokes `method` with `arguments`, `this` first for instance methods.
    ///
    /// # Errors
    /// Returns hard faults ([`EmulationError`]) and metadata errors; managed exceptions are
    /// reported as [`ExecutionOutcome::Threw`].
    pub fn invoke(&mut self, method: Token, arguments: &[EmValue]) -> Result<ExecutionOutcome> {
        let outcome = self.execute(method, arguments.to_vec())?;
        tracing::trace!(
            method = %self.registry.display_name(method),
            executed = self.executed,
            "invocation finished"
        );
        Ok(outcome)
    }

    /// Allocates an instance of the constructor's type and runs the constructor, like
    /// `newobj`. The new object is the return value.
    ///
    /// # Errors
    /// Same as [`Runtime::invoke`].
    pub fn construct(&mut self, constructor: Token, arguments: &[EmValue]) -> Result<ExecutionOutcome> {
        let declaring = self.registry.method(constructor)?.declaring;
        if self.registry.is_value_type(declaring) {
            let size = self.storage(declaring)?.size();
            let slot = self.memory.allocate(size);
            let mut full = vec![EmValue::NativeInt(address_value(slot))];
            full.extend_from_slice(arguments);
            return Ok(match self.execute(constructor, full)? {
                ExecutionOutcome::Returned(_) => {
                    ExecutionOutcome::Returned(Some(self.read_value(slot, declaring)?))
                }
                threw => threw,
            });
        }
        let object = self.allocate_instance(declaring)?;
        let mut full = vec![EmValue::ObjectRef(object)];
        full.extend_from_slice(arguments);
        Ok(match self.execute(constructor, full)? {
            ExecutionOutcome::Returned(_) => {
                ExecutionOutcome::Returned(Some(EmValue::ObjectRef(object)))
            }
            threw => threw,
        })
    }

    /// Allocates a zeroed instance of a class without running a constructor.
    ///
    /// # Errors
    /// Returns metadata errors for unknown types.
    pub fn allocate_instance(&mut self, ty: Token) -> Result<u64> {
        let size = self.instance_layout(ty)?.size;
        self.allocate_object(ty, size, HeapKind::Instance)
    }

    /// Allocates a string object
    pub fn new_string(&mut self, value: &str) -> Result<EmValue> {
        let string = self.registry.core().string;
        let object = self.allocate_object(string, 0, HeapKind::String(value.to_string()))?;
        Ok(EmValue::ObjectRef(object))
    }

    /// Content of a string object
    #[must_use]
    pub fn read_string(&self, value: &EmValue) -> Option<String> {
        let address = value.as_object().ok().flatten()?;
        match &self.objects.get(&address)?.kind {
            HeapKind::String(content) => Some(content.clone()),
            _ => None,
        }
    }

    /// Runtime type of an object, `None` for null and non-objects
    #[must_use]
    pub fn object_type(&self, value: &EmValue) -> Option<Token> {
        let address = value.as_object().ok().flatten()?;
        self.objects.get(&address).map(|object| object.ty)
    }

    /// Boxes a value of value type `ty`; reference values are returned unchanged.
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] if `value` does not fit `ty`.
    pub fn box_value(&mut self, ty: Token, value: &EmValue) -> Result<EmValue> {
        if !self.registry.is_value_type(ty) {
            return Ok(value.clone());
        }
        let size = self.storage(ty)?.size();
        let object = self.allocate_object(ty, size, HeapKind::Boxed)?;
        let payload = self.payload(object);
        self.write_value(payload, ty, value)?;
        Ok(EmValue::ObjectRef(object))
    }

    /// Copies the value out of a box of `ty`.
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for null or a box of another type.
    pub fn unbox_value(&mut self, value: &EmValue, ty: Token) -> Result<EmValue> {
        let object = self.require_object(value)?;
        if self.objects.get(&object).map(|o| o.ty) != Some(ty) {
            return Err(EmulationError::TypeMismatch {
                expected: "box of the requested type",
                found: value.kind_name(),
            }
            .into());
        }
        let payload = self.payload(object);
        self.read_value(payload, ty)
    }

    /// Reads an instance field of an object or a static field (pass [`EmValue::Null`]).
    ///
    /// # Errors
    /// Returns metadata errors and faults for null instances of instance fields.
    pub fn get_field(&mut self, instance: &EmValue, field: Token) -> Result<EmValue> {
        let address = self.field_address(instance, field)?;
        let ty = self.field_type(field)?;
        self.read_value(address, ty)
    }

    /// Writes an instance or static field.
    ///
    /// # Errors
    /// Same as [`Runtime::get_field`].
    pub fn set_field(&mut self, instance: &EmValue, field: Token, value: &EmValue) -> Result<()> {
        let address = self.field_address(instance, field)?;
        let ty = self.field_type(field)?;
        self.write_value(address, ty, value)
    }

    /// Exception message carried by an exception object
    #[must_use]
    pub fn exception_message(&self, value: &EmValue) -> Option<String> {
        let address = value.as_object().ok().flatten()?;
        match &self.objects.get(&address)?.kind {
            HeapKind::Exception { message } => message.clone(),
            _ => None,
        }
    }

    /// Measures the distance between an object reference and the data of a box of
    /// `value_type`.
    ///
    /// A sample box is stored in a pinned slot, its address is read back through a typed
    /// reference to that slot, and the data address is what `unbox` yields.
    ///
    /// # Errors
    /// Returns metadata errors for unknown types and faults from the simulated memory.
    pub fn measure_box_payload_offset(&mut self, value_type: Token) -> Result<i32> {
        let size = self.storage(value_type)?.size();
        let boxed = self.allocate_object(value_type, size, HeapKind::Boxed)?;
        let pinned = self.memory.allocate(8);
        self.memory.write_u64(pinned, boxed)?;

        let object = self.registry.core().object;
        let reference = self.make_typed_reference(pinned, object)?;
        let layout = self.family.typed_reference_layout();
        let mut raw = [0u8; 8];
        let start = layout.value_offset as usize;
        raw.copy_from_slice(&reference[start..start + 8]);
        let object_address = self.memory.read_u64(u64::from_le_bytes(raw))?;

        let data = self.unbox_address(object_address, value_type)?;
        i32::try_from(data - object_address)
            .map_err(|_| crate::Error::Layout("box payload offset out of range".to_string()))
    }

    fn execute(&mut self, method: Token, arguments: Vec<EmValue>) -> Result<ExecutionOutcome> {
        if self.depth >= self.limits.max_call_depth {
            return Err(EmulationError::CallDepthLimit(self.limits.max_call_depth).into());
        }
        let method_rc = self.registry.method(method)?;
        let definition = match &method_rc.instantiation {
            Some((definition, _)) => self.registry.method(*definition)?,
            None => method_rc.clone(),
        };
        let body = definition
            .body()
            .cloned()
            .ok_or_else(|| EmulationError::MissingBody(self.registry.display_name(method)))?;
        let signature = self.registry.signature_of(method)?;

        let registry = self.registry.clone();
        let substitute = |ty: Token| -> Token {
            let Some((definition, arguments)) = &method_rc.instantiation else {
                return ty;
            };
            match registry.get_type(ty).map(|t| t.kind.clone()) {
                Some(TypeKind::GenericParameter { owner, position }) if owner == *definition => {
                    arguments.get(usize::from(position)).copied().unwrap_or(ty)
                }
                _ => ty,
            }
        };

        let mut parameter_types = Vec::with_capacity(signature.argument_count());
        if signature.has_this {
            let declaring = definition.declaring;
            parameter_types.push(if self.registry.is_value_type(declaring) {
                self.registry.intern_type(TypeKind::ByRef { element: declaring })?
            } else {
                declaring
            });
        }
        parameter_types.extend(signature.parameters.iter().map(|ty| substitute(*ty)));
        if arguments.len() != parameter_types.len() {
            return Err(malformed_error!(
                "{} takes {} arguments, got {}",
                self.registry.display_name(method),
                parameter_types.len(),
                arguments.len()
            ));
        }

        let mut frame = Frame {
            method,
            arguments: Vec::with_capacity(arguments.len()),
            locals: Vec::with_capacity(body.locals.len()),
            stack: Vec::new(),
            constrained: None,
            returns: signature.return_type != self.registry.core().void,
        };
        for (ty, value) in parameter_types.into_iter().zip(arguments.iter()) {
            let slot = self.allocate_slot(ty)?;
            self.write_value(slot.address, ty, value)?;
            frame.arguments.push(slot);
        }
        for local in &body.locals {
            let slot = self.allocate_slot(substitute(local.ty))?;
            frame.locals.push(slot);
        }

        self.depth += 1;
        let outcome = self.run(&mut frame, &body);
        self.depth -= 1;
        outcome
    }

    fn run(&mut self, frame: &mut Frame, body: &MethodBody) -> Result<ExecutionOutcome> {
        let labels: HashMap<Label, usize> = body
            .instructions
            .iter()
            .enumerate()
            .filter_map(|(index, instruction)| instruction.defined_label().map(|l| (l, index)))
            .collect();

        let mut pc = 0;
        while let Some(instruction) = body.instructions.get(pc) {
            self.executed += 1;
            if self.executed > self.limits.max_instructions {
                return Err(EmulationError::InstructionLimit(self.limits.max_instructions).into());
            }
            let step = self.step(frame, instruction).inspect_err(|error| {
                tracing::debug!(
                    method = %self.registry.display_name(frame.method),
                    pc,
                    %instruction,
                    %error,
                    "emulation fault"
                );
            })?;
            match step {
                StepResult::Continue => pc += 1,
                StepResult::Branch(label) => {
                    pc = *labels
                        .get(&label)
                        .ok_or(EmulationError::UndefinedLabel(label))?;
                }
                StepResult::Return(value) => return Ok(ExecutionOutcome::Returned(value)),
                StepResult::Throw(object) => {
                    return Ok(ExecutionOutcome::Threw(self.managed_exception(object)))
                }
            }
        }
        // Falling off the end behaves like `ret` of a void method
        Ok(ExecutionOutcome::Returned(None))
    }

    fn managed_exception(&self, object: u64) -> ManagedException {
        let (exception_type, message) = match self.objects.get(&object) {
            Some(HeapObject {
                ty,
                kind: HeapKind::Exception { message },
                ..
            }) => (*ty, message.clone()),
            Some(other) => (other.ty, None),
            None => (self.registry.core().exception, None),
        };
        ManagedException {
            exception_type,
            message,
            object: EmValue::ObjectRef(object),
        }
    }

    /// Calls `method` and pushes its result onto the caller's stack
    pub(crate) fn call_with(
        &mut self,
        frame: &mut Frame,
        method: Token,
        arguments: Vec<EmValue>,
    ) -> Result<StepResult> {
        match self.execute(method, arguments)? {
            ExecutionOutcome::Returned(value) => {
                if let Some(value) = value {
                    frame.push(value);
                }
                Ok(StepResult::Continue)
            }
            ExecutionOutcome::Threw(exception) => {
                let object = exception.object.as_address()?;
                Ok(StepResult::Throw(object))
            }
        }
    }

    fn allocate_slot(&mut self, ty: Token) -> Result<Slot> {
        let size = self.storage(ty)?.size();
        Ok(Slot {
            address: self.memory.allocate(size),
            ty,
        })
    }

    pub(crate) fn allocate_object(&mut self, ty: Token, payload_size: usize, kind: HeapKind) -> Result<u64> {
        let header = self.family.object_header_size() as usize;
        let address = self.memory.allocate(header + payload_size);
        #[allow(clippy::cast_sign_loss)]
        self.memory
            .write_u64(address, tagged(TYPE_HANDLE_TAG, ty) as u64)?;
        self.objects.insert(
            address,
            HeapObject {
                ty,
                payload_size,
                kind,
            },
        );
        Ok(address)
    }

    /// Address of the first byte after an object's header
    pub(crate) fn payload(&self, object: u64) -> u64 {
        object + u64::from(self.family.object_header_size())
    }

    pub(crate) fn object(&self, address: u64) -> Result<&HeapObject> {
        self.objects
            .get(&address)
            .ok_or_else(|| EmulationError::InvalidAddress { address, size: 0 }.into())
    }

    fn require_object(&self, value: &EmValue) -> Result<u64> {
        value.as_object()?.ok_or_else(|| {
            EmulationError::TypeMismatch {
                expected: "object",
                found: "null",
            }
            .into()
        })
    }

    /// Data address of a box, what `unbox` yields
    pub(crate) fn unbox_address(&self, object: u64, ty: Token) -> Result<u64> {
        let boxed = self.object(object)?;
        if boxed.ty != ty || boxed.kind != HeapKind::Boxed {
            return Err(EmulationError::TypeMismatch {
                expected: "box of the requested type",
                found: "object",
            }
            .into());
        }
        Ok(self.payload(object))
    }

    /// Creates an exception object of `ty`
    pub(crate) fn new_exception(&mut self, ty: Token, message: &str) -> Result<u64> {
        self.allocate_object(
            ty,
            0,
            HeapKind::Exception {
                message: Some(message.to_string()),
            },
        )
    }

    /// Raises a fresh exception of `ty`
    pub(crate) fn throw_new(&mut self, ty: Token, message: &str) -> Result<StepResult> {
        Ok(StepResult::Throw(self.new_exception(ty, message)?))
    }

    pub(crate) fn throw_null_reference(&mut self) -> Result<StepResult> {
        let ty = self.registry.core().null_reference_exception;
        self.throw_new(ty, NULL_REFERENCE_MESSAGE)
    }

    /// Address of a field; statics are allocated on first use
    pub(crate) fn field_address(&mut self, instance: &EmValue, field: Token) -> Result<u64> {
        let field_rc = self.registry.field(field)?;
        if field_rc.is_static() {
            return self.static_address(field);
        }
        let offset = self.field_offset(field_rc.declaring, field)? as u64;
        match instance {
            EmValue::ObjectRef(object) if *object != 0 => Ok(self.payload(*object) + offset),
            EmValue::NativeInt(_) => Ok(instance.as_address()? + offset),
            EmValue::ValueType { ty, .. } => {
                let ty = *ty;
                let slot = self.allocate_slot(ty)?;
                self.write_value(slot.address, ty, instance)?;
                Ok(slot.address + offset)
            }
            other => Err(EmulationError::TypeMismatch {
                expected: "field container",
                found: other.kind_name(),
            }
            .into()),
        }
    }

    fn static_address(&mut self, field: Token) -> Result<u64> {
        if let Some(address) = self.statics.get(&field) {
            return Ok(*address);
        }
        let ty = self.field_type(field)?;
        let slot = self.allocate_slot(ty)?;
        self.statics.insert(field, slot.address);
        Ok(slot.address)
    }

    pub(crate) fn field_type(&self, field: Token) -> Result<Token> {
        self.registry
            .field(field)?
            .field_type()
            .ok_or_else(|| malformed_error!("field {} has no type", field))
    }

    /// Returns true if an object of type `actual` is an instance of `target`
    pub(crate) fn is_assignable(&self, actual: Token, target: Token) -> Result<bool> {
        let core = *self.registry.core();
        if actual == target || target == core.object {
            return Ok(true);
        }
        let target_definition = self.registry.generic_definition(target);
        let mut current = Some(actual);
        let mut depth = 0;
        while let Some(candidate) = current {
            depth += 1;
            if depth > 64 {
                break;
            }
            if candidate == target || self.registry.generic_definition(candidate) == target_definition
            {
                return Ok(true);
            }
            let ty = self.registry.type_def(self.registry.generic_definition(candidate))?;
            if ty
                .interfaces
                .iter()
                .any(|(_, interface)| self.implements(*interface, target, 0))
            {
                return Ok(true);
            }
            current = match ty.kind {
                TypeKind::Array { .. } => Some(core.array),
                _ => ty.base(),
            };
        }
        Ok(false)
    }

    fn implements(&self, interface: Token, target: Token, depth: usize) -> bool {
        if interface == target
            || self.registry.generic_definition(interface) == self.registry.generic_definition(target)
        {
            return true;
        }
        depth < 64
            && self
                .registry
                .get_type(self.registry.generic_definition(interface))
                .is_some_and(|ty| {
                    ty.interfaces
                        .iter()
                        .any(|(_, inherited)| self.implements(*inherited, target, depth + 1))
                })
    }

    /// The override of `method` the runtime type `ty` dispatches to
    pub(crate) fn resolve_virtual(&self, ty: Token, method: Token) -> Result<Token> {
        let method_rc = self.registry.method(method)?;
        if !method_rc.is_virtual() {
            return Ok(method);
        }
        let signature = self.registry.signature_of(method)?;
        let mut current = Some(ty);
        let mut depth = 0;
        while let Some(candidate) = current {
            depth += 1;
            if depth > 64 {
                break;
            }
            let ty_rc = self.registry.type_def(self.registry.generic_definition(candidate))?;
            for (_, candidate_method) in ty_rc.methods.iter() {
                let Ok(candidate_rc) = self.registry.method(*candidate_method) else {
                    continue;
                };
                if candidate_rc.name == method_rc.name
                    && candidate_rc.is_virtual()
                    && !candidate_rc.is_abstract()
                    && candidate_rc.signature().map(|s| &s.parameters) == Some(&signature.parameters)
                {
                    return Ok(*candidate_method);
                }
            }
            current = ty_rc.base();
        }
        Ok(method)
    }

    /// Builds a typed reference to `address` per the family layout
    pub(crate) fn make_typed_reference(&mut self, address: u64, ty: Token) -> Result<Vec<u8>> {
        let layout = self.family.typed_reference_layout();
        let mut bytes = vec![0u8; layout.size as usize];
        let mut put = |offset: i32, value: u64| {
            let start = offset as usize;
            bytes[start..start + 8].copy_from_slice(&value.to_le_bytes());
        };
        put(layout.value_offset, address);
        #[allow(clippy::cast_sign_loss)]
        let handle = tagged(TYPE_HANDLE_TAG, ty) as u64;
        put(layout.type_offset, handle);
        if let Some(klass) = layout.klass_offset {
            put(klass, handle);
        }
        Ok(bytes)
    }

    /// Returns or creates the reflection object for `reflected`
    pub(crate) fn reflection_object(&mut self, reflected: Reflected) -> Result<u64> {
        if let Some(object) = self.reflection.get(&reflected) {
            return Ok(*object);
        }
        let core = *self.registry.core();
        let ty = match reflected {
            Reflected::Type(_) => core.system_type,
            Reflected::Field(_) => core.field_info,
            Reflected::Method(_) => core.method_base,
        };
        let object = self.allocate_object(ty, 0, HeapKind::Reflection(reflected))?;
        self.reflection.insert(reflected, object);
        Ok(object)
    }

    /// Interned string object of a literal
    pub(crate) fn literal(&mut self, value: &str) -> Result<u64> {
        if let Some(object) = self.literals.get(value) {
            return Ok(*object);
        }
        let object = self.new_string(value)?.as_address()?;
        self.literals.insert(value.to_string(), object);
        Ok(object)
    }

    /// Text of an object as `String.Format` renders it
    pub(crate) fn render(&self, value: &EmValue) -> Result<String> {
        let Some(address) = value.as_object()? else {
            return Ok(String::new());
        };
        let object = self.object(address)?;
        Ok(match &object.kind {
            HeapKind::String(content) => content.clone(),
            HeapKind::Reflection(Reflected::Type(ty)) => self.registry.display_name(*ty),
            HeapKind::Reflection(Reflected::Field(token) | Reflected::Method(token)) => {
                self.registry.display_name(*token)
            }
            _ => self.registry.display_name(object.ty),
        })
    }
}

#[allow(clippy::cast_possible_wrap)]
pub(crate) fn address_value(address: u64) -> i64 {
    address as i64
}

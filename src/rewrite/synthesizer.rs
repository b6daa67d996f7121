//! Accessibility-aware instruction synthesizer.
//!
//! [`InstructionSynthesizer::synthesize`] takes one instruction whose operand is a member
//! token. If the member is accessible from the generated code the instruction is returned
//! as-is; otherwise it is replaced by a sequence that reaches the member indirectly, through
//! token resolution and reflection helpers (see [`Intrinsic`]) or through hand-built memory
//! layouts. Operations without a rewrite rule yield [`Synthesis::Unsupported`].
//!
//! | Operation | Replacement |
//! |---|---|
//! | `ldfld` / `stfld` | explicit null check, `FieldInfo.GetValue` / `SetValue` |
//! | `ldsfld` / `stsfld` | `FieldInfo.GetValue` / `SetValue` with a null instance |
//! | `box` | store, take address, `constrained.` `MemberwiseClone` |
//! | `unbox` / `unbox.any` | pinned object address plus measured payload offset |
//! | `isinst` / `castclass` | `Type.IsInstanceOfType`, formatted `InvalidCastException` |
//! | `newarr` | `Array.CreateInstance` |
//! | `ldftn` / `ldvirtftn` | method handle function pointer |
//! | `call` | function pointer plus `calli` |
//! | `mkrefany` / `refanyval` | typed reference built field by field |

use crate::{
    assembly::{Instruction, InstructionAssembler, Intrinsic, OpCode},
    metadata::{host::MetadataHost, token::Token},
    rewrite::{
        accessibility::AccessibilityOracle,
        layout::{box_payload_offset, RuntimeFamily, RuntimeProbe},
        locals::MethodScratch,
    },
    Result,
};

/// Message format of a failed cast, `{0}` is the object's type and `{1}` the target type
pub const INVALID_CAST_FORMAT: &str = "Unable to cast object of type '{0}' to type '{1}'.";

/// Result of rewriting one instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Synthesis {
    /// Instructions to splice in place of the original
    Rewritten(Vec<Instruction>),
    /// No rewrite rule exists for this operation
    Unsupported,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum UnboxResult {
    Value,
    Address,
}

/// Rewrites instructions whose operands generated code cannot reference.
pub struct InstructionSynthesizer<'a> {
    host: &'a dyn MetadataHost,
    oracle: &'a AccessibilityOracle<'a>,
    probe: &'a dyn RuntimeProbe,
    family: RuntimeFamily,
}

impl<'a> InstructionSynthesizer<'a> {
    /// Creates a synthesizer; the runtime family is resolved once here
    pub fn new(
        host: &'a dyn MetadataHost,
        oracle: &'a AccessibilityOracle<'a>,
        probe: &'a dyn RuntimeProbe,
    ) -> Self {
        InstructionSynthesizer {
            host,
            oracle,
            probe,
            family: probe.family(),
        }
    }

    /// The runtime family generated layouts target
    #[must_use]
    pub fn family(&self) -> RuntimeFamily {
        self.family
    }

    /// Rewrites `instruction` as it appears in a body of `source`.
    ///
    /// # Errors
    /// Returns metadata errors for unknown operands and layout errors from the runtime probe.
    pub fn synthesize(
        &self,
        source: Token,
        instruction: &Instruction,
        scratch: &MethodScratch,
    ) -> Result<Synthesis> {
        let Some(target) = instruction.member() else {
            return Ok(Synthesis::Rewritten(vec![instruction.clone()]));
        };
        if self.oracle.is_accessible(source, target) {
            return Ok(Synthesis::Rewritten(vec![instruction.clone()]));
        }

        let mut asm = InstructionAssembler::new();
        match instruction.opcode {
            OpCode::Ldfld => self.load_field(&mut asm, scratch, target, false)?,
            OpCode::Ldsfld => self.load_field(&mut asm, scratch, target, true)?,
            OpCode::Stfld => self.store_field(&mut asm, scratch, target, false)?,
            OpCode::Stsfld => self.store_field(&mut asm, scratch, target, true)?,
            OpCode::Box => self.emit_box(&mut asm, scratch, target)?,
            OpCode::Unbox if self.host.is_value_type(target) => {
                self.emit_unbox(&mut asm, scratch, target, UnboxResult::Address)?;
            }
            OpCode::UnboxAny if self.host.is_value_type(target) => {
                self.emit_unbox(&mut asm, scratch, target, UnboxResult::Value)?;
            }
            OpCode::UnboxAny | OpCode::Castclass => {
                self.emit_type_test(&mut asm, scratch, target, true)?;
            }
            OpCode::Isinst => self.emit_type_test(&mut asm, scratch, target, false)?,
            OpCode::Newarr => self.new_array(&mut asm, scratch, target)?,
            OpCode::Ldftn => {
                asm.ldc_token(target)?
                    .call_intrinsic(Intrinsic::ResolveMethod)?;
                self.emit_function_pointer(&mut asm)?;
            }
            OpCode::Ldvirtftn => {
                asm.call_intrinsic(Intrinsic::GetType)?
                    .ldc_token(target)?
                    .call_intrinsic(Intrinsic::ResolveMethod)?
                    .call_intrinsic(Intrinsic::ResolveVirtual)?;
                self.emit_function_pointer(&mut asm)?;
            }
            OpCode::Call => {
                let signature = self.host.signature(target)?;
                asm.ldc_token(target)?
                    .call_intrinsic(Intrinsic::ResolveMethod)?;
                self.emit_function_pointer(&mut asm)?;
                asm.calli(signature)?;
            }
            OpCode::Mkrefany => self.make_typed_reference(&mut asm, scratch, target)?,
            OpCode::Refanyval => self.typed_reference_value(&mut asm, scratch, target)?,
            _ => return Ok(Synthesis::Unsupported),
        }

        let sequence = asm.finish()?;
        tracing::trace!(
            opcode = %instruction.opcode,
            member = %self.host.display_name(target),
            length = sequence.len(),
            "synthesized accessible sequence"
        );
        Ok(Synthesis::Rewritten(sequence))
    }

    /// `[instance] -> [value]`, or `[] -> [value]` for statics.
    ///
    /// Value-type containers are expected by address and read through a boxed copy.
    fn load_field(
        &self,
        asm: &mut InstructionAssembler,
        scratch: &MethodScratch,
        field: Token,
        is_static: bool,
    ) -> Result<()> {
        let object = self.host.core().object;
        let field_rc = self.host.field(field)?;
        let field_type = field_rc
            .field_type()
            .ok_or_else(|| malformed_error!("field {} has no type", field))?;

        if is_static {
            asm.ldc_token(field)?
                .call_intrinsic(Intrinsic::ResolveField)?
                .ldnull()?
                .call_intrinsic(Intrinsic::FieldGetValue)?;
        } else {
            let container = field_rc.declaring;
            if self.host.is_value_type(container) {
                asm.ldobj(container)?;
                self.emit_box(asm, scratch, container)?;
            }
            let instance = scratch.acquire(object, false)?;
            asm.stloc(instance.local())?;
            if !self.host.is_value_type(container) {
                self.emit_null_check(asm, scratch, instance.local())?;
            }
            asm.ldc_token(field)?
                .call_intrinsic(Intrinsic::ResolveField)?
                .ldloc(instance.local())?
                .call_intrinsic(Intrinsic::FieldGetValue)?;
        }

        if self.host.is_value_type(field_type) {
            self.emit_unbox(asm, scratch, field_type, UnboxResult::Value)?;
        }
        Ok(())
    }

    /// `[instance, value] -> []`, or `[value] -> []` for statics.
    ///
    /// A value-type container is copied into a box, updated there and copied back.
    fn store_field(
        &self,
        asm: &mut InstructionAssembler,
        scratch: &MethodScratch,
        field: Token,
        is_static: bool,
    ) -> Result<()> {
        let core = *self.host.core();
        let field_rc = self.host.field(field)?;
        let field_type = field_rc
            .field_type()
            .ok_or_else(|| malformed_error!("field {} has no type", field))?;

        if self.host.is_value_type(field_type) {
            self.emit_box(asm, scratch, field_type)?;
        }
        let value = scratch.acquire(core.object, false)?;
        asm.stloc(value.local())?;

        if is_static {
            asm.ldc_token(field)?
                .call_intrinsic(Intrinsic::ResolveField)?
                .ldnull()?
                .ldloc(value.local())?
                .call_intrinsic(Intrinsic::FieldSetValue)?;
            return Ok(());
        }

        let container = field_rc.declaring;
        if self.host.is_value_type(container) {
            let address = scratch.acquire(core.intptr, false)?;
            let boxed = scratch.acquire(core.object, false)?;
            asm.stloc(address.local())?
                .ldloc(address.local())?
                .ldobj(container)?;
            self.emit_box(asm, scratch, container)?;
            asm.stloc(boxed.local())?
                .ldc_token(field)?
                .call_intrinsic(Intrinsic::ResolveField)?
                .ldloc(boxed.local())?
                .ldloc(value.local())?
                .call_intrinsic(Intrinsic::FieldSetValue)?
                .ldloc(address.local())?
                .ldloc(boxed.local())?;
            self.emit_unbox(asm, scratch, container, UnboxResult::Value)?;
            asm.stobj(container)?;
        } else {
            let instance = scratch.acquire(core.object, false)?;
            asm.stloc(instance.local())?;
            self.emit_null_check(asm, scratch, instance.local())?;
            asm.ldc_token(field)?
                .call_intrinsic(Intrinsic::ResolveField)?
                .ldloc(instance.local())?
                .ldloc(value.local())?
                .call_intrinsic(Intrinsic::FieldSetValue)?;
        }
        Ok(())
    }

    /// Throws `NullReferenceException` when `local` holds null
    fn emit_null_check(
        &self,
        asm: &mut InstructionAssembler,
        scratch: &MethodScratch,
        local: u16,
    ) -> Result<()> {
        let not_null = scratch.label();
        asm.ldloc(local)?
            .brtrue(not_null)?
            .call_intrinsic(Intrinsic::NewNullReferenceException)?
            .throw()?
            .mark_label(not_null)?;
        Ok(())
    }

    /// `[value] -> [object]`; reference types pass through unchanged
    fn emit_box(
        &self,
        asm: &mut InstructionAssembler,
        scratch: &MethodScratch,
        ty: Token,
    ) -> Result<()> {
        if !self.host.is_value_type(ty) {
            return Ok(());
        }
        let value = scratch.acquire(ty, false)?;
        asm.stloc(value.local())?
            .ldloca(value.local())?
            .constrained(ty)?
            .callvirt_intrinsic(Intrinsic::MemberwiseClone)?;
        Ok(())
    }

    /// `[object] -> [value]` or `[object] -> [address of a copy]`
    fn emit_unbox(
        &self,
        asm: &mut InstructionAssembler,
        scratch: &MethodScratch,
        ty: Token,
        result: UnboxResult,
    ) -> Result<()> {
        let offset = box_payload_offset(self.probe, self.host.scope(), ty)?;
        let pinned = scratch.acquire(self.host.core().object, true)?;
        asm.stloc(pinned.local())?;
        self.emit_null_check(asm, scratch, pinned.local())?;

        let value = scratch.acquire(ty, false)?;
        asm.ldloc(pinned.local())?
            .conv_u()?
            .ldc_i4(offset)?
            .add()?
            .ldobj(ty)?
            .stloc(value.local())?
            .ldnull()?
            .stloc(pinned.local())?;
        drop(pinned);

        match result {
            UnboxResult::Value => {
                asm.ldloc(value.local())?;
            }
            UnboxResult::Address => {
                asm.ldloca(value.keep())?;
            }
        }
        Ok(())
    }

    /// `[object] -> [object or null]`; `throwing` turns a failed test into an exception
    fn emit_type_test(
        &self,
        asm: &mut InstructionAssembler,
        scratch: &MethodScratch,
        ty: Token,
        throwing: bool,
    ) -> Result<()> {
        let value = scratch.acquire(self.host.core().object, false)?;
        let done = scratch.label();
        asm.stloc(value.local())?
            .ldloc(value.local())?
            .brfalse(done)?
            .ldc_token(ty)?
            .call_intrinsic(Intrinsic::ResolveType)?
            .ldloc(value.local())?
            .call_intrinsic(Intrinsic::IsInstanceOfType)?
            .brtrue(done)?;
        if throwing {
            asm.ldstr(INVALID_CAST_FORMAT)?
                .ldloc(value.local())?
                .call_intrinsic(Intrinsic::GetType)?
                .ldc_token(ty)?
                .call_intrinsic(Intrinsic::ResolveType)?
                .call_intrinsic(Intrinsic::FormatString)?
                .call_intrinsic(Intrinsic::NewInvalidCastException)?
                .throw()?;
        } else {
            asm.ldnull()?.stloc(value.local())?;
        }
        asm.mark_label(done)?.ldloc(value.local())?;
        Ok(())
    }

    /// `[length] -> [array]`
    fn new_array(
        &self,
        asm: &mut InstructionAssembler,
        scratch: &MethodScratch,
        element: Token,
    ) -> Result<()> {
        let length = scratch.acquire(self.host.core().int32, false)?;
        asm.stloc(length.local())?
            .ldc_token(element)?
            .call_intrinsic(Intrinsic::ResolveType)?
            .ldloc(length.local())?
            .call_intrinsic(Intrinsic::CreateArray)?;
        Ok(())
    }

    /// `[MethodBase] -> [native int]`, round-tripping the handle through a box to get its
    /// address
    fn emit_function_pointer(&self, asm: &mut InstructionAssembler) -> Result<()> {
        let handle = self.host.core().runtime_method_handle;
        asm.call_intrinsic(Intrinsic::GetMethodHandle)?
            .box_type(handle)?
            .unbox(handle)?
            .call_intrinsic(Intrinsic::GetFunctionPointer)?;
        Ok(())
    }

    /// `[address] -> [TypedReference]`
    fn make_typed_reference(
        &self,
        asm: &mut InstructionAssembler,
        scratch: &MethodScratch,
        ty: Token,
    ) -> Result<()> {
        let core = *self.host.core();
        let layout = self.family.typed_reference_layout();
        let address = scratch.acquire(core.intptr, false)?;
        let reference = scratch.acquire(core.typed_reference, false)?;
        let slot = reference.local();

        asm.stloc(address.local())?
            .ldloca(slot)?
            .initobj(core.typed_reference)?
            .ldloca(slot)?
            .ldc_i4(layout.value_offset)?
            .add()?
            .ldloc(address.local())?
            .stind_i()?;
        let handle_offsets = std::iter::once(layout.type_offset).chain(layout.klass_offset);
        for offset in handle_offsets {
            asm.ldloca(slot)?
                .ldc_i4(offset)?
                .add()?
                .ldc_token(ty)?
                .call_intrinsic(Intrinsic::ResolveType)?
                .call_intrinsic(Intrinsic::TypeHandleValue)?
                .stind_i()?;
        }
        asm.ldloc(slot)?;
        Ok(())
    }

    /// `[TypedReference] -> [address]`, throwing `InvalidCastException` on a type mismatch
    fn typed_reference_value(
        &self,
        asm: &mut InstructionAssembler,
        scratch: &MethodScratch,
        ty: Token,
    ) -> Result<()> {
        let core = *self.host.core();
        let layout = self.family.typed_reference_layout();
        let reference = scratch.acquire(core.typed_reference, false)?;
        let slot = reference.local();
        let matches = scratch.label();
        let message = format!(
            "Typed reference does not refer to an instance of '{}'.",
            self.host.display_name(ty)
        );

        asm.stloc(slot)?
            .ldloca(slot)?
            .ldc_i4(layout.type_offset)?
            .add()?
            .ldind_i()?
            .ldc_token(ty)?
            .call_intrinsic(Intrinsic::ResolveType)?
            .call_intrinsic(Intrinsic::TypeHandleValue)?
            .beq(matches)?
            .ldstr(&message)?
            .call_intrinsic(Intrinsic::NewInvalidCastException)?
            .throw()?
            .mark_label(matches)?
            .ldloca(slot)?
            .ldc_i4(layout.value_offset)?
            .add()?
            .ldind_i()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            attributes::{FieldAttributes, MethodAttributes, TypeAttributes},
            builder::{FieldBuilder, MethodBuilder, TypeBuilder},
            members::MethodBody,
            registry::MemberRegistry,
        },
        Error,
    };
    use std::sync::Arc;

    struct FixedProbe(RuntimeFamily);

    impl RuntimeProbe for FixedProbe {
        fn family(&self) -> RuntimeFamily {
            self.0
        }

        fn measure_box_payload_offset(&self, _value_type: Token) -> Result<i32> {
            i32::try_from(self.0.object_header_size()).map_err(|e| Error::Layout(e.to_string()))
        }
    }

    struct Fixture {
        registry: Arc<MemberRegistry>,
        source: Token,
        object_field: Token,
        other_object_field: Token,
        int_field: Token,
        other_int_field: Token,
        public_field: Token,
        private_method: Token,
        secret: Token,
    }

    fn fixture() -> Result<Fixture> {
        let registry = Arc::new(MemberRegistry::new());
        let core = *registry.core();
        let vault = TypeBuilder::new(registry.clone(), "Lib.dll")
            .class("Lib", "Vault")
            .public()
            .build()?;
        let field = |name: &str, ty: Token, flags: FieldAttributes| {
            FieldBuilder::new(registry.clone(), vault.token, name)
                .field_type(ty)
                .flags(flags)
                .build()
                .map(|field| field.token)
        };
        let object_field = field("label", core.string, FieldAttributes::PRIVATE)?;
        let other_object_field = field("owner", core.object, FieldAttributes::PRIVATE)?;
        let int_field = field("count", core.int32, FieldAttributes::PRIVATE)?;
        let other_int_field = field("total", core.int64, FieldAttributes::PRIVATE)?;
        let public_field = field("open", core.int32, FieldAttributes::PUBLIC)?;
        let private_method = MethodBuilder::new(registry.clone(), vault.token, "Peek")
            .flags(MethodAttributes::PRIVATE | MethodAttributes::STATIC)
            .returns(core.int32)
            .build()?
            .token;
        let secret = TypeBuilder::new(registry.clone(), "Lib.dll")
            .class("Lib", "Secret")
            .nested_in(vault.token, TypeAttributes::NESTED_PRIVATE)
            .build()?
            .token;

        let app = TypeBuilder::new(registry.clone(), "App.dll")
            .class("App", "Program")
            .public()
            .build()?;
        let source = MethodBuilder::new(registry.clone(), app.token, "Main")
            .flags(MethodAttributes::PUBLIC | MethodAttributes::STATIC)
            .build()?
            .token;
        Ok(Fixture {
            registry,
            source,
            object_field,
            other_object_field,
            int_field,
            other_int_field,
            public_field,
            private_method,
            secret,
        })
    }

    fn rewrite(f: &Fixture, instruction: Instruction) -> Result<Synthesis> {
        let host: &dyn MetadataHost = f.registry.as_ref();
        let oracle = AccessibilityOracle::unfiltered(host);
        let probe = FixedProbe(RuntimeFamily::CoreClr);
        let synthesizer = InstructionSynthesizer::new(host, &oracle, &probe);
        let scratch = MethodScratch::for_body(&MethodBody::default());
        synthesizer.synthesize(f.source, &instruction, &scratch)
    }

    fn length(synthesis: &Synthesis) -> usize {
        match synthesis {
            Synthesis::Rewritten(sequence) => sequence.len(),
            Synthesis::Unsupported => 0,
        }
    }

    #[test]
    fn accessible_operands_pass_through() -> Result<()> {
        let f = fixture()?;
        let instruction = Instruction::token(OpCode::Ldfld, f.public_field);
        assert_eq!(
            rewrite(&f, instruction.clone())?,
            Synthesis::Rewritten(vec![instruction])
        );
        Ok(())
    }

    #[test]
    fn field_load_expansion_depends_only_on_shape() -> Result<()> {
        let f = fixture()?;
        let object_a = rewrite(&f, Instruction::token(OpCode::Ldfld, f.object_field))?;
        let object_b = rewrite(&f, Instruction::token(OpCode::Ldfld, f.other_object_field))?;
        let value_a = rewrite(&f, Instruction::token(OpCode::Ldfld, f.int_field))?;
        let value_b = rewrite(&f, Instruction::token(OpCode::Ldfld, f.other_int_field))?;

        assert_eq!(length(&object_a), 10);
        assert_eq!(length(&object_a), length(&object_b));
        assert_eq!(length(&value_a), 25);
        assert_eq!(length(&value_a), length(&value_b));
        Ok(())
    }

    #[test]
    fn field_load_resolves_through_reflection() -> Result<()> {
        let f = fixture()?;
        let Synthesis::Rewritten(sequence) =
            rewrite(&f, Instruction::token(OpCode::Ldfld, f.object_field))?
        else {
            return Err(Error::Error("expected a rewrite".into()));
        };
        assert!(sequence.iter().all(|i| i.member().is_none()));
        assert!(sequence
            .iter()
            .any(|i| i.operand == crate::assembly::Operand::Intrinsic(Intrinsic::FieldGetValue)));
        assert!(sequence.contains(&Instruction::simple(OpCode::Throw)));
        Ok(())
    }

    #[test]
    fn unsupported_operations_are_reported() -> Result<()> {
        let f = fixture()?;
        for opcode in [OpCode::Ldflda, OpCode::Ldsflda, OpCode::Callvirt, OpCode::Newobj] {
            let operand = if opcode == OpCode::Ldflda || opcode == OpCode::Ldsflda {
                f.int_field
            } else {
                f.private_method
            };
            assert_eq!(
                rewrite(&f, Instruction::token(opcode, operand))?,
                Synthesis::Unsupported
            );
        }
        Ok(())
    }

    #[test]
    fn call_becomes_calli() -> Result<()> {
        let f = fixture()?;
        let Synthesis::Rewritten(sequence) =
            rewrite(&f, Instruction::token(OpCode::Call, f.private_method))?
        else {
            return Err(Error::Error("expected a rewrite".into()));
        };
        assert_eq!(sequence.last().map(|i| i.opcode), Some(OpCode::Calli));
        assert_eq!(sequence[0], Instruction::ldc_i4(
            i32::from_ne_bytes(f.private_method.value().to_ne_bytes())
        ));
        Ok(())
    }

    #[test]
    fn casts_to_private_types_are_rewritten() -> Result<()> {
        let f = fixture()?;
        let castclass = rewrite(&f, Instruction::token(OpCode::Castclass, f.secret))?;
        let isinst = rewrite(&f, Instruction::token(OpCode::Isinst, f.secret))?;
        assert!(length(&castclass) > length(&isinst));
        let Synthesis::Rewritten(sequence) = isinst else {
            return Err(Error::Error("expected a rewrite".into()));
        };
        assert!(!sequence.iter().any(|i| i.opcode == OpCode::Throw));
        Ok(())
    }
}

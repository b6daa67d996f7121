//! Fluent instruction assembler.
//!
//! [`InstructionAssembler`] is the single way the crate produces instruction lists: test
//! fixtures describe original method bodies with it and the synthesizer builds its
//! replacement sequences with it. Every emit method returns `Result<&mut Self>` so sequences
//! chain with `?`.
//!
//! # Examples
//!
//! ```rust
//! use cilreplica::assembly::{InstructionAssembler, Label};
//!
//! # fn example() -> cilreplica::Result<()> {
//! let mut asm = InstructionAssembler::new();
//! let done = Label(0);
//! asm.ldarg(0)?
//!     .brfalse(done)?
//!     .ldc_i4(1)?
//!     .ret()?
//!     .mark_label(done)?
//!     .ldc_i4(0)?
//!     .ret()?;
//! let instructions = asm.finish()?;
//! assert_eq!(instructions.len(), 7);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;

use crate::{
    assembly::{Immediate, Instruction, Intrinsic, Label, OpCode, Operand},
    metadata::{members::MethodSignature, token::Token},
    Error, Result,
};

/// Builds an instruction list one operation at a time.
#[derive(Debug, Default)]
pub struct InstructionAssembler {
    instructions: Vec<Instruction>,
    marked: HashSet<Label>,
}

macro_rules! simple_ops {
    ($($(#[$doc:meta])* $name:ident => $opcode:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            ///
            /// # Errors
            /// Never fails; the `Result` keeps the chain uniform.
            pub fn $name(&mut self) -> Result<&mut Self> {
                self.emit(Instruction::simple(OpCode::$opcode))
            }
        )*
    };
}

macro_rules! token_ops {
    ($($(#[$doc:meta])* $name:ident => $opcode:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            ///
            /// # Errors
            /// Never fails; the `Result` keeps the chain uniform.
            pub fn $name(&mut self, token: Token) -> Result<&mut Self> {
                self.emit(Instruction::token(OpCode::$opcode, token))
            }
        )*
    };
}

macro_rules! branch_ops {
    ($($(#[$doc:meta])* $name:ident => $opcode:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            ///
            /// # Errors
            /// Never fails; undefined targets are reported by [`InstructionAssembler::finish`].
            pub fn $name(&mut self, target: Label) -> Result<&mut Self> {
                self.emit(Instruction::branch(OpCode::$opcode, target))
            }
        )*
    };
}

impl InstructionAssembler {
    /// Creates an empty assembler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an arbitrary instruction.
    ///
    /// # Errors
    /// Returns [`Error::Error`] when the instruction marks a label that was already marked.
    pub fn emit(&mut self, instruction: Instruction) -> Result<&mut Self> {
        if let Some(label) = instruction.defined_label() {
            if !self.marked.insert(label) {
                return Err(Error::Error(format!("label {label} marked twice")));
            }
        }
        self.instructions.push(instruction);
        Ok(self)
    }

    /// Appends every instruction of `sequence` in order.
    ///
    /// # Errors
    /// Returns [`Error::Error`] when the sequence re-marks an existing label.
    pub fn extend<I>(&mut self, sequence: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = Instruction>,
    {
        for instruction in sequence {
            self.emit(instruction)?;
        }
        Ok(self)
    }

    /// Defines `label` at the current position.
    ///
    /// # Errors
    /// Returns [`Error::Error`] when the label was already marked.
    pub fn mark_label(&mut self, label: Label) -> Result<&mut Self> {
        self.emit(Instruction::mark(label))
    }

    /// Number of instructions emitted so far, label marks included
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true if nothing has been emitted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Consumes the assembler and returns the instruction list.
    ///
    /// # Errors
    /// Returns [`Error::Error`] when a branch targets a label that was never marked.
    pub fn finish(self) -> Result<Vec<Instruction>> {
        if let Some(dangling) = self
            .instructions
            .iter()
            .filter_map(Instruction::branch_target)
            .find(|label| !self.marked.contains(label))
        {
            return Err(Error::Error(format!(
                "branch to undefined label {dangling}"
            )));
        }
        Ok(self.instructions)
    }

    /// `ldarg index`
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn ldarg(&mut self, index: u16) -> Result<&mut Self> {
        self.emit(Instruction::argument(OpCode::Ldarg, index))
    }

    /// `ldarga index`
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn ldarga(&mut self, index: u16) -> Result<&mut Self> {
        self.emit(Instruction::argument(OpCode::Ldarga, index))
    }

    /// `starg index`
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn starg(&mut self, index: u16) -> Result<&mut Self> {
        self.emit(Instruction::argument(OpCode::Starg, index))
    }

    /// `ldloc index`
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn ldloc(&mut self, index: u16) -> Result<&mut Self> {
        self.emit(Instruction::local(OpCode::Ldloc, index))
    }

    /// `ldloca index`
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn ldloca(&mut self, index: u16) -> Result<&mut Self> {
        self.emit(Instruction::local(OpCode::Ldloca, index))
    }

    /// `stloc index`
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn stloc(&mut self, index: u16) -> Result<&mut Self> {
        self.emit(Instruction::local(OpCode::Stloc, index))
    }

    /// `ldc.i4 value`
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn ldc_i4(&mut self, value: i32) -> Result<&mut Self> {
        self.emit(Instruction::ldc_i4(value))
    }

    /// `ldc.i8 value`
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn ldc_i8(&mut self, value: i64) -> Result<&mut Self> {
        self.emit(Instruction {
            opcode: OpCode::LdcI8,
            operand: Operand::Immediate(Immediate::Int64(value)),
        })
    }

    /// `ldc.r8 value`
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn ldc_r8(&mut self, value: f64) -> Result<&mut Self> {
        self.emit(Instruction {
            opcode: OpCode::LdcR8,
            operand: Operand::Immediate(Immediate::Float64(value)),
        })
    }

    /// Pushes a metadata token as an `int32`, the form reflection resolution expects
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn ldc_token(&mut self, token: Token) -> Result<&mut Self> {
        self.ldc_i4(i32::from_ne_bytes(token.value().to_ne_bytes()))
    }

    /// `ldstr value`
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn ldstr(&mut self, value: &str) -> Result<&mut Self> {
        self.emit(Instruction {
            opcode: OpCode::Ldstr,
            operand: Operand::String(value.to_string()),
        })
    }

    /// `call` of a runtime helper
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn call_intrinsic(&mut self, intrinsic: Intrinsic) -> Result<&mut Self> {
        self.emit(Instruction::intrinsic(OpCode::Call, intrinsic))
    }

    /// `callvirt` of a runtime helper
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn callvirt_intrinsic(&mut self, intrinsic: Intrinsic) -> Result<&mut Self> {
        self.emit(Instruction::intrinsic(OpCode::Callvirt, intrinsic))
    }

    /// `calli` with an explicit call-site signature
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn calli(&mut self, signature: MethodSignature) -> Result<&mut Self> {
        self.emit(Instruction {
            opcode: OpCode::Calli,
            operand: Operand::Signature(signature),
        })
    }

    simple_ops! {
        /// `nop`
        nop => Nop,
        /// `ldnull`
        ldnull => Ldnull,
        /// `dup`
        dup => Dup,
        /// `pop`
        pop => Pop,
        /// `ret`
        ret => Ret,
        /// `add`
        add => Add,
        /// `sub`
        sub => Sub,
        /// `mul`
        mul => Mul,
        /// `div`
        div => Div,
        /// `rem`
        rem => Rem,
        /// `neg`
        neg => Neg,
        /// `ceq`
        ceq => Ceq,
        /// `cgt`
        cgt => Cgt,
        /// `clt`
        clt => Clt,
        /// `conv.i4`
        conv_i4 => ConvI4,
        /// `conv.i8`
        conv_i8 => ConvI8,
        /// `conv.r8`
        conv_r8 => ConvR8,
        /// `conv.i`
        conv_i => ConvI,
        /// `conv.u`
        conv_u => ConvU,
        /// `ldind.i`
        ldind_i => LdindI,
        /// `ldind.i4`
        ldind_i4 => LdindI4,
        /// `ldind.i8`
        ldind_i8 => LdindI8,
        /// `ldind.ref`
        ldind_ref => LdindRef,
        /// `stind.i`
        stind_i => StindI,
        /// `stind.i4`
        stind_i4 => StindI4,
        /// `stind.i8`
        stind_i8 => StindI8,
        /// `stind.ref`
        stind_ref => StindRef,
        /// `ldlen`
        ldlen => Ldlen,
        /// `throw`
        throw => Throw,
        /// `refanytype`
        refanytype => Refanytype,
    }

    token_ops! {
        /// `call method`
        call => Call,
        /// `callvirt method`
        callvirt => Callvirt,
        /// `newobj constructor`
        newobj => Newobj,
        /// `ldobj type`
        ldobj => Ldobj,
        /// `stobj type`
        stobj => Stobj,
        /// `initobj type`
        initobj => Initobj,
        /// `sizeof type`
        size_of => Sizeof,
        /// `newarr element`
        newarr => Newarr,
        /// `ldelem type`
        ldelem => Ldelem,
        /// `stelem type`
        stelem => Stelem,
        /// `ldfld field`
        ldfld => Ldfld,
        /// `ldflda field`
        ldflda => Ldflda,
        /// `stfld field`
        stfld => Stfld,
        /// `ldsfld field`
        ldsfld => Ldsfld,
        /// `ldsflda field`
        ldsflda => Ldsflda,
        /// `stsfld field`
        stsfld => Stsfld,
        /// `box type`
        box_type => Box,
        /// `unbox type`
        unbox => Unbox,
        /// `unbox.any type`
        unbox_any => UnboxAny,
        /// `isinst type`
        isinst => Isinst,
        /// `castclass type`
        castclass => Castclass,
        /// `ldtoken member`
        ldtoken => Ldtoken,
        /// `ldftn method`
        ldftn => Ldftn,
        /// `ldvirtftn method`
        ldvirtftn => Ldvirtftn,
        /// `mkrefany type`
        mkrefany => Mkrefany,
        /// `refanyval type`
        refanyval => Refanyval,
        /// `constrained. type`
        constrained => Constrained,
    }

    branch_ops! {
        /// `br target`
        br => Br,
        /// `brfalse target`
        brfalse => Brfalse,
        /// `brtrue target`
        brtrue => Brtrue,
        /// `beq target`
        beq => Beq,
        /// `bne.un target`
        bne_un => BneUn,
        /// `blt target`
        blt => Blt,
        /// `bge target`
        bge => Bge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_emission() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldarg(0)?.ldc_i4(2)?.mul()?.ret()?;
        assert_eq!(asm.len(), 4);
        let body = asm.finish()?;
        assert_eq!(body[1], Instruction::ldc_i4(2));
        assert_eq!(body[3].opcode, OpCode::Ret);
        Ok(())
    }

    #[test]
    fn duplicate_label_is_rejected() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.mark_label(Label(1))?;
        assert!(asm.mark_label(Label(1)).is_err());
        Ok(())
    }

    #[test]
    fn dangling_branch_is_rejected() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.br(Label(9))?;
        assert!(asm.finish().is_err());
        Ok(())
    }

    #[test]
    fn tokens_are_pushed_as_int32() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldc_token(Token::new(0x0400_0010))?;
        let body = asm.finish()?;
        assert_eq!(body[0], Instruction::ldc_i4(0x0400_0010));
        Ok(())
    }
}

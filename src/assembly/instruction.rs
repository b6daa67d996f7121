//! CIL instruction representation used by scanned and generated method bodies.
//!
//! Bodies are kept as symbolic instruction lists rather than encoded bytes: branch targets
//! are [`Label`]s defined by [`OpCode::MarkLabel`] pseudo-instructions, the way an IL
//! generator marks labels. This lets the rewriter splice multi-instruction sequences in place
//! of a single instruction without fixing up offsets.
//!
//! # Key Components
//!
//! - [`crate::assembly::instruction::Instruction`] - One operation plus operand
//! - [`crate::assembly::instruction::OpCode`] - The supported CIL operations
//! - [`crate::assembly::instruction::Operand`] - Type-safe operand representation
//! - [`crate::assembly::instruction::FlowType`] - Control flow behavior classification

use std::fmt;

use strum::{Display, EnumIter, EnumString};

use crate::{
    assembly::Intrinsic,
    metadata::{members::MethodSignature, token::Token},
};

/// CIL operations understood by the scanner, the rewriter and the reference runtime.
///
/// `Display` yields the ECMA-335 mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[allow(missing_docs)]
pub enum OpCode {
    #[strum(serialize = "nop")]
    Nop,
    /// Label definition pseudo-instruction; occupies no bytes once encoded
    #[strum(serialize = "label")]
    MarkLabel,
    #[strum(serialize = "ldarg")]
    Ldarg,
    #[strum(serialize = "ldarga")]
    Ldarga,
    #[strum(serialize = "starg")]
    Starg,
    #[strum(serialize = "ldloc")]
    Ldloc,
    #[strum(serialize = "ldloca")]
    Ldloca,
    #[strum(serialize = "stloc")]
    Stloc,
    #[strum(serialize = "ldnull")]
    Ldnull,
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    #[strum(serialize = "ldstr")]
    Ldstr,
    #[strum(serialize = "dup")]
    Dup,
    #[strum(serialize = "pop")]
    Pop,
    #[strum(serialize = "call")]
    Call,
    #[strum(serialize = "callvirt")]
    Callvirt,
    #[strum(serialize = "calli")]
    Calli,
    #[strum(serialize = "ret")]
    Ret,
    #[strum(serialize = "br")]
    Br,
    #[strum(serialize = "brfalse")]
    Brfalse,
    #[strum(serialize = "brtrue")]
    Brtrue,
    #[strum(serialize = "beq")]
    Beq,
    #[strum(serialize = "bne.un")]
    BneUn,
    #[strum(serialize = "blt")]
    Blt,
    #[strum(serialize = "bge")]
    Bge,
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Sub,
    #[strum(serialize = "mul")]
    Mul,
    #[strum(serialize = "div")]
    Div,
    #[strum(serialize = "rem")]
    Rem,
    #[strum(serialize = "neg")]
    Neg,
    #[strum(serialize = "ceq")]
    Ceq,
    #[strum(serialize = "cgt")]
    Cgt,
    #[strum(serialize = "clt")]
    Clt,
    #[strum(serialize = "conv.i4")]
    ConvI4,
    #[strum(serialize = "conv.i8")]
    ConvI8,
    #[strum(serialize = "conv.r8")]
    ConvR8,
    #[strum(serialize = "conv.i")]
    ConvI,
    #[strum(serialize = "conv.u")]
    ConvU,
    #[strum(serialize = "ldind.i")]
    LdindI,
    #[strum(serialize = "ldind.i4")]
    LdindI4,
    #[strum(serialize = "ldind.i8")]
    LdindI8,
    #[strum(serialize = "ldind.ref")]
    LdindRef,
    #[strum(serialize = "stind.i")]
    StindI,
    #[strum(serialize = "stind.i4")]
    StindI4,
    #[strum(serialize = "stind.i8")]
    StindI8,
    #[strum(serialize = "stind.ref")]
    StindRef,
    #[strum(serialize = "ldobj")]
    Ldobj,
    #[strum(serialize = "stobj")]
    Stobj,
    #[strum(serialize = "initobj")]
    Initobj,
    #[strum(serialize = "sizeof")]
    Sizeof,
    #[strum(serialize = "newobj")]
    Newobj,
    #[strum(serialize = "newarr")]
    Newarr,
    #[strum(serialize = "ldlen")]
    Ldlen,
    #[strum(serialize = "ldelem")]
    Ldelem,
    #[strum(serialize = "stelem")]
    Stelem,
    #[strum(serialize = "ldfld")]
    Ldfld,
    #[strum(serialize = "ldflda")]
    Ldflda,
    #[strum(serialize = "stfld")]
    Stfld,
    #[strum(serialize = "ldsfld")]
    Ldsfld,
    #[strum(serialize = "ldsflda")]
    Ldsflda,
    #[strum(serialize = "stsfld")]
    Stsfld,
    #[strum(serialize = "box")]
    Box,
    #[strum(serialize = "unbox")]
    Unbox,
    #[strum(serialize = "unbox.any")]
    UnboxAny,
    #[strum(serialize = "isinst")]
    Isinst,
    #[strum(serialize = "castclass")]
    Castclass,
    #[strum(serialize = "throw")]
    Throw,
    #[strum(serialize = "ldtoken")]
    Ldtoken,
    #[strum(serialize = "ldftn")]
    Ldftn,
    #[strum(serialize = "ldvirtftn")]
    Ldvirtftn,
    #[strum(serialize = "mkrefany")]
    Mkrefany,
    #[strum(serialize = "refanyval")]
    Refanyval,
    #[strum(serialize = "refanytype")]
    Refanytype,
    #[strum(serialize = "constrained.")]
    Constrained,
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Sequential,
    /// Execution may continue at a label or fall through
    ConditionalBranch,
    /// Execution always continues at a label
    UnconditionalBranch,
    /// Transfers control to another method and comes back
    Call,
    /// Leaves the method normally
    Return,
    /// Leaves the method by raising an exception
    Throw,
}

impl OpCode {
    /// Classifies the control flow of this operation
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        match self {
            OpCode::Br => FlowType::UnconditionalBranch,
            OpCode::Brfalse
            | OpCode::Brtrue
            | OpCode::Beq
            | OpCode::BneUn
            | OpCode::Blt
            | OpCode::Bge => FlowType::ConditionalBranch,
            OpCode::Call | OpCode::Callvirt | OpCode::Calli | OpCode::Newobj => FlowType::Call,
            OpCode::Ret => FlowType::Return,
            OpCode::Throw => FlowType::Throw,
            _ => FlowType::Sequential,
        }
    }

    /// Returns true for prefixes that modify the following instruction
    #[must_use]
    pub fn is_prefix(&self) -> bool {
        matches!(self, OpCode::Constrained)
    }
}

/// A branch target inside one method body.
///
/// Labels are method-local; the rewriter allocates fresh ones above the highest label of
/// the original body so spliced sequences never collide with existing targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L_{:04}", self.0)
    }
}

/// Represents an immediate value embedded in an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Signed 64-bit immediate value
    Int64(i64),
    /// 64-bit floating point immediate value
    Float64(f64),
}

/// Instruction operands.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// Immediate value (constant embedded in instruction)
    Immediate(Immediate),
    /// String literal for `ldstr`
    String(String),
    /// Metadata token reference
    Token(Token),
    /// Branch target
    Target(Label),
    /// Local variable index
    Local(u16),
    /// Method argument index
    Argument(u16),
    /// Runtime helper called by synthesized code
    Intrinsic(Intrinsic),
    /// Call-site signature for `calli`
    Signature(MethodSignature),
}

impl Operand {
    /// Returns the metadata token if this operand references a member
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self {
            Operand::Token(token) => Some(*token),
            _ => None,
        }
    }
}

/// One CIL operation together with its operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The operation
    pub opcode: OpCode,
    /// The operand, [`Operand::None`] for operations without one
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction without operand
    #[must_use]
    pub fn simple(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// Creates an instruction referencing a member token
    #[must_use]
    pub fn token(opcode: OpCode, token: Token) -> Self {
        Instruction {
            opcode,
            operand: Operand::Token(token),
        }
    }

    /// Creates `ldc.i4 value`
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        Instruction {
            opcode: OpCode::LdcI4,
            operand: Operand::Immediate(Immediate::Int32(value)),
        }
    }

    /// Creates an instruction addressing a local variable
    #[must_use]
    pub fn local(opcode: OpCode, index: u16) -> Self {
        Instruction {
            opcode,
            operand: Operand::Local(index),
        }
    }

    /// Creates an instruction addressing a method argument
    #[must_use]
    pub fn argument(opcode: OpCode, index: u16) -> Self {
        Instruction {
            opcode,
            operand: Operand::Argument(index),
        }
    }

    /// Creates a branch to `label`
    #[must_use]
    pub fn branch(opcode: OpCode, label: Label) -> Self {
        Instruction {
            opcode,
            operand: Operand::Target(label),
        }
    }

    /// Creates the definition point of `label`
    #[must_use]
    pub fn mark(label: Label) -> Self {
        Instruction {
            opcode: OpCode::MarkLabel,
            operand: Operand::Target(label),
        }
    }

    /// Creates an instruction invoking a runtime helper
    #[must_use]
    pub fn intrinsic(opcode: OpCode, intrinsic: Intrinsic) -> Self {
        Instruction {
            opcode,
            operand: Operand::Intrinsic(intrinsic),
        }
    }

    /// The member token referenced by this instruction, if any
    #[must_use]
    pub fn member(&self) -> Option<Token> {
        self.operand.token()
    }

    /// Returns a copy of this instruction pointing at `token` instead
    #[must_use]
    pub fn with_member(&self, token: Token) -> Self {
        Instruction {
            opcode: self.opcode,
            operand: Operand::Token(token),
        }
    }

    /// Returns the label this instruction defines, if it is a label mark
    #[must_use]
    pub fn defined_label(&self) -> Option<Label> {
        match (self.opcode, &self.operand) {
            (OpCode::MarkLabel, Operand::Target(label)) => Some(*label),
            _ => None,
        }
    }

    /// Returns the label this instruction branches to, if any
    #[must_use]
    pub fn branch_target(&self) -> Option<Label> {
        match (self.opcode.flow_type(), &self.operand) {
            (
                FlowType::ConditionalBranch | FlowType::UnconditionalBranch,
                Operand::Target(label),
            ) => Some(*label),
            _ => None,
        }
    }

    /// Returns true if control can never fall through past this instruction
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.opcode.flow_type(),
            FlowType::UnconditionalBranch | FlowType::Return | FlowType::Throw
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = self.defined_label() {
            return write!(f, "{label}:");
        }
        write!(f, "{}", self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Immediate(Immediate::Int32(value)) => write!(f, " {value}"),
            Operand::Immediate(Immediate::Int64(value)) => write!(f, " {value}"),
            Operand::Immediate(Immediate::Float64(value)) => write!(f, " {value}"),
            Operand::String(value) => write!(f, " {value:?}"),
            Operand::Token(token) => write!(f, " {token}"),
            Operand::Target(label) => write!(f, " {label}"),
            Operand::Local(index) => write!(f, " V_{index}"),
            Operand::Argument(index) => write!(f, " A_{index}"),
            Operand::Intrinsic(intrinsic) => write!(f, " {intrinsic}"),
            Operand::Signature(signature) => write!(f, " {signature}"),
        }
    }
}

/// Highest label referenced or defined in `instructions`, if any.
#[must_use]
pub fn max_label(instructions: &[Instruction]) -> Option<Label> {
    instructions
        .iter()
        .filter_map(|instruction| match instruction.operand {
            Operand::Target(label) => Some(label),
            _ => None,
        })
        .max()
}

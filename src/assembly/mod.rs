//! Symbolic CIL instruction model.
//!
//! Method bodies are sequences of [`Instruction`]s with label-based branch targets. The
//! module provides the operation catalogue ([`OpCode`]), operands ([`Operand`]), the
//! reflection helpers synthesized code calls ([`Intrinsic`]) and the fluent
//! [`InstructionAssembler`] used to build sequences.

mod assembler;
mod instruction;
mod intrinsics;

pub use assembler::InstructionAssembler;
pub use instruction::{max_label, FlowType, Immediate, Instruction, Label, OpCode, Operand};
pub use intrinsics::Intrinsic;

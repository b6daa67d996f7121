//! Hard faults of the reference runtime.
//!
//! Managed exceptions are not errors: a `throw` that leaves the outermost frame is reported
//! as [`crate::emulation::ExecutionOutcome::Threw`]. [`EmulationError`] covers conditions no
//! verifiable program reaches, such as a stack underflow, a wild address or a missing body.

use thiserror::Error;

use crate::{
    assembly::{Label, OpCode},
    metadata::token::Token,
};

/// Fault raised while interpreting a method body
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmulationError {
    /// An instruction needed more values than the evaluation stack holds
    #[error("evaluation stack underflow at {0}")]
    StackUnderflow(OpCode),

    /// A value of the wrong stack type was consumed
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The required stack type
        expected: &'static str,
        /// The stack type found instead
        found: &'static str,
    },

    /// The operand does not fit the operation
    #[error("invalid operand for {opcode}: expected {expected}")]
    InvalidOperand {
        /// The operation
        opcode: OpCode,
        /// Description of the expected operand
        expected: &'static str,
    },

    /// Access outside any allocated region
    #[error("invalid memory access at 0x{address:x} ({size} bytes)")]
    InvalidAddress {
        /// First byte accessed
        address: u64,
        /// Access width
        size: usize,
    },

    /// Integer division or remainder by zero; the runtime raises it as a managed exception
    #[error("attempted to divide by zero")]
    DivideByZero,

    /// A branch to a label the body never defines
    #[error("branch to undefined label {0}")]
    UndefinedLabel(Label),

    /// A call reached a method without body
    #[error("method {0} has no body")]
    MissingBody(String),

    /// `calli` or `GetFunctionPointer` on a value that is no function pointer
    #[error("0x{0:x} is not a function pointer")]
    InvalidFunctionPointer(u64),

    /// A reflection helper received an object of the wrong kind
    #[error("{0} is not a {1} object")]
    NotReflectionObject(u64, &'static str),

    /// The type has no storage layout, e.g. `System.Void`
    #[error("type {0} has no storage layout")]
    NoLayout(Token),

    /// Interpretation exceeded the configured instruction budget
    #[error("instruction limit of {0} exceeded")]
    InstructionLimit(u64),

    /// Calls nested deeper than the configured limit
    #[error("call depth limit of {0} exceeded")]
    CallDepthLimit(usize),
}

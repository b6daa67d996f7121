//! Results of executing instructions and whole methods.

use crate::{emulation::EmValue, metadata::token::Token, assembly::Label};

/// What the dispatch loop does after one instruction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StepResult {
    /// Continue with the next instruction
    Continue,
    /// Continue at a label
    Branch(Label),
    /// Leave the method, with the return value if it has one
    Return(Option<EmValue>),
    /// Raise the exception object
    Throw(u64),
}

/// A managed exception that left the invoked method.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedException {
    /// Runtime type of the exception object
    pub exception_type: Token,
    /// Exception message, if one was set
    pub message: Option<String>,
    /// The exception object itself
    pub object: EmValue,
}

/// How an invoked method finished.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Normal return, with the return value for non-void methods
    Returned(Option<EmValue>),
    /// An exception propagated out of the method
    Threw(ManagedException),
}

impl ExecutionOutcome {
    /// The return value of a normal return
    #[must_use]
    pub fn value(&self) -> Option<&EmValue> {
        match self {
            ExecutionOutcome::Returned(value) => value.as_ref(),
            ExecutionOutcome::Threw(_) => None,
        }
    }

    /// The exception of an abnormal return
    #[must_use]
    pub fn exception(&self) -> Option<&ManagedException> {
        match self {
            ExecutionOutcome::Returned(_) => None,
            ExecutionOutcome::Threw(exception) => Some(exception),
        }
    }
}

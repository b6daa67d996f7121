//! # cilreplica Prelude
//!
//! Re-exports of the types most programs need to describe an original program, copy it and
//! run the result. Import this module to get all of them at once.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilreplica operations
pub use crate::Error;

/// The result type used throughout cilreplica
pub use crate::Result;

// ================================================================================================
// Metadata
// ================================================================================================

/// Metadata token type identifying every member
pub use crate::metadata::token::Token;

/// Store of every loaded member, seeded with the core library
pub use crate::metadata::registry::{CoreLibrary, MemberRegistry};

/// Member descriptors
pub use crate::metadata::members::{
    FieldDef, LocalVariable, Member, MethodBody, MethodDef, MethodSignature, TypeDef, TypeKind,
};

/// Member attribute flags
pub use crate::metadata::attributes::{FieldAttributes, MethodAttributes, TypeAttributes};

/// Builders describing original programs
pub use crate::metadata::builder::{
    EventBuilder, FieldBuilder, MethodBuilder, PropertyBuilder, TypeBuilder,
};

/// The reflection surface the copier reads through
pub use crate::metadata::host::MetadataHost;

// ================================================================================================
// Instructions
// ================================================================================================

/// Instruction model and assembler
pub use crate::assembly::{Instruction, InstructionAssembler, Intrinsic, Label, OpCode, Operand};

// ================================================================================================
// Copying and Rewriting
// ================================================================================================

/// The member graph copier and its configuration
pub use crate::copier::{BodyEdit, CopyOptions, CopyReport, GraphCopier, IllegalAccessPolicy};

/// Accessibility checks, runtime layouts and instruction synthesis
pub use crate::rewrite::{
    AccessibilityOracle, InstructionSynthesizer, RuntimeFamily, RuntimeProbe, Synthesis,
};

/// Generated modules
pub use crate::emit::{GeneratedModule, ModuleEmitter, RegistryEmitter};

// ================================================================================================
// Reference Runtime
// ================================================================================================

/// Interpreter, stack values and the layout probe
pub use crate::emulation::{EmValue, EmulatedProbe, ExecutionOutcome, ManagedException, Runtime};

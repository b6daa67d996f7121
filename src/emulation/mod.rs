//! Reference CIL runtime.
//!
//! A small interpreter that executes the [`crate::metadata::members::MethodBody`]s of a
//! [`crate::metadata::registry::MemberRegistry`] with the memory layout of a chosen
//! [`crate::rewrite::RuntimeFamily`]. It serves two purposes: it is the
//! [`crate::rewrite::RuntimeProbe`] that measures layout facts for the synthesizer
//! ([`EmulatedProbe`]), and it runs original and copied members side by side so their
//! behavior can be compared.
//!
//! Exception handling regions are not modelled: a managed exception unwinds every frame and
//! is reported as [`ExecutionOutcome::Threw`].
//!
//! # Key Components
//!
//! - [`Runtime`] - Object model, calls and the dispatch loop
//! - [`EmValue`] - Stack values
//! - [`AddressSpace`] - Flat simulated memory
//! - [`EmulatedProbe`] - Layout measurements for the synthesizer
//!
//! # Examples
//!
//! ```rust
//! use cilreplica::{
//!     assembly::InstructionAssembler,
//!     emulation::{EmValue, Runtime},
//!     metadata::{attributes::MethodAttributes, builder::{MethodBuilder, TypeBuilder}},
//!     rewrite::RuntimeFamily,
//!     MemberRegistry,
//! };
//! use std::sync::Arc;
//!
//! let registry = Arc::new(MemberRegistry::new());
//! let int32 = registry.core().int32;
//! let math = TypeBuilder::new(registry.clone(), "Demo.dll").class("Demo", "Math").public().build()?;
//! let add = MethodBuilder::new(registry.clone(), math.token, "Add")
//!     .flags(MethodAttributes::PUBLIC | MethodAttributes::STATIC)
//!     .returns(int32)
//!     .parameter(int32)
//!     .parameter(int32)
//!     .implementation(|asm: &mut InstructionAssembler| {
//!         asm.ldarg(0)?.ldarg(1)?.add()?.ret()?;
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let mut runtime = Runtime::new(registry, RuntimeFamily::CoreClr);
//! let outcome = runtime.invoke(add.token, &[EmValue::I32(2), EmValue::I32(3)])?;
//! assert_eq!(outcome.value(), Some(&EmValue::I32(5)));
//! # Ok::<(), cilreplica::Error>(())
//! ```

mod engine;
mod memory;
mod ops;
mod probe;
mod value;

pub use engine::{
    EmulationError, EmulationLimits, ExecutionOutcome, ManagedException, Runtime,
    FUNCTION_POINTER_TAG, METHOD_HANDLE_TAG, TYPE_HANDLE_TAG,
};
pub use memory::AddressSpace;
pub use ops::{BinaryOp, CompareOp, ConversionType};
pub use probe::EmulatedProbe;
pub use value::EmValue;

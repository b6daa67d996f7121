//! Method body rewriting.
//!
//! Copied method bodies may reference members the generated module cannot legally access.
//! This module decides which references are legal ([`AccessibilityOracle`]) and replaces the
//! illegal ones with equivalent sequences that go through reflection or raw memory layouts
//! ([`InstructionSynthesizer`]). Layout facts depend on the runtime family and are measured
//! through a [`RuntimeProbe`]; temporaries come from a per-method [`MethodScratch`].

mod accessibility;
mod layout;
mod locals;
mod synthesizer;

pub use accessibility::AccessibilityOracle;
pub use layout::{box_payload_offset, RuntimeFamily, RuntimeProbe, TypedReferenceLayout};
pub use locals::{LocalPool, MethodScratch, ScratchSlot};
pub use synthesizer::{InstructionSynthesizer, Synthesis, INVALID_CAST_FORMAT};

// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # cilreplica
//!
//! Member graph copying for .NET CIL programs.
//!
//! `cilreplica` clones a closed set of type definitions, with their fields, methods,
//! properties, events and nested types, into a freshly generated module. Method bodies are
//! rewritten so that every reference into the copied graph points at the copy, and every
//! reference the generated module is not allowed to use directly (private members of foreign
//! types, for example) is replaced by an equivalent reflection-based instruction sequence.
//!
//! ## Features
//!
//! - **Graph copying** - Cyclic member graphs are copied without recursion loops
//! - **Accessibility-aware rewriting** - Illegal member accesses become reflection calls
//! - **Runtime families** - Object and typed reference layouts for CoreCLR and Mono
//! - **Reference runtime** - A small CIL interpreter to run originals and copies side by side
//! - **Listings** - Generated modules render as IL-like text and can be persisted to disk
//!
//! ## Quick Start
//!
//! ```rust
//! use cilreplica::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(MemberRegistry::new());
//! let counter = TypeBuilder::new(registry.clone(), "Demo.dll")
//!     .class("Demo", "Counter")
//!     .public()
//!     .build()?;
//! MethodBuilder::new(registry.clone(), counter.token, "Seed")
//!     .flags(MethodAttributes::PUBLIC | MethodAttributes::STATIC)
//!     .returns(registry.core().int32)
//!     .implementation(|asm| {
//!         asm.ldc_i4(7)?.ret()?;
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let mut copier = GraphCopier::new(registry.clone());
//! copier.add_original_type(counter.token)?;
//! let probe = EmulatedProbe::new(registry.clone(), RuntimeFamily::CoreClr);
//! let module = copier.create_assembly(&probe, None)?;
//!
//! let copy = module.find_type("Demo", "Counter").ok_or(Error::MemberNotFound(counter.token))?;
//! let seed = registry.find_method(copy, "Seed").ok_or(Error::MemberNotFound(copy))?;
//! let mut runtime = Runtime::new(registry.clone(), RuntimeFamily::CoreClr);
//! assert_eq!(runtime.invoke(seed.token, &[])?.value(), Some(&EmValue::I32(7)));
//! # Ok::<(), cilreplica::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - Tokens, member descriptors, the registry and the builders
//! - [`assembly`] - Instructions, opcodes and the instruction assembler
//! - [`rewrite`] - Accessibility checks, runtime layouts and instruction synthesis
//! - [`copier`] - The member graph copier
//! - [`emit`] - Generated modules, listings and persistence
//! - [`emulation`] - The reference CIL runtime
//! - [`Error`] and [`Result`] - Error handling

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use cilreplica::prelude::*;
///
/// let registry = std::sync::Arc::new(MemberRegistry::new());
/// let copier = GraphCopier::new(registry);
/// assert!(copier.original_types().is_empty());
/// ```
pub mod prelude;

/// Member metadata: tokens, descriptors, the registry and the builders that describe programs.
///
/// # Key Components
///
/// - [`metadata::token::Token`] - Identity of every member
/// - [`metadata::registry::MemberRegistry`] - Store of all loaded members
/// - [`metadata::builder`] - Fluent construction of types and members
/// - [`metadata::host::MetadataHost`] - The reflection surface the copier reads through
pub mod metadata;

/// CIL instructions and the assembler used to build and rewrite method bodies.
pub mod assembly;

/// Accessibility-aware instruction synthesis.
///
/// Decides whether generated code may reference a member directly and, when it may not,
/// produces an equivalent reflection-based instruction sequence.
pub mod rewrite;

/// Copies closed member graphs into generated modules.
pub mod copier;

/// Generated modules: materialization, listings and persistence.
pub mod emit;

/// Reference CIL runtime for layout probing and behavioral comparison.
pub mod emulation;

/// `cilreplica` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilreplica` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

pub use copier::{BodyEdit, CopyOptions, CopyReport, GraphCopier, IllegalAccessPolicy};
pub use metadata::{registry::MemberRegistry, token::Token};

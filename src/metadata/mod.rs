//! Member metadata: tokens, attributes, descriptors, the registry and the host interface.
//!
//! # Key Components
//!
//! - [`token::Token`] - Identity of every member
//! - [`members`] - Type, field, method, property and event descriptors
//! - [`registry::MemberRegistry`] - Store of every loaded member, core library included
//! - [`builder`] - Fluent builders used to describe original programs
//! - [`host::MetadataHost`] - The reflection surface the copier reads through

pub mod attributes;
pub mod builder;
pub mod host;
pub mod members;
pub mod registry;
pub mod token;

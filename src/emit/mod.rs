//! Module emission.
//!
//! The copier never writes descriptors itself. It drives a [`ModuleEmitter`], the collaborator
//! that defines placeholder nodes in a fresh module, fills in their shape, installs method
//! bodies and finally bakes each type. [`RegistryEmitter`] implements it over a
//! [`crate::metadata::registry::MemberRegistry`], so the generated module lives next to the
//! originals and can be inspected or executed right away.
//!
//! # Finalization rules
//!
//! - A baked type can no longer change: defining members on it, or setting the body of one of
//!   its methods, fails with [`crate::Error::AlreadyBaked`].
//! - A nested type can only be baked after its enclosing type.
//! - Every concrete method must have a body when its type is baked.

mod listing;
mod registry;

use std::path::Path;

use crate::{
    metadata::{
        attributes::{FieldAttributes, GenericParamAttributes, MethodAttributes, TypeAttributes},
        members::{CustomAttribute, MethodBody, MethodSignature, TypeKind},
        token::Token,
    },
    Result,
};

pub use listing::render_module;
pub use registry::{GeneratedModule, RegistryEmitter};

/// Writes definitions into one new module.
///
/// Tokens handed to the emitter may belong to any module; tokens it returns belong to the
/// module being generated, except for interned constructed shapes which are shared.
pub trait ModuleEmitter {
    /// Name of the module being generated
    fn module_name(&self) -> &str;

    /// Defines an empty type, nested in `enclosing` when given.
    ///
    /// # Errors
    /// Fails if `enclosing` is unknown or already baked.
    fn define_type(
        &mut self,
        namespace: &str,
        name: &str,
        flags: TypeAttributes,
        enclosing: Option<Token>,
    ) -> Result<Token>;

    /// Appends a generic parameter to a type or method of this module.
    ///
    /// # Errors
    /// Fails if `owner` cannot declare generic parameters or is already baked.
    fn define_generic_parameter(
        &mut self,
        owner: Token,
        name: &str,
        flags: GenericParamAttributes,
    ) -> Result<Token>;

    /// Sets the base type of `ty`.
    ///
    /// # Errors
    /// Fails if `ty` is baked or already has a base type.
    fn set_base(&mut self, ty: Token, base: Token) -> Result<()>;

    /// Adds an implemented interface to `ty`.
    ///
    /// # Errors
    /// Fails if `ty` is baked.
    fn add_interface(&mut self, ty: Token, interface: Token) -> Result<()>;

    /// Adds a constraint to a generic parameter.
    ///
    /// # Errors
    /// Fails if the parameter's owner is baked.
    fn add_constraint(&mut self, parameter: Token, constraint: Token) -> Result<()>;

    /// Applies a custom attribute to any member of this module.
    ///
    /// # Errors
    /// Fails if the member is unknown or its type is baked.
    fn add_custom_attribute(&mut self, member: Token, attribute: CustomAttribute) -> Result<()>;

    /// Defines a field whose type is set later.
    ///
    /// # Errors
    /// Fails if `declaring` is baked.
    fn define_field(&mut self, declaring: Token, name: &str, flags: FieldAttributes)
        -> Result<Token>;

    /// Sets the type of a field defined by this emitter.
    ///
    /// # Errors
    /// Fails if the type was already set.
    fn set_field_type(&mut self, field: Token, ty: Token) -> Result<()>;

    /// Defines a method whose signature and body are set later.
    ///
    /// # Errors
    /// Fails if `declaring` is baked.
    fn define_method(
        &mut self,
        declaring: Token,
        name: &str,
        flags: MethodAttributes,
    ) -> Result<Token>;

    /// Sets the signature of a method defined by this emitter.
    ///
    /// # Errors
    /// Fails if the signature was already set.
    fn set_signature(&mut self, method: Token, signature: MethodSignature) -> Result<()>;

    /// Defines a property whose type and accessors are set later.
    ///
    /// # Errors
    /// Fails if `declaring` is baked.
    fn define_property(&mut self, declaring: Token, name: &str) -> Result<Token>;

    /// Sets the type and accessors of a property.
    ///
    /// # Errors
    /// Fails if any part was already set.
    fn set_property_parts(
        &mut self,
        property: Token,
        ty: Option<Token>,
        getter: Option<Token>,
        setter: Option<Token>,
    ) -> Result<()>;

    /// Defines an event whose type and accessors are set later.
    ///
    /// # Errors
    /// Fails if `declaring` is baked.
    fn define_event(&mut self, declaring: Token, name: &str) -> Result<Token>;

    /// Sets the handler type and accessors of an event.
    ///
    /// # Errors
    /// Fails if any part was already set.
    fn set_event_parts(
        &mut self,
        event: Token,
        ty: Option<Token>,
        adder: Option<Token>,
        remover: Option<Token>,
    ) -> Result<()>;

    /// Returns the token of a constructed type shape (instantiation, array, by-ref, pointer).
    ///
    /// # Errors
    /// Fails for definitions and generic parameters or on an arity mismatch.
    fn construct_type(&mut self, kind: TypeKind) -> Result<Token>;

    /// Returns the token of a generic method instantiation.
    ///
    /// # Errors
    /// Fails on an arity mismatch.
    fn instantiate_method(&mut self, definition: Token, arguments: &[Token]) -> Result<Token>;

    /// Installs the body of a method defined by this emitter.
    ///
    /// # Errors
    /// Fails if the declaring type is baked, the method is abstract or already has a body.
    fn set_body(&mut self, method: Token, body: MethodBody) -> Result<()>;

    /// Finalizes a type.
    ///
    /// # Errors
    /// See the module-level finalization rules.
    fn bake_type(&mut self, ty: Token) -> Result<()>;

    /// Completes the module, persisting a listing under `output_dir` when given.
    ///
    /// # Errors
    /// Fails if a defined type was never baked, or on I/O errors.
    fn finish(&mut self, output_dir: Option<&Path>) -> Result<GeneratedModule>;
}

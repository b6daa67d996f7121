//! Reflection collaborator interface.
//!
//! The copier, the accessibility oracle and the synthesizer never reach into the registry
//! directly; they read metadata through [`MetadataHost`], the reflection surface a runtime
//! would offer: member descriptions by token, the scanned instruction stream of a method,
//! and resolution of a token relative to a declaring type.

use crate::{
    metadata::{
        members::{EventRc, FieldRc, Member, MethodBody, MethodRc, MethodSignature, PropertyRc, TypeRc},
        registry::{CoreLibrary, MemberRegistry},
        token::Token,
    },
    Error, Result,
};

/// Read-only view of member metadata.
pub trait MetadataHost {
    /// Describes any member.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if the token is unknown.
    fn member(&self, token: Token) -> Result<Member>;

    /// Describes a type.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if the token is not a type.
    fn type_def(&self, token: Token) -> Result<TypeRc>;

    /// Describes a field.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if the token is not a field.
    fn field(&self, token: Token) -> Result<FieldRc>;

    /// Describes a method, constructor or method instantiation.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if the token is not a method.
    fn method(&self, token: Token) -> Result<MethodRc>;

    /// Describes a property.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if the token is not a property.
    fn property(&self, token: Token) -> Result<PropertyRc>;

    /// Describes an event.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if the token is not an event.
    fn event(&self, token: Token) -> Result<EventRc>;

    /// Call signature of a method; instantiations share their definition's.
    ///
    /// # Errors
    /// Returns an error for unknown methods or methods without signature.
    fn signature(&self, method: Token) -> Result<MethodSignature>;

    /// Scans the instruction stream of a method, `None` for methods without body.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if the token is not a method.
    fn scan_body(&self, method: Token) -> Result<Option<MethodBody>>;

    /// Resolves `token` as a member of `declaring`.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if the member does not exist or is not declared by
    /// `declaring` (or by its generic definition).
    fn resolve_in(&self, declaring: Token, token: Token) -> Result<Member>;

    /// Tokens of the core library
    fn core(&self) -> &CoreLibrary;

    /// Identity of the token space; two hosts with the same scope agree on every token
    fn scope(&self) -> u64;

    /// Human readable member name for diagnostics
    fn display_name(&self, token: Token) -> String;

    /// Returns true for value types
    fn is_value_type(&self, ty: Token) -> bool;

    /// The open definition of a constructed generic type, otherwise `ty`
    fn generic_definition(&self, ty: Token) -> Token;
}

impl MetadataHost for MemberRegistry {
    fn member(&self, token: Token) -> Result<Member> {
        self.get(token).ok_or(Error::MemberNotFound(token))
    }

    fn type_def(&self, token: Token) -> Result<TypeRc> {
        MemberRegistry::type_def(self, token)
    }

    fn field(&self, token: Token) -> Result<FieldRc> {
        MemberRegistry::field(self, token)
    }

    fn method(&self, token: Token) -> Result<MethodRc> {
        MemberRegistry::method(self, token)
    }

    fn property(&self, token: Token) -> Result<PropertyRc> {
        MemberRegistry::property(self, token)
    }

    fn event(&self, token: Token) -> Result<EventRc> {
        MemberRegistry::event(self, token)
    }

    fn signature(&self, method: Token) -> Result<MethodSignature> {
        self.signature_of(method)
    }

    fn scan_body(&self, method: Token) -> Result<Option<MethodBody>> {
        Ok(MemberRegistry::method(self, method)?.body().cloned())
    }

    fn resolve_in(&self, declaring: Token, token: Token) -> Result<Member> {
        let member = MetadataHost::member(self, token)?;
        let owner = match &member {
            Member::Method(method) => match &method.instantiation {
                Some((definition, _)) => MemberRegistry::method(self, *definition)?.declaring,
                None => method.declaring,
            },
            other => other.declaring().ok_or(Error::MemberNotFound(token))?,
        };
        if owner == declaring || owner == MemberRegistry::generic_definition(self, declaring) {
            Ok(member)
        } else {
            Err(Error::MemberNotFound(token))
        }
    }

    fn core(&self) -> &CoreLibrary {
        MemberRegistry::core(self)
    }

    fn scope(&self) -> u64 {
        self.id()
    }

    fn display_name(&self, token: Token) -> String {
        MemberRegistry::display_name(self, token)
    }

    fn is_value_type(&self, ty: Token) -> bool {
        MemberRegistry::is_value_type(self, ty)
    }

    fn generic_definition(&self, ty: Token) -> Token {
        MemberRegistry::generic_definition(self, ty)
    }
}

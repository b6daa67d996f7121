//! Accessibility oracle.
//!
//! Decides whether code in a `source` member may reference a `target` member directly. The
//! rules are the usual public / protected / internal / private ones with two deliberate
//! departures:
//!
//! - `internal` targets are accessible. Generated code runs with the privileges needed to
//!   bypass assembly-level visibility, so only the type hierarchy matters.
//! - The enclosing-type walk for `protected` targets only climbs through types accepted by the
//!   `known` filter, i.e. types that belong to the graph being generated.
//!
//! Members the generated module defines itself can be registered with
//! [`AccessibilityOracle::with_generated`]; they are always accessible. Arrays, by-refs,
//! pointers and generic instantiations are checked part by part, so a shape built over
//! generated members and public types is accessible too.
//!
//! Constructed generic types are compared by their open definition.

use crate::metadata::{
    attributes::Visibility,
    host::MetadataHost,
    members::{Member, TypeKind},
    token::Token,
};

const MAX_DEPTH: usize = 64;

/// Visibility checks for references made from generated code.
pub struct AccessibilityOracle<'a> {
    host: &'a dyn MetadataHost,
    known: Box<dyn Fn(Token) -> bool + 'a>,
    generated: Option<Box<dyn Fn(Token) -> bool + 'a>>,
}

impl<'a> AccessibilityOracle<'a> {
    /// Creates an oracle whose protected walk is bounded by `known`
    pub fn new<F>(host: &'a dyn MetadataHost, known: F) -> Self
    where
        F: Fn(Token) -> bool + 'a,
    {
        AccessibilityOracle {
            host,
            known: Box::new(known),
            generated: None,
        }
    }

    /// Treats every member accepted by `generated` as accessible
    #[must_use]
    pub fn with_generated<G>(mut self, generated: G) -> Self
    where
        G: Fn(Token) -> bool + 'a,
    {
        self.generated = Some(Box::new(generated));
        self
    }

    /// Creates an oracle whose protected walk may climb through any enclosing type
    pub fn unfiltered(host: &'a dyn MetadataHost) -> Self {
        Self::new(host, |_| true)
    }

    /// Returns true if `source` may reference `target` directly.
    ///
    /// Unknown tokens are never accessible.
    #[must_use]
    pub fn is_accessible(&self, source: Token, target: Token) -> bool {
        self.check(source, target, 0)
    }

    fn check(&self, source: Token, target: Token, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            return false;
        }
        if self.generated.as_ref().is_some_and(|generated| generated(target)) {
            return true;
        }
        let Ok(member) = self.host.member(target) else {
            return false;
        };
        match member {
            Member::Type(ty) => match &ty.kind {
                TypeKind::GenericParameter { .. } => true,
                TypeKind::Instantiation {
                    definition,
                    arguments,
                } => {
                    self.check(source, *definition, depth + 1)
                        && arguments
                            .iter()
                            .all(|argument| self.check(source, *argument, depth + 1))
                }
                TypeKind::Array { element }
                | TypeKind::ByRef { element }
                | TypeKind::Pointer { element } => self.check(source, *element, depth + 1),
                TypeKind::Definition => {
                    self.by_visibility(source, ty.flags.visibility(), ty.enclosing, depth)
                }
            },
            Member::Field(field) => {
                self.by_visibility(source, field.flags.visibility(), Some(field.declaring), depth)
            }
            Member::Method(method) => match &method.instantiation {
                Some((definition, arguments)) => {
                    self.check(source, *definition, depth + 1)
                        && arguments
                            .iter()
                            .all(|argument| self.check(source, *argument, depth + 1))
                }
                None => self.by_visibility(
                    source,
                    method.flags.visibility(),
                    Some(method.declaring),
                    depth,
                ),
            },
            Member::Property(property) => {
                self.by_visibility(source, Visibility::Public, Some(property.declaring), depth)
            }
            Member::Event(event) => {
                self.by_visibility(source, Visibility::Public, Some(event.declaring), depth)
            }
        }
    }

    fn by_visibility(
        &self,
        source: Token,
        visibility: Visibility,
        declaring: Option<Token>,
        depth: usize,
    ) -> bool {
        match visibility {
            Visibility::Public => {
                declaring.is_none_or(|declaring| self.check(source, declaring, depth + 1))
            }
            Visibility::Assembly => true,
            Visibility::Private => false,
            Visibility::Family | Visibility::FamilyOrAssembly | Visibility::FamilyAndAssembly => {
                declaring.is_some_and(|declaring| self.in_family(source, declaring))
            }
        }
    }

    /// The type code in `source` runs in: `source` itself for types, else its declaring type
    fn context_type(&self, source: Token) -> Option<Token> {
        match self.host.member(source).ok()? {
            Member::Type(ty) => Some(ty.token),
            other => other.declaring(),
        }
    }

    fn in_family(&self, source: Token, declaring: Token) -> bool {
        let Some(mut current) = self.context_type(source) else {
            return false;
        };
        for _ in 0..MAX_DEPTH {
            if self.derives_from(current, declaring) {
                return true;
            }
            let enclosing = self
                .host
                .type_def(current)
                .ok()
                .and_then(|ty| ty.enclosing)
                .filter(|enclosing| (self.known)(*enclosing));
            match enclosing {
                Some(enclosing) => current = enclosing,
                None => return false,
            }
        }
        false
    }

    /// Returns true if `ty` is `ancestor`, derives from it, or implements it
    fn derives_from(&self, ty: Token, ancestor: Token) -> bool {
        let ancestor = self.host.generic_definition(ancestor);
        let mut current = Some(ty);
        let mut depth = 0;
        while let Some(candidate) = current {
            if depth > MAX_DEPTH {
                return false;
            }
            depth += 1;
            let definition = self.host.generic_definition(candidate);
            if definition == ancestor {
                return true;
            }
            let Ok(definition_ty) = self.host.type_def(definition) else {
                return false;
            };
            if definition_ty
                .interfaces
                .iter()
                .any(|(_, interface)| self.implements(*interface, ancestor, depth))
            {
                return true;
            }
            current = definition_ty.base();
        }
        false
    }

    fn implements(&self, interface: Token, ancestor: Token, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            return false;
        }
        let definition = self.host.generic_definition(interface);
        if definition == ancestor {
            return true;
        }
        self.host.type_def(definition).is_ok_and(|ty| {
            ty.interfaces
                .iter()
                .any(|(_, inherited)| self.implements(*inherited, ancestor, depth + 1))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            attributes::{FieldAttributes, MethodAttributes, TypeAttributes},
            builder::{FieldBuilder, MethodBuilder, TypeBuilder},
            members::TypeKind,
            registry::MemberRegistry,
        },
        Result,
    };
    use std::sync::Arc;

    struct Fixture {
        registry: Arc<MemberRegistry>,
        base: Token,
        derived: Token,
        helper_method: Token,
        stranger_method: Token,
        protected_field: Token,
        private_field: Token,
        internal_field: Token,
        public_field: Token,
        private_nested: Token,
        public_nested_in_private: Token,
    }

    fn fixture() -> Result<Fixture> {
        let registry = Arc::new(MemberRegistry::new());
        let int32 = registry.core().int32;
        let base = TypeBuilder::new(registry.clone(), "Lib.dll")
            .class("Lib", "Base")
            .public()
            .generic_parameter("T")
            .build()?;
        let field = |name: &str, flags| {
            FieldBuilder::new(registry.clone(), base.token, name)
                .field_type(int32)
                .flags(flags)
                .build()
                .map(|field| field.token)
        };
        let protected_field = field("guarded", FieldAttributes::FAMILY)?;
        let private_field = field("hidden", FieldAttributes::PRIVATE)?;
        let internal_field = field("shared", FieldAttributes::ASSEMBLY)?;
        let public_field = field("open", FieldAttributes::PUBLIC)?;
        let private_nested = TypeBuilder::new(registry.clone(), "Lib.dll")
            .class("Lib", "Secret")
            .nested_in(base.token, TypeAttributes::NESTED_PRIVATE)
            .build()?;
        let public_nested_in_private = TypeBuilder::new(registry.clone(), "Lib.dll")
            .class("Lib", "Visible")
            .nested_in(private_nested.token, TypeAttributes::NESTED_PUBLIC)
            .build()?;

        let instantiated = registry.intern_type(TypeKind::Instantiation {
            definition: base.token,
            arguments: vec![int32],
        })?;
        let derived = TypeBuilder::new(registry.clone(), "App.dll")
            .class("App", "Derived")
            .public()
            .extends(instantiated)
            .build()?;
        let helper = TypeBuilder::new(registry.clone(), "App.dll")
            .class("App", "Helper")
            .nested_in(derived.token, TypeAttributes::NESTED_PRIVATE)
            .build()?;
        let helper_method = MethodBuilder::new(registry.clone(), helper.token, "Run")
            .flags(MethodAttributes::PUBLIC)
            .build()?;
        let stranger = TypeBuilder::new(registry.clone(), "App.dll")
            .class("App", "Stranger")
            .public()
            .build()?;
        let stranger_method = MethodBuilder::new(registry.clone(), stranger.token, "Run")
            .flags(MethodAttributes::PUBLIC)
            .build()?;

        Ok(Fixture {
            registry,
            base: base.token,
            derived: derived.token,
            helper_method: helper_method.token,
            stranger_method: stranger_method.token,
            protected_field,
            private_field,
            internal_field,
            public_field,
            private_nested: private_nested.token,
            public_nested_in_private: public_nested_in_private.token,
        })
    }

    #[test]
    fn visibility_levels() -> Result<()> {
        let f = fixture()?;
        let oracle = AccessibilityOracle::unfiltered(f.registry.as_ref());
        assert!(oracle.is_accessible(f.stranger_method, f.public_field));
        assert!(oracle.is_accessible(f.stranger_method, f.internal_field));
        assert!(!oracle.is_accessible(f.stranger_method, f.private_field));
        assert!(!oracle.is_accessible(f.stranger_method, f.protected_field));
        assert!(!oracle.is_accessible(f.derived, f.private_field));
        assert!(oracle.is_accessible(f.stranger_method, f.base));
        Ok(())
    }

    #[test]
    fn public_nested_type_inherits_enclosing_visibility() -> Result<()> {
        let f = fixture()?;
        let oracle = AccessibilityOracle::unfiltered(f.registry.as_ref());
        assert!(!oracle.is_accessible(f.stranger_method, f.private_nested));
        assert!(!oracle.is_accessible(f.stranger_method, f.public_nested_in_private));
        Ok(())
    }

    #[test]
    fn protected_through_generic_base_and_enclosing_walk() -> Result<()> {
        let f = fixture()?;
        let oracle = AccessibilityOracle::unfiltered(f.registry.as_ref());
        assert!(oracle.is_accessible(f.derived, f.protected_field));
        assert!(oracle.is_accessible(f.helper_method, f.protected_field));

        let derived = f.derived;
        let filtered = AccessibilityOracle::new(f.registry.as_ref(), move |ty| ty != derived);
        assert!(filtered.is_accessible(f.derived, f.protected_field));
        assert!(!filtered.is_accessible(f.helper_method, f.protected_field));
        Ok(())
    }

    #[test]
    fn constructed_types_check_their_parts() -> Result<()> {
        let f = fixture()?;
        let oracle = AccessibilityOracle::unfiltered(f.registry.as_ref());
        let open = f.registry.intern_type(TypeKind::Instantiation {
            definition: f.base,
            arguments: vec![f.derived],
        })?;
        let hidden = f.registry.intern_type(TypeKind::Instantiation {
            definition: f.base,
            arguments: vec![f.private_nested],
        })?;
        let hidden_array = f.registry.intern_type(TypeKind::Array {
            element: f.private_nested,
        })?;
        assert!(oracle.is_accessible(f.stranger_method, open));
        assert!(!oracle.is_accessible(f.stranger_method, hidden));
        assert!(!oracle.is_accessible(f.stranger_method, hidden_array));
        assert!(!oracle.is_accessible(f.stranger_method, Token::new(0x0200_7FFF)));
        Ok(())
    }

    #[test]
    fn shapes_over_generated_members_are_accessible() -> Result<()> {
        let f = fixture()?;
        let secret = f.private_nested;
        let oracle = AccessibilityOracle::unfiltered(f.registry.as_ref())
            .with_generated(move |member| member == secret);

        let array = f.registry.intern_type(TypeKind::Array { element: secret })?;
        let by_ref = f.registry.intern_type(TypeKind::ByRef { element: array })?;
        let instantiated = f.registry.intern_type(TypeKind::Instantiation {
            definition: f.base,
            arguments: vec![secret],
        })?;
        assert!(oracle.is_accessible(f.stranger_method, secret));
        assert!(oracle.is_accessible(f.stranger_method, array));
        assert!(oracle.is_accessible(f.stranger_method, by_ref));
        assert!(oracle.is_accessible(f.stranger_method, instantiated));

        // Other parts of a shape are still checked
        let hidden = TypeBuilder::new(f.registry.clone(), "Lib.dll")
            .class("Lib", "Hidden")
            .nested_in(f.base, TypeAttributes::NESTED_PRIVATE)
            .build()?;
        let mixed = f.registry.intern_type(TypeKind::Instantiation {
            definition: f.base,
            arguments: vec![hidden.token],
        })?;
        assert!(!oracle.is_accessible(f.stranger_method, mixed));
        assert!(!oracle.is_accessible(f.stranger_method, f.private_field));
        Ok(())
    }
}

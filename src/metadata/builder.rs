//! Fluent builders for member descriptors.
//!
//! The builders describe programs directly against a [`MemberRegistry`]: callers use them to
//! load the "original" definitions a copy session starts from, and tests use them to set up
//! fixtures. Each builder collects its parts and publishes the finished descriptor with
//! `build()`.
//!
//! # Example
//!
//! ```rust
//! use cilreplica::metadata::{
//!     attributes::{FieldAttributes, MethodAttributes},
//!     builder::{FieldBuilder, MethodBuilder, TypeBuilder},
//!     registry::MemberRegistry,
//! };
//! use std::sync::Arc;
//!
//! # fn example() -> cilreplica::Result<()> {
//! let registry = Arc::new(MemberRegistry::new());
//! let int32 = registry.core().int32;
//!
//! let counter = TypeBuilder::new(registry.clone(), "Demo.dll")
//!     .class("Demo", "Counter")
//!     .public()
//!     .build()?;
//! let value = FieldBuilder::new(registry.clone(), counter.token, "value")
//!     .field_type(int32)
//!     .flags(FieldAttributes::PRIVATE)
//!     .build()?;
//! let value = value.token;
//! MethodBuilder::new(registry.clone(), counter.token, "Get")
//!     .flags(MethodAttributes::PUBLIC)
//!     .returns(int32)
//!     .implementation(move |asm| {
//!         asm.ldarg(0)?.ldfld(value)?.ret()?;
//!         Ok(())
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::{
    assembly::InstructionAssembler,
    metadata::{
        attributes::{FieldAttributes, GenericParamAttributes, MethodAttributes, TypeAttributes},
        members::{
            CustomAttribute, EventRc, FieldRc, LocalVariable, MethodBody, MethodRc,
            MethodSignature, PropertyRc, TypeRc,
        },
        registry::MemberRegistry,
        token::Token,
    },
    Error, Result,
};

type ImplementationFn = Box<dyn FnOnce(&mut InstructionAssembler) -> Result<()>>;

fn require_definition(registry: &MemberRegistry, token: Token) -> Result<TypeRc> {
    let ty = registry.type_def(token)?;
    if !ty.is_definition() {
        return Err(Error::Usage(format!(
            "{} is not a type definition",
            registry.display_name(token)
        )));
    }
    Ok(ty)
}

#[derive(Clone, Copy)]
enum BaseChoice {
    Object,
    ValueType,
    Explicit(Token),
    None,
}

/// Builds a type definition.
pub struct TypeBuilder {
    registry: Arc<MemberRegistry>,
    module: String,
    namespace: String,
    name: String,
    flags: TypeAttributes,
    enclosing: Option<Token>,
    base: BaseChoice,
    interfaces: Vec<Token>,
    generic_params: Vec<(String, GenericParamAttributes, Vec<Token>)>,
    custom_attributes: Vec<CustomAttribute>,
}

impl TypeBuilder {
    /// Starts a type in `module`
    #[must_use]
    pub fn new(registry: Arc<MemberRegistry>, module: &str) -> Self {
        TypeBuilder {
            registry,
            module: module.to_string(),
            namespace: String::new(),
            name: String::new(),
            flags: TypeAttributes::NOT_PUBLIC,
            enclosing: None,
            base: BaseChoice::Object,
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            custom_attributes: Vec::new(),
        }
    }

    /// A reference type deriving from `System.Object`
    #[must_use]
    pub fn class(mut self, namespace: &str, name: &str) -> Self {
        self.namespace = namespace.to_string();
        self.name = name.to_string();
        self.base = BaseChoice::Object;
        self
    }

    /// A sealed value type deriving from `System.ValueType`
    #[must_use]
    pub fn value_type(mut self, namespace: &str, name: &str) -> Self {
        self.namespace = namespace.to_string();
        self.name = name.to_string();
        self.base = BaseChoice::ValueType;
        self.flags |= TypeAttributes::SEALED;
        self
    }

    /// An interface without base type
    #[must_use]
    pub fn interface(mut self, namespace: &str, name: &str) -> Self {
        self.namespace = namespace.to_string();
        self.name = name.to_string();
        self.base = BaseChoice::None;
        self.flags |= TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT;
        self
    }

    /// Top-level public visibility
    #[must_use]
    pub fn public(mut self) -> Self {
        self.flags |= TypeAttributes::PUBLIC;
        self
    }

    /// Adds raw type flags
    #[must_use]
    pub fn flags(mut self, flags: TypeAttributes) -> Self {
        self.flags |= flags;
        self
    }

    /// Nests the type inside `enclosing` with the given nested visibility
    #[must_use]
    pub fn nested_in(mut self, enclosing: Token, visibility: TypeAttributes) -> Self {
        self.enclosing = Some(enclosing);
        self.namespace.clear();
        self.flags = (self.flags & !TypeAttributes::NESTED_FAM_OR_ASSEM) | visibility;
        self
    }

    /// Overrides the base type
    #[must_use]
    pub fn extends(mut self, base: Token) -> Self {
        self.base = BaseChoice::Explicit(base);
        self
    }

    /// Adds an implemented interface
    #[must_use]
    pub fn implements(mut self, interface: Token) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Appends a generic parameter
    #[must_use]
    pub fn generic_parameter(mut self, name: &str) -> Self {
        self.generic_params
            .push((name.to_string(), GenericParamAttributes::empty(), Vec::new()));
        self
    }

    /// Appends a generic parameter with flags and type constraints
    #[must_use]
    pub fn constrained_parameter(
        mut self,
        name: &str,
        flags: GenericParamAttributes,
        constraints: Vec<Token>,
    ) -> Self {
        self.generic_params
            .push((name.to_string(), flags, constraints));
        self
    }

    /// Applies a custom attribute
    #[must_use]
    pub fn custom_attribute(mut self, attribute: CustomAttribute) -> Self {
        self.custom_attributes.push(attribute);
        self
    }

    /// Publishes the type.
    ///
    /// # Errors
    /// Returns [`Error::Usage`] for a missing name or a non-definition enclosing type.
    pub fn build(self) -> Result<TypeRc> {
        if self.name.is_empty() {
            return Err(Error::Usage("type name must not be empty".to_string()));
        }
        if let Some(enclosing) = self.enclosing {
            require_definition(&self.registry, enclosing)?;
        }

        let ty = self.registry.define_type(
            &self.module,
            &self.namespace,
            &self.name,
            self.flags,
            self.enclosing,
        );
        for (name, flags, constraints) in self.generic_params {
            let param = self
                .registry
                .define_generic_parameter(ty.token, &name, flags)?;
            for constraint in constraints {
                param.constraints.push(constraint);
            }
        }
        let base = match self.base {
            BaseChoice::Object => Some(self.registry.core().object),
            BaseChoice::ValueType => Some(self.registry.core().value_type),
            BaseChoice::Explicit(base) => Some(base),
            BaseChoice::None => None,
        };
        if let Some(base) = base {
            ty.set_base(base);
        }
        for interface in self.interfaces {
            ty.interfaces.push(interface);
        }
        for attribute in self.custom_attributes {
            ty.custom_attributes.push(attribute);
        }
        Ok(ty)
    }
}

/// Builds a field.
pub struct FieldBuilder {
    registry: Arc<MemberRegistry>,
    declaring: Token,
    name: String,
    flags: FieldAttributes,
    field_type: Option<Token>,
    custom_attributes: Vec<CustomAttribute>,
}

impl FieldBuilder {
    /// Starts a field of `declaring`
    #[must_use]
    pub fn new(registry: Arc<MemberRegistry>, declaring: Token, name: &str) -> Self {
        FieldBuilder {
            registry,
            declaring,
            name: name.to_string(),
            flags: FieldAttributes::PRIVATE,
            field_type: None,
            custom_attributes: Vec::new(),
        }
    }

    /// Field type
    #[must_use]
    pub fn field_type(mut self, ty: Token) -> Self {
        self.field_type = Some(ty);
        self
    }

    /// Replaces the field flags
    #[must_use]
    pub fn flags(mut self, flags: FieldAttributes) -> Self {
        self.flags = flags;
        self
    }

    /// Applies a custom attribute
    #[must_use]
    pub fn custom_attribute(mut self, attribute: CustomAttribute) -> Self {
        self.custom_attributes.push(attribute);
        self
    }

    /// Publishes the field.
    ///
    /// # Errors
    /// Returns [`Error::Usage`] if no field type was given or the declaring type is not a
    /// definition.
    pub fn build(self) -> Result<FieldRc> {
        require_definition(&self.registry, self.declaring)?;
        let field_type = self
            .field_type
            .ok_or_else(|| Error::Usage(format!("field {} has no type", self.name)))?;
        let field = self
            .registry
            .define_field(self.declaring, &self.name, self.flags);
        field.set_field_type(field_type);
        for attribute in self.custom_attributes {
            field.custom_attributes.push(attribute);
        }
        Ok(field)
    }
}

#[derive(Clone, Copy)]
enum SignatureType {
    Type(Token),
    MethodGeneric(u16),
}

/// Builds a method or constructor, optionally with a body.
pub struct MethodBuilder {
    registry: Arc<MemberRegistry>,
    declaring: Token,
    name: String,
    flags: MethodAttributes,
    return_type: Option<SignatureType>,
    parameters: Vec<SignatureType>,
    generic_params: Vec<String>,
    locals: Vec<LocalVariable>,
    implementation: Option<ImplementationFn>,
    custom_attributes: Vec<CustomAttribute>,
}

impl MethodBuilder {
    /// Starts a method of `declaring`
    #[must_use]
    pub fn new(registry: Arc<MemberRegistry>, declaring: Token, name: &str) -> Self {
        MethodBuilder {
            registry,
            declaring,
            name: name.to_string(),
            flags: MethodAttributes::PRIVATE | MethodAttributes::HIDE_BY_SIG,
            return_type: None,
            parameters: Vec::new(),
            generic_params: Vec::new(),
            locals: Vec::new(),
            implementation: None,
            custom_attributes: Vec::new(),
        }
    }

    /// Starts an instance constructor of `declaring`
    #[must_use]
    pub fn constructor(registry: Arc<MemberRegistry>, declaring: Token) -> Self {
        MethodBuilder::new(registry, declaring, ".ctor").flags(
            MethodAttributes::PUBLIC
                | MethodAttributes::HIDE_BY_SIG
                | MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RT_SPECIAL_NAME,
        )
    }

    /// Replaces the method flags
    #[must_use]
    pub fn flags(mut self, flags: MethodAttributes) -> Self {
        self.flags = flags;
        self
    }

    /// Return type; `System.Void` when never called
    #[must_use]
    pub fn returns(mut self, ty: Token) -> Self {
        self.return_type = Some(SignatureType::Type(ty));
        self
    }

    /// Returns the method's own generic parameter at `position`
    #[must_use]
    pub fn returns_generic(mut self, position: u16) -> Self {
        self.return_type = Some(SignatureType::MethodGeneric(position));
        self
    }

    /// Appends a parameter
    #[must_use]
    pub fn parameter(mut self, ty: Token) -> Self {
        self.parameters.push(SignatureType::Type(ty));
        self
    }

    /// Appends a parameter typed by the method's own generic parameter at `position`
    #[must_use]
    pub fn generic_parameter_argument(mut self, position: u16) -> Self {
        self.parameters.push(SignatureType::MethodGeneric(position));
        self
    }

    /// Appends a method generic parameter
    #[must_use]
    pub fn generic_parameter(mut self, name: &str) -> Self {
        self.generic_params.push(name.to_string());
        self
    }

    /// Declares a local variable
    #[must_use]
    pub fn local(mut self, ty: Token) -> Self {
        self.locals.push(LocalVariable { ty, pinned: false });
        self
    }

    /// Applies a custom attribute
    #[must_use]
    pub fn custom_attribute(mut self, attribute: CustomAttribute) -> Self {
        self.custom_attributes.push(attribute);
        self
    }

    /// Provides the body
    #[must_use]
    pub fn implementation<F>(mut self, implementation: F) -> Self
    where
        F: FnOnce(&mut InstructionAssembler) -> Result<()> + 'static,
    {
        self.implementation = Some(Box::new(implementation));
        self
    }

    /// Publishes the method.
    ///
    /// # Errors
    /// Returns [`Error::Usage`] for a non-definition declaring type, an abstract method with
    /// a body, or a signature that names a missing generic parameter, and propagates errors
    /// raised by the implementation closure.
    pub fn build(self) -> Result<MethodRc> {
        require_definition(&self.registry, self.declaring)?;
        if self.flags.contains(MethodAttributes::ABSTRACT) && self.implementation.is_some() {
            return Err(Error::Usage(format!(
                "abstract method {} cannot have a body",
                self.name
            )));
        }

        let method = self
            .registry
            .define_method(self.declaring, &self.name, self.flags);
        let mut generic = Vec::with_capacity(self.generic_params.len());
        for name in &self.generic_params {
            let param = self.registry.define_generic_parameter(
                method.token,
                name,
                GenericParamAttributes::empty(),
            )?;
            generic.push(param.token);
        }
        let resolve = |ty: SignatureType| -> Result<Token> {
            match ty {
                SignatureType::Type(token) => Ok(token),
                SignatureType::MethodGeneric(position) => generic
                    .get(usize::from(position))
                    .copied()
                    .ok_or_else(|| {
                        Error::Usage(format!(
                            "method {} has no generic parameter {position}",
                            self.name
                        ))
                    }),
            }
        };

        let return_type = match self.return_type {
            Some(ty) => resolve(ty)?,
            None => self.registry.core().void,
        };
        let parameters = self
            .parameters
            .iter()
            .map(|ty| resolve(*ty))
            .collect::<Result<Vec<_>>>()?;
        method.set_signature(MethodSignature {
            has_this: !self.flags.contains(MethodAttributes::STATIC),
            return_type,
            parameters,
        });

        if let Some(implementation) = self.implementation {
            let mut asm = InstructionAssembler::new();
            implementation(&mut asm)?;
            method.set_body(MethodBody {
                locals: self.locals,
                instructions: asm.finish()?,
                init_locals: true,
            });
        }
        for attribute in self.custom_attributes {
            method.custom_attributes.push(attribute);
        }
        Ok(method)
    }
}

/// Builds a property.
pub struct PropertyBuilder {
    registry: Arc<MemberRegistry>,
    declaring: Token,
    name: String,
    property_type: Option<Token>,
    getter: Option<Token>,
    setter: Option<Token>,
}

impl PropertyBuilder {
    /// Starts a property of `declaring`
    #[must_use]
    pub fn new(registry: Arc<MemberRegistry>, declaring: Token, name: &str) -> Self {
        PropertyBuilder {
            registry,
            declaring,
            name: name.to_string(),
            property_type: None,
            getter: None,
            setter: None,
        }
    }

    /// Property type
    #[must_use]
    pub fn property_type(mut self, ty: Token) -> Self {
        self.property_type = Some(ty);
        self
    }

    /// `get` accessor
    #[must_use]
    pub fn getter(mut self, method: Token) -> Self {
        self.getter = Some(method);
        self
    }

    /// `set` accessor
    #[must_use]
    pub fn setter(mut self, method: Token) -> Self {
        self.setter = Some(method);
        self
    }

    /// Publishes the property.
    ///
    /// # Errors
    /// Returns [`Error::Usage`] if no property type was given.
    pub fn build(self) -> Result<PropertyRc> {
        require_definition(&self.registry, self.declaring)?;
        let property_type = self
            .property_type
            .ok_or_else(|| Error::Usage(format!("property {} has no type", self.name)))?;
        let property = self.registry.define_property(self.declaring, &self.name);
        property.property_type.set(property_type).ok();
        if let Some(getter) = self.getter {
            property.getter.set(getter).ok();
        }
        if let Some(setter) = self.setter {
            property.setter.set(setter).ok();
        }
        Ok(property)
    }
}

/// Builds an event.
pub struct EventBuilder {
    registry: Arc<MemberRegistry>,
    declaring: Token,
    name: String,
    event_type: Option<Token>,
    adder: Option<Token>,
    remover: Option<Token>,
}

impl EventBuilder {
    /// Starts an event of `declaring`
    #[must_use]
    pub fn new(registry: Arc<MemberRegistry>, declaring: Token, name: &str) -> Self {
        EventBuilder {
            registry,
            declaring,
            name: name.to_string(),
            event_type: None,
            adder: None,
            remover: None,
        }
    }

    /// Handler type
    #[must_use]
    pub fn event_type(mut self, ty: Token) -> Self {
        self.event_type = Some(ty);
        self
    }

    /// `add` accessor
    #[must_use]
    pub fn adder(mut self, method: Token) -> Self {
        self.adder = Some(method);
        self
    }

    /// `remove` accessor
    #[must_use]
    pub fn remover(mut self, method: Token) -> Self {
        self.remover = Some(method);
        self
    }

    /// Publishes the event.
    ///
    /// # Errors
    /// Returns [`Error::Usage`] if no handler type was given.
    pub fn build(self) -> Result<EventRc> {
        require_definition(&self.registry, self.declaring)?;
        let event_type = self
            .event_type
            .ok_or_else(|| Error::Usage(format!("event {} has no type", self.name)))?;
        let event = self.registry.define_event(self.declaring, &self.name);
        event.event_type.set(event_type).ok();
        if let Some(adder) = self.adder {
            event.adder.set(adder).ok();
        }
        if let Some(remover) = self.remover {
            event.remover.set(remover).ok();
        }
        Ok(event)
    }
}

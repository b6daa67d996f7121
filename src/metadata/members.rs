//! Member descriptors: types, fields, methods, properties and events.
//!
//! Every descriptor is created once, stored behind an `Arc` in the
//! [`crate::metadata::registry::MemberRegistry`] and never removed. Parts that may only be
//! known after the descriptor exists (base type, field type, method signature and body, the
//! member lists of a type) are late-bound through `OnceLock` and append-only `boxcar::Vec`s,
//! so a placeholder can be published before it is complete and later filled in through a
//! shared reference.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use crate::{
    assembly::Instruction,
    metadata::{
        attributes::{FieldAttributes, GenericParamAttributes, MethodAttributes, TypeAttributes},
        token::Token,
    },
};

/// Reference to a [`TypeDef`]
pub type TypeRc = Arc<TypeDef>;
/// Reference to a [`FieldDef`]
pub type FieldRc = Arc<FieldDef>;
/// Reference to a [`MethodDef`]
pub type MethodRc = Arc<MethodDef>;
/// Reference to a [`PropertyDef`]
pub type PropertyRc = Arc<PropertyDef>;
/// Reference to a [`EventDef`]
pub type EventRc = Arc<EventDef>;

/// Structural shape of a type.
///
/// Constructed shapes refer to their parts by token and are interned by the registry, so two
/// equal shapes always share one token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// A type definition with its own members
    Definition,
    /// Generic parameter number `position` of a type or method definition
    GenericParameter {
        /// Defining type or method
        owner: Token,
        /// Zero-based position in the owner's parameter list
        position: u16,
    },
    /// A generic type definition closed over concrete arguments
    Instantiation {
        /// The open generic definition
        definition: Token,
        /// One argument per generic parameter of the definition
        arguments: Vec<Token>,
    },
    /// Single-dimensional zero-based array
    Array {
        /// Element type
        element: Token,
    },
    /// Managed pointer (`T&`)
    ByRef {
        /// Referenced type
        element: Token,
    },
    /// Unmanaged pointer (`T*`)
    Pointer {
        /// Pointee type
        element: Token,
    },
}

impl TypeKind {
    /// Element type of array, by-ref and pointer shapes
    #[must_use]
    pub fn element(&self) -> Option<Token> {
        match self {
            TypeKind::Array { element }
            | TypeKind::ByRef { element }
            | TypeKind::Pointer { element } => Some(*element),
            _ => None,
        }
    }
}

/// A constant argument of a custom attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeArgument {
    /// `bool`
    Boolean(bool),
    /// `int32`
    Int32(i32),
    /// `string`
    String(String),
    /// `System.Type`
    Type(Token),
}

/// An applied custom attribute: constructor plus fixed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttribute {
    /// Attribute constructor
    pub constructor: Token,
    /// Fixed constructor arguments
    pub arguments: Vec<AttributeArgument>,
}

/// Return and parameter types of a method or call site
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// The method takes an implicit `this`
    pub has_this: bool,
    /// Return type, `System.Void` for none
    pub return_type: Token,
    /// Declared parameter types, `this` excluded
    pub parameters: Vec<Token>,
}

impl MethodSignature {
    /// Number of stack values a call consumes, `this` included
    #[must_use]
    pub fn argument_count(&self) -> usize {
        self.parameters.len() + usize::from(self.has_this)
    }

    /// Every type the signature mentions, return type first
    pub fn types(&self) -> impl Iterator<Item = Token> + '_ {
        std::iter::once(self.return_type).chain(self.parameters.iter().copied())
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_this {
            write!(f, "instance ")?;
        }
        write!(f, "{} (", self.return_type)?;
        for (index, parameter) in self.parameters.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{parameter}")?;
        }
        write!(f, ")")
    }
}

/// A declared local variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalVariable {
    /// Variable type
    pub ty: Token,
    /// The variable pins the object it references
    pub pinned: bool,
}

/// A method body: locals plus instruction stream
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodBody {
    /// Declared locals, addressed by index
    pub locals: Vec<LocalVariable>,
    /// Instructions in execution order
    pub instructions: Vec<Instruction>,
    /// Locals are zero-initialized on entry
    pub init_locals: bool,
}

/// A type of any [`TypeKind`].
pub struct TypeDef {
    /// Token
    pub token: Token,
    /// Name of the module that defines the type
    pub module: String,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name, or the rendered shape for constructed types
    pub name: String,
    /// Flags (`TypeAttributes`, §II.23.1.15)
    pub flags: TypeAttributes,
    /// Structural shape
    pub kind: TypeKind,
    /// Declaring type of a nested type
    pub enclosing: Option<Token>,
    /// Flags of a generic parameter
    pub generic_flags: GenericParamAttributes,
    base: OnceLock<Token>,
    /// Implemented interfaces
    pub interfaces: boxcar::Vec<Token>,
    /// Generic parameters of a definition, in order
    pub generic_params: boxcar::Vec<Token>,
    /// Constraints of a generic parameter
    pub constraints: boxcar::Vec<Token>,
    /// Nested types
    pub nested: boxcar::Vec<Token>,
    /// Declared fields
    pub fields: boxcar::Vec<Token>,
    /// Declared methods and constructors
    pub methods: boxcar::Vec<Token>,
    /// Declared properties
    pub properties: boxcar::Vec<Token>,
    /// Declared events
    pub events: boxcar::Vec<Token>,
    /// Applied custom attributes
    pub custom_attributes: boxcar::Vec<CustomAttribute>,
    baked: AtomicBool,
}

impl TypeDef {
    /// Creates a descriptor without base type or members
    #[must_use]
    pub fn new(
        token: Token,
        module: &str,
        namespace: &str,
        name: &str,
        flags: TypeAttributes,
        kind: TypeKind,
        enclosing: Option<Token>,
    ) -> Self {
        TypeDef {
            token,
            module: module.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags,
            kind,
            enclosing,
            generic_flags: GenericParamAttributes::empty(),
            base: OnceLock::new(),
            interfaces: boxcar::Vec::new(),
            generic_params: boxcar::Vec::new(),
            constraints: boxcar::Vec::new(),
            nested: boxcar::Vec::new(),
            fields: boxcar::Vec::new(),
            methods: boxcar::Vec::new(),
            properties: boxcar::Vec::new(),
            events: boxcar::Vec::new(),
            custom_attributes: boxcar::Vec::new(),
            baked: AtomicBool::new(false),
        }
    }

    /// Sets the generic parameter flags
    #[must_use]
    pub fn with_generic_flags(mut self, flags: GenericParamAttributes) -> Self {
        self.generic_flags = flags;
        self
    }

    /// The base type, if one was set
    pub fn base(&self) -> Option<Token> {
        self.base.get().copied()
    }

    /// Sets the base type; returns false if it was already set
    pub fn set_base(&self, base: Token) -> bool {
        self.base.set(base).is_ok()
    }

    /// Returns true for type definitions
    pub fn is_definition(&self) -> bool {
        self.kind == TypeKind::Definition
    }

    /// Returns true for generic parameters
    pub fn is_generic_parameter(&self) -> bool {
        matches!(self.kind, TypeKind::GenericParameter { .. })
    }

    /// Returns true for interfaces
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeAttributes::INTERFACE)
    }

    /// Returns true for an open generic definition
    pub fn is_generic_definition(&self) -> bool {
        self.is_definition() && !self.generic_params.is_empty()
    }

    /// Returns true once the type was finalized
    pub fn is_baked(&self) -> bool {
        self.baked.load(Ordering::Acquire)
    }

    /// Marks the type finalized; returns false if it already was
    pub fn mark_baked(&self) -> bool {
        !self.baked.swap(true, Ordering::AcqRel)
    }

    /// Generic parameter at `position`
    pub fn generic_param(&self, position: usize) -> Option<Token> {
        self.generic_params.get(position).copied()
    }
}

/// A field
pub struct FieldDef {
    /// Token
    pub token: Token,
    /// Name
    pub name: String,
    /// Flags (`FieldAttributes`, §II.23.1.5)
    pub flags: FieldAttributes,
    /// Declaring type
    pub declaring: Token,
    field_type: OnceLock<Token>,
    /// Applied custom attributes
    pub custom_attributes: boxcar::Vec<CustomAttribute>,
}

impl FieldDef {
    /// Creates a field whose type is bound later
    #[must_use]
    pub fn new(token: Token, name: &str, flags: FieldAttributes, declaring: Token) -> Self {
        FieldDef {
            token,
            name: name.to_string(),
            flags,
            declaring,
            field_type: OnceLock::new(),
            custom_attributes: boxcar::Vec::new(),
        }
    }

    /// The field type, if bound
    pub fn field_type(&self) -> Option<Token> {
        self.field_type.get().copied()
    }

    /// Binds the field type; returns false if it was already bound
    pub fn set_field_type(&self, ty: Token) -> bool {
        self.field_type.set(ty).is_ok()
    }

    /// Returns true for static fields
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldAttributes::STATIC)
    }
}

/// A method definition or a generic method instantiation
pub struct MethodDef {
    /// Token
    pub token: Token,
    /// Name (`.ctor` for constructors)
    pub name: String,
    /// Flags (`MethodAttributes`, §II.23.1.10)
    pub flags: MethodAttributes,
    /// Declaring type
    pub declaring: Token,
    /// Generic definition and arguments when this is an instantiation
    pub instantiation: Option<(Token, Vec<Token>)>,
    /// Generic parameters of a definition, in order
    pub generic_params: boxcar::Vec<Token>,
    signature: OnceLock<MethodSignature>,
    body: OnceLock<MethodBody>,
    /// Applied custom attributes
    pub custom_attributes: boxcar::Vec<CustomAttribute>,
}

impl MethodDef {
    /// Creates a method whose signature and body are bound later
    #[must_use]
    pub fn new(token: Token, name: &str, flags: MethodAttributes, declaring: Token) -> Self {
        MethodDef {
            token,
            name: name.to_string(),
            flags,
            declaring,
            instantiation: None,
            generic_params: boxcar::Vec::new(),
            signature: OnceLock::new(),
            body: OnceLock::new(),
            custom_attributes: boxcar::Vec::new(),
        }
    }

    /// The signature, if bound
    pub fn signature(&self) -> Option<&MethodSignature> {
        self.signature.get()
    }

    /// Binds the signature; returns false if it was already bound
    pub fn set_signature(&self, signature: MethodSignature) -> bool {
        self.signature.set(signature).is_ok()
    }

    /// The body, if one was set
    pub fn body(&self) -> Option<&MethodBody> {
        self.body.get()
    }

    /// Sets the body; returns false if it was already set
    pub fn set_body(&self, body: MethodBody) -> bool {
        self.body.set(body).is_ok()
    }

    /// Returns true for static methods
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodAttributes::STATIC)
    }

    /// Returns true for virtual methods
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodAttributes::VIRTUAL)
    }

    /// Returns true for methods that must not carry a body
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodAttributes::ABSTRACT)
    }

    /// Returns true for instance and type constructors
    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MethodAttributes::RT_SPECIAL_NAME)
            && (self.name == ".ctor" || self.name == ".cctor")
    }

    /// Returns true for method instantiations
    pub fn is_instantiation(&self) -> bool {
        self.instantiation.is_some()
    }
}

/// A property: type plus accessor methods
pub struct PropertyDef {
    /// Token
    pub token: Token,
    /// Name
    pub name: String,
    /// Declaring type
    pub declaring: Token,
    /// Property type
    pub property_type: OnceLock<Token>,
    /// `get` accessor
    pub getter: OnceLock<Token>,
    /// `set` accessor
    pub setter: OnceLock<Token>,
    /// Applied custom attributes
    pub custom_attributes: boxcar::Vec<CustomAttribute>,
}

impl PropertyDef {
    /// Creates a property whose type and accessors are bound later
    #[must_use]
    pub fn new(token: Token, name: &str, declaring: Token) -> Self {
        PropertyDef {
            token,
            name: name.to_string(),
            declaring,
            property_type: OnceLock::new(),
            getter: OnceLock::new(),
            setter: OnceLock::new(),
            custom_attributes: boxcar::Vec::new(),
        }
    }
}

/// An event: handler type plus add/remove accessors
pub struct EventDef {
    /// Token
    pub token: Token,
    /// Name
    pub name: String,
    /// Declaring type
    pub declaring: Token,
    /// Handler type
    pub event_type: OnceLock<Token>,
    /// `add` accessor
    pub adder: OnceLock<Token>,
    /// `remove` accessor
    pub remover: OnceLock<Token>,
    /// Applied custom attributes
    pub custom_attributes: boxcar::Vec<CustomAttribute>,
}

impl EventDef {
    /// Creates an event whose type and accessors are bound later
    #[must_use]
    pub fn new(token: Token, name: &str, declaring: Token) -> Self {
        EventDef {
            token,
            name: name.to_string(),
            declaring,
            event_type: OnceLock::new(),
            adder: OnceLock::new(),
            remover: OnceLock::new(),
            custom_attributes: boxcar::Vec::new(),
        }
    }
}

/// Identity of any member the registry holds.
#[derive(Clone)]
pub enum Member {
    /// Type of any shape, generic parameters included
    Type(TypeRc),
    /// Field
    Field(FieldRc),
    /// Method, constructor or method instantiation
    Method(MethodRc),
    /// Property
    Property(PropertyRc),
    /// Event
    Event(EventRc),
}

impl Member {
    /// Token of the member
    #[must_use]
    pub fn token(&self) -> Token {
        match self {
            Member::Type(ty) => ty.token,
            Member::Field(field) => field.token,
            Member::Method(method) => method.token,
            Member::Property(property) => property.token,
            Member::Event(event) => event.token,
        }
    }

    /// Declaring type; the enclosing type for nested types
    #[must_use]
    pub fn declaring(&self) -> Option<Token> {
        match self {
            Member::Type(ty) => ty.enclosing,
            Member::Field(field) => Some(field.declaring),
            Member::Method(method) => Some(method.declaring),
            Member::Property(property) => Some(property.declaring),
            Member::Event(event) => Some(event.declaring),
        }
    }

    /// Simple name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Member::Type(ty) => &ty.name,
            Member::Field(field) => &field.name,
            Member::Method(method) => &method.name,
            Member::Property(property) => &property.name,
            Member::Event(event) => &event.name,
        }
    }

    /// Custom attributes applied to the member
    #[must_use]
    pub fn custom_attributes(&self) -> &boxcar::Vec<CustomAttribute> {
        match self {
            Member::Type(ty) => &ty.custom_attributes,
            Member::Field(field) => &field.custom_attributes,
            Member::Method(method) => &method.custom_attributes,
            Member::Property(property) => &property.custom_attributes,
            Member::Event(event) => &event.custom_attributes,
        }
    }

    /// Kind name used in diagnostics
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Member::Type(ty) if ty.is_generic_parameter() => "generic parameter",
            Member::Type(_) => "type",
            Member::Field(_) => "field",
            Member::Method(method) if method.is_constructor() => "constructor",
            Member::Method(_) => "method",
            Member::Property(_) => "property",
            Member::Event(_) => "event",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::{TABLE_METHODDEF, TABLE_TYPEDEF};

    #[test]
    fn late_bound_parts_are_set_once() {
        let ty = TypeDef::new(
            Token::from_parts(TABLE_TYPEDEF, 1),
            "Demo.dll",
            "Demo",
            "Node",
            TypeAttributes::PUBLIC,
            TypeKind::Definition,
            None,
        );
        assert_eq!(ty.base(), None);
        assert!(ty.set_base(Token::new(0x0200_0099)));
        assert!(!ty.set_base(Token::new(0x0200_0098)));
        assert_eq!(ty.base(), Some(Token::new(0x0200_0099)));

        assert!(ty.mark_baked());
        assert!(!ty.mark_baked());
        assert!(ty.is_baked());
    }

    #[test]
    fn constructor_detection() {
        let declaring = Token::from_parts(TABLE_TYPEDEF, 1);
        let ctor = MethodDef::new(
            Token::from_parts(TABLE_METHODDEF, 1),
            ".ctor",
            MethodAttributes::PUBLIC
                | MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RT_SPECIAL_NAME,
            declaring,
        );
        let plain = MethodDef::new(
            Token::from_parts(TABLE_METHODDEF, 2),
            ".ctor",
            MethodAttributes::PUBLIC,
            declaring,
        );
        assert!(ctor.is_constructor());
        assert!(!plain.is_constructor());
        assert_eq!(Member::Method(Arc::new(ctor)).kind_name(), "constructor");
    }

    #[test]
    fn signature_shape() {
        let signature = MethodSignature {
            has_this: true,
            return_type: Token::new(0x0200_0001),
            parameters: vec![Token::new(0x0200_0002), Token::new(0x0200_0003)],
        };
        assert_eq!(signature.argument_count(), 3);
        assert_eq!(signature.types().count(), 3);
        assert_eq!(
            signature.to_string(),
            "instance 0x02000001 (0x02000002, 0x02000003)"
        );
    }
}

//! Central member registry.
//!
//! [`MemberRegistry`] owns every member descriptor of every module loaded into one process:
//! the seeded core library, the original programs described by callers, and the modules the
//! copier generates. Tokens are allocated from one row counter per table, so a token is unique
//! across all modules and original and generated members can live side by side.
//!
//! # Thread Safety
//!
//! - Lock-free primary storage (`SkipMap`)
//! - Concurrent secondary indices (`DashMap`)
//! - Late-bound parts of descriptors use `OnceLock` and append-only `boxcar::Vec`
//!
//! # Examples
//!
//! ```rust
//! use cilreplica::metadata::{attributes::TypeAttributes, registry::MemberRegistry};
//!
//! let registry = MemberRegistry::new();
//! let node = registry.define_type("Demo.dll", "Demo", "Node", TypeAttributes::PUBLIC, None);
//! assert_eq!(registry.display_name(node.token), "Demo.Node");
//! assert!(registry.is_value_type(registry.core().int32));
//! ```

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;

use crate::{
    assembly::{Instruction, OpCode},
    metadata::{
        attributes::{FieldAttributes, GenericParamAttributes, MethodAttributes, TypeAttributes},
        members::{
            EventDef, EventRc, FieldDef, FieldRc, Member, MethodDef, MethodRc, MethodSignature,
            MethodBody, PropertyDef, PropertyRc, TypeDef, TypeKind, TypeRc,
        },
        token::{
            Token, TABLE_EVENT, TABLE_FIELD, TABLE_GENERICPARAM, TABLE_METHODDEF,
            TABLE_METHODSPEC, TABLE_PROPERTY, TABLE_TYPEDEF, TABLE_TYPESPEC,
        },
    },
    Error, Result,
};

/// Name of the module the core library types live in
pub const CORE_LIBRARY: &str = "System.Private.CoreLib";

/// Tokens of the seeded core library types and members.
#[derive(Debug, Clone, Copy, Default)]
#[allow(missing_docs)]
pub struct CoreLibrary {
    pub object: Token,
    pub value_type: Token,
    pub void: Token,
    pub boolean: Token,
    pub int32: Token,
    pub int64: Token,
    pub double: Token,
    pub intptr: Token,
    pub string: Token,
    pub typed_reference: Token,
    pub system_type: Token,
    pub field_info: Token,
    pub method_base: Token,
    pub runtime_method_handle: Token,
    pub array: Token,
    pub exception: Token,
    pub null_reference_exception: Token,
    pub invalid_cast_exception: Token,
    /// `System.Object::.ctor`
    pub object_ctor: Token,
}

enum OwnerParams {
    Type(TypeRc),
    Method(MethodRc),
}

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity-keyed store of every member of every loaded module.
pub struct MemberRegistry {
    id: u64,
    members: SkipMap<Token, Member>,
    rows: DashMap<u8, u32>,
    constructed: DashMap<TypeKind, Token>,
    method_instances: DashMap<(Token, Vec<Token>), Token>,
    by_module: DashMap<String, Vec<Token>>,
    core: CoreLibrary,
}

impl Default for MemberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemberRegistry {
    /// Creates a registry holding only the core library
    #[must_use]
    pub fn new() -> Self {
        let mut registry = MemberRegistry {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            members: SkipMap::new(),
            rows: DashMap::new(),
            constructed: DashMap::new(),
            method_instances: DashMap::new(),
            by_module: DashMap::new(),
            core: CoreLibrary::default(),
        };
        registry.core = registry.seed_core_library();
        registry
    }

    fn seed_core_library(&self) -> CoreLibrary {
        let public = TypeAttributes::PUBLIC;
        let sealed = TypeAttributes::PUBLIC | TypeAttributes::SEALED;
        let define = |namespace: &str, name: &str, flags: TypeAttributes, base: Option<Token>| {
            let ty = self.define_type(CORE_LIBRARY, namespace, name, flags, None);
            if let Some(base) = base {
                ty.set_base(base);
            }
            ty.mark_baked();
            ty.token
        };

        let object = define("System", "Object", public, None);
        let value_type = define("System", "ValueType", public | TypeAttributes::ABSTRACT, Some(object));
        let exception = define("System", "Exception", public, Some(object));
        let object_ctor = self.define_method(
            object,
            ".ctor",
            MethodAttributes::PUBLIC
                | MethodAttributes::HIDE_BY_SIG
                | MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RT_SPECIAL_NAME,
        );

        let core = CoreLibrary {
            object,
            value_type,
            void: define("System", "Void", sealed, Some(value_type)),
            boolean: define("System", "Boolean", sealed, Some(value_type)),
            int32: define("System", "Int32", sealed, Some(value_type)),
            int64: define("System", "Int64", sealed, Some(value_type)),
            double: define("System", "Double", sealed, Some(value_type)),
            intptr: define("System", "IntPtr", sealed, Some(value_type)),
            string: define("System", "String", sealed, Some(object)),
            typed_reference: define("System", "TypedReference", sealed, Some(value_type)),
            system_type: define("System", "Type", public | TypeAttributes::ABSTRACT, Some(object)),
            field_info: define(
                "System.Reflection",
                "FieldInfo",
                public | TypeAttributes::ABSTRACT,
                Some(object),
            ),
            method_base: define(
                "System.Reflection",
                "MethodBase",
                public | TypeAttributes::ABSTRACT,
                Some(object),
            ),
            runtime_method_handle: define("System", "RuntimeMethodHandle", sealed, Some(value_type)),
            array: define("System", "Array", public | TypeAttributes::ABSTRACT, Some(object)),
            exception,
            null_reference_exception: define("System", "NullReferenceException", public, Some(exception)),
            invalid_cast_exception: define("System", "InvalidCastException", public, Some(exception)),
            object_ctor: object_ctor.token,
        };

        object_ctor.set_signature(MethodSignature {
            has_this: true,
            return_type: core.void,
            parameters: Vec::new(),
        });
        object_ctor.set_body(MethodBody {
            locals: Vec::new(),
            instructions: vec![Instruction::simple(OpCode::Ret)],
            init_locals: false,
        });
        core
    }

    /// Tokens of the seeded core library
    #[must_use]
    pub fn core(&self) -> &CoreLibrary {
        &self.core
    }

    /// Process-unique identity of this registry; tokens only have meaning within one
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Allocates the next row of `table`
    pub fn next_token(&self, table: u8) -> Token {
        let mut row = self.rows.entry(table).or_insert(0);
        *row += 1;
        Token::from_parts(table, *row)
    }

    /// Number of members stored, core library included
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the registry holds no members
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Stores a type descriptor and links it into its module and enclosing type
    pub fn insert_type(&self, ty: TypeDef) -> TypeRc {
        let ty = Arc::new(ty);
        if ty.is_definition() {
            self.by_module
                .entry(ty.module.clone())
                .or_default()
                .push(ty.token);
            if let Some(enclosing) = ty.enclosing.and_then(|token| self.get_type(token)) {
                enclosing.nested.push(ty.token);
            }
        }
        self.members.insert(ty.token, Member::Type(ty.clone()));
        ty
    }

    /// Stores a field descriptor and links it into its declaring type
    pub fn insert_field(&self, field: FieldDef) -> FieldRc {
        let field = Arc::new(field);
        if let Some(declaring) = self.get_type(field.declaring) {
            declaring.fields.push(field.token);
        }
        self.members.insert(field.token, Member::Field(field.clone()));
        field
    }

    /// Stores a method descriptor; definitions are linked into their declaring type
    pub fn insert_method(&self, method: MethodDef) -> MethodRc {
        let method = Arc::new(method);
        if !method.is_instantiation() {
            if let Some(declaring) = self.get_type(method.declaring) {
                declaring.methods.push(method.token);
            }
        }
        self.members.insert(method.token, Member::Method(method.clone()));
        method
    }

    /// Stores a property descriptor and links it into its declaring type
    pub fn insert_property(&self, property: PropertyDef) -> PropertyRc {
        let property = Arc::new(property);
        if let Some(declaring) = self.get_type(property.declaring) {
            declaring.properties.push(property.token);
        }
        self.members
            .insert(property.token, Member::Property(property.clone()));
        property
    }

    /// Stores an event descriptor and links it into its declaring type
    pub fn insert_event(&self, event: EventDef) -> EventRc {
        let event = Arc::new(event);
        if let Some(declaring) = self.get_type(event.declaring) {
            declaring.events.push(event.token);
        }
        self.members.insert(event.token, Member::Event(event.clone()));
        event
    }

    /// Creates an empty type definition
    pub fn define_type(
        &self,
        module: &str,
        namespace: &str,
        name: &str,
        flags: TypeAttributes,
        enclosing: Option<Token>,
    ) -> TypeRc {
        let token = self.next_token(TABLE_TYPEDEF);
        self.insert_type(TypeDef::new(
            token,
            module,
            namespace,
            name,
            flags,
            TypeKind::Definition,
            enclosing,
        ))
    }

    /// Appends a generic parameter to a type or method definition.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if `owner` is unknown and [`Error::Usage`] if it is
    /// neither a type definition nor a method definition.
    pub fn define_generic_parameter(
        &self,
        owner: Token,
        name: &str,
        flags: GenericParamAttributes,
    ) -> Result<TypeRc> {
        let (module, params) = match self.get(owner) {
            Some(Member::Type(ty)) if ty.is_definition() => {
                (ty.module.clone(), OwnerParams::Type(ty))
            }
            Some(Member::Method(method)) if !method.is_instantiation() => {
                let module = self.type_def(method.declaring)?.module.clone();
                (module, OwnerParams::Method(method))
            }
            Some(_) => {
                return Err(Error::Usage(format!(
                    "{} cannot declare generic parameters",
                    self.display_name(owner)
                )))
            }
            None => return Err(Error::MemberNotFound(owner)),
        };
        let params = match &params {
            OwnerParams::Type(ty) => &ty.generic_params,
            OwnerParams::Method(method) => &method.generic_params,
        };
        let position = u16::try_from(params.count())
            .map_err(|_| malformed_error!("too many generic parameters on {}", owner))?;
        let token = self.next_token(TABLE_GENERICPARAM);
        let param = self.insert_type(
            TypeDef::new(
                token,
                &module,
                "",
                name,
                TypeAttributes::PUBLIC,
                TypeKind::GenericParameter { owner, position },
                None,
            )
            .with_generic_flags(flags),
        );
        params.push(token);
        Ok(param)
    }

    /// Creates a field whose type is bound later
    pub fn define_field(
        &self,
        declaring: Token,
        name: &str,
        flags: FieldAttributes,
    ) -> FieldRc {
        let token = self.next_token(TABLE_FIELD);
        self.insert_field(FieldDef::new(token, name, flags, declaring))
    }

    /// Creates a method whose signature and body are bound later
    pub fn define_method(&self, declaring: Token, name: &str, flags: MethodAttributes) -> MethodRc {
        let token = self.next_token(TABLE_METHODDEF);
        self.insert_method(MethodDef::new(token, name, flags, declaring))
    }

    /// Creates a property whose type and accessors are bound later
    pub fn define_property(&self, declaring: Token, name: &str) -> PropertyRc {
        let token = self.next_token(TABLE_PROPERTY);
        self.insert_property(PropertyDef::new(token, name, declaring))
    }

    /// Creates an event whose type and accessors are bound later
    pub fn define_event(&self, declaring: Token, name: &str) -> EventRc {
        let token = self.next_token(TABLE_EVENT);
        self.insert_event(EventDef::new(token, name, declaring))
    }

    /// Returns the token of a constructed type shape, creating it on first use.
    ///
    /// # Errors
    /// Returns [`Error::Usage`] for `Definition` and `GenericParameter` shapes, which are
    /// never interned, and [`Error::MemberNotFound`] if a part of the shape is unknown.
    pub fn intern_type(&self, kind: TypeKind) -> Result<Token> {
        let anchor = match &kind {
            TypeKind::Instantiation {
                definition,
                arguments,
            } => {
                let definition_ty = self.type_def(*definition)?;
                if definition_ty.generic_params.count() != arguments.len() {
                    return Err(Error::Usage(format!(
                        "{} expects {} generic arguments, got {}",
                        self.display_name(*definition),
                        definition_ty.generic_params.count(),
                        arguments.len()
                    )));
                }
                *definition
            }
            TypeKind::Array { element }
            | TypeKind::ByRef { element }
            | TypeKind::Pointer { element } => *element,
            TypeKind::Definition | TypeKind::GenericParameter { .. } => {
                return Err(Error::Usage(
                    "only constructed type shapes can be interned".to_string(),
                ))
            }
        };
        if let Some(existing) = self.constructed.get(&kind) {
            return Ok(*existing);
        }

        let module = self.type_def(anchor)?.module.clone();
        let name = self.render_shape(&kind);
        let entry = self.constructed.entry(kind.clone()).or_insert_with(|| {
            let token = self.next_token(TABLE_TYPESPEC);
            self.insert_type(TypeDef::new(
                token,
                &module,
                "",
                &name,
                TypeAttributes::PUBLIC,
                kind,
                None,
            ));
            token
        });
        Ok(*entry)
    }

    /// Returns the token of a generic method instantiation, creating it on first use.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if `definition` is not a method and
    /// [`Error::Usage`] if the argument count does not match.
    pub fn intern_method(&self, definition: Token, arguments: &[Token]) -> Result<Token> {
        let method = self.method(definition)?;
        if method.generic_params.count() != arguments.len() {
            return Err(Error::Usage(format!(
                "{} expects {} generic arguments, got {}",
                self.display_name(definition),
                method.generic_params.count(),
                arguments.len()
            )));
        }
        let key = (definition, arguments.to_vec());
        if let Some(existing) = self.method_instances.get(&key) {
            return Ok(*existing);
        }
        let entry = self.method_instances.entry(key).or_insert_with(|| {
            let token = self.next_token(TABLE_METHODSPEC);
            let mut instance = MethodDef::new(token, &method.name, method.flags, method.declaring);
            instance.instantiation = Some((definition, arguments.to_vec()));
            self.insert_method(instance);
            token
        });
        Ok(*entry)
    }

    /// Looks up any member
    #[must_use]
    pub fn get(&self, token: Token) -> Option<Member> {
        self.members.get(&token).map(|entry| entry.value().clone())
    }

    /// Looks up a type, if `token` is one
    #[must_use]
    pub fn get_type(&self, token: Token) -> Option<TypeRc> {
        match self.get(token) {
            Some(Member::Type(ty)) => Some(ty),
            _ => None,
        }
    }

    /// Looks up a type.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if `token` is not a type.
    pub fn type_def(&self, token: Token) -> Result<TypeRc> {
        self.get_type(token).ok_or(Error::MemberNotFound(token))
    }

    /// Looks up a field.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if `token` is not a field.
    pub fn field(&self, token: Token) -> Result<FieldRc> {
        match self.get(token) {
            Some(Member::Field(field)) => Ok(field),
            _ => Err(Error::MemberNotFound(token)),
        }
    }

    /// Looks up a method or method instantiation.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if `token` is not a method.
    pub fn method(&self, token: Token) -> Result<MethodRc> {
        match self.get(token) {
            Some(Member::Method(method)) => Ok(method),
            _ => Err(Error::MemberNotFound(token)),
        }
    }

    /// Looks up a property.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if `token` is not a property.
    pub fn property(&self, token: Token) -> Result<PropertyRc> {
        match self.get(token) {
            Some(Member::Property(property)) => Ok(property),
            _ => Err(Error::MemberNotFound(token)),
        }
    }

    /// Looks up an event.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if `token` is not an event.
    pub fn event(&self, token: Token) -> Result<EventRc> {
        match self.get(token) {
            Some(Member::Event(event)) => Ok(event),
            _ => Err(Error::MemberNotFound(token)),
        }
    }

    /// Signature of a method; instantiations report their definition's signature.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] for unknown methods and [`Error::Malformed`] when
    /// no signature was bound.
    pub fn signature_of(&self, method: Token) -> Result<MethodSignature> {
        let method_rc = self.method(method)?;
        let definition = match &method_rc.instantiation {
            Some((definition, _)) => self.method(*definition)?,
            None => method_rc,
        };
        definition
            .signature()
            .cloned()
            .ok_or_else(|| malformed_error!("method {} has no signature", method))
    }

    /// Type definitions of `module` in definition order
    #[must_use]
    pub fn module_types(&self, module: &str) -> Vec<Token> {
        self.by_module
            .get(module)
            .map(|types| types.clone())
            .unwrap_or_default()
    }

    /// Detaches every type definition from `module` and returns them.
    ///
    /// The descriptors stay resolvable by token, but the module name no longer lists them, so a
    /// new module of the same name can be defined.
    pub fn release_module(&self, module: &str) -> Vec<Token> {
        self.by_module
            .remove(module)
            .map(|(_, types)| types)
            .unwrap_or_default()
    }

    /// Finds a type definition by module, namespace and name
    #[must_use]
    pub fn find_type(&self, module: &str, namespace: &str, name: &str) -> Option<TypeRc> {
        self.module_types(module)
            .into_iter()
            .filter_map(|token| self.get_type(token))
            .find(|ty| ty.namespace == namespace && ty.name == name && ty.enclosing.is_none())
    }

    /// Finds a nested type of `enclosing` by name
    #[must_use]
    pub fn find_nested(&self, enclosing: Token, name: &str) -> Option<TypeRc> {
        let enclosing = self.get_type(enclosing)?;
        enclosing
            .nested
            .iter()
            .filter_map(|(_, token)| self.get_type(*token))
            .find(|ty| ty.name == name)
    }

    /// Finds a declared method of `ty` by name
    #[must_use]
    pub fn find_method(&self, ty: Token, name: &str) -> Option<MethodRc> {
        let ty = self.get_type(ty)?;
        ty.methods
            .iter()
            .filter_map(|(_, token)| self.method(*token).ok())
            .find(|method| method.name == name)
    }

    /// Finds a declared field of `ty` by name
    #[must_use]
    pub fn find_field(&self, ty: Token, name: &str) -> Option<FieldRc> {
        let ty = self.get_type(ty)?;
        ty.fields
            .iter()
            .filter_map(|(_, token)| self.field(*token).ok())
            .find(|field| field.name == name)
    }

    /// The open definition of an instantiation, otherwise `ty` itself
    #[must_use]
    pub fn generic_definition(&self, ty: Token) -> Token {
        match self.get_type(ty).map(|ty| ty.kind.clone()) {
            Some(TypeKind::Instantiation { definition, .. }) => definition,
            _ => ty,
        }
    }

    /// Returns true for value types, excluding `System.ValueType` itself
    #[must_use]
    pub fn is_value_type(&self, ty: Token) -> bool {
        let Some(ty_rc) = self.get_type(ty) else {
            return false;
        };
        match &ty_rc.kind {
            TypeKind::Definition => {
                if ty == self.core.value_type {
                    return false;
                }
                let mut current = ty_rc.base();
                let mut depth = 0;
                while let Some(base) = current {
                    if base == self.core.value_type {
                        return true;
                    }
                    depth += 1;
                    if depth > 64 {
                        return false;
                    }
                    current = self.get_type(base).and_then(|base| base.base());
                }
                false
            }
            TypeKind::GenericParameter { .. } => ty_rc
                .generic_flags
                .contains(GenericParamAttributes::NOT_NULLABLE_VALUE_TYPE_CONSTRAINT),
            TypeKind::Instantiation { definition, .. } => self.is_value_type(*definition),
            TypeKind::Array { .. } | TypeKind::ByRef { .. } | TypeKind::Pointer { .. } => false,
        }
    }

    fn render_shape(&self, kind: &TypeKind) -> String {
        match kind {
            TypeKind::Instantiation {
                definition,
                arguments,
            } => {
                let arguments: Vec<String> =
                    arguments.iter().map(|arg| self.display_name(*arg)).collect();
                format!("{}<{}>", self.display_name(*definition), arguments.join(","))
            }
            TypeKind::Array { element } => format!("{}[]", self.display_name(*element)),
            TypeKind::ByRef { element } => format!("{}&", self.display_name(*element)),
            TypeKind::Pointer { element } => format!("{}*", self.display_name(*element)),
            TypeKind::Definition | TypeKind::GenericParameter { .. } => String::new(),
        }
    }

    /// Human readable name of any member, used in diagnostics and listings
    #[must_use]
    pub fn display_name(&self, token: Token) -> String {
        match self.get(token) {
            Some(Member::Type(ty)) => match &ty.kind {
                TypeKind::Definition => match ty.enclosing {
                    Some(enclosing) => format!("{}/{}", self.display_name(enclosing), ty.name),
                    None if ty.namespace.is_empty() => ty.name.clone(),
                    None => format!("{}.{}", ty.namespace, ty.name),
                },
                TypeKind::GenericParameter { .. } => ty.name.clone(),
                kind => self.render_shape(kind),
            },
            Some(Member::Method(method)) => match &method.instantiation {
                Some((definition, arguments)) => {
                    let arguments: Vec<String> =
                        arguments.iter().map(|arg| self.display_name(*arg)).collect();
                    format!("{}<{}>", self.display_name(*definition), arguments.join(","))
                }
                None => format!("{}::{}", self.display_name(method.declaring), method.name),
            },
            Some(member) => match member.declaring() {
                Some(declaring) => format!("{}::{}", self.display_name(declaring), member.name()),
                None => member.name().to_string(),
            },
            None => token.to_string(),
        }
    }
}

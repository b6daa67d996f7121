//! In-memory module emitter backed by the member registry.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    copier::CopyReport,
    emit::{listing::render_module, ModuleEmitter},
    metadata::{
        attributes::{FieldAttributes, GenericParamAttributes, MethodAttributes, TypeAttributes},
        members::{CustomAttribute, Member, MethodBody, MethodRc, MethodSignature, TypeKind, TypeRc},
        registry::MemberRegistry,
        token::Token,
    },
    Error, Result,
};

/// A finished module produced by a copy session.
#[derive(Clone)]
pub struct GeneratedModule {
    name: String,
    registry: Arc<MemberRegistry>,
    types: Vec<Token>,
    path: Option<PathBuf>,
    report: CopyReport,
}

impl GeneratedModule {
    pub(crate) fn with_report(mut self, report: CopyReport) -> Self {
        self.report = report;
        self
    }

    /// Counters of the session that produced the module
    #[must_use]
    pub fn report(&self) -> &CopyReport {
        &self.report
    }

    /// Module name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every type defined in the module, in definition order
    #[must_use]
    pub fn types(&self) -> &[Token] {
        &self.types
    }

    /// The registry holding the module's members
    #[must_use]
    pub fn registry(&self) -> &Arc<MemberRegistry> {
        &self.registry
    }

    /// Where the listing was persisted, if it was
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Finds a top-level type of the module by namespace and name
    #[must_use]
    pub fn find_type(&self, namespace: &str, name: &str) -> Option<Token> {
        self.registry
            .find_type(&self.name, namespace, name)
            .map(|ty| ty.token)
    }

    /// Textual IL listing of the module
    #[must_use]
    pub fn listing(&self) -> String {
        render_module(&self.registry, &self.name, &self.types)
    }

    /// Writes the listing to `<dir>/<module name>.il` and returns the file path.
    ///
    /// The listing is written to a temporary file first and renamed into place, so an
    /// interrupted write never leaves a truncated listing behind.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] on I/O failures.
    pub fn persist(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.il", self.name));
        let staging = dir.join(format!(".{}.il.tmp", self.name));
        fs::write(&staging, self.listing())?;
        if let Err(error) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(error.into());
        }
        tracing::debug!(module = %self.name, path = %path.display(), "persisted module listing");
        Ok(path)
    }
}

impl fmt::Debug for GeneratedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedModule")
            .field("name", &self.name)
            .field("types", &self.types.len())
            .field("path", &self.path)
            .finish()
    }
}

/// [`ModuleEmitter`] writing into a [`MemberRegistry`].
pub struct RegistryEmitter {
    registry: Arc<MemberRegistry>,
    module: String,
    types: Vec<Token>,
}

impl RegistryEmitter {
    /// Starts a new module named `module`.
    ///
    /// # Errors
    /// Returns [`Error::Emit`] if the registry already holds a module of that name.
    pub fn new(registry: Arc<MemberRegistry>, module: &str) -> Result<Self> {
        if !registry.module_types(module).is_empty() {
            return Err(Error::Emit(format!("module {module} already exists")));
        }
        Ok(RegistryEmitter {
            registry,
            module: module.to_string(),
            types: Vec::new(),
        })
    }

    /// Gives up an unfinished module so its name can be reused.
    ///
    /// Types defined so far stay in the registry under their tokens but no longer belong to the
    /// module.
    pub fn abandon(&mut self) {
        let released = self.registry.release_module(&self.module);
        self.types.clear();
        tracing::debug!(module = %self.module, types = released.len(), "abandoned module");
    }

    /// The registry written to
    #[must_use]
    pub fn registry(&self) -> &Arc<MemberRegistry> {
        &self.registry
    }

    fn own_type(&self, ty: Token) -> Result<TypeRc> {
        let ty = self.registry.type_def(ty)?;
        if ty.module != self.module || !ty.is_definition() {
            return Err(Error::Emit(format!(
                "{} is not a type definition of module {}",
                self.registry.display_name(ty.token),
                self.module
            )));
        }
        Ok(ty)
    }

    fn writable(&self, ty: Token) -> Result<TypeRc> {
        let ty = self.own_type(ty)?;
        if ty.is_baked() {
            return Err(Error::AlreadyBaked(ty.token));
        }
        Ok(ty)
    }

    fn writable_method(&self, method: Token) -> Result<MethodRc> {
        let method = self.registry.method(method)?;
        self.writable(method.declaring)?;
        Ok(method)
    }

    /// The type whose baking freezes `owner`, a type or method definition
    fn owning_type(&self, owner: Token) -> Result<Token> {
        match self.registry.get(owner) {
            Some(Member::Type(ty)) => Ok(ty.token),
            Some(Member::Method(method)) => Ok(method.declaring),
            Some(other) => other
                .declaring()
                .ok_or_else(|| malformed_error!("{} has no declaring type", owner)),
            None => Err(Error::MemberNotFound(owner)),
        }
    }
}

impl ModuleEmitter for RegistryEmitter {
    fn module_name(&self) -> &str {
        &self.module
    }

    fn define_type(
        &mut self,
        namespace: &str,
        name: &str,
        flags: TypeAttributes,
        enclosing: Option<Token>,
    ) -> Result<Token> {
        if let Some(enclosing) = enclosing {
            self.writable(enclosing)?;
        }
        let ty = self
            .registry
            .define_type(&self.module, namespace, name, flags, enclosing);
        self.types.push(ty.token);
        Ok(ty.token)
    }

    fn define_generic_parameter(
        &mut self,
        owner: Token,
        name: &str,
        flags: GenericParamAttributes,
    ) -> Result<Token> {
        self.writable(self.owning_type(owner)?)?;
        Ok(self
            .registry
            .define_generic_parameter(owner, name, flags)?
            .token)
    }

    fn set_base(&mut self, ty: Token, base: Token) -> Result<()> {
        let ty = self.writable(ty)?;
        if !ty.set_base(base) {
            return Err(Error::Emit(format!(
                "{} already has a base type",
                self.registry.display_name(ty.token)
            )));
        }
        Ok(())
    }

    fn add_interface(&mut self, ty: Token, interface: Token) -> Result<()> {
        self.writable(ty)?.interfaces.push(interface);
        Ok(())
    }

    fn add_constraint(&mut self, parameter: Token, constraint: Token) -> Result<()> {
        let param = self.registry.type_def(parameter)?;
        let TypeKind::GenericParameter { owner, .. } = &param.kind else {
            return Err(Error::Emit(format!(
                "{} is not a generic parameter",
                self.registry.display_name(parameter)
            )));
        };
        self.writable(self.owning_type(*owner)?)?;
        param.constraints.push(constraint);
        Ok(())
    }

    fn add_custom_attribute(&mut self, member: Token, attribute: CustomAttribute) -> Result<()> {
        let target = self
            .registry
            .get(member)
            .ok_or(Error::MemberNotFound(member))?;
        let ty = match &target {
            Member::Type(ty) => ty.token,
            other => self.owning_type(other.token())?,
        };
        self.writable(ty)?;
        target.custom_attributes().push(attribute);
        Ok(())
    }

    fn define_field(
        &mut self,
        declaring: Token,
        name: &str,
        flags: FieldAttributes,
    ) -> Result<Token> {
        self.writable(declaring)?;
        Ok(self.registry.define_field(declaring, name, flags).token)
    }

    fn set_field_type(&mut self, field: Token, ty: Token) -> Result<()> {
        let field = self.registry.field(field)?;
        self.writable(field.declaring)?;
        if !field.set_field_type(ty) {
            return Err(Error::Emit(format!(
                "{} already has a type",
                self.registry.display_name(field.token)
            )));
        }
        Ok(())
    }

    fn define_method(
        &mut self,
        declaring: Token,
        name: &str,
        flags: MethodAttributes,
    ) -> Result<Token> {
        self.writable(declaring)?;
        Ok(self.registry.define_method(declaring, name, flags).token)
    }

    fn set_signature(&mut self, method: Token, signature: MethodSignature) -> Result<()> {
        let method = self.writable_method(method)?;
        if !method.set_signature(signature) {
            return Err(Error::Emit(format!(
                "{} already has a signature",
                self.registry.display_name(method.token)
            )));
        }
        Ok(())
    }

    fn define_property(&mut self, declaring: Token, name: &str) -> Result<Token> {
        self.writable(declaring)?;
        Ok(self.registry.define_property(declaring, name).token)
    }

    fn set_property_parts(
        &mut self,
        property: Token,
        ty: Option<Token>,
        getter: Option<Token>,
        setter: Option<Token>,
    ) -> Result<()> {
        let property = self.registry.property(property)?;
        self.writable(property.declaring)?;
        let parts = [
            (&property.property_type, ty),
            (&property.getter, getter),
            (&property.setter, setter),
        ];
        for (slot, value) in parts {
            if let Some(value) = value {
                slot.set(value).map_err(|_| {
                    Error::Emit(format!(
                        "{} is already complete",
                        self.registry.display_name(property.token)
                    ))
                })?;
            }
        }
        Ok(())
    }

    fn define_event(&mut self, declaring: Token, name: &str) -> Result<Token> {
        self.writable(declaring)?;
        Ok(self.registry.define_event(declaring, name).token)
    }

    fn set_event_parts(
        &mut self,
        event: Token,
        ty: Option<Token>,
        adder: Option<Token>,
        remover: Option<Token>,
    ) -> Result<()> {
        let event = self.registry.event(event)?;
        self.writable(event.declaring)?;
        let parts = [
            (&event.event_type, ty),
            (&event.adder, adder),
            (&event.remover, remover),
        ];
        for (slot, value) in parts {
            if let Some(value) = value {
                slot.set(value).map_err(|_| {
                    Error::Emit(format!(
                        "{} is already complete",
                        self.registry.display_name(event.token)
                    ))
                })?;
            }
        }
        Ok(())
    }

    fn construct_type(&mut self, kind: TypeKind) -> Result<Token> {
        self.registry.intern_type(kind)
    }

    fn instantiate_method(&mut self, definition: Token, arguments: &[Token]) -> Result<Token> {
        self.registry.intern_method(definition, arguments)
    }

    fn set_body(&mut self, method: Token, body: MethodBody) -> Result<()> {
        let method = self.writable_method(method)?;
        if method.is_abstract() {
            return Err(Error::Emit(format!(
                "abstract method {} cannot have a body",
                self.registry.display_name(method.token)
            )));
        }
        if !method.set_body(body) {
            return Err(Error::Emit(format!(
                "{} already has a body",
                self.registry.display_name(method.token)
            )));
        }
        Ok(())
    }

    fn bake_type(&mut self, ty: Token) -> Result<()> {
        let ty = self.writable(ty)?;
        if let Some(enclosing) = ty.enclosing {
            if !self.registry.type_def(enclosing)?.is_baked() {
                return Err(Error::Emit(format!(
                    "{} must be baked before its nested type {}",
                    self.registry.display_name(enclosing),
                    self.registry.display_name(ty.token)
                )));
            }
        }
        for (_, method) in ty.methods.iter() {
            let method = self.registry.method(*method)?;
            if !method.is_abstract() && method.body().is_none() {
                return Err(Error::Emit(format!(
                    "{} has no body",
                    self.registry.display_name(method.token)
                )));
            }
        }
        if !ty.mark_baked() {
            return Err(Error::AlreadyBaked(ty.token));
        }
        tracing::trace!(ty = %self.registry.display_name(ty.token), "baked type");
        Ok(())
    }

    fn finish(&mut self, output_dir: Option<&Path>) -> Result<GeneratedModule> {
        if let Some(unbaked) = self
            .types
            .iter()
            .find(|ty| self.registry.get_type(**ty).is_some_and(|ty| !ty.is_baked()))
        {
            return Err(Error::Emit(format!(
                "{} was never baked",
                self.registry.display_name(*unbaked)
            )));
        }
        let mut module = GeneratedModule {
            name: self.module.clone(),
            registry: self.registry.clone(),
            types: self.types.clone(),
            path: None,
            report: CopyReport::default(),
        };
        if let Some(dir) = output_dir {
            module.path = Some(module.persist(dir)?);
        }
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{Instruction, OpCode};

    fn returning_body() -> MethodBody {
        MethodBody {
            locals: Vec::new(),
            instructions: vec![Instruction::simple(OpCode::Ret)],
            init_locals: true,
        }
    }

    #[test]
    fn baked_types_are_frozen() -> Result<()> {
        let registry = Arc::new(MemberRegistry::new());
        let mut emitter = RegistryEmitter::new(registry.clone(), "Out.Replica")?;
        let ty = emitter.define_type("Out", "Holder", TypeAttributes::PUBLIC, None)?;
        let method = emitter.define_method(ty, "Run", MethodAttributes::PUBLIC)?;
        assert!(matches!(emitter.bake_type(ty), Err(Error::Emit(_))));

        emitter.set_body(method, returning_body())?;
        emitter.bake_type(ty)?;
        assert!(matches!(
            emitter.define_field(ty, "late", FieldAttributes::PRIVATE),
            Err(Error::AlreadyBaked(token)) if token == ty
        ));
        assert!(matches!(emitter.bake_type(ty), Err(Error::AlreadyBaked(_))));
        Ok(())
    }

    #[test]
    fn nested_types_bake_after_their_enclosing_type() -> Result<()> {
        let registry = Arc::new(MemberRegistry::new());
        let mut emitter = RegistryEmitter::new(registry.clone(), "Out.Replica")?;
        let outer = emitter.define_type("Out", "Outer", TypeAttributes::PUBLIC, None)?;
        let inner = emitter.define_type("", "Inner", TypeAttributes::NESTED_PRIVATE, Some(outer))?;
        assert!(matches!(emitter.bake_type(inner), Err(Error::Emit(_))));
        assert!(matches!(emitter.finish(None), Err(Error::Emit(_))));
        emitter.bake_type(outer)?;
        emitter.bake_type(inner)?;

        let module = emitter.finish(None)?;
        assert_eq!(module.types(), &[outer, inner]);
        assert_eq!(module.find_type("Out", "Outer"), Some(outer));
        Ok(())
    }

    #[test]
    fn module_names_are_unique() -> Result<()> {
        let registry = Arc::new(MemberRegistry::new());
        let mut emitter = RegistryEmitter::new(registry.clone(), "Out.Replica")?;
        emitter.define_type("Out", "Holder", TypeAttributes::PUBLIC, None)?;
        assert!(RegistryEmitter::new(registry, "Out.Replica").is_err());
        Ok(())
    }

    #[test]
    fn abandoned_modules_release_their_name() -> Result<()> {
        let registry = Arc::new(MemberRegistry::new());
        let mut emitter = RegistryEmitter::new(registry.clone(), "Out.Replica")?;
        let stale = emitter.define_type("Out", "Holder", TypeAttributes::PUBLIC, None)?;
        emitter.abandon();
        assert!(registry.module_types("Out.Replica").is_empty());
        assert!(registry.get_type(stale).is_some());

        let mut retry = RegistryEmitter::new(registry.clone(), "Out.Replica")?;
        let fresh = retry.define_type("Out", "Holder", TypeAttributes::PUBLIC, None)?;
        retry.bake_type(fresh)?;
        let module = retry.finish(None)?;
        assert_eq!(module.types(), &[fresh]);
        assert_eq!(module.find_type("Out", "Holder"), Some(fresh));
        Ok(())
    }
}

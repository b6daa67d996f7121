//! Skeleton definition and the per-kind member copy routines.
//!
//! Every routine follows the same order: return the cached copy if there is one, define the
//! copy, cache it, and only then map the member's own dependencies. A dependency cycle thus
//! finds the cached, still incomplete copy instead of recursing forever.

use crate::{
    copier::session::{CopySession, Pending, PendingKind},
    metadata::{
        attributes::TypeAttributes,
        members::{AttributeArgument, CustomAttribute, MethodSignature},
        token::Token,
    },
    Result,
};

impl CopySession<'_> {
    /// Defines the copy of a requested type without any members.
    ///
    /// The enclosing type is defined first: as a full skeleton when it is requested itself,
    /// otherwise as an empty container.
    pub(super) fn define_skeleton(&mut self, original: Token) -> Result<Token> {
        if let Some(entry) = self.cache.get(&original) {
            return Ok(entry.copy);
        }
        let ty = self.host.type_def(original)?;
        let enclosing = match ty.enclosing {
            Some(enclosing) if self.requested.contains(&enclosing) => {
                Some(self.define_skeleton(enclosing)?)
            }
            Some(enclosing) => Some(self.define_container(enclosing)?),
            None => None,
        };
        let copy = self
            .emitter
            .define_type(&ty.namespace, &ty.name, ty.flags, enclosing)?;
        self.remember(original, copy);
        self.report.types += 1;
        for (_, param) in ty.generic_params.iter() {
            self.define_generic_parameter(*param, copy)?;
        }
        self.unfinalized.push(Pending {
            kind: PendingKind::Type,
            original,
            copy,
            owner: ty.enclosing,
        });
        tracing::trace!(ty = %self.host.display_name(original), "defined type skeleton");
        Ok(copy)
    }

    /// Defines the empty stand-in for a type that encloses a requested type.
    ///
    /// Containers only carry the name and visibility of the original; they are not cached, so
    /// references to the original type keep pointing at it.
    fn define_container(&mut self, original: Token) -> Result<Token> {
        if let Some(copy) = self.containers.get(&original) {
            return Ok(*copy);
        }
        let ty = self.host.type_def(original)?;
        let enclosing = match ty.enclosing {
            Some(enclosing) => Some(self.define_container(enclosing)?),
            None => None,
        };
        let flags = TypeAttributes::from_bits_truncate(
            ty.flags.bits() & TypeAttributes::VISIBILITY_MASK,
        );
        let copy = self
            .emitter
            .define_type(&ty.namespace, &ty.name, flags, enclosing)?;
        self.emitter.set_base(copy, self.host.core().object)?;
        self.containers.insert(original, copy);
        self.produced.insert(copy);
        self.report.types += 1;
        self.unfinalized.push(Pending {
            kind: PendingKind::Type,
            original,
            copy,
            owner: ty.enclosing,
        });
        Ok(copy)
    }

    fn define_generic_parameter(&mut self, original: Token, owner: Token) -> Result<Token> {
        let param = self.host.type_def(original)?;
        let copy = self
            .emitter
            .define_generic_parameter(owner, &param.name, param.generic_flags)?;
        self.remember(original, copy);
        Ok(copy)
    }

    /// Copies constraints, base type, interfaces, attributes and every declared member of a
    /// requested type.
    pub(super) fn copy_type_members(&mut self, original: Token) -> Result<()> {
        let ty = self.host.type_def(original)?;
        let copy = self.cached(original)?;

        for (_, param) in ty.generic_params.iter() {
            self.copy_constraints(*param, copy)?;
        }
        if let Some(base) = ty.base() {
            let base = self.lookup(base)?;
            self.check_access(copy, base, "base type")?;
            self.emitter.set_base(copy, base)?;
        }
        for (_, interface) in ty.interfaces.iter() {
            let interface = self.lookup(*interface)?;
            self.check_access(copy, interface, "interface")?;
            self.emitter.add_interface(copy, interface)?;
        }
        self.copy_attributes(original, copy)?;

        for (_, field) in ty.fields.iter() {
            self.copy_field(*field)?;
        }
        for (_, method) in ty.methods.iter() {
            self.copy_method(*method)?;
        }
        for (_, property) in ty.properties.iter() {
            self.copy_property(*property)?;
        }
        for (_, event) in ty.events.iter() {
            self.copy_event(*event)?;
        }
        Ok(())
    }

    /// Copies the constraints of a generic parameter; `context` is the member whose code the
    /// constraints are checked from
    fn copy_constraints(&mut self, original: Token, context: Token) -> Result<()> {
        let param = self.host.type_def(original)?;
        let copy = self.cached(original)?;
        for (_, constraint) in param.constraints.iter() {
            let constraint = self.lookup(*constraint)?;
            self.check_access(context, constraint, "generic constraint")?;
            self.emitter.add_constraint(copy, constraint)?;
        }
        Ok(())
    }

    fn copy_attributes(&mut self, original: Token, copy: Token) -> Result<()> {
        let member = self.host.member(original)?;
        for (_, attribute) in member.custom_attributes().iter() {
            let constructor = self.lookup(attribute.constructor)?;
            self.check_access(copy, constructor, "custom attribute")?;
            let mut arguments = Vec::with_capacity(attribute.arguments.len());
            for argument in &attribute.arguments {
                arguments.push(match argument {
                    AttributeArgument::Type(ty) => AttributeArgument::Type(self.lookup(*ty)?),
                    other => other.clone(),
                });
            }
            self.emitter.add_custom_attribute(
                copy,
                CustomAttribute {
                    constructor,
                    arguments,
                },
            )?;
        }
        Ok(())
    }

    pub(super) fn copy_field(&mut self, original: Token) -> Result<Token> {
        if let Some(entry) = self.cache.get(&original) {
            return Ok(entry.copy);
        }
        let field = self.host.field(original)?;
        let declaring = self.define_skeleton(field.declaring)?;
        let copy = self.emitter.define_field(declaring, &field.name, field.flags)?;
        self.remember(original, copy);
        self.report.members += 1;

        if let Some(field_type) = field.field_type() {
            let field_type = self.lookup(field_type)?;
            self.check_access(copy, field_type, "field type")?;
            self.emitter.set_field_type(copy, field_type)?;
        }
        self.copy_attributes(original, copy)?;
        Ok(copy)
    }

    /// Copies a method or constructor and queues its body for rewriting
    pub(super) fn copy_method(&mut self, original: Token) -> Result<Token> {
        if let Some(entry) = self.cache.get(&original) {
            return Ok(entry.copy);
        }
        let method = self.host.method(original)?;
        let declaring = self.define_skeleton(method.declaring)?;
        let copy = self
            .emitter
            .define_method(declaring, &method.name, method.flags)?;
        self.remember(original, copy);
        self.report.members += 1;

        for (_, param) in method.generic_params.iter() {
            self.define_generic_parameter(*param, copy)?;
        }
        for (_, param) in method.generic_params.iter() {
            self.copy_constraints(*param, copy)?;
        }
        if let Some(signature) = method.signature() {
            let signature = self.map_signature(copy, signature)?;
            self.emitter.set_signature(copy, signature)?;
        }
        self.copy_attributes(original, copy)?;

        if let Some(body) = self.host.scan_body(original)? {
            if let Some(entry) = self.cache.get_mut(&original) {
                entry.body = Some(body);
            }
            self.unfinalized.push(Pending {
                kind: PendingKind::Method,
                original,
                copy,
                owner: Some(method.declaring),
            });
        }
        Ok(copy)
    }

    pub(super) fn copy_property(&mut self, original: Token) -> Result<Token> {
        if let Some(entry) = self.cache.get(&original) {
            return Ok(entry.copy);
        }
        let property = self.host.property(original)?;
        let declaring = self.define_skeleton(property.declaring)?;
        let copy = self.emitter.define_property(declaring, &property.name)?;
        self.remember(original, copy);
        self.report.members += 1;

        let ty = self.lookup_optional(property.property_type.get().copied())?;
        if let Some(ty) = ty {
            self.check_access(copy, ty, "property type")?;
        }
        let getter = self.lookup_optional(property.getter.get().copied())?;
        let setter = self.lookup_optional(property.setter.get().copied())?;
        self.emitter.set_property_parts(copy, ty, getter, setter)?;
        self.copy_attributes(original, copy)?;
        Ok(copy)
    }

    pub(super) fn copy_event(&mut self, original: Token) -> Result<Token> {
        if let Some(entry) = self.cache.get(&original) {
            return Ok(entry.copy);
        }
        let event = self.host.event(original)?;
        let declaring = self.define_skeleton(event.declaring)?;
        let copy = self.emitter.define_event(declaring, &event.name)?;
        self.remember(original, copy);
        self.report.members += 1;

        let ty = self.lookup_optional(event.event_type.get().copied())?;
        if let Some(ty) = ty {
            self.check_access(copy, ty, "event type")?;
        }
        let adder = self.lookup_optional(event.adder.get().copied())?;
        let remover = self.lookup_optional(event.remover.get().copied())?;
        self.emitter.set_event_parts(copy, ty, adder, remover)?;
        self.copy_attributes(original, copy)?;
        Ok(copy)
    }

    /// Maps every type of `signature`, checking each from `context`
    pub(super) fn map_signature(
        &mut self,
        context: Token,
        signature: &MethodSignature,
    ) -> Result<MethodSignature> {
        let return_type = self.lookup(signature.return_type)?;
        self.check_access(context, return_type, "signature")?;
        let mut parameters = Vec::with_capacity(signature.parameters.len());
        for parameter in &signature.parameters {
            let parameter = self.lookup(*parameter)?;
            self.check_access(context, parameter, "signature")?;
            parameters.push(parameter);
        }
        Ok(MethodSignature {
            has_this: signature.has_this,
            return_type,
            parameters,
        })
    }

    fn lookup_optional(&mut self, token: Option<Token>) -> Result<Option<Token>> {
        token.map(|token| self.lookup(token)).transpose()
    }
}

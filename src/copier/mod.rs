//! Member graph copier.
//!
//! [`GraphCopier`] clones a closed set of original type definitions, together with every type
//! nested in them, into a freshly generated module. References between members of the copied
//! graph are re-pointed to the copies; references leaving the graph are kept when the
//! generated code may use them and otherwise rewritten through the
//! [`crate::rewrite::InstructionSynthesizer`].
//!
//! A session runs in four steps:
//!
//! 1. **Skeletons**: every requested type, and every enclosing type of one, is defined as an
//!    empty placeholder carrying only its generic parameters.
//! 2. **Members**: constraints, base type, interfaces, custom attributes, fields, methods,
//!    properties and events are copied. Each member is cached before its own dependencies are
//!    mapped, so cyclic references find the placeholder instead of recursing.
//! 3. **Bodies**: every scanned method body is rewritten instruction by instruction.
//! 4. **Finalization**: types are baked once none of their methods and no enclosing type is
//!    still pending. An iteration that finalizes nothing aborts the session.
//!
//! A session is all-or-nothing: any error leaves no usable module.
//!
//! # Example
//!
//! ```rust
//! use cilreplica::{
//!     emulation::EmulatedProbe,
//!     metadata::{attributes::MethodAttributes, builder::{MethodBuilder, TypeBuilder}},
//!     rewrite::RuntimeFamily,
//!     GraphCopier, MemberRegistry,
//! };
//! use std::sync::Arc;
//!
//! # fn example() -> cilreplica::Result<()> {
//! let registry = Arc::new(MemberRegistry::new());
//! let program = TypeBuilder::new(registry.clone(), "Demo.dll")
//!     .class("Demo", "Program")
//!     .public()
//!     .build()?;
//! MethodBuilder::new(registry.clone(), program.token, "Answer")
//!     .flags(MethodAttributes::PUBLIC | MethodAttributes::STATIC)
//!     .returns(registry.core().int32)
//!     .implementation(|asm| {
//!         asm.ldc_i4(42)?.ret()?;
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let mut copier = GraphCopier::new(registry.clone());
//! copier.add_original_type(program.token)?;
//! let probe = EmulatedProbe::new(registry.clone(), RuntimeFamily::CoreClr);
//! let module = copier.create_assembly(&probe, None)?;
//! assert_eq!(module.name(), "Demo.Replica");
//! # Ok(())
//! # }
//! ```

mod body;
mod fixpoint;
mod members;
mod session;

use std::{collections::HashMap, path::Path, sync::Arc};

use strum::Display;

use crate::{
    assembly::{max_label, Instruction, Label},
    emit::{GeneratedModule, ModuleEmitter, RegistryEmitter},
    metadata::{
        members::{LocalVariable, Member, MethodBody, TypeKind},
        registry::MemberRegistry,
        token::Token,
    },
    rewrite::RuntimeProbe,
    Error, Result,
};

use session::CopySession;

/// Extra rewrite pass for one method, run after the copier's own rewriting
pub type BodyOverride = Box<dyn Fn(&mut BodyEdit<'_>) -> Result<()>>;

/// What to do when generated code keeps a reference the accessibility oracle rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum IllegalAccessPolicy {
    /// Log a warning and keep the reference
    #[default]
    #[strum(serialize = "warn")]
    Warn,
    /// Abort the session with [`Error::IllegalAccess`]
    #[strum(serialize = "deny")]
    Deny,
}

/// Options of a copy session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOptions {
    /// Appended to the original module's stem to name the generated module
    pub module_suffix: String,
    /// Handling of references that stay inaccessible
    pub illegal_access: IllegalAccessPolicy,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions {
            module_suffix: "Replica".to_string(),
            illegal_access: IllegalAccessPolicy::Warn,
        }
    }
}

impl CopyOptions {
    /// Default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that turn every illegal-access warning into an error
    #[must_use]
    pub fn strict() -> Self {
        CopyOptions {
            illegal_access: IllegalAccessPolicy::Deny,
            ..Self::default()
        }
    }

    /// Sets the module name suffix
    #[must_use]
    pub fn with_module_suffix(mut self, suffix: &str) -> Self {
        self.module_suffix = suffix.to_string();
        self
    }

    /// Sets the illegal-access policy
    #[must_use]
    pub fn with_illegal_access(mut self, policy: IllegalAccessPolicy) -> Self {
        self.illegal_access = policy;
        self
    }
}

/// Counters collected during one copy session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Type definitions created, enclosing placeholders included
    pub types: usize,
    /// Fields, methods, properties and events created
    pub members: usize,
    /// Instructions replaced by a synthesized sequence
    pub synthesized: usize,
    /// References kept although the oracle rejected them
    pub illegal_access_warnings: usize,
    /// Iterations of the finalize loop
    pub finalize_iterations: usize,
}

/// Mutable view of a rewritten body handed to a [`BodyOverride`].
pub struct BodyEdit<'a> {
    original: Token,
    copy: Token,
    body: &'a mut MethodBody,
    next_label: u32,
}

impl<'a> BodyEdit<'a> {
    pub(crate) fn new(original: Token, copy: Token, body: &'a mut MethodBody) -> Self {
        let next_label = max_label(&body.instructions).map_or(0, |label| label.0 + 1);
        BodyEdit {
            original,
            copy,
            body,
            next_label,
        }
    }

    /// The original method
    #[must_use]
    pub fn original(&self) -> Token {
        self.original
    }

    /// The copy being written
    #[must_use]
    pub fn copy(&self) -> Token {
        self.copy
    }

    /// Instructions after the copier's rewriting
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.body.instructions
    }

    /// Mutable instruction list
    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.body.instructions
    }

    /// Declared locals, scratch locals included
    #[must_use]
    pub fn locals(&self) -> &[LocalVariable] {
        &self.body.locals
    }

    /// Declares an extra local and returns its index.
    ///
    /// # Errors
    /// Returns [`Error::Emit`] when the method would exceed the local variable limit.
    pub fn declare_local(&mut self, ty: Token) -> Result<u16> {
        let index = u16::try_from(self.body.locals.len())
            .map_err(|_| Error::Emit("method exceeds 65535 locals".to_string()))?;
        self.body.locals.push(LocalVariable { ty, pinned: false });
        Ok(index)
    }

    /// Allocates a label unused by the body
    pub fn label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }
}

/// Public entry point: collects original types and produces their copy.
pub struct GraphCopier {
    registry: Arc<MemberRegistry>,
    options: CopyOptions,
    module: Option<String>,
    originals: Vec<Token>,
    overrides: HashMap<Token, Vec<BodyOverride>>,
}

impl GraphCopier {
    /// Creates a copier with default options
    #[must_use]
    pub fn new(registry: Arc<MemberRegistry>) -> Self {
        Self::with_options(registry, CopyOptions::default())
    }

    /// Creates a copier with `options`
    #[must_use]
    pub fn with_options(registry: Arc<MemberRegistry>, options: CopyOptions) -> Self {
        GraphCopier {
            registry,
            options,
            module: None,
            originals: Vec::new(),
            overrides: HashMap::new(),
        }
    }

    /// Session options
    #[must_use]
    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    /// Types added so far, in insertion order
    #[must_use]
    pub fn original_types(&self) -> &[Token] {
        &self.originals
    }

    /// Adds a type definition to the graph. Adding the same type twice has no effect.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] for unknown tokens and [`Error::Usage`] for generic
    /// parameters, constructed types and types from a different module than the ones added
    /// before.
    pub fn add_original_type(&mut self, ty: Token) -> Result<&mut Self> {
        let original = self.registry.type_def(ty)?;
        match original.kind {
            TypeKind::Definition => {}
            TypeKind::GenericParameter { .. } => {
                return Err(Error::Usage(format!(
                    "{} is a generic parameter",
                    self.registry.display_name(ty)
                )))
            }
            _ => {
                return Err(Error::Usage(format!(
                    "{} is not a type definition",
                    self.registry.display_name(ty)
                )))
            }
        }
        match &self.module {
            Some(module) if *module != original.module => {
                return Err(Error::Usage(format!(
                    "{} comes from {} but the copied graph comes from {}",
                    self.registry.display_name(ty),
                    original.module,
                    module
                )));
            }
            Some(_) => {}
            None => self.module = Some(original.module.clone()),
        }
        if !self.originals.contains(&ty) {
            self.originals.push(ty);
        }
        Ok(self)
    }

    /// Registers an extra rewrite pass for the copy of `method`.
    ///
    /// Passes run in registration order after the copier's own rewriting and before the
    /// terminating `ret` is appended.
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] for unknown tokens and [`Error::Usage`] if `method`
    /// is not a method definition.
    pub fn add_method_body_override<F>(&mut self, method: Token, edit: F) -> Result<&mut Self>
    where
        F: Fn(&mut BodyEdit<'_>) -> Result<()> + 'static,
    {
        match self.registry.get(method) {
            Some(Member::Method(definition)) if !definition.is_instantiation() => {}
            Some(_) => {
                return Err(Error::Usage(format!(
                    "{} is not a method definition",
                    self.registry.display_name(method)
                )))
            }
            None => return Err(Error::MemberNotFound(method)),
        }
        self.overrides
            .entry(method)
            .or_default()
            .push(Box::new(edit));
        Ok(self)
    }

    /// Copies the graph into a new module and returns it.
    ///
    /// The module is named `<original module stem>.<suffix>`. When `output_dir` is given a
    /// listing is also persisted there as `<module name>.il`. A copier can produce its module
    /// only once per registry, since module names are unique.
    ///
    /// A failed session abandons its module. The definitions it made stay in the registry under
    /// their tokens but are no longer listed under the module name, so the same name can be
    /// used again.
    ///
    /// # Errors
    /// Returns [`Error::Usage`] if no type was added, and any error raised while copying,
    /// rewriting or finalizing.
    pub fn create_assembly(
        &self,
        probe: &dyn RuntimeProbe,
        output_dir: Option<&Path>,
    ) -> Result<GeneratedModule> {
        let Some(module) = self.module.as_deref() else {
            return Err(Error::Usage("no original types were added".to_string()));
        };
        let name = replica_module_name(module, &self.options.module_suffix);
        tracing::debug!(
            module = %name,
            requested = self.originals.len(),
            family = %probe.family(),
            "starting copy session"
        );

        let mut emitter = RegistryEmitter::new(self.registry.clone(), &name)?;
        let outcome = CopySession::new(
            self.registry.as_ref(),
            &mut emitter,
            probe,
            &self.options,
            &self.overrides,
        )
        .run(&self.originals)
        .and_then(|report| Ok(emitter.finish(output_dir)?.with_report(report)));
        let generated = match outcome {
            Ok(generated) => generated,
            Err(error) => {
                emitter.abandon();
                return Err(error);
            }
        };
        let report = *generated.report();

        tracing::debug!(
            module = %name,
            types = report.types,
            members = report.members,
            synthesized = report.synthesized,
            iterations = report.finalize_iterations,
            "copy session finished"
        );
        Ok(generated)
    }
}

/// `Lib.dll` + `Replica` gives `Lib.Replica`
fn replica_module_name(module: &str, suffix: &str) -> String {
    let stem = Path::new(module)
        .file_stem()
        .map_or_else(|| module.to_string(), |stem| stem.to_string_lossy().into_owned());
    format!("{stem}.{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        attributes::{MethodAttributes, TypeAttributes},
        builder::{MethodBuilder, TypeBuilder},
    };

    #[test]
    fn module_names_derive_from_the_original_stem() {
        assert_eq!(replica_module_name("Lib.dll", "Replica"), "Lib.Replica");
        assert_eq!(replica_module_name("Game.Core.dll", "Copy"), "Game.Core.Copy");
        assert_eq!(replica_module_name("plain", "Replica"), "plain.Replica");
    }

    #[test]
    fn usage_errors_are_raised_by_the_offending_call() -> Result<()> {
        let registry = Arc::new(MemberRegistry::new());
        let generic = TypeBuilder::new(registry.clone(), "A.dll")
            .class("A", "Box")
            .public()
            .generic_parameter("T")
            .build()?;
        let other = TypeBuilder::new(registry.clone(), "B.dll")
            .class("B", "Other")
            .public()
            .build()?;
        let parameter = generic.generic_param(0).ok_or(Error::MemberNotFound(generic.token))?;
        let constructed = registry.intern_type(TypeKind::Instantiation {
            definition: generic.token,
            arguments: vec![registry.core().int32],
        })?;

        let mut copier = GraphCopier::new(registry.clone());
        assert!(matches!(
            copier.create_assembly(&NoProbe, None),
            Err(Error::Usage(_))
        ));
        assert!(matches!(copier.add_original_type(parameter), Err(Error::Usage(_))));
        assert!(matches!(copier.add_original_type(constructed), Err(Error::Usage(_))));
        copier.add_original_type(generic.token)?;
        copier.add_original_type(generic.token)?;
        assert!(matches!(copier.add_original_type(other.token), Err(Error::Usage(_))));
        assert_eq!(copier.original_types(), &[generic.token]);
        assert!(matches!(
            copier.add_original_type(Token::new(0x0200_7777)),
            Err(Error::MemberNotFound(_))
        ));
        assert!(matches!(
            copier.add_method_body_override(other.token, |_| Ok(())),
            Err(Error::Usage(_))
        ));
        Ok(())
    }

    #[test]
    fn body_edits_allocate_fresh_labels_and_locals() -> Result<()> {
        let registry = Arc::new(MemberRegistry::new());
        let ty = TypeBuilder::new(registry.clone(), "A.dll")
            .class("A", "Loop")
            .flags(TypeAttributes::PUBLIC)
            .build()?;
        let method = MethodBuilder::new(registry.clone(), ty.token, "Spin")
            .flags(MethodAttributes::PUBLIC | MethodAttributes::STATIC)
            .local(registry.core().int32)
            .implementation(|asm| {
                let top = Label(7);
                asm.mark_label(top)?.br(top)?;
                Ok(())
            })
            .build()?;
        let mut body = method.body().cloned().unwrap_or_default();
        let mut edit = BodyEdit::new(method.token, method.token, &mut body);
        assert_eq!(edit.label(), Label(8));
        assert_eq!(edit.declare_local(registry.core().object)?, 1);
        edit.instructions_mut().clear();
        assert!(edit.instructions().is_empty());
        assert_eq!(edit.locals().len(), 2);
        Ok(())
    }

    struct NoProbe;

    impl RuntimeProbe for NoProbe {
        fn family(&self) -> crate::rewrite::RuntimeFamily {
            crate::rewrite::RuntimeFamily::CoreClr
        }

        fn measure_box_payload_offset(&self, _value_type: Token) -> Result<i32> {
            Err(Error::Layout("no runtime".to_string()))
        }
    }
}

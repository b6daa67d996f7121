//! State of one copy session.

use std::collections::{HashMap, HashSet};

use crate::{
    copier::{fixpoint::run_to_fixpoint, BodyOverride, CopyOptions, CopyReport, IllegalAccessPolicy},
    emit::ModuleEmitter,
    metadata::{
        host::MetadataHost,
        members::{Member, MethodBody, TypeKind},
        token::Token,
    },
    rewrite::{AccessibilityOracle, RuntimeProbe},
    Error, Result,
};

/// Cached copy of one original member, keyed by the original token
pub(crate) struct CopyEntry {
    pub copy: Token,
    /// Scanned original body, taken when the body is rewritten
    pub body: Option<MethodBody>,
}

impl CopyEntry {
    pub fn new(copy: Token) -> Self {
        CopyEntry {
            copy,
            body: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingKind {
    Type,
    Method,
}

/// An entry of the unfinalized set.
///
/// `owner` is the original enclosing type of a type, or the original declaring type of a
/// method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pending {
    pub kind: PendingKind,
    pub original: Token,
    pub copy: Token,
    pub owner: Option<Token>,
}

impl Pending {
    /// Returns true if `self` must wait for `other` to finalize
    fn waits_for(&self, other: &Pending) -> bool {
        match (self.kind, other.kind) {
            (PendingKind::Type, PendingKind::Method) => other.owner == Some(self.original),
            (PendingKind::Type, PendingKind::Type) => self.owner == Some(other.original),
            (PendingKind::Method, _) => false,
        }
    }
}

pub(crate) struct CopySession<'a> {
    pub(super) host: &'a dyn MetadataHost,
    pub(super) emitter: &'a mut dyn ModuleEmitter,
    pub(super) probe: &'a dyn RuntimeProbe,
    pub(super) options: &'a CopyOptions,
    pub(super) overrides: &'a HashMap<Token, Vec<BodyOverride>>,
    /// Requested types and every type nested in one
    pub(super) requested: HashSet<Token>,
    /// Original member to its copy
    pub(super) cache: HashMap<Token, CopyEntry>,
    /// Enclosing placeholders of requested types, kept out of the cache
    pub(super) containers: HashMap<Token, Token>,
    /// Every definition created in this session
    pub(super) produced: HashSet<Token>,
    pub(super) unfinalized: Vec<Pending>,
    pub(super) report: CopyReport,
}

impl<'a> CopySession<'a> {
    pub fn new(
        host: &'a dyn MetadataHost,
        emitter: &'a mut dyn ModuleEmitter,
        probe: &'a dyn RuntimeProbe,
        options: &'a CopyOptions,
        overrides: &'a HashMap<Token, Vec<BodyOverride>>,
    ) -> Self {
        CopySession {
            host,
            emitter,
            probe,
            options,
            overrides,
            requested: HashSet::new(),
            cache: HashMap::new(),
            containers: HashMap::new(),
            produced: HashSet::new(),
            unfinalized: Vec::new(),
            report: CopyReport::default(),
        }
    }

    /// Runs the whole session
    pub fn run(mut self, originals: &[Token]) -> Result<CopyReport> {
        let graph = self.expand_nested(originals)?;
        self.requested = graph.iter().copied().collect();

        for ty in &graph {
            self.define_skeleton(*ty)?;
        }
        for ty in &graph {
            self.copy_type_members(*ty)?;
        }
        for method in self.overrides.keys() {
            if !self.cache.contains_key(method) {
                tracing::warn!(
                    method = %self.host.display_name(*method),
                    "body override registered for a method outside the copied graph"
                );
            }
        }

        let pending = std::mem::take(&mut self.unfinalized);
        let host = self.host;
        let iterations = run_to_fixpoint(
            pending,
            |entry, snapshot| self.try_finalize(entry, snapshot),
            |entry| format!("{} {}", entry_kind_name(entry.kind), host.display_name(entry.original)),
        )?;
        self.report.finalize_iterations = iterations;
        Ok(self.report)
    }

    /// Requested types followed by every type nested in one, breadth first
    fn expand_nested(&self, originals: &[Token]) -> Result<Vec<Token>> {
        let mut graph = originals.to_vec();
        let mut next = 0;
        while next < graph.len() {
            let ty = self.host.type_def(graph[next])?;
            for (_, nested) in ty.nested.iter() {
                if !graph.contains(nested) {
                    graph.push(*nested);
                }
            }
            next += 1;
        }
        Ok(graph)
    }

    fn try_finalize(&mut self, entry: &Pending, snapshot: &[Pending]) -> Result<bool> {
        match entry.kind {
            PendingKind::Method => {
                let body = self.rewrite_body(entry.original, entry.copy)?;
                self.emitter.set_body(entry.copy, body)?;
                tracing::trace!(method = %self.host.display_name(entry.copy), "finalized method");
                Ok(true)
            }
            PendingKind::Type => {
                if snapshot.iter().any(|other| entry.waits_for(other)) {
                    return Ok(false);
                }
                self.emitter.bake_type(entry.copy)?;
                Ok(true)
            }
        }
    }

    /// The copy of a member that must already be cached
    pub(super) fn cached(&self, original: Token) -> Result<Token> {
        self.cache
            .get(&original)
            .map(|entry| entry.copy)
            .ok_or_else(|| malformed_error!("{} was not copied", original))
    }

    pub(super) fn remember(&mut self, original: Token, copy: Token) {
        self.produced.insert(copy);
        self.cache.insert(original, CopyEntry::new(copy));
    }

    /// Maps an original reference to the token the generated module must use.
    ///
    /// Members of the copied graph map to their copy (copying them on first use), constructed
    /// shapes over copied parts are rebuilt and cached under the original token, and every
    /// other reference maps to itself.
    pub(super) fn lookup(&mut self, token: Token) -> Result<Token> {
        if let Some(entry) = self.cache.get(&token) {
            return Ok(entry.copy);
        }
        let mapped = match self.host.member(token)? {
            Member::Type(ty) => match &ty.kind {
                TypeKind::Definition if self.requested.contains(&token) => {
                    return self.define_skeleton(token)
                }
                TypeKind::Definition | TypeKind::GenericParameter { .. } => return Ok(token),
                TypeKind::Instantiation {
                    definition,
                    arguments,
                } => {
                    let mapped_definition = self.lookup(*definition)?;
                    let mut mapped_arguments = Vec::with_capacity(arguments.len());
                    for argument in arguments {
                        mapped_arguments.push(self.lookup(*argument)?);
                    }
                    if mapped_definition == *definition && mapped_arguments == *arguments {
                        return Ok(token);
                    }
                    self.emitter.construct_type(TypeKind::Instantiation {
                        definition: mapped_definition,
                        arguments: mapped_arguments,
                    })?
                }
                TypeKind::Array { element }
                | TypeKind::ByRef { element }
                | TypeKind::Pointer { element } => {
                    let mapped_element = self.lookup(*element)?;
                    if mapped_element == *element {
                        return Ok(token);
                    }
                    self.emitter
                        .construct_type(with_element(&ty.kind, mapped_element))?
                }
            },
            Member::Method(method) => match &method.instantiation {
                Some((definition, arguments)) => {
                    let mapped_definition = self.lookup(*definition)?;
                    let mut mapped_arguments = Vec::with_capacity(arguments.len());
                    for argument in arguments {
                        mapped_arguments.push(self.lookup(*argument)?);
                    }
                    if mapped_definition == *definition && mapped_arguments == *arguments {
                        return Ok(token);
                    }
                    self.emitter
                        .instantiate_method(mapped_definition, &mapped_arguments)?
                }
                None if self.requested.contains(&method.declaring) => {
                    return self.copy_method(token)
                }
                None => return Ok(token),
            },
            Member::Field(field) if self.requested.contains(&field.declaring) => {
                return self.copy_field(token)
            }
            Member::Property(property) if self.requested.contains(&property.declaring) => {
                return self.copy_property(token)
            }
            Member::Event(event) if self.requested.contains(&event.declaring) => {
                return self.copy_event(token)
            }
            Member::Field(_) | Member::Property(_) | Member::Event(_) => return Ok(token),
        };
        self.cache.insert(token, CopyEntry::new(mapped));
        Ok(mapped)
    }

    /// Checks a reference made by copied metadata (signatures, base types, bodies)
    pub(super) fn check_access(&mut self, source: Token, target: Token, context: &str) -> Result<()> {
        let accessible = {
            let produced = &self.produced;
            let oracle = AccessibilityOracle::new(self.host, |ty| produced.contains(&ty))
                .with_generated(|member| produced.contains(&member));
            oracle.is_accessible(source, target)
        };
        if accessible {
            return Ok(());
        }
        self.report_illegal_access(source, target, context)
    }

    /// Applies the illegal-access policy to a reference the oracle rejected
    pub(super) fn report_illegal_access(
        &mut self,
        source: Token,
        target: Token,
        context: &str,
    ) -> Result<()> {
        let source_member = self.host.display_name(source);
        let target = self.host.display_name(target);
        match self.options.illegal_access {
            IllegalAccessPolicy::Deny => Err(Error::IllegalAccess {
                source_member,
                target,
            }),
            IllegalAccessPolicy::Warn => {
                tracing::warn!(
                    source = %source_member,
                    target = %target,
                    context,
                    "generated code keeps an inaccessible reference"
                );
                self.report.illegal_access_warnings += 1;
                Ok(())
            }
        }
    }
}

fn with_element(kind: &TypeKind, element: Token) -> TypeKind {
    match kind {
        TypeKind::ByRef { .. } => TypeKind::ByRef { element },
        TypeKind::Pointer { .. } => TypeKind::Pointer { element },
        _ => TypeKind::Array { element },
    }
}

fn entry_kind_name(kind: PendingKind) -> &'static str {
    match kind {
        PendingKind::Type => "type",
        PendingKind::Method => "method",
    }
}

//! Scope providers and name resolution.
//!
//! A provider is a module, function, class, or comprehension body. It
//! answers `variable_for_assignment` and `variable_for_reference`;
//! reference resolution climbs the enclosing-scope chain, skipping class
//! bodies, and registers closure references in every intermediate function
//! scope so that each intermediate function's lowering knows to forward
//! the captured storage.

use indexmap::IndexMap;

use crate::variables::{VarId, Variable, VariableKind};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct ScopeId(pub(crate) u32);

impl ScopeId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FunctionFlavor {
    Plain,
    Generator,
    Coroutine,
    AsyncGenerator,
}

impl FunctionFlavor {
    pub fn is_resumable(self) -> bool {
        !matches!(self, FunctionFlavor::Plain)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScopeKind {
    Module,
    Function(FunctionFlavor),
    Class,
    Comprehension,
}

impl ScopeKind {
    /// Class bodies are skipped during outward reference resolution.
    fn visible_from_inner(self) -> bool {
        !matches!(self, ScopeKind::Class)
    }

    fn is_function_like(self) -> bool {
        matches!(self, ScopeKind::Function(_) | ScopeKind::Comprehension)
    }
}

#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    locals: IndexMap<String, VarId>,
    /// Closure references registered in this scope, in registration order.
    pub closure_refs: Vec<VarId>,
}

#[derive(Debug, Default)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    variables: Vec<Variable>,
}

impl ScopeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scope(&mut self, kind: ScopeKind, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            kind,
            parent,
            locals: IndexMap::new(),
            closure_refs: Vec::new(),
        });
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.index()]
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    fn add_variable(&mut self, scope: ScopeId, name: &str, kind: VariableKind) -> VarId {
        let id = VarId::new(self.variables.len());
        self.variables.push(Variable {
            name: name.to_string(),
            owner: scope,
            kind,
            shared: false,
        });
        self.scopes[scope.index()].locals.insert(name.to_string(), id);
        id
    }

    /// Declares a parameter of a function scope.
    pub fn add_parameter(&mut self, scope: ScopeId, name: &str) -> VarId {
        debug_assert!(self.scopes[scope.index()].kind.is_function_like());
        self.add_variable(scope, name, VariableKind::Parameter)
    }

    /// The variable a binding occurrence of `name` writes in `scope`.
    /// Creates the local on first sight; module scopes create module
    /// variables.
    pub fn variable_for_assignment(&mut self, scope: ScopeId, name: &str) -> VarId {
        if let Some(&existing) = self.scopes[scope.index()].locals.get(name) {
            return existing;
        }
        let kind = match self.scopes[scope.index()].kind {
            ScopeKind::Module => VariableKind::ModuleVar,
            _ => VariableKind::LocalVar,
        };
        self.add_variable(scope, name, kind)
    }

    /// The variable a use occurrence of `name` reads in `scope`.
    ///
    /// Resolution order: own locals, then enclosing providers (class
    /// bodies skipped). A hit owned by an outer function scope registers a
    /// closure reference chain through every intermediate function scope
    /// and marks the ultimate source shared. A module-level hit (or a miss,
    /// which creates an implicit late-bound module variable) is returned
    /// directly and never captured.
    pub fn variable_for_reference(&mut self, scope: ScopeId, name: &str) -> VarId {
        if let Some(&local) = self.scopes[scope.index()].locals.get(name) {
            return local;
        }

        let parent = self.scopes[scope.index()].parent;
        let outer = match parent {
            Some(parent) => {
                let parent = self.skip_class_bodies(parent);
                self.variable_for_reference(parent, name)
            }
            None => {
                // Unbound at module level: implicit late-bound module
                // variable (builtins resolve this way too).
                return self.add_variable(scope, name, VariableKind::ModuleVar);
            }
        };

        if self.variable(outer).is_module_level() {
            return outer;
        }

        // The hit lives in an outer function scope: this scope needs a
        // closure reference, and the true storage becomes shared.
        let source = self.ultimate_source(outer);
        self.variables[source.index()].shared = true;
        let closure = self.add_variable(scope, name, VariableKind::ClosureRef { source: outer });
        self.scopes[scope.index()].closure_refs.push(closure);
        closure
    }

    fn skip_class_bodies(&self, mut scope: ScopeId) -> ScopeId {
        while !self.scopes[scope.index()].kind.visible_from_inner() {
            match self.scopes[scope.index()].parent {
                Some(parent) => scope = parent,
                None => break,
            }
        }
        scope
    }

    /// Every variable owned by the scope, in declaration order.
    pub fn scope_locals(&self, scope: ScopeId) -> Vec<VarId> {
        self.scopes[scope.index()].locals.values().copied().collect()
    }

    /// Parameters of a function-like scope, in declaration order.
    pub fn parameters(&self, scope: ScopeId) -> Vec<VarId> {
        self.scopes[scope.index()]
            .locals
            .values()
            .copied()
            .filter(|&v| matches!(self.variable(v).kind, VariableKind::Parameter))
            .collect()
    }

    /// Follows a closure-reference chain to the owning storage location.
    pub fn ultimate_source(&self, mut var: VarId) -> VarId {
        while let VariableKind::ClosureRef { source } = self.variable(var).kind {
            var = source;
        }
        var
    }

    /// Whether folding a known-constant trace into a use of `var` is
    /// permitted (see [`Variable::foldable`]).
    pub fn foldable(&self, var: VarId) -> bool {
        self.variable(var).foldable()
    }
}

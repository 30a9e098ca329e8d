//! Named storage locations.
//!
//! A variable is owned by exactly one provider scope. Closure references
//! are distinct variables in the inner scope that point at the storage of
//! an outer function's variable; capturing a variable for mutation
//! visibility marks the ultimate source `shared`, which lowering turns
//! into heap-cell storage.

use crate::scopes::ScopeId;

/// Index of a variable in the [`ScopeTree`](crate::scopes::ScopeTree).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct VarId(pub(crate) u32);

impl VarId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum VariableKind {
    /// Module-level storage, always late-bound at use sites.
    ModuleVar,
    /// Function-local storage.
    LocalVar,
    /// Function parameter; local storage initialized at entry.
    Parameter,
    /// Reference to storage owned by an enclosing function scope.
    /// `source` is the variable in the *next* enclosing scope, which may
    /// itself be a closure reference when the capture crosses several
    /// intermediate functions.
    ClosureRef { source: VarId },
}

#[derive(Clone, Debug)]
pub struct Variable {
    pub name: String,
    pub owner: ScopeId,
    pub kind: VariableKind,
    /// Set on the owning variable once any inner scope captures it.
    pub shared: bool,
}

impl Variable {
    pub fn is_module_level(&self) -> bool {
        matches!(self.kind, VariableKind::ModuleVar)
    }

    pub fn is_closure_reference(&self) -> bool {
        matches!(self.kind, VariableKind::ClosureRef { .. })
    }

    /// Whether a known-constant trace of this variable may be folded into
    /// a use site. Module variables are late-bound and shared storage can
    /// be rebound behind the optimizer's back by an inner scope.
    pub fn foldable(&self) -> bool {
        matches!(self.kind, VariableKind::LocalVar | VariableKind::Parameter) && !self.shared
    }
}

//! Abstract-execution state threaded through one tree traversal.
//!
//! A collection is created per function/module traversal and discarded
//! when the traversal completes. Exception and escape facts only
//! accumulate within a traversal; they reset only when a new traversal
//! starts after a replacement.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::constant::ConstantValue;
use crate::exceptions::ExceptionKind;
use crate::tree::NodeId;
use crate::variables::VarId;

/// How a trace came to be.
#[derive(Clone, PartialEq, Debug)]
pub enum TraceOrigin {
    /// No assignment seen yet on this path.
    Uninit,
    /// Written by the given assignment node.
    Assign(NodeId),
    /// Join of branch traces that did not agree.
    Merge,
    /// Invalidated because unknowable code may have run.
    Escaped,
}

/// Immutable versioned record of what is statically known about one
/// variable at the current program point.
#[derive(Clone, PartialEq, Debug)]
pub struct VariableTrace {
    pub version: u32,
    pub value: Option<ConstantValue>,
    pub use_count: u32,
    pub origin: TraceOrigin,
}

impl VariableTrace {
    pub fn is_assigned(&self) -> bool {
        matches!(self.origin, TraceOrigin::Assign(_))
    }
}

#[derive(Clone, Debug)]
pub struct TraceCollection {
    traces: IndexMap<VarId, VariableTrace>,
    exceptions: BTreeSet<ExceptionKind>,
    /// Control has passed through code the optimizer cannot see.
    control_escaped: bool,
    /// The current point is proven to never be reached normally
    /// (unconditional raise, return, break or continue upstream).
    aborting: bool,
    next_version: u32,
}

impl TraceCollection {
    pub fn new() -> Self {
        Self {
            traces: IndexMap::new(),
            exceptions: BTreeSet::new(),
            control_escaped: false,
            aborting: false,
            next_version: 0,
        }
    }

    fn bump_version(&mut self) -> u32 {
        self.next_version += 1;
        self.next_version
    }

    pub fn trace(&self, var: VarId) -> Option<&VariableTrace> {
        self.traces.get(&var)
    }

    /// The constant the variable is proven to hold here, if any.
    pub fn known_value(&self, var: VarId) -> Option<&ConstantValue> {
        self.traces.get(&var).and_then(|t| t.value.as_ref())
    }

    /// Whether the variable is provably assigned on every path to here.
    pub fn proven_assigned(&self, var: VarId) -> bool {
        match self.traces.get(&var) {
            Some(trace) => !matches!(trace.origin, TraceOrigin::Uninit),
            None => false,
        }
    }

    pub fn on_variable_assign(&mut self, var: VarId, node: NodeId, value: Option<ConstantValue>) {
        let version = self.bump_version();
        self.traces.insert(
            var,
            VariableTrace {
                version,
                value,
                use_count: 0,
                origin: TraceOrigin::Assign(node),
            },
        );
    }

    pub fn on_variable_del(&mut self, var: VarId) {
        let version = self.bump_version();
        self.traces.insert(
            var,
            VariableTrace {
                version,
                value: None,
                use_count: 0,
                origin: TraceOrigin::Uninit,
            },
        );
    }

    pub fn mark_use(&mut self, var: VarId) {
        if let Some(trace) = self.traces.get_mut(&var) {
            trace.use_count += 1;
        }
    }

    /// Monotonic-additive raise fact for the remainder of the current
    /// node's evaluation.
    pub fn on_exception_raise_exit(&mut self, kind: ExceptionKind) {
        self.exceptions.insert(kind);
    }

    pub fn exception_exits(&self) -> &BTreeSet<ExceptionKind> {
        &self.exceptions
    }

    pub fn may_raise(&self) -> bool {
        !self.exceptions.is_empty()
    }

    /// Enters an exception-protected region: raise facts restart from a
    /// clean slate so the construct can decide which kinds escape it.
    pub fn isolate_exceptions(&mut self) {
        self.exceptions.clear();
    }

    /// Drops raise facts the enclosing construct proved handled.
    pub fn retain_exceptions(&mut self, f: impl FnMut(&ExceptionKind) -> bool) {
        self.exceptions.retain(f);
    }

    /// Arbitrary external code may have run: every cached variable fact
    /// degrades pessimistically.
    pub fn on_control_flow_escape(&mut self) {
        self.control_escaped = true;
        let version = self.bump_version();
        for trace in self.traces.values_mut() {
            if trace.value.is_some() || matches!(trace.origin, TraceOrigin::Assign(_) | TraceOrigin::Merge)
            {
                trace.version = version;
                trace.value = None;
                trace.origin = TraceOrigin::Escaped;
            }
        }
    }

    pub fn control_escaped(&self) -> bool {
        self.control_escaped
    }

    /// Invalidates cached facts about one value after in-place mutation
    /// or after it was passed somewhere unknown.
    pub fn remove_knowledge(&mut self, var: VarId) {
        let version = self.bump_version();
        self.traces.insert(
            var,
            VariableTrace {
                version,
                value: None,
                use_count: 0,
                origin: TraceOrigin::Escaped,
            },
        );
    }

    /// Marks the current point unreachable through normal control flow.
    pub fn set_aborting(&mut self) {
        self.aborting = true;
    }

    pub fn is_aborting(&self) -> bool {
        self.aborting
    }

    /// Snapshot for one branch of a fork point.
    pub fn fork(&self) -> TraceCollection {
        self.clone()
    }

    /// Joins branch collections back into `self` (the pre-branch state is
    /// `self` before the call for constructs where no branch may run;
    /// pass `self.fork()` as one branch to model that).
    ///
    /// A variable's post-merge trace is the common trace when every
    /// non-aborting branch agrees; otherwise a fresh `Merge` trace with no
    /// value. Exception and escape facts are unioned unconditionally.
    pub fn merge(&mut self, branches: Vec<TraceCollection>) {
        for branch in &branches {
            for kind in &branch.exceptions {
                self.exceptions.insert(*kind);
            }
            self.control_escaped |= branch.control_escaped;
            self.next_version = self.next_version.max(branch.next_version);
        }

        let live: Vec<&TraceCollection> = branches.iter().filter(|b| !b.aborting).collect();
        if live.is_empty() {
            // Every branch aborts; the merge point is unreachable.
            self.aborting = true;
            return;
        }

        let mut vars: BTreeSet<VarId> = BTreeSet::new();
        for branch in &live {
            vars.extend(branch.traces.keys().copied());
        }
        vars.extend(self.traces.keys().copied());

        let version = self.bump_version();
        for var in vars {
            let first = live[0].trace(var);
            let agree = live.iter().all(|b| b.trace(var) == first);
            match (agree, first) {
                (true, Some(trace)) => {
                    self.traces.insert(var, trace.clone());
                }
                (true, None) => {
                    self.traces.shift_remove(&var);
                }
                (false, _) => {
                    // Branches disagree: degrade, but keep a common known
                    // value when every live branch proves the same one. A
                    // branch where the variable may be unbound degrades the
                    // merge all the way to unbound.
                    let maybe_unbound = live.iter().any(|b| {
                        b.trace(var)
                            .map_or(true, |t| matches!(t.origin, TraceOrigin::Uninit))
                    });
                    let common = live[0].known_value(var).cloned().filter(|v| {
                        live.iter()
                            .all(|b| b.known_value(var).map_or(false, |w| w == v))
                    });
                    self.traces.insert(
                        var,
                        VariableTrace {
                            version,
                            value: if maybe_unbound { None } else { common },
                            use_count: 0,
                            origin: if maybe_unbound {
                                TraceOrigin::Uninit
                            } else {
                                TraceOrigin::Merge
                            },
                        },
                    );
                }
            }
        }
    }
}

impl Default for TraceCollection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ConstantValue;

    fn var(n: usize) -> VarId {
        VarId::new(n)
    }

    fn node() -> NodeId {
        // Traces only store the id; any id works for unit tests.
        let mut tree = crate::tree::Tree::new();
        tree.insert(crate::tree::NodeKind::PassStatement, crate::location::SourceLoc::default())
    }

    #[test]
    fn exception_facts_only_accumulate() {
        let mut col = TraceCollection::new();
        col.on_exception_raise_exit(ExceptionKind::TypeError);
        let before = col.exception_exits().clone();
        col.on_exception_raise_exit(ExceptionKind::IndexError);
        col.on_control_flow_escape();
        assert!(col.exception_exits().is_superset(&before));
    }

    #[test]
    fn escape_degrades_known_values() {
        let mut col = TraceCollection::new();
        col.on_variable_assign(var(0), node(), Some(ConstantValue::int(1)));
        assert!(col.known_value(var(0)).is_some());
        col.on_control_flow_escape();
        assert!(col.known_value(var(0)).is_none());
        assert_eq!(col.trace(var(0)).unwrap().origin, TraceOrigin::Escaped);
    }

    #[test]
    fn merge_agreeing_branches_keeps_trace() {
        let mut col = TraceCollection::new();
        col.on_variable_assign(var(0), node(), Some(ConstantValue::int(1)));
        let a = col.fork();
        let b = col.fork();
        col.merge(vec![a, b]);
        assert_eq!(col.known_value(var(0)), Some(&ConstantValue::int(1)));
    }

    #[test]
    fn merge_disagreeing_branches_degrades() {
        let mut col = TraceCollection::new();
        let mut a = col.fork();
        let mut b = col.fork();
        a.on_variable_assign(var(0), node(), Some(ConstantValue::int(1)));
        b.on_variable_assign(var(0), node(), Some(ConstantValue::int(2)));
        col.merge(vec![a, b]);
        let trace = col.trace(var(0)).unwrap();
        assert_eq!(trace.origin, TraceOrigin::Merge);
        assert_eq!(trace.value, None);
    }

    #[test]
    fn merge_with_unassigned_branch_loses_assignment_proof() {
        let mut col = TraceCollection::new();
        let unassigned = col.fork();
        let mut assigned = col.fork();
        assigned.on_variable_assign(var(0), node(), Some(ConstantValue::int(1)));
        col.merge(vec![unassigned, assigned]);
        assert!(!col.proven_assigned(var(0)));
        assert_eq!(col.known_value(var(0)), None);
    }

    #[test]
    fn merge_skips_aborting_branches() {
        let mut col = TraceCollection::new();
        let mut a = col.fork();
        let mut b = col.fork();
        a.on_variable_assign(var(0), node(), Some(ConstantValue::int(1)));
        b.on_variable_assign(var(0), node(), Some(ConstantValue::int(9)));
        b.set_aborting();
        col.merge(vec![a, b]);
        assert_eq!(col.known_value(var(0)), Some(&ConstantValue::int(1)));
        assert!(!col.is_aborting());
    }
}

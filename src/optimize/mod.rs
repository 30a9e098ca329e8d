//! The fixpoint rewrite driver and the shared rewrite contract.
//!
//! One pass walks the module tree top-down with a fresh trace collection
//! per scope, applying every per-kind rule in place. The driver repeats
//! passes until a pass makes no replacement. Termination is by measure:
//! every accepted rewrite strictly decreases the lexicographic
//! (operation count, node count) complexity of the module, which the
//! driver checks per pass in debug builds.

pub mod expressions;
pub mod statements;

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::location::SourceLoc;
use crate::scopes::ScopeTree;
use crate::shapes::{TypeId, TypeShape};
use crate::trace::TraceCollection;
use crate::tree::{BinOp, CmpOp, NodeId, NodeKind, Tree};
use crate::trust::{PluginSnippets, TrustTable};
use crate::variables::{VarId, VariableKind};

/// Everything the optimizer is allowed to know beyond the tree itself.
/// Constructed by the embedder and threaded explicitly; there is no
/// global state.
pub struct OptimizeContext {
    pub module_name: String,
    pub trust: TrustTable,
    pub plugins: PluginSnippets,
    /// The module keeps its locals in a reachable dictionary (exotic
    /// frame access); local reads are never folded.
    pub locals_dict: bool,
    /// Drop assertion statements entirely, condition unevaluated.
    pub strip_asserts: bool,
}

impl OptimizeContext {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            trust: TrustTable::new(),
            plugins: PluginSnippets::default(),
            locals_dict: false,
            strip_asserts: false,
        }
    }
}

/// Category of an accepted replacement, for logging and statistics.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChangeTag {
    NewConstant,
    NewRaise,
    NewExpression,
    NewStatements,
}

impl ChangeTag {
    pub fn name(self) -> &'static str {
        match self {
            ChangeTag::NewConstant => "new-constant",
            ChangeTag::NewRaise => "new-raise",
            ChangeTag::NewExpression => "new-expression",
            ChangeTag::NewStatements => "new-statements",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct OptimizeStats {
    pub passes: u32,
    pub replacements: u32,
}

/// Per-pass working state. `col` is the trace collection of the scope
/// currently being walked; entering a nested function swaps in a fresh
/// one. `reads` counts variable reads over the current scope body,
/// scanned once per pass for dead-store decisions.
pub(crate) struct Opt<'a> {
    pub tree: &'a mut Tree,
    pub scopes: &'a mut ScopeTree,
    pub ctx: &'a OptimizeContext,
    pub col: TraceCollection,
    pub reads: HashMap<VarId, u32>,
    pub replacements: u32,
}

impl<'a> Opt<'a> {
    /// Accounting for one accepted replacement.
    pub(crate) fn note(&mut self, loc: SourceLoc, tag: ChangeTag, what: &str) {
        debug!("{}: {} at {}: {}", self.ctx.module_name, tag.name(), loc, what);
        self.replacements += 1;
    }

    /// Runs `f` against a forked trace collection and hands back the
    /// branch state, restoring the pre-fork state on `self`.
    pub(crate) fn fork_run(&mut self, f: impl FnOnce(&mut Self)) -> TraceCollection {
        let branch = self.col.fork();
        let saved = std::mem::replace(&mut self.col, branch);
        f(self);
        std::mem::replace(&mut self.col, saved)
    }
}

/// Optimizes the module rooted at `root` to a fixpoint.
pub fn optimize_module(
    tree: &mut Tree,
    root: NodeId,
    scopes: &mut ScopeTree,
    ctx: &OptimizeContext,
) -> OptimizeStats {
    let mut stats = OptimizeStats::default();
    loop {
        #[cfg(debug_assertions)]
        let before = tree.complexity(root);

        let replaced = run_pass(tree, root, scopes, ctx);
        stats.passes += 1;
        stats.replacements += replaced;

        #[cfg(debug_assertions)]
        if replaced > 0 {
            let after = tree.complexity(root);
            debug_assert!(
                after < before,
                "pass made {} replacements without decreasing complexity: {:?} -> {:?}",
                replaced,
                before,
                after
            );
        }

        if replaced == 0 {
            debug!(
                "{}: optimized to fixpoint in {} passes, {} replacements",
                ctx.module_name, stats.passes, stats.replacements
            );
            return stats;
        }
    }
}

fn run_pass(tree: &mut Tree, root: NodeId, scopes: &mut ScopeTree, ctx: &OptimizeContext) -> u32 {
    let body = match tree.kind(root) {
        NodeKind::ModuleBody { body, .. } => *body,
        _ => tree.defect(Some(root), "optimizer root is not a module body"),
    };
    let mut o = Opt {
        reads: scan_variable_reads(tree, body),
        tree,
        scopes,
        ctx,
        col: TraceCollection::new(),
        replacements: 0,
    };
    statements::optimize_suite(&mut o, body);
    o.replacements
}

/// The statically known type shape of an expression at this point.
pub(crate) fn expr_shape(o: &Opt, id: NodeId) -> TypeShape {
    match o.tree.kind(id) {
        NodeKind::Constant { value } => TypeShape::exact(value.type_id()),
        NodeKind::VariableRef { var } => match o.col.known_value(*var) {
            Some(value) => TypeShape::exact(value.type_id()),
            None => TypeShape::unknown(),
        },
        NodeKind::MakeTuple { .. } => TypeShape::exact(TypeId::Tuple),
        NodeKind::MakeList { .. } => TypeShape::exact(TypeId::List),
        NodeKind::MakeSet { .. } => TypeShape::exact(TypeId::Set),
        NodeKind::MakeDict { .. } => TypeShape::exact(TypeId::Dict),
        NodeKind::Comparison { .. } | NodeKind::NotOp { .. } => TypeShape::exact(TypeId::Bool),
        NodeKind::SideEffects { expression, .. } => expr_shape(o, *expression),
        NodeKind::Conditional {
            then_value,
            else_value,
            ..
        } => {
            let a = expr_shape(o, *then_value);
            if a.is_known() && a == expr_shape(o, *else_value) {
                a
            } else {
                TypeShape::unknown()
            }
        }
        NodeKind::SliceRef { object, .. } => {
            let inner = expr_shape(o, *object);
            if inner.has_shape_slice().is_yes() {
                inner
            } else {
                TypeShape::unknown()
            }
        }
        NodeKind::BinaryOp { op, left, right } => binop_result_shape(
            *op,
            expr_shape(o, *left),
            expr_shape(o, *right),
        ),
        _ => TypeShape::unknown(),
    }
}

fn binop_result_shape(op: BinOp, left: TypeShape, right: TypeShape) -> TypeShape {
    let int_like = |s: TypeShape| matches!(s.exact, Some(TypeId::Bool | TypeId::Int));
    let numeric = |s: TypeShape| int_like(s) || s.exact == Some(TypeId::Float);
    match op {
        BinOp::TrueDiv if numeric(left) && numeric(right) => TypeShape::exact(TypeId::Float),
        BinOp::Pow => TypeShape::unknown(),
        _ if int_like(left) && int_like(right) => TypeShape::exact(TypeId::Int),
        _ if numeric(left) && numeric(right) => TypeShape::exact(TypeId::Float),
        _ => TypeShape::unknown(),
    }
}

/// Whether evaluating this expression can have any observable effect:
/// mutation, raising, or running unknowable code. Used to decide what a
/// discarding rewrite must retain.
pub(crate) fn may_have_side_effects(o: &Opt, id: NodeId) -> bool {
    match o.tree.kind(id) {
        NodeKind::Constant { .. } => false,
        NodeKind::RaiseExpression { .. } => true,
        NodeKind::VariableRef { var } => variable_read_may_raise(o, *var),
        NodeKind::MakeTuple { .. }
        | NodeKind::MakeList { .. }
        | NodeKind::MakeSet { .. }
        | NodeKind::MakeDict { .. }
        | NodeKind::DictPair { .. }
        | NodeKind::KeywordArg { .. }
        | NodeKind::SideEffects { .. } => o
            .tree
            .visitable_children(id)
            .iter()
            .any(|&c| may_have_side_effects(o, c)),
        NodeKind::NotOp { operand } => {
            !expr_shape(o, *operand).has_shape_bool().is_yes() || may_have_side_effects(o, *operand)
        }
        NodeKind::Comparison {
            op: CmpOp::Is | CmpOp::IsNot,
            left,
            right,
        } => may_have_side_effects(o, *left) || may_have_side_effects(o, *right),
        NodeKind::BoolOp { operands, .. } => operands.iter().any(|&c| {
            may_have_side_effects(o, c) || !expr_shape(o, c).has_shape_bool().is_yes()
        }),
        NodeKind::Conditional {
            condition,
            then_value,
            else_value,
        } => {
            may_have_side_effects(o, *condition)
                || !expr_shape(o, *condition).has_shape_bool().is_yes()
                || may_have_side_effects(o, *then_value)
                || may_have_side_effects(o, *else_value)
        }
        _ => true,
    }
}

/// Whether reading the variable can raise here (unbound name).
pub(crate) fn variable_read_may_raise(o: &Opt, var: VarId) -> bool {
    if o.ctx.locals_dict {
        return true;
    }
    let variable = o.scopes.variable(var);
    match variable.kind {
        // Module storage and captured storage can be unbound behind the
        // optimizer's back once control has escaped.
        VariableKind::ModuleVar | VariableKind::ClosureRef { .. } => {
            !o.col.proven_assigned(var) || o.col.control_escaped()
        }
        VariableKind::LocalVar | VariableKind::Parameter => {
            if variable.shared {
                !o.col.proven_assigned(var) || o.col.control_escaped()
            } else {
                !o.col.proven_assigned(var)
            }
        }
    }
}

pub(crate) fn is_raise(o: &Opt, id: NodeId) -> bool {
    matches!(o.tree.kind(id), NodeKind::RaiseExpression { .. })
}

/// Counts reads of each variable over a scope body. Nested function and
/// class bodies belong to other scopes and are skipped; their defaults
/// and base expressions evaluate here and are counted.
pub(crate) fn scan_variable_reads(tree: &Tree, root: NodeId) -> HashMap<VarId, u32> {
    let mut counts = HashMap::new();
    scan_reads_rec(tree, root, &mut counts);
    counts
}

fn scan_reads_rec(tree: &Tree, id: NodeId, counts: &mut HashMap<VarId, u32>) {
    match tree.kind(id) {
        // `del` observes bindingness, so it counts as a read for
        // dead-store purposes.
        NodeKind::VariableRef { var } | NodeKind::DelVariable { var } => {
            *counts.entry(*var).or_insert(0) += 1;
        }
        NodeKind::FunctionDef { defaults, .. } => {
            for &d in defaults {
                scan_reads_rec(tree, d, counts);
            }
        }
        NodeKind::ClassDef { bases, .. } => {
            for &b in bases {
                scan_reads_rec(tree, b, counts);
            }
        }
        other => {
            for child in other.children() {
                scan_reads_rec(tree, child, counts);
            }
        }
    }
}

/// Collects every variable a subtree can rebind or unbind, for loop
/// widening and exception-path degradation. Nested scope bodies are
/// skipped; rebinding through closures shows up as an escape instead.
pub(crate) fn scan_assigned_vars(tree: &Tree, id: NodeId, into: &mut BTreeSet<VarId>) {
    match tree.kind(id) {
        NodeKind::AssignVariable { var, .. } | NodeKind::DelVariable { var } => {
            into.insert(*var);
        }
        NodeKind::UnpackAssign { targets, .. } => {
            into.extend(targets.iter().copied());
        }
        NodeKind::ForLoop { target, .. } => {
            into.insert(*target);
        }
        NodeKind::ImportModule { target, .. } | NodeKind::ImportName { target, .. } => {
            into.insert(*target);
            return;
        }
        NodeKind::FunctionDef {
            target, defaults, ..
        } => {
            into.insert(*target);
            for &d in defaults {
                scan_assigned_vars(tree, d, into);
            }
            return;
        }
        NodeKind::ClassDef { target, bases, .. } => {
            into.insert(*target);
            for &b in bases {
                scan_assigned_vars(tree, b, into);
            }
            return;
        }
        _ => {}
    }
    for child in tree.visitable_children(id) {
        scan_assigned_vars(tree, child, into);
    }
}

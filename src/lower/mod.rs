//! Lowering: from an optimized tree to flat register-machine functions.
//!
//! Each function body becomes a linear operation list over numbered
//! temporaries. Reference ownership is explicit: every op that produces
//! an owned reference has a matching `Release` on every normal path, and
//! exception exits record which temporaries to release while unwinding.
//! Capability checks proven away by shapes are dropped via `checked`
//! flags. Resumable functions additionally carry the state machine
//! computed by [`resumable`].

pub mod resumable;

use std::collections::BTreeSet;

use log::debug;

use crate::constant::ConstantValue;
use crate::exceptions::ExceptionKind;
use crate::optimize::OptimizeContext;
use crate::scopes::{FunctionFlavor, ScopeId, ScopeTree};
use crate::shapes::{TypeId, TypeShape};
use crate::tree::{BinOp, BoolOpKind, CmpOp, NodeId, NodeKind, Tree, UnOp};
use crate::trust::DependencyEdge;
use crate::variables::{VarId, VariableKind};

use self::resumable::StateMachine;

/// Frame-local temporary slot. Slots start out cleared; releasing a
/// cleared slot is a no-op, which is what makes exception-exit release
/// lists safe at any point inside their region.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct Temp(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct Label(pub u32);

/// Whether a value reference carries its own reference count.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Ownership {
    Owned,
    Borrowed,
}

/// Ownership of the reference an expression node evaluates to. Constant
/// and variable reads borrow storage that outlives the expression;
/// everything else produces a fresh reference the consumer must release.
pub fn value_ownership(tree: &Tree, id: NodeId) -> Ownership {
    match tree.kind(id) {
        NodeKind::Constant { .. } | NodeKind::VariableRef { .. } => Ownership::Borrowed,
        NodeKind::SideEffects { expression, .. } => value_ownership(tree, *expression),
        _ => Ownership::Owned,
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum LowOp {
    LoadConst {
        dst: Temp,
        value: ConstantValue,
    },
    /// `checked` guards against an unbound name at runtime.
    LoadVar {
        dst: Temp,
        var: VarId,
        checked: bool,
    },
    StoreVar {
        var: VarId,
        src: Temp,
    },
    DeleteVar {
        var: VarId,
        checked: bool,
    },
    /// Stores a fresh owned reference to `src`'s value into `dst`,
    /// releasing whatever `dst` held before.
    Copy {
        dst: Temp,
        src: Temp,
    },
    BinaryOp {
        dst: Temp,
        op: BinOp,
        left: Temp,
        right: Temp,
    },
    UnaryOp {
        dst: Temp,
        op: UnOp,
        operand: Temp,
    },
    Compare {
        dst: Temp,
        op: CmpOp,
        left: Temp,
        right: Temp,
    },
    Not {
        dst: Temp,
        operand: Temp,
        checked: bool,
    },
    /// Converts to a machine flag, not an object reference.
    Truth {
        dst: Temp,
        operand: Temp,
        checked: bool,
    },
    BuildTuple {
        dst: Temp,
        elements: Vec<Temp>,
    },
    BuildList {
        dst: Temp,
        elements: Vec<Temp>,
    },
    BuildSet {
        dst: Temp,
        elements: Vec<Temp>,
    },
    /// Pairs are inserted in source order, key evaluated before value.
    BuildDict {
        dst: Temp,
        pairs: Vec<(Temp, Temp)>,
    },
    GetAttr {
        dst: Temp,
        object: Temp,
        name: String,
    },
    SetAttr {
        object: Temp,
        name: String,
        src: Temp,
    },
    DelAttr {
        object: Temp,
        name: String,
    },
    GetItem {
        dst: Temp,
        object: Temp,
        index: Temp,
        checked: bool,
    },
    SetItem {
        object: Temp,
        index: Temp,
        src: Temp,
    },
    DelItem {
        object: Temp,
        index: Temp,
    },
    GetSlice {
        dst: Temp,
        object: Temp,
        lower: Option<Temp>,
        upper: Option<Temp>,
    },
    /// Argument references are borrowed for the duration of the call.
    CallValue {
        dst: Temp,
        callee: Temp,
        args: Vec<Temp>,
        kwargs: Vec<(String, Temp)>,
    },
    MakeFunction {
        dst: Temp,
        function: usize,
        defaults: Vec<Temp>,
    },
    MakeClass {
        dst: Temp,
        function: usize,
        name: String,
        bases: Vec<Temp>,
    },
    ImportModule {
        dst: Temp,
        module: String,
    },
    ImportName {
        dst: Temp,
        module: String,
        name: String,
    },
    GetIter {
        dst: Temp,
        source: Temp,
        checked: bool,
    },
    /// Jumps to `done` when the iterator is exhausted.
    IterNext {
        dst: Temp,
        iter: Temp,
        done: Label,
    },
    UnpackSequence {
        dsts: Vec<Temp>,
        src: Temp,
        count: usize,
    },
    Jump {
        target: Label,
    },
    JumpIfTrue {
        cond: Temp,
        target: Label,
    },
    JumpIfFalse {
        cond: Temp,
        target: Label,
    },
    Target {
        label: Label,
    },
    /// Handler dispatch: falls through when the in-flight exception
    /// matches `kind`, jumps to `miss` otherwise.
    MatchException {
        kind: ExceptionKind,
        miss: Label,
    },
    /// Releases the reference in `src` and clears the slot.
    Release {
        src: Temp,
    },
    Raise {
        kind: ExceptionKind,
        value: Option<Temp>,
        message: String,
    },
    /// Re-raises the in-flight exception.
    Reraise,
    /// Frame teardown releases every still-set temporary slot.
    Return {
        src: Temp,
    },
    /// Suspension point of a resumable function: parks the frame in
    /// `state`, hands `yielded` out, resumes with the sent value in
    /// `resume_dst`.
    Suspend {
        state: u32,
        yielded: Temp,
        resume_dst: Temp,
    },
    /// `yield from` / `await` delegation, one suspension state for the
    /// whole sub-iteration.
    Delegate {
        dst: Temp,
        source: Temp,
        state: u32,
    },
}

impl LowOp {
    /// Whether the op can transfer to an exception exit at runtime.
    pub fn may_raise(&self) -> bool {
        match self {
            LowOp::LoadVar { checked, .. }
            | LowOp::DeleteVar { checked, .. }
            | LowOp::Not { checked, .. }
            | LowOp::Truth { checked, .. }
            | LowOp::GetItem { checked, .. }
            | LowOp::GetIter { checked, .. } => *checked,
            LowOp::Compare { op, .. } => !matches!(op, CmpOp::Is | CmpOp::IsNot),
            LowOp::BinaryOp { .. }
            | LowOp::UnaryOp { .. }
            | LowOp::GetAttr { .. }
            | LowOp::SetAttr { .. }
            | LowOp::DelAttr { .. }
            | LowOp::SetItem { .. }
            | LowOp::DelItem { .. }
            | LowOp::GetSlice { .. }
            | LowOp::CallValue { .. }
            | LowOp::MakeClass { .. }
            | LowOp::ImportModule { .. }
            | LowOp::ImportName { .. }
            | LowOp::IterNext { .. }
            | LowOp::UnpackSequence { .. }
            | LowOp::Raise { .. }
            | LowOp::Reraise
            | LowOp::Suspend { .. }
            | LowOp::Delegate { .. } => true,
            LowOp::LoadConst { .. }
            | LowOp::StoreVar { .. }
            | LowOp::Copy { .. }
            | LowOp::BuildTuple { .. }
            | LowOp::BuildList { .. }
            | LowOp::BuildSet { .. }
            | LowOp::BuildDict { .. }
            | LowOp::MakeFunction { .. }
            | LowOp::Jump { .. }
            | LowOp::JumpIfTrue { .. }
            | LowOp::JumpIfFalse { .. }
            | LowOp::Target { .. }
            | LowOp::MatchException { .. }
            | LowOp::Release { .. }
            | LowOp::Return { .. } => false,
        }
    }
}

/// Where a raising op inside `start..end` transfers to.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ExitAction {
    /// Attach position info to the in-flight exception and unwind the
    /// frame. Teardown releases the listed temporaries.
    Propagate,
    /// Jump to an in-frame handler dispatch point.
    Handler(Label),
}

/// One exception-exit region. Inner regions are listed before the outer
/// ones enclosing them; the applicable exit for an op index is the first
/// listed exit covering it, with the function-level propagate exit last.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ExceptionExit {
    pub start: usize,
    pub end: usize,
    pub label: Label,
    /// Owned temporaries allocated inside the region. Cleared slots
    /// release as no-ops, so the list is valid at every covered op.
    pub releases: Vec<Temp>,
    pub action: ExitAction,
}

#[derive(Debug)]
pub struct LoweredFunction {
    pub name: String,
    pub scope: ScopeId,
    pub flavor: FunctionFlavor,
    pub params: Vec<VarId>,
    /// Shared storage of this scope, allocated as heap cells so closures
    /// outlive the frame.
    pub cells: Vec<VarId>,
    /// Captured storage forwarded from enclosing frames, in registration
    /// order.
    pub closure: Vec<VarId>,
    /// The frame materializes position info lazily and at most once; a
    /// function with no raising op skips the machinery entirely.
    pub needs_traceback: bool,
    pub temp_count: u32,
    pub ops: Vec<LowOp>,
    pub exits: Vec<ExceptionExit>,
    pub state_machine: Option<StateMachine>,
}

#[derive(Debug)]
pub struct LoweredModule {
    pub name: String,
    pub functions: Vec<LoweredFunction>,
    /// Index of the module body in `functions`.
    pub entry: usize,
    /// Opaque plugin snippets emitted verbatim around the module scope.
    pub pre_scope: Vec<String>,
    pub post_scope: Vec<String>,
    pub dependencies: Vec<DependencyEdge>,
}

/// Lowers an optimized module tree. The tree is not mutated; lowering a
/// tree that still contains foldable work is fine, just slower output.
pub fn lower_module(
    tree: &Tree,
    root: NodeId,
    scopes: &ScopeTree,
    ctx: &OptimizeContext,
) -> LoweredModule {
    let (scope, body) = match tree.kind(root) {
        NodeKind::ModuleBody { scope, body } => (*scope, *body),
        _ => tree.defect(Some(root), "lowering root is not a module body"),
    };

    let mut lo = Lowerer {
        tree,
        scopes,
        ctx,
        functions: Vec::new(),
        imports: Vec::new(),
    };
    let entry = lo.lower_function("<module>", scope, FunctionFlavor::Plain, body);

    let mut dependencies = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for imported in lo.imports.iter().chain(ctx.plugins.implicit_deps.iter()) {
        if seen.insert(imported) {
            dependencies.push(DependencyEdge {
                importer: ctx.module_name.clone(),
                imported: imported.clone(),
            });
        }
    }

    debug!(
        "{}: lowered {} functions, {} dependencies",
        ctx.module_name,
        lo.functions.len(),
        dependencies.len()
    );
    LoweredModule {
        name: ctx.module_name.clone(),
        functions: lo.functions,
        entry,
        pre_scope: ctx.plugins.pre_scope.clone(),
        post_scope: ctx.plugins.post_scope.clone(),
        dependencies,
    }
}

/// An evaluated expression: the temp holding it and whether the emitted
/// code owns the reference.
#[derive(Clone, Copy, Debug)]
struct Value {
    temp: Temp,
    owned: bool,
}

struct LoopLabels {
    continue_to: Label,
    break_to: Label,
    /// Finally-stack height at loop entry; a break or continue runs the
    /// finally bodies stacked above it before jumping.
    finally_depth: usize,
}

struct Region {
    start: usize,
    watermark: usize,
    label: Label,
    action: ExitAction,
}

/// Per-function emission state.
struct FnState {
    ops: Vec<LowOp>,
    exits: Vec<ExceptionExit>,
    regions: Vec<Region>,
    /// Append-only log of owned temporaries, for region release lists.
    owned_log: Vec<Temp>,
    next_temp: u32,
    next_label: u32,
    next_state: u32,
    loops: Vec<LoopLabels>,
    /// Finally bodies of the enclosing `try/finally` statements, outermost
    /// first. Early exits lower the bodies they jump across.
    finallies: Vec<NodeId>,
    /// Parameters the body deletes lose their bound-at-entry guarantee.
    deleted: BTreeSet<VarId>,
}

impl FnState {
    fn new() -> Self {
        Self {
            ops: Vec::new(),
            exits: Vec::new(),
            regions: Vec::new(),
            owned_log: Vec::new(),
            next_temp: 0,
            next_label: 0,
            next_state: 0,
            loops: Vec::new(),
            finallies: Vec::new(),
            deleted: BTreeSet::new(),
        }
    }

    fn temp(&mut self) -> Temp {
        let t = Temp(self.next_temp);
        self.next_temp += 1;
        t
    }

    fn owned(&mut self) -> Value {
        let temp = self.temp();
        self.owned_log.push(temp);
        Value { temp, owned: true }
    }

    fn label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    fn emit(&mut self, op: LowOp) {
        self.ops.push(op);
    }

    fn release(&mut self, value: Value) {
        if value.owned {
            self.emit(LowOp::Release { src: value.temp });
        }
    }

    fn push_region(&mut self, label: Label, action: ExitAction) {
        self.regions.push(Region {
            start: self.ops.len(),
            watermark: self.owned_log.len(),
            label,
            action,
        });
    }

    fn pop_region(&mut self) {
        let region = match self.regions.pop() {
            Some(region) => region,
            None => panic!("pyrite internal defect: exception region underflow"),
        };
        self.exits.push(ExceptionExit {
            start: region.start,
            end: self.ops.len(),
            label: region.label,
            releases: self.owned_log[region.watermark..].to_vec(),
            action: region.action,
        });
    }
}

struct Lowerer<'a> {
    tree: &'a Tree,
    scopes: &'a ScopeTree,
    ctx: &'a OptimizeContext,
    functions: Vec<LoweredFunction>,
    imports: Vec<String>,
}

impl<'a> Lowerer<'a> {
    fn lower_function(
        &mut self,
        name: &str,
        scope: ScopeId,
        flavor: FunctionFlavor,
        body: NodeId,
    ) -> usize {
        let mut st = FnState::new();
        collect_deleted(self.tree, body, &mut st.deleted);

        self.stmt(&mut st, body);

        // Implicit return; unreachable when every path already returned.
        let none = st.temp();
        st.emit(LowOp::LoadConst {
            dst: none,
            value: ConstantValue::None,
        });
        st.emit(LowOp::Return { src: none });

        let exit_label = st.label();
        st.exits.push(ExceptionExit {
            start: 0,
            end: st.ops.len(),
            label: exit_label,
            releases: st.owned_log.clone(),
            action: ExitAction::Propagate,
        });

        let cells: Vec<VarId> = self
            .scopes
            .scope_locals(scope)
            .into_iter()
            .filter(|&var| {
                let variable = self.scopes.variable(var);
                variable.shared
                    && matches!(
                        variable.kind,
                        VariableKind::LocalVar | VariableKind::Parameter
                    )
            })
            .collect();
        let needs_traceback = st.ops.iter().any(LowOp::may_raise);
        let state_machine = if flavor.is_resumable() {
            Some(resumable::analyze(self.tree, self.scopes, scope, body))
        } else {
            None
        };

        debug!(
            "{}: lowered {} ({} ops, {} temps, {} cells, traceback {})",
            self.ctx.module_name,
            name,
            st.ops.len(),
            st.next_temp,
            cells.len(),
            needs_traceback
        );
        self.functions.push(LoweredFunction {
            name: name.to_string(),
            scope,
            flavor,
            params: self.scopes.parameters(scope),
            cells,
            closure: self.scopes.scope(scope).closure_refs.clone(),
            needs_traceback,
            temp_count: st.next_temp,
            ops: st.ops,
            exits: st.exits,
            state_machine,
        });
        self.functions.len() - 1
    }

    /// Lowers the finally bodies an early exit jumps across, innermost
    /// first. Each body is emitted with only the outer entries stacked,
    /// so an early exit inside a finally cannot re-enter it.
    fn run_finallies(&mut self, st: &mut FnState, depth: usize) {
        let crossed = st.finallies.split_off(depth);
        for &body in crossed.iter().rev() {
            self.stmt(st, body);
        }
        st.finallies.extend(crossed);
    }

    /// Whether a runtime bound-check is needed to read `var` here.
    fn load_checked(&self, var: VarId) -> bool {
        if self.ctx.locals_dict {
            return true;
        }
        match self.scopes.variable(var).kind {
            VariableKind::Parameter => false,
            _ => true,
        }
    }

    /// Emits a truth test of `value`, releasing it. The result is a
    /// machine flag temp, not a reference.
    fn truth(&mut self, st: &mut FnState, value: Value, node: NodeId) -> Temp {
        let flag = st.temp();
        st.emit(LowOp::Truth {
            dst: flag,
            operand: value.temp,
            checked: !static_shape(self.tree, node).has_shape_bool().is_yes(),
        });
        st.release(value);
        flag
    }

    fn expr(&mut self, st: &mut FnState, id: NodeId) -> Value {
        let tree = self.tree;
        match tree.kind(id) {
            NodeKind::Constant { value } => {
                let dst = st.temp();
                st.emit(LowOp::LoadConst {
                    dst,
                    value: value.clone(),
                });
                Value { temp: dst, owned: false }
            }
            NodeKind::VariableRef { var } => {
                let checked = self.load_checked(*var) || st.deleted.contains(var);
                let dst = st.temp();
                st.emit(LowOp::LoadVar {
                    dst,
                    var: *var,
                    checked,
                });
                Value { temp: dst, owned: false }
            }
            NodeKind::BinaryOp { op, left, right } => {
                let l = self.expr(st, *left);
                let r = self.expr(st, *right);
                let dst = st.owned();
                st.emit(LowOp::BinaryOp {
                    dst: dst.temp,
                    op: *op,
                    left: l.temp,
                    right: r.temp,
                });
                st.release(r);
                st.release(l);
                dst
            }
            NodeKind::UnaryOp { op, operand } => {
                let v = self.expr(st, *operand);
                let dst = st.owned();
                st.emit(LowOp::UnaryOp {
                    dst: dst.temp,
                    op: *op,
                    operand: v.temp,
                });
                st.release(v);
                dst
            }
            NodeKind::Comparison { op, left, right } => {
                let l = self.expr(st, *left);
                let r = self.expr(st, *right);
                let dst = st.owned();
                st.emit(LowOp::Compare {
                    dst: dst.temp,
                    op: *op,
                    left: l.temp,
                    right: r.temp,
                });
                st.release(r);
                st.release(l);
                dst
            }
            NodeKind::NotOp { operand } => {
                let v = self.expr(st, *operand);
                let dst = st.owned();
                st.emit(LowOp::Not {
                    dst: dst.temp,
                    operand: v.temp,
                    checked: !static_shape(tree, *operand).has_shape_bool().is_yes(),
                });
                st.release(v);
                dst
            }
            NodeKind::BoolOp { op, operands } => {
                let end = st.label();
                let dst = st.owned();
                for (i, &operand) in operands.iter().enumerate() {
                    let v = self.expr(st, operand);
                    st.emit(LowOp::Copy {
                        dst: dst.temp,
                        src: v.temp,
                    });
                    st.release(v);
                    if i + 1 < operands.len() {
                        let flag = st.temp();
                        st.emit(LowOp::Truth {
                            dst: flag,
                            operand: dst.temp,
                            checked: !static_shape(tree, operand).has_shape_bool().is_yes(),
                        });
                        match op {
                            BoolOpKind::And => st.emit(LowOp::JumpIfFalse {
                                cond: flag,
                                target: end,
                            }),
                            BoolOpKind::Or => st.emit(LowOp::JumpIfTrue {
                                cond: flag,
                                target: end,
                            }),
                        }
                    }
                }
                st.emit(LowOp::Target { label: end });
                dst
            }
            NodeKind::Conditional {
                condition,
                then_value,
                else_value,
            } => {
                let cond = self.expr(st, *condition);
                let flag = self.truth(st, cond, *condition);
                let else_l = st.label();
                let end = st.label();
                st.emit(LowOp::JumpIfFalse {
                    cond: flag,
                    target: else_l,
                });
                let dst = st.owned();
                let v = self.expr(st, *then_value);
                st.emit(LowOp::Copy {
                    dst: dst.temp,
                    src: v.temp,
                });
                st.release(v);
                st.emit(LowOp::Jump { target: end });
                st.emit(LowOp::Target { label: else_l });
                let v = self.expr(st, *else_value);
                st.emit(LowOp::Copy {
                    dst: dst.temp,
                    src: v.temp,
                });
                st.release(v);
                st.emit(LowOp::Target { label: end });
                dst
            }
            NodeKind::Call { callee, args } => {
                let c = self.expr(st, *callee);
                let mut positional = Vec::new();
                let mut keywords: Vec<(String, Value)> = Vec::new();
                for &arg in args {
                    match tree.kind(arg) {
                        NodeKind::KeywordArg { name, value } => {
                            let v = self.expr(st, *value);
                            keywords.push((name.clone(), v));
                        }
                        _ => positional.push(self.expr(st, arg)),
                    }
                }
                let dst = st.owned();
                st.emit(LowOp::CallValue {
                    dst: dst.temp,
                    callee: c.temp,
                    args: positional.iter().map(|v| v.temp).collect(),
                    kwargs: keywords.iter().map(|(n, v)| (n.clone(), v.temp)).collect(),
                });
                for (_, v) in keywords.into_iter().rev() {
                    st.release(v);
                }
                for v in positional.into_iter().rev() {
                    st.release(v);
                }
                st.release(c);
                dst
            }
            NodeKind::AttributeRef { object, name } => {
                let obj = self.expr(st, *object);
                let dst = st.owned();
                st.emit(LowOp::GetAttr {
                    dst: dst.temp,
                    object: obj.temp,
                    name: name.clone(),
                });
                st.release(obj);
                dst
            }
            NodeKind::Subscript { object, index } => {
                let obj = self.expr(st, *object);
                let idx = self.expr(st, *index);
                let dst = st.owned();
                st.emit(LowOp::GetItem {
                    dst: dst.temp,
                    object: obj.temp,
                    index: idx.temp,
                    checked: !static_shape(tree, *object).has_shape_index().is_yes(),
                });
                st.release(idx);
                st.release(obj);
                dst
            }
            NodeKind::SliceRef {
                object,
                lower,
                upper,
            } => {
                let obj = self.expr(st, *object);
                let lo = lower.map(|bound| self.expr(st, bound));
                let hi = upper.map(|bound| self.expr(st, bound));
                let dst = st.owned();
                st.emit(LowOp::GetSlice {
                    dst: dst.temp,
                    object: obj.temp,
                    lower: lo.map(|v| v.temp),
                    upper: hi.map(|v| v.temp),
                });
                if let Some(v) = hi {
                    st.release(v);
                }
                if let Some(v) = lo {
                    st.release(v);
                }
                st.release(obj);
                dst
            }
            NodeKind::MakeTuple { elements } => self.build(st, elements, |dst, elements| {
                LowOp::BuildTuple { dst, elements }
            }),
            NodeKind::MakeList { elements } => self.build(st, elements, |dst, elements| {
                LowOp::BuildList { dst, elements }
            }),
            NodeKind::MakeSet { elements } => self.build(st, elements, |dst, elements| {
                LowOp::BuildSet { dst, elements }
            }),
            NodeKind::MakeDict { pairs } => {
                let mut entries: Vec<(Value, Value)> = Vec::new();
                for &pair in pairs {
                    match tree.kind(pair) {
                        NodeKind::DictPair { key, value } => {
                            let k = self.expr(st, *key);
                            let v = self.expr(st, *value);
                            entries.push((k, v));
                        }
                        _ => tree.defect(Some(pair), "dict literal entry is not a pair"),
                    }
                }
                let dst = st.owned();
                st.emit(LowOp::BuildDict {
                    dst: dst.temp,
                    pairs: entries.iter().map(|(k, v)| (k.temp, v.temp)).collect(),
                });
                for (k, v) in entries.into_iter().rev() {
                    st.release(v);
                    st.release(k);
                }
                dst
            }
            NodeKind::Yield { value } => {
                let v = match value {
                    Some(value) => self.expr(st, *value),
                    None => {
                        let dst = st.temp();
                        st.emit(LowOp::LoadConst {
                            dst,
                            value: ConstantValue::None,
                        });
                        Value { temp: dst, owned: false }
                    }
                };
                st.next_state += 1;
                let dst = st.owned();
                st.emit(LowOp::Suspend {
                    state: st.next_state,
                    yielded: v.temp,
                    resume_dst: dst.temp,
                });
                st.release(v);
                dst
            }
            NodeKind::YieldFrom { source } => {
                let v = self.expr(st, *source);
                st.next_state += 1;
                let dst = st.owned();
                st.emit(LowOp::Delegate {
                    dst: dst.temp,
                    source: v.temp,
                    state: st.next_state,
                });
                st.release(v);
                dst
            }
            NodeKind::Await { awaited } => {
                let v = self.expr(st, *awaited);
                st.next_state += 1;
                let dst = st.owned();
                st.emit(LowOp::Delegate {
                    dst: dst.temp,
                    source: v.temp,
                    state: st.next_state,
                });
                st.release(v);
                dst
            }
            NodeKind::SideEffects {
                side_effects,
                expression,
            } => {
                for &effect in side_effects {
                    let v = self.expr(st, effect);
                    st.release(v);
                }
                self.expr(st, *expression)
            }
            NodeKind::RaiseExpression { kind, message } => {
                st.emit(LowOp::Raise {
                    kind: *kind,
                    value: None,
                    message: message.clone(),
                });
                // Unreachable result slot keeps the emitter uniform.
                let dst = st.temp();
                Value { temp: dst, owned: false }
            }
            NodeKind::KeywordArg { .. } => {
                tree.defect(Some(id), "keyword argument outside a call")
            }
            NodeKind::DictPair { .. } => tree.defect(Some(id), "dict pair outside a dict literal"),
            _ => tree.defect(Some(id), "statement kind in expression position"),
        }
    }

    fn build(
        &mut self,
        st: &mut FnState,
        elements: &[NodeId],
        make: impl FnOnce(Temp, Vec<Temp>) -> LowOp,
    ) -> Value {
        let values: Vec<Value> = elements.iter().map(|&e| self.expr(st, e)).collect();
        let dst = st.owned();
        st.emit(make(dst.temp, values.iter().map(|v| v.temp).collect()));
        for v in values.into_iter().rev() {
            st.release(v);
        }
        dst
    }

    fn stmt(&mut self, st: &mut FnState, id: NodeId) {
        let tree = self.tree;
        match tree.kind(id) {
            NodeKind::PassStatement => {}
            NodeKind::Suite { statements } => {
                for &s in statements {
                    self.stmt(st, s);
                }
            }
            NodeKind::ExpressionStatement { expression } => {
                let v = self.expr(st, *expression);
                st.release(v);
            }
            NodeKind::AssignVariable { var, source } => {
                let v = self.expr(st, *source);
                st.emit(LowOp::StoreVar {
                    var: *var,
                    src: v.temp,
                });
                st.release(v);
            }
            NodeKind::UnpackAssign { source, targets } => {
                let v = self.expr(st, *source);
                let dsts: Vec<Value> = targets.iter().map(|_| st.owned()).collect();
                st.emit(LowOp::UnpackSequence {
                    dsts: dsts.iter().map(|d| d.temp).collect(),
                    src: v.temp,
                    count: targets.len(),
                });
                for (&target, dst) in targets.iter().zip(dsts) {
                    st.emit(LowOp::StoreVar {
                        var: target,
                        src: dst.temp,
                    });
                    st.release(dst);
                }
                st.release(v);
            }
            NodeKind::AttributeAssign {
                source,
                object,
                name,
            } => {
                let src = self.expr(st, *source);
                let obj = self.expr(st, *object);
                st.emit(LowOp::SetAttr {
                    object: obj.temp,
                    name: name.clone(),
                    src: src.temp,
                });
                st.release(obj);
                st.release(src);
            }
            NodeKind::AttributeDel { object, name } => {
                let obj = self.expr(st, *object);
                st.emit(LowOp::DelAttr {
                    object: obj.temp,
                    name: name.clone(),
                });
                st.release(obj);
            }
            NodeKind::SubscriptAssign {
                source,
                object,
                index,
            } => {
                let src = self.expr(st, *source);
                let obj = self.expr(st, *object);
                let idx = self.expr(st, *index);
                st.emit(LowOp::SetItem {
                    object: obj.temp,
                    index: idx.temp,
                    src: src.temp,
                });
                st.release(idx);
                st.release(obj);
                st.release(src);
            }
            NodeKind::SubscriptDel { object, index } => {
                let obj = self.expr(st, *object);
                let idx = self.expr(st, *index);
                st.emit(LowOp::DelItem {
                    object: obj.temp,
                    index: idx.temp,
                });
                st.release(idx);
                st.release(obj);
            }
            NodeKind::DelVariable { var } => {
                st.emit(LowOp::DeleteVar {
                    var: *var,
                    checked: true,
                });
            }
            NodeKind::IfStatement {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.expr(st, *condition);
                let flag = self.truth(st, cond, *condition);
                let end = st.label();
                match else_branch {
                    Some(else_branch) => {
                        let else_l = st.label();
                        st.emit(LowOp::JumpIfFalse {
                            cond: flag,
                            target: else_l,
                        });
                        self.stmt(st, *then_branch);
                        st.emit(LowOp::Jump { target: end });
                        st.emit(LowOp::Target { label: else_l });
                        self.stmt(st, *else_branch);
                    }
                    None => {
                        st.emit(LowOp::JumpIfFalse {
                            cond: flag,
                            target: end,
                        });
                        self.stmt(st, *then_branch);
                    }
                }
                st.emit(LowOp::Target { label: end });
            }
            NodeKind::WhileLoop { condition, body } => {
                let start = st.label();
                let end = st.label();
                st.emit(LowOp::Target { label: start });
                let cond = self.expr(st, *condition);
                let flag = self.truth(st, cond, *condition);
                st.emit(LowOp::JumpIfFalse {
                    cond: flag,
                    target: end,
                });
                st.loops.push(LoopLabels {
                    continue_to: start,
                    break_to: end,
                    finally_depth: st.finallies.len(),
                });
                self.stmt(st, *body);
                st.loops.pop();
                st.emit(LowOp::Jump { target: start });
                st.emit(LowOp::Target { label: end });
            }
            NodeKind::ForLoop {
                iterable,
                target,
                body,
            } => {
                let v = self.expr(st, *iterable);
                let iter = st.owned();
                st.emit(LowOp::GetIter {
                    dst: iter.temp,
                    source: v.temp,
                    checked: !static_shape(tree, *iterable).has_shape_iter().is_yes(),
                });
                st.release(v);
                let start = st.label();
                let end = st.label();
                st.emit(LowOp::Target { label: start });
                let item = st.owned();
                st.emit(LowOp::IterNext {
                    dst: item.temp,
                    iter: iter.temp,
                    done: end,
                });
                st.emit(LowOp::StoreVar {
                    var: *target,
                    src: item.temp,
                });
                st.release(item);
                st.loops.push(LoopLabels {
                    continue_to: start,
                    break_to: end,
                    finally_depth: st.finallies.len(),
                });
                self.stmt(st, *body);
                st.loops.pop();
                st.emit(LowOp::Jump { target: start });
                st.emit(LowOp::Target { label: end });
                st.release(iter);
            }
            NodeKind::BreakLoop => {
                let (target, depth) = match st.loops.last() {
                    Some(labels) => (labels.break_to, labels.finally_depth),
                    None => tree.defect(Some(id), "break outside a loop"),
                };
                self.run_finallies(st, depth);
                st.emit(LowOp::Jump { target });
            }
            NodeKind::ContinueLoop => {
                let (target, depth) = match st.loops.last() {
                    Some(labels) => (labels.continue_to, labels.finally_depth),
                    None => tree.defect(Some(id), "continue outside a loop"),
                };
                self.run_finallies(st, depth);
                st.emit(LowOp::Jump { target });
            }
            NodeKind::ReturnStatement { value } => {
                let v = match value {
                    Some(value) => self.expr(st, *value),
                    None => {
                        let dst = st.temp();
                        st.emit(LowOp::LoadConst {
                            dst,
                            value: ConstantValue::None,
                        });
                        Value { temp: dst, owned: false }
                    }
                };
                // The value is evaluated before any crossed finally runs.
                self.run_finallies(st, 0);
                st.emit(LowOp::Return { src: v.temp });
            }
            NodeKind::RaiseStatement { value, kind, message } => match value {
                Some(value) => {
                    let v = self.expr(st, *value);
                    st.emit(LowOp::Raise {
                        kind: kind.unwrap_or(ExceptionKind::Any),
                        value: Some(v.temp),
                        message: message.clone(),
                    });
                }
                None => match kind {
                    Some(kind) => st.emit(LowOp::Raise {
                        kind: *kind,
                        value: None,
                        message: message.clone(),
                    }),
                    None => st.emit(LowOp::Reraise),
                },
            },
            NodeKind::TryExcept { body, handlers } => {
                let handler_l = st.label();
                let done = st.label();
                st.push_region(handler_l, ExitAction::Handler(handler_l));
                self.stmt(st, *body);
                st.pop_region();
                st.emit(LowOp::Jump { target: done });
                st.emit(LowOp::Target { label: handler_l });
                let mut open_ended = false;
                for &handler in handlers {
                    match tree.kind(handler) {
                        NodeKind::ExceptHandler { kind, body } => match kind {
                            Some(kind) => {
                                let miss = st.label();
                                st.emit(LowOp::MatchException { kind: *kind, miss });
                                self.stmt(st, *body);
                                st.emit(LowOp::Jump { target: done });
                                st.emit(LowOp::Target { label: miss });
                                open_ended = true;
                            }
                            None => {
                                self.stmt(st, *body);
                                st.emit(LowOp::Jump { target: done });
                                open_ended = false;
                            }
                        },
                        _ => tree.defect(Some(handler), "try handler is not an except clause"),
                    }
                }
                if open_ended || handlers.is_empty() {
                    st.emit(LowOp::Reraise);
                }
                st.emit(LowOp::Target { label: done });
            }
            NodeKind::ExceptHandler { .. } => {
                tree.defect(Some(id), "except clause outside a try statement")
            }
            NodeKind::TryFinally { body, final_body } => {
                let unwind = st.label();
                let done = st.label();
                st.push_region(unwind, ExitAction::Handler(unwind));
                st.finallies.push(*final_body);
                self.stmt(st, *body);
                st.finallies.pop();
                st.pop_region();
                // The final body is lowered twice: once on the normal
                // path, once on the exception path before re-raising.
                self.stmt(st, *final_body);
                st.emit(LowOp::Jump { target: done });
                st.emit(LowOp::Target { label: unwind });
                self.stmt(st, *final_body);
                st.emit(LowOp::Reraise);
                st.emit(LowOp::Target { label: done });
            }
            NodeKind::AssertStatement { condition, message } => {
                if self.ctx.strip_asserts {
                    return;
                }
                let cond = self.expr(st, *condition);
                let flag = self.truth(st, cond, *condition);
                let ok = st.label();
                st.emit(LowOp::JumpIfTrue {
                    cond: flag,
                    target: ok,
                });
                match message {
                    Some(message) => {
                        let v = self.expr(st, *message);
                        st.emit(LowOp::Raise {
                            kind: ExceptionKind::AssertionError,
                            value: Some(v.temp),
                            message: String::new(),
                        });
                    }
                    None => st.emit(LowOp::Raise {
                        kind: ExceptionKind::AssertionError,
                        value: None,
                        message: String::new(),
                    }),
                }
                st.emit(LowOp::Target { label: ok });
            }
            NodeKind::ImportModule { module, target } => {
                self.imports.push(module.clone());
                let dst = st.owned();
                st.emit(LowOp::ImportModule {
                    dst: dst.temp,
                    module: module.clone(),
                });
                st.emit(LowOp::StoreVar {
                    var: *target,
                    src: dst.temp,
                });
                st.release(dst);
            }
            NodeKind::ImportName {
                module,
                name,
                target,
            } => {
                self.imports.push(module.clone());
                let dst = st.owned();
                st.emit(LowOp::ImportName {
                    dst: dst.temp,
                    module: module.clone(),
                    name: name.clone(),
                });
                st.emit(LowOp::StoreVar {
                    var: *target,
                    src: dst.temp,
                });
                st.release(dst);
            }
            NodeKind::FunctionDef {
                name,
                scope,
                flavor,
                target,
                defaults,
                body,
            } => {
                let values: Vec<Value> = defaults.iter().map(|&d| self.expr(st, d)).collect();
                let function = self.lower_function(name, *scope, *flavor, *body);
                let dst = st.owned();
                st.emit(LowOp::MakeFunction {
                    dst: dst.temp,
                    function,
                    defaults: values.iter().map(|v| v.temp).collect(),
                });
                for v in values.into_iter().rev() {
                    st.release(v);
                }
                st.emit(LowOp::StoreVar {
                    var: *target,
                    src: dst.temp,
                });
                st.release(dst);
            }
            NodeKind::ClassDef {
                name,
                scope,
                target,
                bases,
                body,
            } => {
                let values: Vec<Value> = bases.iter().map(|&b| self.expr(st, b)).collect();
                let function = self.lower_function(name, *scope, FunctionFlavor::Plain, *body);
                let dst = st.owned();
                st.emit(LowOp::MakeClass {
                    dst: dst.temp,
                    function,
                    name: name.clone(),
                    bases: values.iter().map(|v| v.temp).collect(),
                });
                for v in values.into_iter().rev() {
                    st.release(v);
                }
                st.emit(LowOp::StoreVar {
                    var: *target,
                    src: dst.temp,
                });
                st.release(dst);
            }
            NodeKind::ModuleBody { .. } => tree.defect(Some(id), "nested module body"),
            _ => tree.defect(Some(id), "expression kind in statement position"),
        }
    }
}

/// Trace-free shape of an expression, for `checked` flags. Lowering sees
/// no dataflow, so only structurally evident shapes count.
fn static_shape(tree: &Tree, id: NodeId) -> TypeShape {
    match tree.kind(id) {
        NodeKind::Constant { value } => TypeShape::exact(value.type_id()),
        NodeKind::MakeTuple { .. } => TypeShape::exact(TypeId::Tuple),
        NodeKind::MakeList { .. } => TypeShape::exact(TypeId::List),
        NodeKind::MakeSet { .. } => TypeShape::exact(TypeId::Set),
        NodeKind::MakeDict { .. } => TypeShape::exact(TypeId::Dict),
        NodeKind::Comparison { .. } | NodeKind::NotOp { .. } => TypeShape::exact(TypeId::Bool),
        NodeKind::SideEffects { expression, .. } => static_shape(tree, *expression),
        _ => TypeShape::unknown(),
    }
}

/// Variables the body deletes, nested scope bodies excluded. A deleted
/// parameter loses its bound-at-entry load guarantee.
fn collect_deleted(tree: &Tree, id: NodeId, into: &mut BTreeSet<VarId>) {
    match tree.kind(id) {
        NodeKind::DelVariable { var } => {
            into.insert(*var);
        }
        NodeKind::FunctionDef { defaults, .. } => {
            for &d in defaults {
                collect_deleted(tree, d, into);
            }
        }
        NodeKind::ClassDef { bases, .. } => {
            for &b in bases {
                collect_deleted(tree, b, into);
            }
        }
        other => {
            for child in other.children() {
                collect_deleted(tree, child, into);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::SourceLoc;
    use crate::scopes::ScopeKind;

    fn module_with(
        scopes: &mut ScopeTree,
        tree: &mut Tree,
        statements: Vec<NodeId>,
    ) -> (NodeId, ScopeId) {
        let scope = scopes.add_scope(ScopeKind::Module, None);
        let body = tree.insert(NodeKind::Suite { statements }, SourceLoc::default());
        let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());
        (root, scope)
    }

    fn constant(tree: &mut Tree, value: ConstantValue) -> NodeId {
        tree.insert(NodeKind::Constant { value }, SourceLoc::default())
    }

    /// Counts owned productions minus releases over the normal path.
    fn release_balance(ops: &[LowOp]) -> i64 {
        let mut balance = 0i64;
        for op in ops {
            match op {
                LowOp::BinaryOp { .. }
                | LowOp::UnaryOp { .. }
                | LowOp::Compare { .. }
                | LowOp::Not { .. }
                | LowOp::BuildTuple { .. }
                | LowOp::BuildList { .. }
                | LowOp::BuildSet { .. }
                | LowOp::BuildDict { .. }
                | LowOp::GetAttr { .. }
                | LowOp::GetItem { .. }
                | LowOp::GetSlice { .. }
                | LowOp::CallValue { .. }
                | LowOp::MakeFunction { .. }
                | LowOp::MakeClass { .. }
                | LowOp::ImportModule { .. }
                | LowOp::ImportName { .. }
                | LowOp::GetIter { .. }
                | LowOp::IterNext { .. }
                | LowOp::Suspend { .. }
                | LowOp::Delegate { .. }
                | LowOp::Copy { .. } => balance += 1,
                LowOp::UnpackSequence { dsts, .. } => balance += dsts.len() as i64,
                LowOp::Release { .. } => balance -= 1,
                _ => {}
            }
        }
        balance
    }

    #[test]
    fn straight_line_code_balances_releases() {
        let mut scopes = ScopeTree::new();
        let mut tree = Tree::new();
        let pre_scope = scopes.add_scope(ScopeKind::Module, None);
        let x = scopes.variable_for_assignment(pre_scope, "x");
        let a = constant(&mut tree, ConstantValue::int(1));
        let b = constant(&mut tree, ConstantValue::int(2));
        let sum = tree.insert(
            NodeKind::BinaryOp {
                op: BinOp::Add,
                left: a,
                right: b,
            },
            SourceLoc::default(),
        );
        let assign = tree.insert(
            NodeKind::AssignVariable { var: x, source: sum },
            SourceLoc::default(),
        );
        let body = tree.insert(
            NodeKind::Suite {
                statements: vec![assign],
            },
            SourceLoc::default(),
        );
        let root = tree.insert(
            NodeKind::ModuleBody {
                scope: pre_scope,
                body,
            },
            SourceLoc::default(),
        );

        let ctx = OptimizeContext::new("m");
        let lowered = lower_module(&tree, root, &scopes, &ctx);
        let entry = &lowered.functions[lowered.entry];
        assert_eq!(release_balance(&entry.ops), 0);
        // One function-level propagate exit covering every op.
        assert_eq!(entry.exits[0].action, ExitAction::Propagate);
        assert_eq!(entry.exits[0].start, 0);
        assert_eq!(entry.exits[0].end, entry.ops.len());
    }

    #[test]
    fn dict_literal_evaluates_key_before_value() {
        let mut scopes = ScopeTree::new();
        let mut tree = Tree::new();
        let key = constant(&mut tree, ConstantValue::str("k"));
        let value = constant(&mut tree, ConstantValue::int(1));
        let pair = tree.insert(NodeKind::DictPair { key, value }, SourceLoc::default());
        let dict = tree.insert(NodeKind::MakeDict { pairs: vec![pair] }, SourceLoc::default());
        let stmt = tree.insert(
            NodeKind::ExpressionStatement { expression: dict },
            SourceLoc::default(),
        );
        let (root, _) = module_with(&mut scopes, &mut tree, vec![stmt]);

        let ctx = OptimizeContext::new("m");
        let lowered = lower_module(&tree, root, &scopes, &ctx);
        let ops = &lowered.functions[lowered.entry].ops;
        let key_at = ops
            .iter()
            .position(|op| matches!(op, LowOp::LoadConst { value: ConstantValue::Str(_), .. }))
            .unwrap();
        let value_at = ops
            .iter()
            .position(|op| matches!(op, LowOp::LoadConst { value: ConstantValue::Int(_), .. }))
            .unwrap();
        assert!(key_at < value_at);
    }

    #[test]
    fn try_finally_duplicates_final_body() {
        let mut scopes = ScopeTree::new();
        let mut tree = Tree::new();
        let pre_scope = scopes.add_scope(ScopeKind::Module, None);
        let x = scopes.variable_for_assignment(pre_scope, "x");
        let body = tree.insert(NodeKind::PassStatement, SourceLoc::default());
        let one = constant(&mut tree, ConstantValue::int(1));
        let final_body = tree.insert(
            NodeKind::AssignVariable { var: x, source: one },
            SourceLoc::default(),
        );
        let tf = tree.insert(NodeKind::TryFinally { body, final_body }, SourceLoc::default());
        let suite = tree.insert(
            NodeKind::Suite {
                statements: vec![tf],
            },
            SourceLoc::default(),
        );
        let root = tree.insert(
            NodeKind::ModuleBody {
                scope: pre_scope,
                body: suite,
            },
            SourceLoc::default(),
        );

        let ctx = OptimizeContext::new("m");
        let lowered = lower_module(&tree, root, &scopes, &ctx);
        let ops = &lowered.functions[lowered.entry].ops;
        let stores = ops
            .iter()
            .filter(|op| matches!(op, LowOp::StoreVar { .. }))
            .count();
        assert_eq!(stores, 2);
        assert!(ops.iter().any(|op| matches!(op, LowOp::Reraise)));
    }

    #[test]
    fn return_through_finally_runs_cleanup_first() {
        let mut scopes = ScopeTree::new();
        let mut tree = Tree::new();
        let pre_scope = scopes.add_scope(ScopeKind::Module, None);
        let x = scopes.variable_for_assignment(pre_scope, "x");
        let one = constant(&mut tree, ConstantValue::int(1));
        let body = tree.insert(
            NodeKind::ReturnStatement { value: Some(one) },
            SourceLoc::default(),
        );
        let two = constant(&mut tree, ConstantValue::int(2));
        let final_body = tree.insert(
            NodeKind::AssignVariable { var: x, source: two },
            SourceLoc::default(),
        );
        let tf = tree.insert(NodeKind::TryFinally { body, final_body }, SourceLoc::default());
        let suite = tree.insert(
            NodeKind::Suite {
                statements: vec![tf],
            },
            SourceLoc::default(),
        );
        let root = tree.insert(
            NodeKind::ModuleBody {
                scope: pre_scope,
                body: suite,
            },
            SourceLoc::default(),
        );

        let ctx = OptimizeContext::new("m");
        let lowered = lower_module(&tree, root, &scopes, &ctx);
        let ops = &lowered.functions[lowered.entry].ops;
        // Return site, normal fall-through, and unwind path each carry
        // their own copy of the cleanup.
        let stores = ops
            .iter()
            .filter(|op| matches!(op, LowOp::StoreVar { .. }))
            .count();
        assert_eq!(stores, 3);
        let first_store = ops
            .iter()
            .position(|op| matches!(op, LowOp::StoreVar { .. }))
            .unwrap();
        let first_return = ops
            .iter()
            .position(|op| matches!(op, LowOp::Return { .. }))
            .unwrap();
        assert!(
            first_store < first_return,
            "cleanup at op {} must precede the return at op {}",
            first_store,
            first_return
        );
    }

    #[test]
    fn break_through_finally_runs_cleanup_inside_loop() {
        let mut scopes = ScopeTree::new();
        let mut tree = Tree::new();
        let pre_scope = scopes.add_scope(ScopeKind::Module, None);
        let m = scopes.variable_for_assignment(pre_scope, "m");
        let x = scopes.variable_for_assignment(pre_scope, "x");
        let body = tree.insert(NodeKind::BreakLoop, SourceLoc::default());
        let two = constant(&mut tree, ConstantValue::int(2));
        let final_body = tree.insert(
            NodeKind::AssignVariable { var: x, source: two },
            SourceLoc::default(),
        );
        let tf = tree.insert(NodeKind::TryFinally { body, final_body }, SourceLoc::default());
        let loop_body = tree.insert(
            NodeKind::Suite {
                statements: vec![tf],
            },
            SourceLoc::default(),
        );
        let cond = tree.insert(NodeKind::VariableRef { var: m }, SourceLoc::default());
        let wl = tree.insert(
            NodeKind::WhileLoop {
                condition: cond,
                body: loop_body,
            },
            SourceLoc::default(),
        );
        let suite = tree.insert(
            NodeKind::Suite {
                statements: vec![wl],
            },
            SourceLoc::default(),
        );
        let root = tree.insert(
            NodeKind::ModuleBody {
                scope: pre_scope,
                body: suite,
            },
            SourceLoc::default(),
        );

        let ctx = OptimizeContext::new("m");
        let lowered = lower_module(&tree, root, &scopes, &ctx);
        let ops = &lowered.functions[lowered.entry].ops;
        let stores = ops
            .iter()
            .filter(|op| matches!(op, LowOp::StoreVar { .. }))
            .count();
        assert_eq!(stores, 3);
        // The break jumps to the loop-exit label the condition test uses;
        // its cleanup copy comes first.
        let exit_label = ops
            .iter()
            .find_map(|op| match op {
                LowOp::JumpIfFalse { target, .. } => Some(*target),
                _ => None,
            })
            .unwrap();
        let break_jump = ops
            .iter()
            .position(|op| matches!(op, LowOp::Jump { target } if *target == exit_label))
            .unwrap();
        let first_store = ops
            .iter()
            .position(|op| matches!(op, LowOp::StoreVar { .. }))
            .unwrap();
        assert!(first_store < break_jump);
    }

    #[test]
    fn raise_free_function_skips_traceback_machinery() {
        let mut scopes = ScopeTree::new();
        let mut tree = Tree::new();
        let pre_scope = scopes.add_scope(ScopeKind::Module, None);
        let x = scopes.variable_for_assignment(pre_scope, "x");
        let one = constant(&mut tree, ConstantValue::int(1));
        let assign = tree.insert(
            NodeKind::AssignVariable { var: x, source: one },
            SourceLoc::default(),
        );
        let suite = tree.insert(
            NodeKind::Suite {
                statements: vec![assign],
            },
            SourceLoc::default(),
        );
        let root = tree.insert(
            NodeKind::ModuleBody {
                scope: pre_scope,
                body: suite,
            },
            SourceLoc::default(),
        );

        let ctx = OptimizeContext::new("m");
        let lowered = lower_module(&tree, root, &scopes, &ctx);
        assert!(!lowered.functions[lowered.entry].needs_traceback);
    }

    #[test]
    fn imports_become_dependency_edges_once() {
        let mut scopes = ScopeTree::new();
        let mut tree = Tree::new();
        let scope = scopes.add_scope(ScopeKind::Module, None);
        let a = scopes.variable_for_assignment(scope, "a");
        let b = scopes.variable_for_assignment(scope, "b");
        let i1 = tree.insert(
            NodeKind::ImportModule {
                module: "os".to_string(),
                target: a,
            },
            SourceLoc::default(),
        );
        let i2 = tree.insert(
            NodeKind::ImportName {
                module: "os".to_string(),
                name: "sep".to_string(),
                target: b,
            },
            SourceLoc::default(),
        );
        let suite = tree.insert(
            NodeKind::Suite {
                statements: vec![i1, i2],
            },
            SourceLoc::default(),
        );
        let root = tree.insert(NodeKind::ModuleBody { scope, body: suite }, SourceLoc::default());

        let mut ctx = OptimizeContext::new("m");
        ctx.plugins.implicit_deps.push("runtime_support".to_string());
        let lowered = lower_module(&tree, root, &scopes, &ctx);
        let imported: Vec<&str> = lowered
            .dependencies
            .iter()
            .map(|e| e.imported.as_str())
            .collect();
        assert_eq!(imported, vec!["os", "runtime_support"]);
    }

    #[test]
    fn ownership_classification_follows_node_kind() {
        let mut tree = Tree::new();
        let c = constant(&mut tree, ConstantValue::int(1));
        assert_eq!(value_ownership(&tree, c), Ownership::Borrowed);
        let d = constant(&mut tree, ConstantValue::int(2));
        let op = tree.insert(
            NodeKind::UnaryOp {
                op: UnOp::Neg,
                operand: d,
            },
            SourceLoc::default(),
        );
        assert_eq!(value_ownership(&tree, op), Ownership::Owned);
    }
}

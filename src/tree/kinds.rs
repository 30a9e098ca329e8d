//! The closed set of node kinds and their child-slot contracts.
//!
//! Child slots are `NodeId` (required), `Option<NodeId>` (optional) or
//! `Vec<NodeId>` (variadic, ordered). `children` returns child nodes in
//! evaluation order; every dispatch over kinds in this crate is an
//! exhaustive `match`, so adding a kind fails to compile until every
//! contract handles it.

use crate::constant::ConstantValue;
use crate::exceptions::ExceptionKind;
use crate::scopes::{FunctionFlavor, ScopeId};
use crate::tree::NodeId;
use crate::variables::VarId;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mult => "mult",
            BinOp::TrueDiv => "truediv",
            BinOp::FloorDiv => "floordiv",
            BinOp::Mod => "mod",
            BinOp::Pow => "pow",
            BinOp::LShift => "lshift",
            BinOp::RShift => "rshift",
            BinOp::BitAnd => "bitand",
            BinOp::BitOr => "bitor",
            BinOp::BitXor => "bitxor",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum UnOp {
    Neg,
    Pos,
    Invert,
}

impl UnOp {
    pub fn name(self) -> &'static str {
        match self {
            UnOp::Neg => "neg",
            UnOp::Pos => "pos",
            UnOp::Invert => "invert",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum CmpOp {
    Lt,
    LtE,
    Gt,
    GtE,
    Eq,
    NotEq,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOp {
    pub fn name(self) -> &'static str {
        match self {
            CmpOp::Lt => "lt",
            CmpOp::LtE => "lte",
            CmpOp::Gt => "gt",
            CmpOp::GtE => "gte",
            CmpOp::Eq => "eq",
            CmpOp::NotEq => "noteq",
            CmpOp::Is => "is",
            CmpOp::IsNot => "isnot",
            CmpOp::In => "in",
            CmpOp::NotIn => "notin",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    // Expressions.
    Constant {
        value: ConstantValue,
    },
    VariableRef {
        var: VarId,
    },
    BinaryOp {
        op: BinOp,
        left: NodeId,
        right: NodeId,
    },
    UnaryOp {
        op: UnOp,
        operand: NodeId,
    },
    Comparison {
        op: CmpOp,
        left: NodeId,
        right: NodeId,
    },
    /// Short-circuit `and`/`or` over two or more operands.
    BoolOp {
        op: BoolOpKind,
        operands: Vec<NodeId>,
    },
    NotOp {
        operand: NodeId,
    },
    Conditional {
        condition: NodeId,
        then_value: NodeId,
        else_value: NodeId,
    },
    Call {
        callee: NodeId,
        args: Vec<NodeId>,
    },
    KeywordArg {
        name: String,
        value: NodeId,
    },
    AttributeRef {
        object: NodeId,
        name: String,
    },
    Subscript {
        object: NodeId,
        index: NodeId,
    },
    SliceRef {
        object: NodeId,
        lower: Option<NodeId>,
        upper: Option<NodeId>,
    },
    MakeTuple {
        elements: Vec<NodeId>,
    },
    MakeList {
        elements: Vec<NodeId>,
    },
    MakeSet {
        elements: Vec<NodeId>,
    },
    MakeDict {
        pairs: Vec<NodeId>,
    },
    /// One `key: value` entry of a dict literal. Key evaluates before
    /// value; this order is part of the contract and is tested.
    DictPair {
        key: NodeId,
        value: NodeId,
    },
    Yield {
        value: Option<NodeId>,
    },
    YieldFrom {
        source: NodeId,
    },
    Await {
        awaited: NodeId,
    },
    /// Evaluation-order-preserving wrapper: evaluates `side_effects` in
    /// order for effect only, then `expression` for the value. Produced
    /// by rewrites that discard operands of a folded operation.
    SideEffects {
        side_effects: Vec<NodeId>,
        expression: NodeId,
    },
    /// Unconditional raise in expression position, produced when partial
    /// type-shape knowledge proves an operation impossible.
    RaiseExpression {
        kind: ExceptionKind,
        message: String,
    },

    // Statements.
    ModuleBody {
        scope: ScopeId,
        body: NodeId,
    },
    Suite {
        statements: Vec<NodeId>,
    },
    ExpressionStatement {
        expression: NodeId,
    },
    AssignVariable {
        var: VarId,
        source: NodeId,
    },
    UnpackAssign {
        source: NodeId,
        targets: Vec<VarId>,
    },
    AttributeAssign {
        source: NodeId,
        object: NodeId,
        name: String,
    },
    AttributeDel {
        object: NodeId,
        name: String,
    },
    SubscriptAssign {
        source: NodeId,
        object: NodeId,
        index: NodeId,
    },
    SubscriptDel {
        object: NodeId,
        index: NodeId,
    },
    DelVariable {
        var: VarId,
    },
    IfStatement {
        condition: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
    },
    WhileLoop {
        condition: NodeId,
        body: NodeId,
    },
    ForLoop {
        iterable: NodeId,
        target: VarId,
        body: NodeId,
    },
    BreakLoop,
    ContinueLoop,
    ReturnStatement {
        value: Option<NodeId>,
    },
    RaiseStatement {
        value: Option<NodeId>,
        /// Statically known kind when the raise was synthesized by a
        /// rewrite or the front-end could prove it.
        kind: Option<ExceptionKind>,
        /// Diagnostic text carried over from a proven raise; empty for
        /// source-level raise statements.
        message: String,
    },
    TryExcept {
        body: NodeId,
        handlers: Vec<NodeId>,
    },
    ExceptHandler {
        kind: Option<ExceptionKind>,
        body: NodeId,
    },
    TryFinally {
        body: NodeId,
        final_body: NodeId,
    },
    AssertStatement {
        condition: NodeId,
        message: Option<NodeId>,
    },
    ImportModule {
        module: String,
        target: VarId,
    },
    ImportName {
        module: String,
        name: String,
        target: VarId,
    },
    FunctionDef {
        name: String,
        scope: ScopeId,
        flavor: FunctionFlavor,
        target: VarId,
        defaults: Vec<NodeId>,
        body: NodeId,
    },
    ClassDef {
        name: String,
        scope: ScopeId,
        target: VarId,
        bases: Vec<NodeId>,
        body: NodeId,
    },
    PassStatement,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Constant { .. } => "constant",
            NodeKind::VariableRef { .. } => "variable-ref",
            NodeKind::BinaryOp { .. } => "binary-op",
            NodeKind::UnaryOp { .. } => "unary-op",
            NodeKind::Comparison { .. } => "comparison",
            NodeKind::BoolOp { .. } => "bool-op",
            NodeKind::NotOp { .. } => "not",
            NodeKind::Conditional { .. } => "conditional",
            NodeKind::Call { .. } => "call",
            NodeKind::KeywordArg { .. } => "keyword-arg",
            NodeKind::AttributeRef { .. } => "attribute-ref",
            NodeKind::Subscript { .. } => "subscript",
            NodeKind::SliceRef { .. } => "slice-ref",
            NodeKind::MakeTuple { .. } => "make-tuple",
            NodeKind::MakeList { .. } => "make-list",
            NodeKind::MakeSet { .. } => "make-set",
            NodeKind::MakeDict { .. } => "make-dict",
            NodeKind::DictPair { .. } => "dict-pair",
            NodeKind::Yield { .. } => "yield",
            NodeKind::YieldFrom { .. } => "yield-from",
            NodeKind::Await { .. } => "await",
            NodeKind::SideEffects { .. } => "side-effects",
            NodeKind::RaiseExpression { .. } => "raise-expression",
            NodeKind::ModuleBody { .. } => "module-body",
            NodeKind::Suite { .. } => "suite",
            NodeKind::ExpressionStatement { .. } => "expression-statement",
            NodeKind::AssignVariable { .. } => "assign-variable",
            NodeKind::UnpackAssign { .. } => "unpack-assign",
            NodeKind::AttributeAssign { .. } => "attribute-assign",
            NodeKind::AttributeDel { .. } => "attribute-del",
            NodeKind::SubscriptAssign { .. } => "subscript-assign",
            NodeKind::SubscriptDel { .. } => "subscript-del",
            NodeKind::DelVariable { .. } => "del-variable",
            NodeKind::IfStatement { .. } => "if",
            NodeKind::WhileLoop { .. } => "while",
            NodeKind::ForLoop { .. } => "for",
            NodeKind::BreakLoop => "break",
            NodeKind::ContinueLoop => "continue",
            NodeKind::ReturnStatement { .. } => "return",
            NodeKind::RaiseStatement { .. } => "raise",
            NodeKind::TryExcept { .. } => "try-except",
            NodeKind::ExceptHandler { .. } => "except-handler",
            NodeKind::TryFinally { .. } => "try-finally",
            NodeKind::AssertStatement { .. } => "assert",
            NodeKind::ImportModule { .. } => "import-module",
            NodeKind::ImportName { .. } => "import-name",
            NodeKind::FunctionDef { .. } => "function-def",
            NodeKind::ClassDef { .. } => "class-def",
            NodeKind::PassStatement => "pass",
        }
    }

    /// Child nodes in evaluation order. Assignment statements evaluate
    /// the source first, then the target expression; dict entries
    /// evaluate key then value.
    pub fn children(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.for_each_child(|id| out.push(id));
        out
    }

    pub(crate) fn for_each_child(&self, mut f: impl FnMut(NodeId)) {
        match self {
            NodeKind::Constant { .. }
            | NodeKind::VariableRef { .. }
            | NodeKind::DelVariable { .. }
            | NodeKind::BreakLoop
            | NodeKind::ContinueLoop
            | NodeKind::RaiseExpression { .. }
            | NodeKind::ImportModule { .. }
            | NodeKind::ImportName { .. }
            | NodeKind::PassStatement => {}

            NodeKind::BinaryOp { left, right, .. } | NodeKind::Comparison { left, right, .. } => {
                f(*left);
                f(*right);
            }
            NodeKind::UnaryOp { operand, .. } | NodeKind::NotOp { operand } => f(*operand),
            NodeKind::BoolOp { operands, .. } => operands.iter().copied().for_each(f),
            NodeKind::Conditional {
                condition,
                then_value,
                else_value,
            } => {
                f(*condition);
                f(*then_value);
                f(*else_value);
            }
            NodeKind::Call { callee, args } => {
                f(*callee);
                args.iter().copied().for_each(f);
            }
            NodeKind::KeywordArg { value, .. } => f(*value),
            NodeKind::AttributeRef { object, .. } => f(*object),
            NodeKind::Subscript { object, index } => {
                f(*object);
                f(*index);
            }
            NodeKind::SliceRef {
                object,
                lower,
                upper,
            } => {
                f(*object);
                lower.iter().copied().for_each(&mut f);
                upper.iter().copied().for_each(&mut f);
            }
            NodeKind::MakeTuple { elements }
            | NodeKind::MakeList { elements }
            | NodeKind::MakeSet { elements } => elements.iter().copied().for_each(f),
            NodeKind::MakeDict { pairs } => pairs.iter().copied().for_each(f),
            NodeKind::DictPair { key, value } => {
                f(*key);
                f(*value);
            }
            NodeKind::Yield { value } => value.iter().copied().for_each(f),
            NodeKind::YieldFrom { source } => f(*source),
            NodeKind::Await { awaited } => f(*awaited),
            NodeKind::SideEffects {
                side_effects,
                expression,
            } => {
                side_effects.iter().copied().for_each(&mut f);
                f(*expression);
            }

            NodeKind::ModuleBody { body, .. } => f(*body),
            NodeKind::Suite { statements } => statements.iter().copied().for_each(f),
            NodeKind::ExpressionStatement { expression } => f(*expression),
            NodeKind::AssignVariable { source, .. } => f(*source),
            NodeKind::UnpackAssign { source, .. } => f(*source),
            NodeKind::AttributeAssign { source, object, .. } => {
                f(*source);
                f(*object);
            }
            NodeKind::AttributeDel { object, .. } => f(*object),
            NodeKind::SubscriptAssign {
                source,
                object,
                index,
            } => {
                f(*source);
                f(*object);
                f(*index);
            }
            NodeKind::SubscriptDel { object, index } => {
                f(*object);
                f(*index);
            }
            NodeKind::IfStatement {
                condition,
                then_branch,
                else_branch,
            } => {
                f(*condition);
                f(*then_branch);
                else_branch.iter().copied().for_each(&mut f);
            }
            NodeKind::WhileLoop { condition, body } => {
                f(*condition);
                f(*body);
            }
            NodeKind::ForLoop { iterable, body, .. } => {
                f(*iterable);
                f(*body);
            }
            NodeKind::ReturnStatement { value } | NodeKind::RaiseStatement { value, .. } => {
                value.iter().copied().for_each(f)
            }
            NodeKind::TryExcept { body, handlers } => {
                f(*body);
                handlers.iter().copied().for_each(&mut f);
            }
            NodeKind::ExceptHandler { body, .. } => f(*body),
            NodeKind::TryFinally { body, final_body } => {
                f(*body);
                f(*final_body);
            }
            NodeKind::AssertStatement { condition, message } => {
                f(*condition);
                message.iter().copied().for_each(&mut f);
            }
            NodeKind::FunctionDef { defaults, body, .. } => {
                defaults.iter().copied().for_each(&mut f);
                f(*body);
            }
            NodeKind::ClassDef { bases, body, .. } => {
                bases.iter().copied().for_each(&mut f);
                f(*body);
            }
        }
    }

    /// Swaps `old` for `new` in whichever slot holds it. Returns false
    /// when no slot references `old`; the caller treats that as an
    /// internal defect.
    pub(crate) fn replace_slot(&mut self, old: NodeId, new: NodeId) -> bool {
        fn hit(slot: &mut NodeId, old: NodeId, new: NodeId) -> bool {
            if *slot == old {
                *slot = new;
                true
            } else {
                false
            }
        }
        fn hit_opt(slot: &mut Option<NodeId>, old: NodeId, new: NodeId) -> bool {
            match slot {
                Some(id) if *id == old => {
                    *slot = Some(new);
                    true
                }
                _ => false,
            }
        }
        fn hit_vec(slot: &mut [NodeId], old: NodeId, new: NodeId) -> bool {
            for id in slot.iter_mut() {
                if *id == old {
                    *id = new;
                    return true;
                }
            }
            false
        }

        match self {
            NodeKind::Constant { .. }
            | NodeKind::VariableRef { .. }
            | NodeKind::DelVariable { .. }
            | NodeKind::BreakLoop
            | NodeKind::ContinueLoop
            | NodeKind::RaiseExpression { .. }
            | NodeKind::ImportModule { .. }
            | NodeKind::ImportName { .. }
            | NodeKind::PassStatement => false,

            NodeKind::BinaryOp { left, right, .. } | NodeKind::Comparison { left, right, .. } => {
                hit(left, old, new) || hit(right, old, new)
            }
            NodeKind::UnaryOp { operand, .. } | NodeKind::NotOp { operand } => {
                hit(operand, old, new)
            }
            NodeKind::BoolOp { operands, .. } => hit_vec(operands, old, new),
            NodeKind::Conditional {
                condition,
                then_value,
                else_value,
            } => {
                hit(condition, old, new)
                    || hit(then_value, old, new)
                    || hit(else_value, old, new)
            }
            NodeKind::Call { callee, args } => hit(callee, old, new) || hit_vec(args, old, new),
            NodeKind::KeywordArg { value, .. } => hit(value, old, new),
            NodeKind::AttributeRef { object, .. } => hit(object, old, new),
            NodeKind::Subscript { object, index } => {
                hit(object, old, new) || hit(index, old, new)
            }
            NodeKind::SliceRef {
                object,
                lower,
                upper,
            } => hit(object, old, new) || hit_opt(lower, old, new) || hit_opt(upper, old, new),
            NodeKind::MakeTuple { elements }
            | NodeKind::MakeList { elements }
            | NodeKind::MakeSet { elements } => hit_vec(elements, old, new),
            NodeKind::MakeDict { pairs } => hit_vec(pairs, old, new),
            NodeKind::DictPair { key, value } => hit(key, old, new) || hit(value, old, new),
            NodeKind::Yield { value } => hit_opt(value, old, new),
            NodeKind::YieldFrom { source } => hit(source, old, new),
            NodeKind::Await { awaited } => hit(awaited, old, new),
            NodeKind::SideEffects {
                side_effects,
                expression,
            } => hit_vec(side_effects, old, new) || hit(expression, old, new),

            NodeKind::ModuleBody { body, .. } => hit(body, old, new),
            NodeKind::Suite { statements } => hit_vec(statements, old, new),
            NodeKind::ExpressionStatement { expression } => hit(expression, old, new),
            NodeKind::AssignVariable { source, .. } => hit(source, old, new),
            NodeKind::UnpackAssign { source, .. } => hit(source, old, new),
            NodeKind::AttributeAssign { source, object, .. } => {
                hit(source, old, new) || hit(object, old, new)
            }
            NodeKind::AttributeDel { object, .. } => hit(object, old, new),
            NodeKind::SubscriptAssign {
                source,
                object,
                index,
            } => hit(source, old, new) || hit(object, old, new) || hit(index, old, new),
            NodeKind::SubscriptDel { object, index } => {
                hit(object, old, new) || hit(index, old, new)
            }
            NodeKind::IfStatement {
                condition,
                then_branch,
                else_branch,
            } => {
                hit(condition, old, new)
                    || hit(then_branch, old, new)
                    || hit_opt(else_branch, old, new)
            }
            NodeKind::WhileLoop { condition, body } => {
                hit(condition, old, new) || hit(body, old, new)
            }
            NodeKind::ForLoop { iterable, body, .. } => {
                hit(iterable, old, new) || hit(body, old, new)
            }
            NodeKind::ReturnStatement { value } | NodeKind::RaiseStatement { value, .. } => {
                hit_opt(value, old, new)
            }
            NodeKind::TryExcept { body, handlers } => {
                hit(body, old, new) || hit_vec(handlers, old, new)
            }
            NodeKind::ExceptHandler { body, .. } => hit(body, old, new),
            NodeKind::TryFinally { body, final_body } => {
                hit(body, old, new) || hit(final_body, old, new)
            }
            NodeKind::AssertStatement { condition, message } => {
                hit(condition, old, new) || hit_opt(message, old, new)
            }
            NodeKind::FunctionDef { defaults, body, .. } => {
                hit_vec(defaults, old, new) || hit(body, old, new)
            }
            NodeKind::ClassDef { bases, body, .. } => {
                hit_vec(bases, old, new) || hit(body, old, new)
            }
        }
    }

    /// Removes `child` from a variadic or optional slot, preserving the
    /// order of the remaining elements. Returns false for required slots
    /// and misses.
    pub(crate) fn remove_slot(&mut self, child: NodeId) -> bool {
        fn drop_vec(slot: &mut Vec<NodeId>, child: NodeId) -> bool {
            match slot.iter().position(|&id| id == child) {
                Some(at) => {
                    slot.remove(at);
                    true
                }
                None => false,
            }
        }
        fn drop_opt(slot: &mut Option<NodeId>, child: NodeId) -> bool {
            if *slot == Some(child) {
                *slot = None;
                true
            } else {
                false
            }
        }

        match self {
            NodeKind::BoolOp { operands, .. } => drop_vec(operands, child),
            NodeKind::Call { args, .. } => drop_vec(args, child),
            NodeKind::MakeTuple { elements }
            | NodeKind::MakeList { elements }
            | NodeKind::MakeSet { elements } => drop_vec(elements, child),
            NodeKind::MakeDict { pairs } => drop_vec(pairs, child),
            NodeKind::SideEffects { side_effects, .. } => drop_vec(side_effects, child),
            NodeKind::Suite { statements } => drop_vec(statements, child),
            NodeKind::TryExcept { handlers, .. } => drop_vec(handlers, child),
            NodeKind::FunctionDef { defaults, .. } => drop_vec(defaults, child),
            NodeKind::ClassDef { bases, .. } => drop_vec(bases, child),
            NodeKind::SliceRef { lower, upper, .. } => {
                drop_opt(lower, child) || drop_opt(upper, child)
            }
            NodeKind::Yield { value }
            | NodeKind::ReturnStatement { value }
            | NodeKind::RaiseStatement { value, .. } => drop_opt(value, child),
            NodeKind::IfStatement { else_branch, .. } => drop_opt(else_branch, child),
            NodeKind::AssertStatement { message, .. } => drop_opt(message, child),
            _ => false,
        }
    }

    /// Whether this kind performs an operation that can compute, raise,
    /// or escape at runtime. Operation count is the leading component of
    /// the optimizer's termination measure: every accepted rewrite either
    /// removes an operation or shrinks the tree.
    pub fn is_operation(&self) -> bool {
        match self {
            NodeKind::Constant { .. }
            | NodeKind::RaiseExpression { .. }
            | NodeKind::SideEffects { .. }
            | NodeKind::KeywordArg { .. }
            | NodeKind::DictPair { .. }
            | NodeKind::ModuleBody { .. }
            | NodeKind::Suite { .. }
            | NodeKind::ExpressionStatement { .. }
            | NodeKind::AssignVariable { .. }
            | NodeKind::BreakLoop
            | NodeKind::ContinueLoop
            | NodeKind::ReturnStatement { .. }
            | NodeKind::RaiseStatement { .. }
            | NodeKind::ExceptHandler { .. }
            | NodeKind::PassStatement => false,
            _ => true,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, NodeKind::Constant { .. })
    }
}

//! Per-kind rewrite rules for expression nodes.
//!
//! Every rule follows the same contract: optimize the children in
//! evaluation order first, stop at the first child proven to raise,
//! then try to replace the node itself. Replacements happen in place;
//! the node keeps its identity and parent link.

use num::ToPrimitive;

use crate::constant::{ConstantValue, Folded};
use crate::constfold;
use crate::exceptions::ExceptionKind;
use crate::shapes::{TypeId, TypeShape, Tri};
use crate::tree::{BinOp, BoolOpKind, CmpOp, NodeId, NodeKind, UnOp};
use crate::trust::ImportFact;
use crate::variables::VariableKind;

use super::{expr_shape, is_raise, may_have_side_effects, ChangeTag, Opt};

pub(crate) fn optimize_expression(o: &mut Opt, id: NodeId) {
    if o.col.is_aborting() {
        return;
    }
    let kind = o.tree.kind(id).clone();
    match kind {
        NodeKind::Constant { .. } => {}

        NodeKind::VariableRef { var } => {
            o.col.mark_use(var);
            if o.ctx.locals_dict {
                // Exotic frame access: the dictionary can be mutated from
                // outside, so reads are neither foldable nor provably safe.
                o.col.on_exception_raise_exit(ExceptionKind::NameError);
                return;
            }
            let variable = o.scopes.variable(var);
            let shared = variable.shared;
            match variable.kind {
                VariableKind::ModuleVar | VariableKind::ClosureRef { .. } => {
                    if !o.col.proven_assigned(var) || o.col.control_escaped() {
                        o.col.on_exception_raise_exit(ExceptionKind::NameError);
                    } else if let Some(value @ ConstantValue::ImportedModule(_)) =
                        o.col.known_value(var)
                    {
                        // Module-level bindings can be rebound from outside
                        // and never fold, except trusted import bindings,
                        // which are stable by contract.
                        let value = value.clone();
                        let loc = o.tree.loc(id);
                        o.tree.replace_kind(id, NodeKind::Constant { value });
                        o.note(loc, ChangeTag::NewConstant, "folded trusted module binding");
                    }
                }
                VariableKind::LocalVar | VariableKind::Parameter => {
                    let proven = o.col.proven_assigned(var)
                        && (!shared || !o.col.control_escaped());
                    if !proven {
                        o.col
                            .on_exception_raise_exit(ExceptionKind::UnboundLocalError);
                    } else if o.scopes.foldable(var) {
                        if let Some(value) = o.col.known_value(var).cloned() {
                            let loc = o.tree.loc(id);
                            o.tree.replace_kind(id, NodeKind::Constant { value });
                            o.note(loc, ChangeTag::NewConstant, "folded variable read");
                        }
                    }
                }
            }
        }

        NodeKind::BinaryOp { op, left, right } => {
            if visit_operands(o, id, &[left, right]) {
                return;
            }
            let pair = constant_pair(o, left, right);
            if let Some((a, b)) = pair {
                match constfold::fold_binary(op, &a, &b) {
                    Some(Folded::Value(value)) => {
                        let loc = o.tree.loc(id);
                        o.tree.replace_kind(id, NodeKind::Constant { value });
                        o.note(loc, ChangeTag::NewConstant, "folded binary operation");
                    }
                    Some(Folded::Raise(kind)) => {
                        let message = binop_raise_message(op, kind, &a, &b);
                        raise_in_place(o, id, kind, message, vec![]);
                    }
                    // Refused folds (size guards) are valid at runtime.
                    None => {}
                }
                return;
            }
            let ls = expr_shape(o, left);
            let rs = expr_shape(o, right);
            match binop_capability(op, ls, rs) {
                Tri::No => {
                    let message = format!(
                        "unsupported operand type(s) for {}: '{}' and '{}'",
                        op.name(),
                        shape_name(ls),
                        shape_name(rs)
                    );
                    raise_in_place(o, id, ExceptionKind::TypeError, message, vec![left, right]);
                }
                Tri::Yes => {
                    for kind in binop_possible_raises(op, ls) {
                        o.col.on_exception_raise_exit(kind);
                    }
                }
                Tri::Unknown => {
                    o.col.on_control_flow_escape();
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                }
            }
        }

        NodeKind::UnaryOp { op, operand } => {
            if visit_operands(o, id, &[operand]) {
                return;
            }
            if let NodeKind::Constant { value } = o.tree.kind(operand) {
                let value = value.clone();
                match constfold::fold_unary(op, &value) {
                    Some(Folded::Value(value)) => {
                        let loc = o.tree.loc(id);
                        o.tree.replace_kind(id, NodeKind::Constant { value });
                        o.note(loc, ChangeTag::NewConstant, "folded unary operation");
                    }
                    Some(Folded::Raise(kind)) => {
                        let message =
                            format!("bad operand type for unary {}: '{}'", op.name(), value.type_name());
                        raise_in_place(o, id, kind, message, vec![]);
                    }
                    None => {}
                }
                return;
            }
            let shape = expr_shape(o, operand);
            match shape.exact {
                Some(TypeId::Bool | TypeId::Int) => {}
                Some(TypeId::Float) => {
                    if op == UnOp::Invert {
                        raise_in_place(
                            o,
                            id,
                            ExceptionKind::TypeError,
                            "bad operand type for unary invert: 'float'".to_string(),
                            vec![operand],
                        );
                    }
                }
                Some(_) => {
                    let message = format!(
                        "bad operand type for unary {}: '{}'",
                        op.name(),
                        shape_name(shape)
                    );
                    raise_in_place(o, id, ExceptionKind::TypeError, message, vec![operand]);
                }
                None => {
                    o.col.on_control_flow_escape();
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                }
            }
        }

        NodeKind::Comparison { op, left, right } => {
            if visit_operands(o, id, &[left, right]) {
                return;
            }
            if let Some((a, b)) = constant_pair(o, left, right) {
                match constfold::fold_comparison(op, &a, &b) {
                    Some(Folded::Value(value)) => {
                        let loc = o.tree.loc(id);
                        o.tree.replace_kind(id, NodeKind::Constant { value });
                        o.note(loc, ChangeTag::NewConstant, "folded comparison");
                    }
                    Some(Folded::Raise(kind)) => {
                        let message = format!(
                            "'{}' not supported between instances of '{}' and '{}'",
                            op.name(),
                            a.type_name(),
                            b.type_name()
                        );
                        raise_in_place(o, id, kind, message, vec![]);
                    }
                    None => {}
                }
                return;
            }
            let ls = expr_shape(o, left);
            let rs = expr_shape(o, right);
            match op {
                CmpOp::Is | CmpOp::IsNot => {}
                CmpOp::Eq | CmpOp::NotEq => {
                    if !(ls.is_known() && rs.is_known()) {
                        o.col.on_control_flow_escape();
                        o.col.on_exception_raise_exit(ExceptionKind::Any);
                    }
                }
                CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => match (ls.exact, rs.exact) {
                    (Some(l), Some(r)) => {
                        if !orderable(l, r) {
                            let message = format!(
                                "'{}' not supported between instances of '{}' and '{}'",
                                op.name(),
                                l.name(),
                                r.name()
                            );
                            raise_in_place(
                                o,
                                id,
                                ExceptionKind::TypeError,
                                message,
                                vec![left, right],
                            );
                        }
                    }
                    _ => {
                        o.col.on_control_flow_escape();
                        o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                    }
                },
                CmpOp::In | CmpOp::NotIn => match expr_shape(o, right).has_shape_iter() {
                    Tri::Yes => {
                        // Hashing the needle can still fail at runtime.
                        o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                    }
                    Tri::No => {
                        let message =
                            format!("argument of type '{}' is not iterable", shape_name(rs));
                        raise_in_place(
                            o,
                            id,
                            ExceptionKind::TypeError,
                            message,
                            vec![left, right],
                        );
                    }
                    Tri::Unknown => {
                        o.col.on_control_flow_escape();
                        o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                    }
                },
            }
        }

        NodeKind::NotOp { operand } => {
            if visit_operands(o, id, &[operand]) {
                return;
            }
            if let NodeKind::Constant { value } = o.tree.kind(operand) {
                let value = ConstantValue::Bool(!value.truthy());
                let loc = o.tree.loc(id);
                o.tree.replace_kind(id, NodeKind::Constant { value });
                o.note(loc, ChangeTag::NewConstant, "folded boolean negation");
                return;
            }
            if !expr_shape(o, operand).has_shape_bool().is_yes() {
                o.col.on_control_flow_escape();
                o.col.on_exception_raise_exit(ExceptionKind::TypeError);
            }
        }

        NodeKind::BoolOp { op, operands } => {
            optimize_expression(o, operands[0]);
            if is_raise(o, operands[0]) {
                let loc = o.tree.loc(id);
                o.tree.replace_with_child(id, operands[0]);
                o.note(loc, ChangeTag::NewRaise, "operand raises unconditionally");
                return;
            }
            // Later operands evaluate only when the earlier ones did not
            // decide; analyze them against a fork.
            let branch = o.fork_run(|o| {
                for &operand in &operands[1..] {
                    optimize_expression(o, operand);
                }
            });

            // Fold a deciding constant head, drop an inert one. Facts from
            // the later operands merge only when some of them survive the
            // fold; a decided short-circuit cuts them unevaluated.
            let mut decided = false;
            loop {
                let operands = match o.tree.kind(id) {
                    NodeKind::BoolOp { operands, .. } => operands.clone(),
                    _ => break,
                };
                if operands.len() < 2 {
                    let loc = o.tree.loc(id);
                    o.tree.replace_with_child(id, operands[0]);
                    o.note(loc, ChangeTag::NewExpression, "collapsed one-operand short-circuit");
                    break;
                }
                let first = operands[0];
                let value = match o.tree.kind(first) {
                    NodeKind::Constant { value } => value.clone(),
                    _ => break,
                };
                let decides = match op {
                    BoolOpKind::Or => value.truthy(),
                    BoolOpKind::And => !value.truthy(),
                };
                let loc = o.tree.loc(id);
                if decides {
                    o.tree.replace_with_child(id, first);
                    o.note(loc, ChangeTag::NewExpression, "short-circuit decided by constant");
                    decided = true;
                    break;
                }
                o.tree.remove_child(id, first);
                o.note(loc, ChangeTag::NewExpression, "dropped inert short-circuit operand");
            }
            if !decided {
                let skipped = o.col.fork();
                o.col.merge(vec![skipped, branch]);
            }
        }

        NodeKind::Conditional {
            condition,
            then_value,
            else_value,
        } => {
            optimize_expression(o, condition);
            if is_raise(o, condition) {
                let loc = o.tree.loc(id);
                o.tree.replace_with_child(id, condition);
                o.note(loc, ChangeTag::NewRaise, "condition raises unconditionally");
                return;
            }
            if let NodeKind::Constant { value } = o.tree.kind(condition) {
                let chosen = if value.truthy() { then_value } else { else_value };
                let loc = o.tree.loc(id);
                o.tree.replace_with_child(id, chosen);
                o.note(loc, ChangeTag::NewExpression, "conditional decided by constant");
                optimize_expression(o, id);
                return;
            }
            if !expr_shape(o, condition).has_shape_bool().is_yes() {
                o.col.on_control_flow_escape();
                o.col.on_exception_raise_exit(ExceptionKind::TypeError);
            }
            let then_col = o.fork_run(|o| optimize_expression(o, then_value));
            let else_col = o.fork_run(|o| optimize_expression(o, else_value));
            o.col.merge(vec![then_col, else_col]);
        }

        NodeKind::Call { callee, args } => {
            let mut operands = vec![callee];
            operands.extend(args);
            if visit_operands(o, id, &operands) {
                return;
            }
            let shape = expr_shape(o, callee);
            if shape.has_shape_call().is_no() {
                let message = format!("'{}' object is not callable", shape_name(shape));
                raise_in_place(o, id, ExceptionKind::TypeError, message, operands);
                return;
            }
            o.col.on_control_flow_escape();
            o.col.on_exception_raise_exit(ExceptionKind::Any);
        }

        NodeKind::KeywordArg { value, .. } => {
            optimize_expression(o, value);
            if is_raise(o, value) {
                let loc = o.tree.loc(id);
                o.tree.replace_with_child(id, value);
                o.note(loc, ChangeTag::NewRaise, "keyword value raises unconditionally");
            }
        }

        NodeKind::AttributeRef { object, name } => {
            optimize_expression(o, object);
            if is_raise(o, object) {
                let loc = o.tree.loc(id);
                o.tree.replace_with_child(id, object);
                o.note(loc, ChangeTag::NewRaise, "object raises unconditionally");
                return;
            }
            if let NodeKind::Constant {
                value: ConstantValue::ImportedModule(module),
            } = o.tree.kind(object)
            {
                let module = module.clone();
                match o.ctx.trust.attribute_fact(&module, &name) {
                    ImportFact::SafeKnownValue(value) => {
                        let loc = o.tree.loc(id);
                        o.tree.replace_kind(id, NodeKind::Constant { value });
                        o.note(loc, ChangeTag::NewConstant, "folded trusted module attribute");
                    }
                    ImportFact::SafeExists => {}
                    ImportFact::MayNotExist => {
                        o.col.on_exception_raise_exit(ExceptionKind::AttributeError);
                    }
                    ImportFact::RuntimeOnly => {
                        o.col.on_control_flow_escape();
                        o.col.on_exception_raise_exit(ExceptionKind::AttributeError);
                    }
                }
                return;
            }
            let shape = expr_shape(o, object);
            if shape.attr_lookup_escapes() {
                o.col.on_control_flow_escape();
            }
            o.col.on_exception_raise_exit(ExceptionKind::AttributeError);
        }

        NodeKind::Subscript { object, index } => {
            if visit_operands(o, id, &[object, index]) {
                return;
            }
            if let Some((container, key)) = constant_pair(o, object, index) {
                if let Some(folded) = container.index(&key) {
                    match folded {
                        Folded::Value(value) => {
                            let loc = o.tree.loc(id);
                            o.tree.replace_kind(id, NodeKind::Constant { value });
                            o.note(loc, ChangeTag::NewConstant, "folded constant subscript");
                        }
                        Folded::Raise(kind) => {
                            let message = match kind {
                                ExceptionKind::IndexError => {
                                    format!("{} index out of range", container.type_name())
                                }
                                _ => format!(
                                    "{} indices must be integers, not '{}'",
                                    container.type_name(),
                                    key.type_name()
                                ),
                            };
                            raise_in_place(o, id, kind, message, vec![]);
                        }
                    }
                    return;
                }
            }
            let shape = expr_shape(o, object);
            match shape.has_shape_index() {
                Tri::No => {
                    let message =
                        format!("'{}' object is not subscriptable", shape_name(shape));
                    raise_in_place(o, id, ExceptionKind::TypeError, message, vec![object, index]);
                }
                Tri::Yes => {
                    if shape.exact == Some(TypeId::Dict) {
                        o.col.on_exception_raise_exit(ExceptionKind::KeyError);
                        o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                    } else {
                        o.col.on_exception_raise_exit(ExceptionKind::IndexError);
                        if !matches!(
                            expr_shape(o, index).exact,
                            Some(TypeId::Bool | TypeId::Int)
                        ) {
                            o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                        }
                    }
                }
                Tri::Unknown => {
                    o.col.on_control_flow_escape();
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                }
            }
        }

        NodeKind::SliceRef {
            object,
            lower,
            upper,
        } => {
            let mut operands = vec![object];
            operands.extend(lower);
            operands.extend(upper);
            if visit_operands(o, id, &operands) {
                return;
            }
            if let NodeKind::Constant { value } = o.tree.kind(object) {
                let value = value.clone();
                match (slice_bound(o, lower), slice_bound(o, upper)) {
                    (Ok(lo), Ok(hi)) => {
                        if let Some(value) = value.slice(lo, hi) {
                            let loc = o.tree.loc(id);
                            o.tree.replace_kind(id, NodeKind::Constant { value });
                            o.note(loc, ChangeTag::NewConstant, "folded constant slice");
                            return;
                        }
                    }
                    (Err(bad), _) | (_, Err(bad)) => {
                        if let Some(type_name) = bad {
                            let message = format!(
                                "slice indices must be integers or None, not '{}'",
                                type_name
                            );
                            raise_in_place(o, id, ExceptionKind::TypeError, message, vec![]);
                            return;
                        }
                    }
                }
            }
            let shape = expr_shape(o, object);
            match shape.has_shape_slice() {
                Tri::No => {
                    let message = format!("'{}' object is not subscriptable", shape_name(shape));
                    raise_in_place(o, id, ExceptionKind::TypeError, message, operands);
                }
                Tri::Yes => {
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                }
                Tri::Unknown => {
                    o.col.on_control_flow_escape();
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                }
            }
        }

        NodeKind::MakeTuple { elements } => {
            if visit_operands(o, id, &elements) {
                return;
            }
            let mut values = Vec::with_capacity(elements.len());
            for &e in &elements {
                match o.tree.kind(e) {
                    NodeKind::Constant { value } => values.push(value.clone()),
                    _ => return,
                }
            }
            let loc = o.tree.loc(id);
            o.tree.replace_kind(
                id,
                NodeKind::Constant {
                    value: ConstantValue::Tuple(values),
                },
            );
            o.note(loc, ChangeTag::NewConstant, "folded constant tuple");
        }

        NodeKind::MakeList { elements } | NodeKind::MakeSet { elements } => {
            if visit_operands(o, id, &elements) {
                return;
            }
        }

        NodeKind::MakeDict { pairs } => {
            if visit_operands(o, id, &pairs) {
                return;
            }
        }

        NodeKind::DictPair { key, value } => {
            optimize_expression(o, key);
            if is_raise(o, key) {
                let loc = o.tree.loc(id);
                o.tree.replace_with_child(id, key);
                o.note(loc, ChangeTag::NewRaise, "dict key raises unconditionally");
                return;
            }
            optimize_expression(o, value);
            if is_raise(o, value) {
                let loc = o.tree.loc(id);
                if may_have_side_effects(o, key) {
                    o.tree.replace_kind(
                        id,
                        NodeKind::SideEffects {
                            side_effects: vec![key],
                            expression: value,
                        },
                    );
                } else {
                    o.tree.replace_with_child(id, value);
                }
                o.note(loc, ChangeTag::NewRaise, "dict value raises unconditionally");
            }
        }

        NodeKind::Yield { value } => {
            if let Some(value) = value {
                optimize_expression(o, value);
                if is_raise(o, value) {
                    let loc = o.tree.loc(id);
                    o.tree.replace_with_child(id, value);
                    o.note(loc, ChangeTag::NewRaise, "yielded value raises unconditionally");
                    return;
                }
            }
            // Arbitrary code runs while suspended, and the resumer can
            // throw anything in.
            o.col.on_control_flow_escape();
            o.col.on_exception_raise_exit(ExceptionKind::Any);
        }

        NodeKind::YieldFrom { source } => {
            optimize_expression(o, source);
            if is_raise(o, source) {
                let loc = o.tree.loc(id);
                o.tree.replace_with_child(id, source);
                o.note(loc, ChangeTag::NewRaise, "delegated source raises unconditionally");
                return;
            }
            o.col.on_control_flow_escape();
            o.col.on_exception_raise_exit(ExceptionKind::Any);
        }

        NodeKind::Await { awaited } => {
            optimize_expression(o, awaited);
            if is_raise(o, awaited) {
                let loc = o.tree.loc(id);
                o.tree.replace_with_child(id, awaited);
                o.note(loc, ChangeTag::NewRaise, "awaited value raises unconditionally");
                return;
            }
            o.col.on_control_flow_escape();
            o.col.on_exception_raise_exit(ExceptionKind::Any);
        }

        NodeKind::SideEffects {
            side_effects,
            expression,
        } => {
            for (i, &effect) in side_effects.iter().enumerate() {
                optimize_expression(o, effect);
                if is_raise(o, effect) {
                    let kept: Vec<NodeId> = side_effects[..i]
                        .iter()
                        .copied()
                        .filter(|&c| may_have_side_effects(o, c))
                        .collect();
                    let loc = o.tree.loc(id);
                    if kept.is_empty() {
                        o.tree.replace_with_child(id, effect);
                    } else {
                        o.tree.replace_kind(
                            id,
                            NodeKind::SideEffects {
                                side_effects: kept,
                                expression: effect,
                            },
                        );
                    }
                    o.note(loc, ChangeTag::NewRaise, "side effect raises unconditionally");
                    return;
                }
            }
            optimize_expression(o, expression);
            for &effect in &side_effects {
                if !may_have_side_effects(o, effect) {
                    let loc = o.tree.loc(effect);
                    o.tree.remove_child(id, effect);
                    o.note(loc, ChangeTag::NewExpression, "dropped inert effect");
                }
            }
            if let NodeKind::SideEffects { side_effects, .. } = o.tree.kind(id) {
                if side_effects.is_empty() {
                    let loc = o.tree.loc(id);
                    o.tree.replace_with_child(id, expression);
                    o.note(loc, ChangeTag::NewExpression, "collapsed effect wrapper");
                }
            }
        }

        NodeKind::RaiseExpression { kind, .. } => {
            o.col.on_exception_raise_exit(kind);
            o.col.set_aborting();
        }

        NodeKind::ModuleBody { .. }
        | NodeKind::Suite { .. }
        | NodeKind::ExpressionStatement { .. }
        | NodeKind::AssignVariable { .. }
        | NodeKind::UnpackAssign { .. }
        | NodeKind::AttributeAssign { .. }
        | NodeKind::AttributeDel { .. }
        | NodeKind::SubscriptAssign { .. }
        | NodeKind::SubscriptDel { .. }
        | NodeKind::DelVariable { .. }
        | NodeKind::IfStatement { .. }
        | NodeKind::WhileLoop { .. }
        | NodeKind::ForLoop { .. }
        | NodeKind::BreakLoop
        | NodeKind::ContinueLoop
        | NodeKind::ReturnStatement { .. }
        | NodeKind::RaiseStatement { .. }
        | NodeKind::TryExcept { .. }
        | NodeKind::ExceptHandler { .. }
        | NodeKind::TryFinally { .. }
        | NodeKind::AssertStatement { .. }
        | NodeKind::ImportModule { .. }
        | NodeKind::ImportName { .. }
        | NodeKind::FunctionDef { .. }
        | NodeKind::ClassDef { .. }
        | NodeKind::PassStatement => {
            o.tree.defect(Some(id), "statement kind in expression position")
        }
    }
}

/// Optimizes `operands` in evaluation order. When one of them proves to
/// raise, the node collapses to the raise (keeping earlier operands with
/// effects) and `true` is returned.
pub(crate) fn visit_operands(o: &mut Opt, parent: NodeId, operands: &[NodeId]) -> bool {
    for (i, &operand) in operands.iter().enumerate() {
        optimize_expression(o, operand);
        if is_raise(o, operand) {
            let kept: Vec<NodeId> = operands[..i]
                .iter()
                .copied()
                .filter(|&c| may_have_side_effects(o, c))
                .collect();
            let loc = o.tree.loc(parent);
            if kept.is_empty() {
                o.tree.replace_with_child(parent, operand);
            } else {
                o.tree.replace_kind(
                    parent,
                    NodeKind::SideEffects {
                        side_effects: kept,
                        expression: operand,
                    },
                );
            }
            o.note(loc, ChangeTag::NewRaise, "operand raises unconditionally");
            return true;
        }
    }
    false
}

/// Replaces an expression node with a static raise, keeping the listed
/// current children when they have observable effects.
pub(crate) fn raise_in_place(
    o: &mut Opt,
    id: NodeId,
    kind: ExceptionKind,
    message: String,
    operands: Vec<NodeId>,
) {
    let kept: Vec<NodeId> = operands
        .into_iter()
        .filter(|&c| may_have_side_effects(o, c))
        .collect();
    let loc = o.tree.loc(id);
    if kept.is_empty() {
        o.tree.replace_kind(id, NodeKind::RaiseExpression { kind, message });
    } else {
        let raise = o.tree.insert(NodeKind::RaiseExpression { kind, message }, loc);
        o.tree.replace_kind(
            id,
            NodeKind::SideEffects {
                side_effects: kept,
                expression: raise,
            },
        );
    }
    o.col.on_exception_raise_exit(kind);
    o.col.set_aborting();
    o.note(loc, ChangeTag::NewRaise, "operation proven impossible");
}

fn constant_pair(o: &Opt, left: NodeId, right: NodeId) -> Option<(ConstantValue, ConstantValue)> {
    match (o.tree.kind(left), o.tree.kind(right)) {
        (NodeKind::Constant { value: a }, NodeKind::Constant { value: b }) => {
            Some((a.clone(), b.clone()))
        }
        _ => None,
    }
}

pub(crate) fn shape_name(shape: TypeShape) -> &'static str {
    shape.exact.map(TypeId::name).unwrap_or("object")
}

fn binop_raise_message(op: BinOp, kind: ExceptionKind, a: &ConstantValue, b: &ConstantValue) -> String {
    match kind {
        ExceptionKind::ZeroDivisionError => "division by zero".to_string(),
        ExceptionKind::ValueError => "negative shift count".to_string(),
        _ => format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.name(),
            a.type_name(),
            b.type_name()
        ),
    }
}

/// Whether the operation is defined for the two shapes: `Yes` skips the
/// runtime type check, `No` licenses a static raise.
fn binop_capability(op: BinOp, left: TypeShape, right: TypeShape) -> Tri {
    let (l, r) = match (left.exact, right.exact) {
        (Some(l), Some(r)) => (l, r),
        _ => return Tri::Unknown,
    };
    use TypeId::*;
    let int_like = |t: TypeId| matches!(t, Bool | Int);
    let numeric = |t: TypeId| int_like(t) || t == Float;
    let sequence = |t: TypeId| matches!(t, Str | Bytes | Tuple | List);
    Tri::from_bool(match op {
        BinOp::Add => (numeric(l) && numeric(r)) || (l == r && sequence(l)),
        BinOp::Sub | BinOp::TrueDiv | BinOp::FloorDiv | BinOp::Pow => numeric(l) && numeric(r),
        BinOp::Mod => (numeric(l) && numeric(r)) || l == Str,
        BinOp::Mult => {
            (numeric(l) && numeric(r))
                || (sequence(l) && int_like(r))
                || (int_like(l) && sequence(r))
        }
        BinOp::LShift | BinOp::RShift => int_like(l) && int_like(r),
        BinOp::BitAnd | BinOp::BitXor => (int_like(l) && int_like(r)) || (l == Set && r == Set),
        BinOp::BitOr => {
            (int_like(l) && int_like(r)) || (l == Set && r == Set) || (l == Dict && r == Dict)
        }
    })
}

fn binop_possible_raises(op: BinOp, left: TypeShape) -> Vec<ExceptionKind> {
    match op {
        BinOp::TrueDiv | BinOp::FloorDiv | BinOp::Pow => vec![ExceptionKind::ZeroDivisionError],
        BinOp::Mod => {
            if left.exact == Some(TypeId::Str) {
                vec![
                    ExceptionKind::TypeError,
                    ExceptionKind::ValueError,
                    ExceptionKind::KeyError,
                ]
            } else {
                vec![ExceptionKind::ZeroDivisionError]
            }
        }
        BinOp::LShift | BinOp::RShift => vec![ExceptionKind::ValueError],
        _ => vec![],
    }
}

fn orderable(l: TypeId, r: TypeId) -> bool {
    use TypeId::*;
    let numeric = |t: TypeId| matches!(t, Bool | Int | Float);
    (numeric(l) && numeric(r))
        || (l == r && matches!(l, Str | Bytes | Tuple | List | Set))
}

/// Constant integer slice bound. `Ok(None)` for an absent bound,
/// `Err(Some(type))` for a constant non-integer (a static `TypeError`),
/// `Err(None)` for a non-constant bound.
fn slice_bound(o: &Opt, slot: Option<NodeId>) -> Result<Option<i64>, Option<&'static str>> {
    let node = match slot {
        None => return Ok(None),
        Some(node) => node,
    };
    match o.tree.kind(node) {
        NodeKind::Constant { value: ConstantValue::None } => Ok(None),
        NodeKind::Constant { value } => match value.as_bigint().and_then(|b| b.to_i64()) {
            Some(i) => Ok(Some(i)),
            None => Err(Some(value.type_name())),
        },
        _ => Err(None),
    }
}

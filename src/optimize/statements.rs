//! Per-kind rewrite rules for statement nodes.
//!
//! Statements are driven suite by suite: once the collection turns
//! aborting, the remaining statements of the suite are unreachable and
//! removed. A rule either keeps its (possibly rewritten) node or asks
//! the suite to drop it.

use std::collections::BTreeSet;

use crate::constant::ConstantValue;
use crate::exceptions::ExceptionKind;
use crate::shapes::{TypeId, Tri};
use crate::trace::TraceCollection;
use crate::tree::{NodeId, NodeKind};

use super::expressions::{optimize_expression, shape_name};
use super::{expr_shape, is_raise, may_have_side_effects, scan_assigned_vars, ChangeTag, Opt};

pub(crate) enum Outcome {
    Keep,
    Remove(&'static str),
}

pub(crate) fn optimize_suite(o: &mut Opt, suite: NodeId) {
    let statements = match o.tree.kind(suite) {
        NodeKind::Suite { statements } => statements.clone(),
        _ => o.tree.defect(Some(suite), "statement block is not a suite"),
    };
    for stmt in statements {
        if o.col.is_aborting() {
            let loc = o.tree.loc(stmt);
            o.tree.remove_child(suite, stmt);
            o.note(loc, ChangeTag::NewStatements, "removed unreachable statement");
            continue;
        }
        match optimize_statement(o, stmt) {
            Outcome::Keep => {}
            Outcome::Remove(reason) => {
                let loc = o.tree.loc(stmt);
                o.tree.remove_child(suite, stmt);
                o.note(loc, ChangeTag::NewStatements, reason);
            }
        }
    }
}

fn optimize_statement(o: &mut Opt, id: NodeId) -> Outcome {
    let kind = o.tree.kind(id).clone();
    match kind {
        NodeKind::PassStatement => Outcome::Remove("removed pass"),

        NodeKind::Suite { .. } => {
            optimize_suite(o, id);
            match o.tree.kind(id) {
                NodeKind::Suite { statements } if statements.is_empty() => {
                    Outcome::Remove("removed empty block")
                }
                _ => Outcome::Keep,
            }
        }

        NodeKind::ExpressionStatement { expression } => {
            optimize_expression(o, expression);
            if is_raise(o, expression) {
                let (kind, message) = raise_parts(o, expression);
                raise_stmt_in_place(o, id, &[], kind, message);
                return Outcome::Keep;
            }
            if !may_have_side_effects(o, expression) {
                return Outcome::Remove("removed effect-free statement");
            }
            Outcome::Keep
        }

        NodeKind::AssignVariable { var, source } => {
            optimize_expression(o, source);
            if is_raise(o, source) {
                let (kind, message) = raise_parts(o, source);
                raise_stmt_in_place(o, id, &[], kind, message);
                return Outcome::Keep;
            }
            let value = match o.tree.kind(source) {
                NodeKind::Constant { value } => Some(value.clone()),
                _ => None,
            };
            o.col.on_variable_assign(var, id, value);
            if o.scopes.foldable(var)
                && !o.ctx.locals_dict
                && o.reads.get(&var).copied().unwrap_or(0) == 0
                && !may_have_side_effects(o, source)
            {
                return Outcome::Remove("removed write to never-read variable");
            }
            Outcome::Keep
        }

        NodeKind::UnpackAssign { source, targets } => {
            optimize_expression(o, source);
            if is_raise(o, source) {
                let (kind, message) = raise_parts(o, source);
                raise_stmt_in_place(o, id, &[], kind, message);
                return Outcome::Keep;
            }
            if let NodeKind::Constant {
                value: ConstantValue::Tuple(elements),
            } = o.tree.kind(source)
            {
                let elements = elements.clone();
                if elements.len() != targets.len() {
                    let message = format!(
                        "cannot unpack {} values into {} targets",
                        elements.len(),
                        targets.len()
                    );
                    raise_stmt_in_place(o, id, &[], ExceptionKind::ValueError, message);
                    return Outcome::Keep;
                }
                let loc = o.tree.loc(id);
                let mut assigns = Vec::with_capacity(targets.len());
                for (&target, value) in targets.iter().zip(elements) {
                    let constant =
                        o.tree.insert(NodeKind::Constant { value: value.clone() }, loc);
                    let assign = o.tree.insert(
                        NodeKind::AssignVariable {
                            var: target,
                            source: constant,
                        },
                        loc,
                    );
                    o.col.on_variable_assign(target, assign, Some(value));
                    assigns.push(assign);
                }
                o.tree.replace_kind(id, NodeKind::Suite { statements: assigns });
                o.note(loc, ChangeTag::NewStatements, "unpacked constant sequence");
                return Outcome::Keep;
            }
            let shape = expr_shape(o, source);
            match shape.has_shape_iter() {
                Tri::No => {
                    let message =
                        format!("cannot unpack non-iterable '{}' object", shape_name(shape));
                    raise_stmt_in_place(o, id, &[source], ExceptionKind::TypeError, message);
                    return Outcome::Keep;
                }
                Tri::Yes => {
                    o.col.on_exception_raise_exit(ExceptionKind::ValueError);
                }
                Tri::Unknown => {
                    o.col.on_control_flow_escape();
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                    o.col.on_exception_raise_exit(ExceptionKind::ValueError);
                }
            }
            for &target in &targets {
                o.col.on_variable_assign(target, id, None);
            }
            Outcome::Keep
        }

        NodeKind::AttributeAssign { source, object, .. } => {
            if visit_stmt_operands(o, id, &[source, object]) {
                return Outcome::Keep;
            }
            match expr_shape(o, object).exact {
                Some(TypeId::Module | TypeId::Function) | None => {
                    o.col.on_control_flow_escape();
                    o.col.on_exception_raise_exit(ExceptionKind::AttributeError);
                }
                Some(ty) => {
                    // Builtin data types reject attribute assignment.
                    let message =
                        format!("'{}' object does not support attribute assignment", ty.name());
                    raise_stmt_in_place(
                        o,
                        id,
                        &[source, object],
                        ExceptionKind::AttributeError,
                        message,
                    );
                }
            }
            Outcome::Keep
        }

        NodeKind::AttributeDel { object, .. } => {
            if visit_stmt_operands(o, id, &[object]) {
                return Outcome::Keep;
            }
            match expr_shape(o, object).exact {
                Some(TypeId::Module | TypeId::Function) | None => {
                    o.col.on_control_flow_escape();
                    o.col.on_exception_raise_exit(ExceptionKind::AttributeError);
                }
                Some(ty) => {
                    let message =
                        format!("'{}' object does not support attribute deletion", ty.name());
                    raise_stmt_in_place(o, id, &[object], ExceptionKind::AttributeError, message);
                }
            }
            Outcome::Keep
        }

        NodeKind::SubscriptAssign {
            source,
            object,
            index,
        } => {
            if visit_stmt_operands(o, id, &[source, object, index]) {
                return Outcome::Keep;
            }
            match expr_shape(o, object).exact {
                Some(TypeId::List) => {
                    o.col.on_exception_raise_exit(ExceptionKind::IndexError);
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                }
                Some(TypeId::Dict) => {
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                }
                Some(ty) => {
                    let message =
                        format!("'{}' object does not support item assignment", ty.name());
                    raise_stmt_in_place(
                        o,
                        id,
                        &[source, object, index],
                        ExceptionKind::TypeError,
                        message,
                    );
                }
                None => {
                    o.col.on_control_flow_escape();
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                }
            }
            Outcome::Keep
        }

        NodeKind::SubscriptDel { object, index } => {
            if visit_stmt_operands(o, id, &[object, index]) {
                return Outcome::Keep;
            }
            match expr_shape(o, object).exact {
                Some(TypeId::List) => {
                    o.col.on_exception_raise_exit(ExceptionKind::IndexError);
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                }
                Some(TypeId::Dict) => {
                    o.col.on_exception_raise_exit(ExceptionKind::KeyError);
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                }
                Some(ty) => {
                    let message = format!("'{}' object does not support item deletion", ty.name());
                    raise_stmt_in_place(o, id, &[object, index], ExceptionKind::TypeError, message);
                }
                None => {
                    o.col.on_control_flow_escape();
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                }
            }
            Outcome::Keep
        }

        NodeKind::DelVariable { var } => {
            if o.ctx.locals_dict {
                o.col.on_exception_raise_exit(ExceptionKind::NameError);
            } else if !o.col.proven_assigned(var) {
                let kind = if o.scopes.variable(var).is_module_level() {
                    ExceptionKind::NameError
                } else {
                    ExceptionKind::UnboundLocalError
                };
                o.col.on_exception_raise_exit(kind);
            }
            o.col.on_variable_del(var);
            Outcome::Keep
        }

        NodeKind::IfStatement {
            condition,
            then_branch,
            else_branch,
        } => {
            optimize_expression(o, condition);
            if is_raise(o, condition) {
                let (kind, message) = raise_parts(o, condition);
                raise_stmt_in_place(o, id, &[], kind, message);
                return Outcome::Keep;
            }
            if let NodeKind::Constant { value } = o.tree.kind(condition) {
                let truthy = value.truthy();
                let loc = o.tree.loc(id);
                return if truthy {
                    o.tree.replace_with_child(id, then_branch);
                    o.note(loc, ChangeTag::NewStatements, "kept always-taken branch");
                    optimize_statement(o, id)
                } else if let Some(else_branch) = else_branch {
                    o.tree.replace_with_child(id, else_branch);
                    o.note(loc, ChangeTag::NewStatements, "kept always-taken branch");
                    optimize_statement(o, id)
                } else {
                    Outcome::Remove("removed never-taken branch")
                };
            }
            if !expr_shape(o, condition).has_shape_bool().is_yes() {
                o.col.on_control_flow_escape();
                o.col.on_exception_raise_exit(ExceptionKind::TypeError);
            }
            let then_col = o.fork_run(|o| optimize_suite(o, then_branch));
            let else_col = o.fork_run(|o| {
                if let Some(else_branch) = else_branch {
                    optimize_suite(o, else_branch);
                }
            });
            o.col.merge(vec![then_col, else_col]);
            Outcome::Keep
        }

        NodeKind::WhileLoop { condition, body } => {
            let mut assigned = BTreeSet::new();
            scan_assigned_vars(o.tree, body, &mut assigned);

            // Widen: loop-carried bindings are unknown when the condition
            // and body are seen again on later iterations.
            let widened = o.col.fork();
            let saved = std::mem::replace(&mut o.col, widened);
            for &var in &assigned {
                o.col.remove_knowledge(var);
            }
            optimize_expression(o, condition);
            if is_raise(o, condition) {
                let (kind, message) = raise_parts(o, condition);
                let branch = std::mem::replace(&mut o.col, saved);
                o.col.merge(vec![branch]);
                raise_stmt_in_place(o, id, &[], kind, message);
                return Outcome::Keep;
            }
            if !expr_shape(o, condition).has_shape_bool().is_yes() {
                o.col.on_control_flow_escape();
                o.col.on_exception_raise_exit(ExceptionKind::TypeError);
            }
            if let NodeKind::Constant { value } = o.tree.kind(condition) {
                if !value.truthy() {
                    o.col = saved;
                    return Outcome::Remove("removed loop with false condition");
                }
            }
            let header = o.col.fork();
            optimize_suite(o, body);
            let after_body = std::mem::replace(&mut o.col, saved);
            o.col.merge(vec![header, after_body]);
            Outcome::Keep
        }

        NodeKind::ForLoop {
            iterable,
            target,
            body,
        } => {
            optimize_expression(o, iterable);
            if is_raise(o, iterable) {
                let (kind, message) = raise_parts(o, iterable);
                raise_stmt_in_place(o, id, &[], kind, message);
                return Outcome::Keep;
            }
            let shape = expr_shape(o, iterable);
            match shape.has_shape_iter() {
                Tri::No => {
                    let message = format!("'{}' object is not iterable", shape_name(shape));
                    raise_stmt_in_place(o, id, &[iterable], ExceptionKind::TypeError, message);
                    return Outcome::Keep;
                }
                Tri::Yes => {}
                Tri::Unknown => {
                    o.col.on_control_flow_escape();
                    o.col.on_exception_raise_exit(ExceptionKind::TypeError);
                }
            }
            if let NodeKind::Constant { value } = o.tree.kind(iterable) {
                if value.len() == Some(0) {
                    return Outcome::Remove("removed loop over empty sequence");
                }
            }
            let mut assigned = BTreeSet::new();
            assigned.insert(target);
            scan_assigned_vars(o.tree, body, &mut assigned);

            let zero = o.col.fork();
            let widened = o.col.fork();
            let saved = std::mem::replace(&mut o.col, widened);
            for &var in &assigned {
                o.col.remove_knowledge(var);
            }
            o.col.on_variable_assign(target, id, None);
            optimize_suite(o, body);
            let after_body = std::mem::replace(&mut o.col, saved);
            o.col.merge(vec![zero, after_body]);
            Outcome::Keep
        }

        NodeKind::BreakLoop | NodeKind::ContinueLoop => {
            o.col.set_aborting();
            Outcome::Keep
        }

        NodeKind::ReturnStatement { value } => {
            if let Some(value) = value {
                optimize_expression(o, value);
                if is_raise(o, value) {
                    let (kind, message) = raise_parts(o, value);
                    raise_stmt_in_place(o, id, &[], kind, message);
                    return Outcome::Keep;
                }
            }
            o.col.set_aborting();
            Outcome::Keep
        }

        NodeKind::RaiseStatement { value, kind, .. } => {
            if let Some(value) = value {
                optimize_expression(o, value);
                if is_raise(o, value) {
                    // Building the exception object already raises.
                    let (kind, message) = raise_parts(o, value);
                    raise_stmt_in_place(o, id, &[], kind, message);
                    return Outcome::Keep;
                }
            }
            o.col
                .on_exception_raise_exit(kind.unwrap_or(ExceptionKind::Any));
            o.col.set_aborting();
            Outcome::Keep
        }

        NodeKind::TryExcept { body, handlers } => {
            let pre = o.col.fork();
            let mut protected = pre.fork();
            protected.isolate_exceptions();
            let saved = std::mem::replace(&mut o.col, protected);
            optimize_suite(o, body);
            let mut body_out = std::mem::replace(&mut o.col, saved);

            let raised: Vec<ExceptionKind> =
                body_out.exception_exits().iter().copied().collect();
            if raised.is_empty() {
                let loc = o.tree.loc(id);
                o.tree.replace_with_child(id, body);
                o.note(loc, ChangeTag::NewStatements, "removed handlers for raise-free body");
                o.col.merge(vec![body_out]);
                return Outcome::Keep;
            }

            // Handlers observe an interrupted body: its bindings are
            // unreliable.
            let mut handler_entry = pre.fork();
            let mut assigned = BTreeSet::new();
            scan_assigned_vars(o.tree, body, &mut assigned);
            for &var in &assigned {
                handler_entry.remove_knowledge(var);
            }
            if body_out.control_escaped() {
                handler_entry.on_control_flow_escape();
            }

            let mut uncaught = raised;
            let mut branches: Vec<TraceCollection> = Vec::new();
            for handler in handlers {
                let handler_kind = match o.tree.kind(handler) {
                    NodeKind::ExceptHandler { kind, .. } => *kind,
                    _ => o.tree.defect(Some(handler), "handler list holds a non-handler"),
                };
                let reachable = uncaught.iter().any(|&k| match handler_kind {
                    None => true,
                    Some(h) => h.catches(k) || k == ExceptionKind::Any,
                });
                if !reachable {
                    let loc = o.tree.loc(handler);
                    o.tree.remove_child(id, handler);
                    o.note(loc, ChangeTag::NewStatements, "removed unreachable handler");
                    continue;
                }
                uncaught.retain(|&k| match handler_kind {
                    None => false,
                    Some(h) => !(h.catches(k) && k != ExceptionKind::Any),
                });
                let handler_body = match o.tree.kind(handler) {
                    NodeKind::ExceptHandler { body, .. } => *body,
                    _ => o.tree.defect(Some(handler), "handler list holds a non-handler"),
                };
                let entry = handler_entry.fork();
                let saved = std::mem::replace(&mut o.col, entry);
                optimize_suite(o, handler_body);
                branches.push(std::mem::replace(&mut o.col, saved));
            }

            // Only unhandled kinds escape the construct.
            body_out.retain_exceptions(|k| uncaught.contains(k));
            branches.insert(0, body_out);

            if matches!(o.tree.kind(id), NodeKind::TryExcept { handlers, .. } if handlers.is_empty())
            {
                let loc = o.tree.loc(id);
                o.tree.replace_with_child(id, body);
                o.note(loc, ChangeTag::NewStatements, "removed handlers that match nothing");
            }
            o.col.merge(branches);
            Outcome::Keep
        }

        NodeKind::ExceptHandler { .. } => {
            o.tree.defect(Some(id), "handler outside a try construct")
        }

        NodeKind::TryFinally { body, final_body } => {
            let pre = o.col.fork();
            let saved = std::mem::replace(&mut o.col, pre.fork());
            optimize_suite(o, body);
            let body_out = std::mem::replace(&mut o.col, saved);

            // The final block runs on both the normal and the exception
            // path; it sees degraded bindings.
            let mut fin_entry = pre.fork();
            let mut assigned = BTreeSet::new();
            scan_assigned_vars(o.tree, body, &mut assigned);
            for &var in &assigned {
                fin_entry.remove_knowledge(var);
            }
            if body_out.control_escaped() {
                fin_entry.on_control_flow_escape();
            }
            for &kind in body_out.exception_exits() {
                fin_entry.on_exception_raise_exit(kind);
            }

            let saved = std::mem::replace(&mut o.col, fin_entry);
            optimize_suite(o, final_body);
            let mut fin_out = std::mem::replace(&mut o.col, saved);
            if body_out.is_aborting() {
                fin_out.set_aborting();
            }
            o.col.merge(vec![fin_out]);
            Outcome::Keep
        }

        NodeKind::AssertStatement { condition, message } => {
            if o.ctx.strip_asserts {
                // Condition and message are never evaluated when stripped.
                return Outcome::Remove("stripped assertion");
            }
            optimize_expression(o, condition);
            if is_raise(o, condition) {
                let (kind, message) = raise_parts(o, condition);
                raise_stmt_in_place(o, id, &[], kind, message);
                return Outcome::Keep;
            }
            if let NodeKind::Constant { value } = o.tree.kind(condition) {
                if value.truthy() {
                    return Outcome::Remove("removed always-true assertion");
                }
                let loc = o.tree.loc(id);
                o.tree.replace_kind(
                    id,
                    NodeKind::RaiseStatement {
                        value: message,
                        kind: Some(ExceptionKind::AssertionError),
                        message: String::new(),
                    },
                );
                o.col.on_exception_raise_exit(ExceptionKind::AssertionError);
                o.col.set_aborting();
                o.note(loc, ChangeTag::NewRaise, "assertion proven to fail");
                return Outcome::Keep;
            }
            if !expr_shape(o, condition).has_shape_bool().is_yes() {
                o.col.on_control_flow_escape();
                o.col.on_exception_raise_exit(ExceptionKind::TypeError);
            }
            if let Some(message) = message {
                let failing = o.fork_run(|o| optimize_expression(o, message));
                let passing = o.col.fork();
                o.col.merge(vec![passing, failing]);
            }
            o.col.on_exception_raise_exit(ExceptionKind::AssertionError);
            Outcome::Keep
        }

        NodeKind::ImportModule { module, target } => {
            use crate::trust::ImportFact;
            match o.ctx.trust.module_fact(&module) {
                ImportFact::SafeExists | ImportFact::SafeKnownValue(_) => {
                    o.col.on_variable_assign(
                        target,
                        id,
                        Some(ConstantValue::ImportedModule(module)),
                    );
                }
                ImportFact::MayNotExist => {
                    o.col.on_exception_raise_exit(ExceptionKind::ImportError);
                    o.col.on_variable_assign(target, id, None);
                }
                ImportFact::RuntimeOnly => {
                    // Importing runs the module's own top-level code.
                    o.col.on_control_flow_escape();
                    o.col.on_exception_raise_exit(ExceptionKind::ImportError);
                    o.col.on_variable_assign(target, id, None);
                }
            }
            Outcome::Keep
        }

        NodeKind::ImportName {
            module,
            name,
            target,
        } => {
            use crate::trust::ImportFact;
            match o.ctx.trust.attribute_fact(&module, &name) {
                ImportFact::SafeKnownValue(value) => {
                    let loc = o.tree.loc(id);
                    let constant = o.tree.insert(NodeKind::Constant { value: value.clone() }, loc);
                    o.tree.replace_kind(
                        id,
                        NodeKind::AssignVariable {
                            var: target,
                            source: constant,
                        },
                    );
                    o.col.on_variable_assign(target, id, Some(value));
                    o.note(loc, ChangeTag::NewStatements, "resolved trusted import to constant");
                }
                ImportFact::SafeExists => {
                    o.col.on_variable_assign(target, id, None);
                }
                ImportFact::MayNotExist => {
                    o.col.on_exception_raise_exit(ExceptionKind::ImportError);
                    o.col.on_variable_assign(target, id, None);
                }
                ImportFact::RuntimeOnly => {
                    o.col.on_control_flow_escape();
                    o.col.on_exception_raise_exit(ExceptionKind::ImportError);
                    o.col.on_variable_assign(target, id, None);
                }
            }
            Outcome::Keep
        }

        NodeKind::FunctionDef {
            scope,
            target,
            defaults,
            body,
            ..
        } => {
            if visit_stmt_operands(o, id, &defaults) {
                return Outcome::Keep;
            }
            // The body runs at call time, against its own collection.
            let saved_col = std::mem::replace(&mut o.col, TraceCollection::new());
            let saved_reads =
                std::mem::replace(&mut o.reads, super::scan_variable_reads(o.tree, body));
            for parameter in o.scopes.parameters(scope) {
                o.col.on_variable_assign(parameter, body, None);
            }
            optimize_suite(o, body);
            o.reads = saved_reads;
            o.col = saved_col;
            o.col.on_variable_assign(target, id, None);
            Outcome::Keep
        }

        NodeKind::ClassDef {
            target, bases, body, ..
        } => {
            if visit_stmt_operands(o, id, &bases) {
                return Outcome::Keep;
            }
            // The class body executes on the spot, in its own scope but
            // on this control path.
            let saved_reads =
                std::mem::replace(&mut o.reads, super::scan_variable_reads(o.tree, body));
            optimize_suite(o, body);
            o.reads = saved_reads;
            // Class creation dispatches through the metaclass machinery.
            o.col.on_control_flow_escape();
            o.col.on_exception_raise_exit(ExceptionKind::Any);
            o.col.on_variable_assign(target, id, None);
            Outcome::Keep
        }

        NodeKind::ModuleBody { .. } => {
            o.tree.defect(Some(id), "nested module body")
        }

        NodeKind::Constant { .. }
        | NodeKind::VariableRef { .. }
        | NodeKind::BinaryOp { .. }
        | NodeKind::UnaryOp { .. }
        | NodeKind::Comparison { .. }
        | NodeKind::BoolOp { .. }
        | NodeKind::NotOp { .. }
        | NodeKind::Conditional { .. }
        | NodeKind::Call { .. }
        | NodeKind::KeywordArg { .. }
        | NodeKind::AttributeRef { .. }
        | NodeKind::Subscript { .. }
        | NodeKind::SliceRef { .. }
        | NodeKind::MakeTuple { .. }
        | NodeKind::MakeList { .. }
        | NodeKind::MakeSet { .. }
        | NodeKind::MakeDict { .. }
        | NodeKind::DictPair { .. }
        | NodeKind::Yield { .. }
        | NodeKind::YieldFrom { .. }
        | NodeKind::Await { .. }
        | NodeKind::SideEffects { .. }
        | NodeKind::RaiseExpression { .. } => {
            o.tree.defect(Some(id), "expression kind in statement position")
        }
    }
}

/// Optimizes the expression operands of a statement in evaluation order;
/// when one proves to raise, the statement collapses to a raise that
/// keeps the earlier operands with effects, and `true` is returned.
fn visit_stmt_operands(o: &mut Opt, id: NodeId, operands: &[NodeId]) -> bool {
    for (i, &operand) in operands.iter().enumerate() {
        optimize_expression(o, operand);
        if is_raise(o, operand) {
            let (kind, message) = raise_parts(o, operand);
            let prior: Vec<NodeId> = operands[..i].to_vec();
            raise_stmt_in_place(o, id, &prior, kind, message);
            return true;
        }
    }
    false
}

/// Replaces a statement with an unconditional raise, keeping the listed
/// already-evaluated children as expression statements when they have
/// observable effects.
fn raise_stmt_in_place(
    o: &mut Opt,
    id: NodeId,
    prior: &[NodeId],
    kind: ExceptionKind,
    message: String,
) {
    let loc = o.tree.loc(id);
    let mut kept = Vec::new();
    for &child in prior {
        if may_have_side_effects(o, child) {
            o.tree.steal_child(id, child);
            let child_loc = o.tree.loc(child);
            kept.push(
                o.tree
                    .insert(NodeKind::ExpressionStatement { expression: child }, child_loc),
            );
        }
    }
    if kept.is_empty() {
        o.tree.replace_kind(
            id,
            NodeKind::RaiseStatement {
                value: None,
                kind: Some(kind),
                message,
            },
        );
    } else {
        let raise = o.tree.insert(
            NodeKind::RaiseStatement {
                value: None,
                kind: Some(kind),
                message,
            },
            loc,
        );
        kept.push(raise);
        o.tree.replace_kind(id, NodeKind::Suite { statements: kept });
    }
    o.col.on_exception_raise_exit(kind);
    o.col.set_aborting();
    o.note(loc, ChangeTag::NewRaise, "statement proven to raise");
}

/// The kind and diagnostic text of a proven raise expression.
fn raise_parts(o: &Opt, id: NodeId) -> (ExceptionKind, String) {
    match o.tree.kind(id) {
        NodeKind::RaiseExpression { kind, message } => (*kind, message.clone()),
        _ => o.tree.defect(Some(id), "expected a proven raise"),
    }
}

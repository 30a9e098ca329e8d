mod common;

use common::*;
use pyrite::constant::ConstantValue;
use pyrite::exceptions::ExceptionKind;
use pyrite::location::SourceLoc;
use pyrite::optimize::{optimize_module, OptimizeContext};
use pyrite::scopes::{ScopeKind, ScopeTree};
use pyrite::tree::{BinOp, NodeKind, Tree};

#[test]
fn impossible_operation_becomes_typed_raise() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // x = 1 + []
    let scope = scopes.add_scope(ScopeKind::Module, None);
    let x = scopes.variable_for_assignment(scope, "x");
    let one = int(&mut tree, 1);
    let list = tree.insert(NodeKind::MakeList { elements: vec![] }, SourceLoc::default());
    let sum = binop(&mut tree, BinOp::Add, one, list);
    let stmt = assign(&mut tree, x, sum);
    let body = suite(&mut tree, vec![stmt]);
    let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());

    let ctx = OptimizeContext::new("m");
    optimize_module(&mut tree, root, &mut scopes, &ctx);

    let statements = module_statements(&tree, root);
    assert_eq!(statements.len(), 1);
    match tree.kind(statements[0]) {
        NodeKind::RaiseStatement { kind, .. } => {
            assert_eq!(*kind, Some(ExceptionKind::TypeError));
        }
        other => panic!("expected a raise, found {}", other.label()),
    }
    tree.assert_well_formed(root);
}

#[test]
fn proven_raise_statement_keeps_the_diagnostic_text() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // x = 1 / 0
    let scope = scopes.add_scope(ScopeKind::Module, None);
    let x = scopes.variable_for_assignment(scope, "x");
    let one = int(&mut tree, 1);
    let zero = int(&mut tree, 0);
    let div = binop(&mut tree, BinOp::TrueDiv, one, zero);
    let stmt = assign(&mut tree, x, div);
    let body = suite(&mut tree, vec![stmt]);
    let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());

    let ctx = OptimizeContext::new("m");
    optimize_module(&mut tree, root, &mut scopes, &ctx);

    let statements = module_statements(&tree, root);
    assert_eq!(statements.len(), 1);
    match tree.kind(statements[0]) {
        NodeKind::RaiseStatement { kind, message, .. } => {
            assert_eq!(*kind, Some(ExceptionKind::ZeroDivisionError));
            assert_eq!(message, "division by zero");
        }
        other => panic!("expected a raise, found {}", other.label()),
    }
    tree.assert_well_formed(root);
}

#[test]
fn effectful_operand_survives_next_to_the_raise() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // 1 + [m]   where m is a late-bound module name: building the list
    // can raise NameError and must keep evaluating before the TypeError.
    let scope = scopes.add_scope(ScopeKind::Module, None);
    let m = scopes.variable_for_assignment(scope, "m");
    let one = int(&mut tree, 1);
    let rm = read(&mut tree, m);
    let list = tree.insert(
        NodeKind::MakeList { elements: vec![rm] },
        SourceLoc::default(),
    );
    let sum = binop(&mut tree, BinOp::Add, one, list);
    let stmt = expr_stmt(&mut tree, sum);
    let body = suite(&mut tree, vec![stmt]);
    let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());

    let ctx = OptimizeContext::new("m");
    optimize_module(&mut tree, root, &mut scopes, &ctx);

    match tree.kind(sum) {
        NodeKind::SideEffects {
            side_effects,
            expression,
        } => {
            assert_eq!(side_effects.len(), 1);
            assert!(matches!(tree.kind(side_effects[0]), NodeKind::MakeList { .. }));
            match tree.kind(*expression) {
                NodeKind::RaiseExpression { kind, .. } => {
                    assert_eq!(*kind, ExceptionKind::TypeError);
                }
                other => panic!("expected a raise expression, found {}", other.label()),
            }
        }
        other => panic!("expected retained effects, found {}", other.label()),
    }
    tree.assert_well_formed(root);
}

#[test]
fn constant_subscript_folds_or_raises_by_bounds() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // a = (10, 20, 30)[1]
    // b = (10, 20, 30)[5]
    let scope = scopes.add_scope(ScopeKind::Module, None);
    let a = scopes.variable_for_assignment(scope, "a");
    let b = scopes.variable_for_assignment(scope, "b");
    let tuple_value = ConstantValue::Tuple(vec![
        ConstantValue::int(10),
        ConstantValue::int(20),
        ConstantValue::int(30),
    ]);

    let t1 = constant(&mut tree, tuple_value.clone());
    let i1 = int(&mut tree, 1);
    let good = tree.insert(
        NodeKind::Subscript {
            object: t1,
            index: i1,
        },
        SourceLoc::default(),
    );
    let s1 = assign(&mut tree, a, good);

    let t2 = constant(&mut tree, tuple_value);
    let i2 = int(&mut tree, 5);
    let bad = tree.insert(
        NodeKind::Subscript {
            object: t2,
            index: i2,
        },
        SourceLoc::default(),
    );
    let s2 = assign(&mut tree, b, bad);

    let body = suite(&mut tree, vec![s1, s2]);
    let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());

    let ctx = OptimizeContext::new("m");
    optimize_module(&mut tree, root, &mut scopes, &ctx);

    let statements = module_statements(&tree, root);
    assert_eq!(statements.len(), 2);
    match tree.kind(statements[0]) {
        NodeKind::AssignVariable { source, .. } => match tree.kind(*source) {
            NodeKind::Constant { value } => assert_eq!(*value, ConstantValue::int(20)),
            other => panic!("in-range subscript did not fold: {}", other.label()),
        },
        other => panic!("assignment was rewritten to {}", other.label()),
    }
    match tree.kind(statements[1]) {
        NodeKind::RaiseStatement { kind, .. } => {
            assert_eq!(*kind, Some(ExceptionKind::IndexError));
        }
        other => panic!("out-of-range subscript kept {}", other.label()),
    }
    tree.assert_well_formed(root);
}

#[test]
fn unreachable_handler_is_removed_and_caught_kind_does_not_escape() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // try:
    //     x = 1 / 0
    // except ZeroDivisionError:
    //     x = 0
    // except IndexError:        (unreachable)
    //     x = 1
    let scope = scopes.add_scope(ScopeKind::Module, None);
    let x = scopes.variable_for_assignment(scope, "x");

    let one = int(&mut tree, 1);
    let zero = int(&mut tree, 0);
    let div = binop(&mut tree, BinOp::TrueDiv, one, zero);
    let s = assign(&mut tree, x, div);
    let try_body = suite(&mut tree, vec![s]);

    let z = int(&mut tree, 0);
    let h1_assign = assign(&mut tree, x, z);
    let h1_body = suite(&mut tree, vec![h1_assign]);
    let h1 = tree.insert(
        NodeKind::ExceptHandler {
            kind: Some(ExceptionKind::ZeroDivisionError),
            body: h1_body,
        },
        SourceLoc::default(),
    );

    let o = int(&mut tree, 1);
    let h2_assign = assign(&mut tree, x, o);
    let h2_body = suite(&mut tree, vec![h2_assign]);
    let h2 = tree.insert(
        NodeKind::ExceptHandler {
            kind: Some(ExceptionKind::IndexError),
            body: h2_body,
        },
        SourceLoc::default(),
    );

    let te = tree.insert(
        NodeKind::TryExcept {
            body: try_body,
            handlers: vec![h1, h2],
        },
        SourceLoc::default(),
    );
    let body = suite(&mut tree, vec![te]);
    let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());

    let ctx = OptimizeContext::new("m");
    optimize_module(&mut tree, root, &mut scopes, &ctx);

    match tree.kind(te) {
        NodeKind::TryExcept { handlers, .. } => {
            assert_eq!(handlers.len(), 1);
            match tree.kind(handlers[0]) {
                NodeKind::ExceptHandler { kind, .. } => {
                    assert_eq!(*kind, Some(ExceptionKind::ZeroDivisionError));
                }
                other => panic!("handler slot holds {}", other.label()),
            }
        }
        other => panic!("try construct became {}", other.label()),
    }
    tree.assert_well_formed(root);
}

mod common;

use common::*;
use pyrite::constant::ConstantValue;
use pyrite::exceptions::ExceptionKind;
use pyrite::location::SourceLoc;
use pyrite::optimize::{optimize_module, OptimizeContext};
use pyrite::scopes::{FunctionFlavor, ScopeKind, ScopeTree};
use pyrite::tree::{BinOp, NodeKind, Tree};

#[test]
fn arithmetic_on_constants_folds_into_assignment() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // x = 2 + 3
    let scope = scopes.add_scope(ScopeKind::Module, None);
    let x = scopes.variable_for_assignment(scope, "x");
    let two = int(&mut tree, 2);
    let three = int(&mut tree, 3);
    let sum = binop(&mut tree, BinOp::Add, two, three);
    let stmt = assign(&mut tree, x, sum);
    let body = suite(&mut tree, vec![stmt]);
    let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());

    let ctx = OptimizeContext::new("m");
    let stats = optimize_module(&mut tree, root, &mut scopes, &ctx);
    assert!(stats.replacements >= 1);

    let statements = module_statements(&tree, root);
    assert_eq!(statements.len(), 1);
    match tree.kind(statements[0]) {
        NodeKind::AssignVariable { source, .. } => match tree.kind(*source) {
            NodeKind::Constant { value } => assert_eq!(*value, ConstantValue::int(5)),
            other => panic!("source did not fold: {}", other.label()),
        },
        other => panic!("assignment was rewritten to {}", other.label()),
    }
    tree.assert_well_formed(root);
}

#[test]
fn effect_free_expression_statement_disappears() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // 2 + 3 * 4
    let three = int(&mut tree, 3);
    let four = int(&mut tree, 4);
    let product = binop(&mut tree, BinOp::Mult, three, four);
    let two = int(&mut tree, 2);
    let sum = binop(&mut tree, BinOp::Add, two, product);
    let stmt = expr_stmt(&mut tree, sum);
    let (root, _) = module(&mut scopes, &mut tree, vec![stmt]);

    let ctx = OptimizeContext::new("m");
    optimize_module(&mut tree, root, &mut scopes, &ctx);
    assert!(module_statements(&tree, root).is_empty());
    tree.assert_well_formed(root);
}

#[test]
fn division_by_zero_becomes_static_raise_and_cuts_the_suite() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // x = 1 / 0
    // x = 7        (unreachable)
    let scope = scopes.add_scope(ScopeKind::Module, None);
    let x = scopes.variable_for_assignment(scope, "x");
    let one = int(&mut tree, 1);
    let zero = int(&mut tree, 0);
    let div = binop(&mut tree, BinOp::TrueDiv, one, zero);
    let s1 = assign(&mut tree, x, div);
    let seven = int(&mut tree, 7);
    let s2 = assign(&mut tree, x, seven);
    let body = suite(&mut tree, vec![s1, s2]);
    let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());

    let ctx = OptimizeContext::new("m");
    optimize_module(&mut tree, root, &mut scopes, &ctx);

    let statements = module_statements(&tree, root);
    assert_eq!(statements.len(), 1);
    match tree.kind(statements[0]) {
        NodeKind::RaiseStatement { kind, .. } => {
            assert_eq!(*kind, Some(ExceptionKind::ZeroDivisionError));
        }
        other => panic!("expected a raise, found {}", other.label()),
    }
    tree.assert_well_formed(root);
}

#[test]
fn conditional_decided_by_constant_condition() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // x = 1 if True else (2 / 0)
    let scope = scopes.add_scope(ScopeKind::Module, None);
    let x = scopes.variable_for_assignment(scope, "x");
    let cond = constant(&mut tree, ConstantValue::Bool(true));
    let then_value = int(&mut tree, 1);
    let two = int(&mut tree, 2);
    let zero = int(&mut tree, 0);
    let else_value = binop(&mut tree, BinOp::TrueDiv, two, zero);
    let pick = tree.insert(
        NodeKind::Conditional {
            condition: cond,
            then_value,
            else_value,
        },
        SourceLoc::default(),
    );
    let stmt = assign(&mut tree, x, pick);
    let body = suite(&mut tree, vec![stmt]);
    let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());

    let ctx = OptimizeContext::new("m");
    optimize_module(&mut tree, root, &mut scopes, &ctx);

    let statements = module_statements(&tree, root);
    match tree.kind(statements[0]) {
        NodeKind::AssignVariable { source, .. } => match tree.kind(*source) {
            NodeKind::Constant { value } => assert_eq!(*value, ConstantValue::int(1)),
            other => panic!("conditional did not fold: {}", other.label()),
        },
        other => panic!("assignment was rewritten to {}", other.label()),
    }
    tree.assert_well_formed(root);
}

#[test]
fn local_constants_propagate_through_a_function_body() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // def f():
    //     a = 2
    //     b = a + 3
    //     return b
    let module_scope = scopes.add_scope(ScopeKind::Module, None);
    let fscope = scopes.add_scope(
        ScopeKind::Function(FunctionFlavor::Plain),
        Some(module_scope),
    );
    let f = scopes.variable_for_assignment(module_scope, "f");
    let a = scopes.variable_for_assignment(fscope, "a");
    let b = scopes.variable_for_assignment(fscope, "b");

    let two = int(&mut tree, 2);
    let s1 = assign(&mut tree, a, two);
    let ra = read(&mut tree, a);
    let three = int(&mut tree, 3);
    let sum = binop(&mut tree, BinOp::Add, ra, three);
    let s2 = assign(&mut tree, b, sum);
    let rb = read(&mut tree, b);
    let s3 = ret(&mut tree, rb);
    let fbody = suite(&mut tree, vec![s1, s2, s3]);
    let def = tree.insert(
        NodeKind::FunctionDef {
            name: "f".to_string(),
            scope: fscope,
            flavor: FunctionFlavor::Plain,
            target: f,
            defaults: vec![],
            body: fbody,
        },
        SourceLoc::default(),
    );
    let body = suite(&mut tree, vec![def]);
    let root = tree.insert(
        NodeKind::ModuleBody {
            scope: module_scope,
            body,
        },
        SourceLoc::default(),
    );

    let ctx = OptimizeContext::new("m");
    optimize_module(&mut tree, root, &mut scopes, &ctx);

    // Both stores are dead once every read folded; only the return stays.
    let statements = match tree.kind(fbody) {
        NodeKind::Suite { statements } => statements.clone(),
        other => panic!("function body became {}", other.label()),
    };
    assert_eq!(statements.len(), 1);
    match tree.kind(statements[0]) {
        NodeKind::ReturnStatement { value: Some(value) } => match tree.kind(*value) {
            NodeKind::Constant { value } => assert_eq!(*value, ConstantValue::int(5)),
            other => panic!("return value did not fold: {}", other.label()),
        },
        other => panic!("expected a return, found {}", other.label()),
    }
    tree.assert_well_formed(root);
}

#[test]
fn constant_tuple_unpacks_into_individual_assignments() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // a, b = (1, 2)
    let scope = scopes.add_scope(ScopeKind::Module, None);
    let a = scopes.variable_for_assignment(scope, "a");
    let b = scopes.variable_for_assignment(scope, "b");
    let one = int(&mut tree, 1);
    let two = int(&mut tree, 2);
    let pair = tree.insert(
        NodeKind::MakeTuple {
            elements: vec![one, two],
        },
        SourceLoc::default(),
    );
    let unpack = tree.insert(
        NodeKind::UnpackAssign {
            source: pair,
            targets: vec![a, b],
        },
        SourceLoc::default(),
    );
    let body = suite(&mut tree, vec![unpack]);
    let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());

    let ctx = OptimizeContext::new("m");
    optimize_module(&mut tree, root, &mut scopes, &ctx);

    match tree.kind(unpack) {
        NodeKind::Suite { statements } => {
            assert_eq!(statements.len(), 2);
            for &s in statements {
                assert!(matches!(tree.kind(s), NodeKind::AssignVariable { .. }));
            }
        }
        other => panic!("unpack did not expand: {}", other.label()),
    }
    tree.assert_well_formed(root);
}

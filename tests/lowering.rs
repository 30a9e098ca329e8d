mod common;

use common::*;
use pyrite::compile_module;
use pyrite::location::SourceLoc;
use pyrite::lower::{ExitAction, LowOp};
use pyrite::optimize::OptimizeContext;
use pyrite::scopes::{FunctionFlavor, ScopeKind, ScopeTree};
use pyrite::tree::{NodeKind, Tree};

#[test]
fn generator_gets_a_state_machine_with_live_sets() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // def g():
    //     x = 1
    //     yield x
    //     return x
    let module_scope = scopes.add_scope(ScopeKind::Module, None);
    let gscope = scopes.add_scope(
        ScopeKind::Function(FunctionFlavor::Generator),
        Some(module_scope),
    );
    let g = scopes.variable_for_assignment(module_scope, "g");
    let x = scopes.variable_for_assignment(gscope, "x");

    let one = int(&mut tree, 1);
    let s1 = assign(&mut tree, x, one);
    let rx = read(&mut tree, x);
    let y = tree.insert(NodeKind::Yield { value: Some(rx) }, SourceLoc::default());
    let s2 = expr_stmt(&mut tree, y);
    let rx2 = read(&mut tree, x);
    let s3 = ret(&mut tree, rx2);
    let gbody = suite(&mut tree, vec![s1, s2, s3]);
    let def = tree.insert(
        NodeKind::FunctionDef {
            name: "g".to_string(),
            scope: gscope,
            flavor: FunctionFlavor::Generator,
            target: g,
            defaults: vec![],
            body: gbody,
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
    let (_, lowered) = compile_module(&mut tree, root, &mut scopes, &ctx);

    // Nested functions are lowered before the frame defining them.
    assert_eq!(lowered.functions.len(), 2);
    assert_eq!(lowered.entry, 1);
    let gen = &lowered.functions[0];
    assert_eq!(gen.name, "g");
    assert_eq!(gen.flavor, FunctionFlavor::Generator);
    assert!(gen.needs_traceback);

    let suspend = gen
        .ops
        .iter()
        .find_map(|op| match op {
            LowOp::Suspend { state, .. } => Some(*state),
            _ => None,
        });
    assert_eq!(suspend, Some(1));

    let machine = gen.state_machine.as_ref().unwrap();
    assert_eq!(machine.states.len(), 2);
    assert!(machine.states[0].live.is_empty());
    assert_eq!(machine.states[1].live, vec![x]);
    assert_eq!(machine.context_vars, vec![x]);

    // The module frame builds g and binds it.
    let entry = &lowered.functions[lowered.entry];
    assert!(entry
        .ops
        .iter()
        .any(|op| matches!(op, LowOp::MakeFunction { function: 0, .. })));
    assert!(entry
        .ops
        .iter()
        .any(|op| matches!(op, LowOp::StoreVar { var, .. } if *var == g)));
}

#[test]
fn handler_region_records_its_owned_temporaries() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // try:
    //     x = m()
    // except:
    //     x = 0
    let scope = scopes.add_scope(ScopeKind::Module, None);
    let m = scopes.variable_for_assignment(scope, "m");
    let x = scopes.variable_for_assignment(scope, "x");

    let rm = read(&mut tree, m);
    let call = tree.insert(
        NodeKind::Call {
            callee: rm,
            args: vec![],
        },
        SourceLoc::default(),
    );
    let s = assign(&mut tree, x, call);
    let try_body = suite(&mut tree, vec![s]);
    let zero = int(&mut tree, 0);
    let h_assign = assign(&mut tree, x, zero);
    let h_body = suite(&mut tree, vec![h_assign]);
    let handler = tree.insert(
        NodeKind::ExceptHandler {
            kind: None,
            body: h_body,
        },
        SourceLoc::default(),
    );
    let te = tree.insert(
        NodeKind::TryExcept {
            body: try_body,
            handlers: vec![handler],
        },
        SourceLoc::default(),
    );
    let body = suite(&mut tree, vec![te]);
    let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());

    let ctx = OptimizeContext::new("m");
    let (_, lowered) = compile_module(&mut tree, root, &mut scopes, &ctx);

    assert_eq!(lowered.functions.len(), 1);
    let entry = &lowered.functions[lowered.entry];
    assert!(entry.needs_traceback);

    // Inner handler region first, frame-level propagation last.
    assert_eq!(entry.exits.len(), 2);
    let region = &entry.exits[0];
    assert!(matches!(region.action, ExitAction::Handler(_)));
    assert!(region.start < region.end);
    let last = &entry.exits[1];
    assert_eq!(last.action, ExitAction::Propagate);
    assert_eq!(last.start, 0);
    assert_eq!(last.end, entry.ops.len());

    // The call result is owned inside the region, so unwinding from the
    // region must release it.
    let call_dst = entry
        .ops
        .iter()
        .find_map(|op| match op {
            LowOp::CallValue { dst, .. } => Some(*dst),
            _ => None,
        })
        .unwrap();
    assert!(region.releases.contains(&call_dst));

    // A bare handler consumes the exception; nothing re-raises.
    assert!(!entry.ops.iter().any(|op| matches!(op, LowOp::Reraise)));
}

#[test]
fn imports_become_module_dependencies() {
    init_logging();
    let mut scopes = ScopeTree::new();
    let mut tree = Tree::new();

    // import alpha
    // import alpha      (again, deduplicated)
    // import beta
    let scope = scopes.add_scope(ScopeKind::Module, None);
    let a1 = scopes.variable_for_assignment(scope, "alpha");
    let b1 = scopes.variable_for_assignment(scope, "beta");
    let s1 = tree.insert(
        NodeKind::ImportModule {
            module: "alpha".to_string(),
            target: a1,
        },
        SourceLoc::default(),
    );
    let s2 = tree.insert(
        NodeKind::ImportModule {
            module: "alpha".to_string(),
            target: a1,
        },
        SourceLoc::default(),
    );
    let s3 = tree.insert(
        NodeKind::ImportModule {
            module: "beta".to_string(),
            target: b1,
        },
        SourceLoc::default(),
    );
    let body = suite(&mut tree, vec![s1, s2, s3]);
    let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());

    let ctx = OptimizeContext::new("m");
    let (_, lowered) = compile_module(&mut tree, root, &mut scopes, &ctx);

    let imported: Vec<&str> = lowered
        .dependencies
        .iter()
        .map(|edge| edge.imported.as_str())
        .collect();
    assert_eq!(imported, vec!["alpha", "beta"]);
    for edge in &lowered.dependencies {
        assert_eq!(edge.importer, "m");
    }
}

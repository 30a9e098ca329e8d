#![allow(dead_code)]

use pyrite::constant::ConstantValue;
use pyrite::location::SourceLoc;
use pyrite::scopes::{ScopeId, ScopeKind, ScopeTree};
use pyrite::tree::{BinOp, NodeId, NodeKind, Tree};
use pyrite::variables::VarId;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn constant(tree: &mut Tree, value: ConstantValue) -> NodeId {
    tree.insert(NodeKind::Constant { value }, SourceLoc::default())
}

pub fn int(tree: &mut Tree, v: i64) -> NodeId {
    constant(tree, ConstantValue::int(v))
}

pub fn read(tree: &mut Tree, var: VarId) -> NodeId {
    tree.insert(NodeKind::VariableRef { var }, SourceLoc::default())
}

pub fn assign(tree: &mut Tree, var: VarId, source: NodeId) -> NodeId {
    tree.insert(NodeKind::AssignVariable { var, source }, SourceLoc::default())
}

pub fn binop(tree: &mut Tree, op: BinOp, left: NodeId, right: NodeId) -> NodeId {
    tree.insert(NodeKind::BinaryOp { op, left, right }, SourceLoc::default())
}

pub fn expr_stmt(tree: &mut Tree, expression: NodeId) -> NodeId {
    tree.insert(
        NodeKind::ExpressionStatement { expression },
        SourceLoc::default(),
    )
}

pub fn suite(tree: &mut Tree, statements: Vec<NodeId>) -> NodeId {
    tree.insert(NodeKind::Suite { statements }, SourceLoc::default())
}

pub fn ret(tree: &mut Tree, value: NodeId) -> NodeId {
    tree.insert(
        NodeKind::ReturnStatement { value: Some(value) },
        SourceLoc::default(),
    )
}

/// A module root over the given statements, with a fresh module scope.
pub fn module(
    scopes: &mut ScopeTree,
    tree: &mut Tree,
    statements: Vec<NodeId>,
) -> (NodeId, ScopeId) {
    let scope = scopes.add_scope(ScopeKind::Module, None);
    let body = suite(tree, statements);
    let root = tree.insert(NodeKind::ModuleBody { scope, body }, SourceLoc::default());
    (root, scope)
}

/// The statement list of the module body.
pub fn module_statements(tree: &Tree, root: NodeId) -> Vec<NodeId> {
    let body = match tree.kind(root) {
        NodeKind::ModuleBody { body, .. } => *body,
        other => panic!("unexpected root kind {:?}", other.label()),
    };
    match tree.kind(body) {
        NodeKind::Suite { statements } => statements.clone(),
        other => panic!("unexpected body kind {:?}", other.label()),
    }
}

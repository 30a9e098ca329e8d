//! Pretty-printed tree dumps for diagnostics and defect reports.

use pretty::{BoxAllocator, DocAllocator, DocBuilder};
use termcolor::ColorSpec;

use super::{NodeId, NodeKind, Tree};

pub fn pretty<'a, D>(tree: &Tree, id: NodeId, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
where
    D: DocAllocator<'a, ColorSpec>,
    D::Doc: Clone,
{
    let node = tree.node(id);
    let head = match &node.kind {
        NodeKind::Constant { value } => format!("constant {}", value.describe()),
        NodeKind::VariableRef { var } => format!("variable-ref v{}", var.index()),
        NodeKind::AssignVariable { var, .. } => format!("assign-variable v{}", var.index()),
        NodeKind::DelVariable { var } => format!("del-variable v{}", var.index()),
        NodeKind::BinaryOp { op, .. } => format!("binary-op {}", op.name()),
        NodeKind::UnaryOp { op, .. } => format!("unary-op {}", op.name()),
        NodeKind::Comparison { op, .. } => format!("comparison {}", op.name()),
        NodeKind::AttributeRef { name, .. } => format!("attribute-ref .{}", name),
        NodeKind::AttributeAssign { name, .. } => format!("attribute-assign .{}", name),
        NodeKind::AttributeDel { name, .. } => format!("attribute-del .{}", name),
        NodeKind::RaiseExpression { kind, message } => {
            format!("raise-expression {} {:?}", kind, message)
        }
        NodeKind::ImportModule { module, target } => {
            format!("import-module {} -> v{}", module, target.index())
        }
        NodeKind::ImportName {
            module,
            name,
            target,
        } => format!("import-name {}.{} -> v{}", module, name, target.index()),
        NodeKind::FunctionDef { name, .. } => format!("function-def {}", name),
        NodeKind::ClassDef { name, .. } => format!("class-def {}", name),
        NodeKind::KeywordArg { name, .. } => format!("keyword-arg {}", name),
        other => other.label().to_string(),
    };

    let children = node.kind.children();
    if children.is_empty() {
        return allocator.text(head).parens();
    }

    allocator
        .text(head)
        .append(
            allocator
                .line()
                .append(allocator.intersperse(
                    children.into_iter().map(|child| pretty(tree, child, allocator)),
                    allocator.line(),
                ))
                .nest(2),
        )
        .group()
        .parens()
}

/// Renders the subtree at `id` as plain text.
pub fn dump(tree: &Tree, id: NodeId) -> String {
    let allocator = BoxAllocator;
    let doc = pretty(tree, id, &allocator).into_doc();
    let mut out = Vec::new();
    doc.render(78, &mut out).expect("tree dump rendering cannot fail");
    String::from_utf8_lossy(&out).into_owned()
}

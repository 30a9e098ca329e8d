//! The mutable, parented node tree.
//!
//! Nodes live in an arena and reference each other by index: children are
//! owning indices, the parent link is a non-owning back index. `finalize`
//! is arena slot deallocation and happens exactly once per detached
//! subtree. Any internal inconsistency (unknown child pointer, double
//! finalize, missing parent) is a compiler defect and aborts with full
//! kind/location diagnostics and a tree dump; it is never a propagated
//! error.

pub mod dump;
pub mod kinds;

pub use kinds::{BinOp, BoolOpKind, CmpOp, NodeKind, UnOp};

use crate::location::SourceLoc;

/// Owning index of a node in its [`Tree`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub loc: SourceLoc,
    pub parent: Option<NodeId>,
}

#[derive(Debug)]
enum Slot {
    Live(Node),
    Free,
}

/// Arena of nodes for one compiling unit (module). No node is shared
/// across two trees.
#[derive(Debug, Default)]
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

/// Termination measure for the optimizer: lexicographic pair of
/// (operation-node count, total live-node count) over a subtree. Every
/// accepted rewrite strictly decreases it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Complexity {
    pub operations: u64,
    pub nodes: u64,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        matches!(self.slots.get(id.index()), Some(Slot::Live(_)))
    }

    /// Allocates a node and adopts the children named by `kind`. Every
    /// child must be live and not yet attached anywhere.
    pub fn insert(&mut self, kind: NodeKind, loc: SourceLoc) -> NodeId {
        let id = match self.free.pop() {
            Some(raw) => NodeId(raw),
            None => {
                self.slots.push(Slot::Free);
                NodeId((self.slots.len() - 1) as u32)
            }
        };
        self.slots[id.index()] = Slot::Live(Node {
            kind,
            loc,
            parent: None,
        });
        self.live += 1;
        self.adopt_children_of(id);
        id
    }

    fn adopt_children_of(&mut self, id: NodeId) {
        for child in self.node(id).kind.children() {
            if !self.is_live(child) {
                self.defect(Some(id), &format!("child slot references freed node {:?}", child));
            }
            let prior = self.node(child).parent;
            if let Some(prior) = prior {
                if prior != id {
                    self.defect(
                        Some(child),
                        &format!("node attached twice: parents {:?} and {:?}", prior, id),
                    );
                }
            }
            self.node_mut(child).parent = Some(id);
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        match &self.slots[id.index()] {
            Slot::Live(node) => node,
            Slot::Free => self.defect(None, &format!("access to freed node {:?}", id)),
        }
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match &mut self.slots[id.index()] {
            Slot::Live(node) => node,
            Slot::Free => panic!("pyrite internal defect: access to freed node {:?}", id),
        }
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn loc(&self, id: NodeId) -> SourceLoc {
        self.node(id).loc
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Child nodes in evaluation order.
    pub fn visitable_children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).kind.children()
    }

    /// Swaps `old` (a current child of `parent`) for the detached node
    /// `new`, then finalizes `old`'s subtree. The swap happens before the
    /// release so a failure inside the release cannot leave a half-wired
    /// slot.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        if self.node(old).parent != Some(parent) {
            self.defect(
                Some(parent),
                &format!("replace_child: {:?} is not a child of {:?}", old, parent),
            );
        }
        if self.node(new).parent.is_some() {
            self.defect(Some(new), "replace_child: replacement is still attached");
        }
        if !self.node_mut(parent).kind.replace_slot(old, new) {
            self.defect(
                Some(parent),
                &format!("replace_child: no slot of {:?} references {:?}", parent, old),
            );
        }
        self.node_mut(new).parent = Some(parent);
        self.node_mut(old).parent = None;
        self.finalize(old);
    }

    /// Removes `child` from a variadic or optional slot of `parent`,
    /// preserving sibling order, and finalizes it.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        if self.node(child).parent != Some(parent) {
            self.defect(
                Some(parent),
                &format!("remove_child: {:?} is not a child of {:?}", child, parent),
            );
        }
        if !self.node_mut(parent).kind.remove_slot(child) {
            self.defect(
                Some(parent),
                &format!("remove_child: {:?} is not in a removable slot of {:?}", child, parent),
            );
        }
        self.node_mut(child).parent = None;
        self.finalize(child);
    }

    /// Detaches `child` from `parent` without releasing it, so it can be
    /// re-attached inside a replacement kind. Only valid for variadic and
    /// optional slots.
    pub fn detach_child(&mut self, parent: NodeId, child: NodeId) {
        if self.node(child).parent != Some(parent) {
            self.defect(
                Some(parent),
                &format!("detach_child: {:?} is not a child of {:?}", child, parent),
            );
        }
        if !self.node_mut(parent).kind.remove_slot(child) {
            self.defect(
                Some(parent),
                &format!("detach_child: {:?} is not in a removable slot of {:?}", child, parent),
            );
        }
        self.node_mut(child).parent = None;
    }

    /// Rewrites the node `id` in place to `new_kind`, keeping its
    /// identity and parent link. Children of the old kind that reappear
    /// in `new_kind` are kept; the rest are finalized. New children must
    /// be detached.
    pub fn replace_kind(&mut self, id: NodeId, new_kind: NodeKind) {
        let old_children = self.node(id).kind.children();
        let new_children = new_kind.children();

        for &child in &new_children {
            if !self.is_live(child) {
                self.defect(Some(id), &format!("replacement references freed node {:?}", child));
            }
            let parent = self.node(child).parent;
            if parent.is_some() && parent != Some(id) {
                self.defect(
                    Some(child),
                    "replacement child is attached to a different parent",
                );
            }
        }

        self.node_mut(id).kind = new_kind;
        for &child in &new_children {
            self.node_mut(child).parent = Some(id);
        }
        for child in old_children {
            // Children moved under a wrapper node of the replacement kind
            // no longer point back at `id` and must survive.
            if !new_children.contains(&child) && self.node(child).parent == Some(id) {
                self.node_mut(child).parent = None;
                self.finalize(child);
            }
        }
    }

    /// Hoists `child` into its parent `id`: the node keeps its identity
    /// and parent link but takes over the child's kind and grandchildren.
    /// Every other child of `id` is finalized; the child's slot is freed
    /// without touching the grandchildren it hands over.
    pub fn replace_with_child(&mut self, id: NodeId, child: NodeId) {
        if self.node(child).parent != Some(id) {
            self.defect(
                Some(id),
                &format!("replace_with_child: {:?} is not a child of {:?}", child, id),
            );
        }
        let child_kind = std::mem::replace(&mut self.node_mut(child).kind, NodeKind::PassStatement);
        for grandchild in child_kind.children() {
            self.node_mut(grandchild).parent = Some(id);
        }
        let old_children = self.node(id).kind.children();
        self.node_mut(id).kind = child_kind;
        self.slots[child.index()] = Slot::Free;
        self.free.push(child.0);
        self.live -= 1;
        for other in old_children {
            if other != child && self.is_live(other) && self.node(other).parent == Some(id) {
                self.node_mut(other).parent = None;
                self.finalize(other);
            }
        }
    }

    /// Transiently orphans `child` so a rewrite can wrap it in a fresh
    /// node before replacing the parent's kind. The caller must replace
    /// `parent`'s kind in the same rewrite step; until then the tree is
    /// intentionally inconsistent.
    pub(crate) fn steal_child(&mut self, parent: NodeId, child: NodeId) {
        if self.node(child).parent != Some(parent) {
            self.defect(
                Some(parent),
                &format!("steal_child: {:?} is not a child of {:?}", child, parent),
            );
        }
        self.node_mut(child).parent = None;
    }

    /// Releases a detached subtree exactly once. Finalizing a node that
    /// is still attached, or a slot that was already freed, is a defect.
    pub fn finalize(&mut self, id: NodeId) {
        match &self.slots[id.index()] {
            Slot::Free => self.defect(None, &format!("double finalize of {:?}", id)),
            Slot::Live(node) => {
                if node.parent.is_some() {
                    self.defect(Some(id), "finalize of a node still attached to a parent");
                }
            }
        }
        let children = self.node(id).kind.children();
        for child in children {
            self.node_mut(child).parent = None;
            self.finalize(child);
        }
        self.slots[id.index()] = Slot::Free;
        self.free.push(id.0 as u32);
        self.live -= 1;
    }

    /// Walks the subtree at `root` checking every structural invariant.
    /// Used by tests after rewrite storms.
    pub fn assert_well_formed(&self, root: NodeId) {
        let mut seen = vec![false; self.slots.len()];
        self.check_rec(root, None, &mut seen);
    }

    fn check_rec(&self, id: NodeId, expected_parent: Option<NodeId>, seen: &mut [bool]) {
        if !self.is_live(id) {
            self.defect(expected_parent, &format!("reachable freed node {:?}", id));
        }
        if seen[id.index()] {
            self.defect(Some(id), "node reachable through two parents");
        }
        seen[id.index()] = true;
        if self.node(id).parent != expected_parent {
            self.defect(
                Some(id),
                &format!(
                    "parent link {:?} does not match owning slot {:?}",
                    self.node(id).parent,
                    expected_parent
                ),
            );
        }
        for child in self.node(id).kind.children() {
            self.check_rec(child, Some(id), seen);
        }
    }

    /// The optimizer's termination measure over the subtree at `root`.
    pub fn complexity(&self, root: NodeId) -> Complexity {
        let mut measure = Complexity {
            operations: 0,
            nodes: 0,
        };
        self.complexity_rec(root, &mut measure);
        measure
    }

    fn complexity_rec(&self, id: NodeId, measure: &mut Complexity) {
        let kind = &self.node(id).kind;
        measure.nodes += 1;
        if kind.is_operation() {
            measure.operations += 1;
        }
        for child in kind.children() {
            self.complexity_rec(child, measure);
        }
    }

    /// Fatal internal-defect path: never a recoverable error.
    pub(crate) fn defect(&self, node: Option<NodeId>, message: &str) -> ! {
        let context = match node {
            Some(id) => match self.slots.get(id.index()) {
                Some(Slot::Live(n)) => {
                    format!("at {} node {:?} ({})\n{}", n.loc, id, n.kind.label(), dump::dump(self, id))
                }
                _ => format!("at freed slot {:?}", id),
            },
            None => String::new(),
        };
        panic!("pyrite internal defect: {}\n{}", message, context);
    }
}

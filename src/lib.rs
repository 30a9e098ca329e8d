//! Pyrite: an ahead-of-time optimizer and lowerer for a dynamic,
//! reference-counted, duck-typed language.
//!
//! A front-end builds a [`tree::Tree`] of [`tree::NodeKind`] nodes plus a
//! [`scopes::ScopeTree`] resolving every name to a [`variables::VarId`].
//! [`optimize::optimize_module`] then rewrites the tree destructively to a
//! fixpoint, driven by per-traversal [`trace::TraceCollection`] dataflow,
//! [`shapes`] capability answers and the [`constfold`] tables, and
//! [`lower::lower_module`] flattens the result into register-machine
//! functions with explicit reference ownership, exception exits and
//! resumable state machines.
//!
//! Everything external the analysis may assume lives in an explicit
//! [`optimize::OptimizeContext`]; there is no global state. Internal
//! inconsistencies are defects and panic with a tree dump; facts about
//! the compiled program are never panics.

pub mod constant;
pub mod constfold;
pub mod exceptions;
pub mod location;
pub mod lower;
pub mod optimize;
pub mod scopes;
pub mod shapes;
pub mod trace;
pub mod tree;
pub mod trust;
pub mod variables;

pub use crate::lower::{lower_module, LoweredModule};
pub use crate::optimize::{optimize_module, OptimizeContext, OptimizeStats};

/// Optimizes the module to a fixpoint and lowers it, in one call.
pub fn compile_module(
    tree: &mut tree::Tree,
    root: tree::NodeId,
    scopes: &mut scopes::ScopeTree,
    ctx: &OptimizeContext,
) -> (OptimizeStats, LoweredModule) {
    let stats = optimize::optimize_module(tree, root, scopes, ctx);
    let lowered = lower::lower_module(tree, root, scopes, ctx);
    (stats, lowered)
}

//! Resumable-function analysis.
//!
//! A generator or coroutine body is split at its suspension points into
//! numbered states. For every state the analysis computes which variables
//! must survive in the persistent context record: the ones assigned before
//! the suspension and used after it. Locals that never cross a suspension
//! stay in the transient frame and die with it.

use std::collections::BTreeSet;

use crate::scopes::{ScopeId, ScopeTree};
use crate::tree::{NodeId, NodeKind, Tree};
use crate::variables::{VarId, VariableKind};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ResumeState {
    pub index: u32,
    /// Variables restored from the context record when entering here.
    pub live: Vec<VarId>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StateMachine {
    /// State 0 is function entry; state `k` resumes after suspension `k`,
    /// in evaluation order of the suspension points.
    pub states: Vec<ResumeState>,
    /// Variables stored in the persistent context record: every variable
    /// live across some suspension, plus all shared storage of the scope.
    pub context_vars: Vec<VarId>,
}

enum Event {
    Assign(VarId),
    Use(VarId),
    Suspend,
}

/// Flattens a body into a linear event sequence in evaluation order.
/// Loop bodies are walked twice so the back edge is visible to liveness;
/// the second copy records no suspension events since those points were
/// already numbered by the first.
struct Scan<'a> {
    tree: &'a Tree,
    events: Vec<Event>,
    suspends_live: bool,
}

impl Scan<'_> {
    fn suspend(&mut self) {
        if self.suspends_live {
            self.events.push(Event::Suspend);
        }
    }

    fn walk(&mut self, id: NodeId) {
        match self.tree.kind(id) {
            NodeKind::VariableRef { var } => self.events.push(Event::Use(*var)),
            NodeKind::AssignVariable { var, source } => {
                self.walk(*source);
                self.events.push(Event::Assign(*var));
            }
            NodeKind::UnpackAssign { source, targets } => {
                self.walk(*source);
                for &target in targets {
                    self.events.push(Event::Assign(target));
                }
            }
            // `del` observes the binding and then unbinds it.
            NodeKind::DelVariable { var } => {
                self.events.push(Event::Use(*var));
                self.events.push(Event::Assign(*var));
            }
            NodeKind::ImportModule { target, .. } | NodeKind::ImportName { target, .. } => {
                self.events.push(Event::Assign(*target));
            }
            // Nested bodies belong to other scopes; only the parts that
            // evaluate here are events of this scope.
            NodeKind::FunctionDef {
                target, defaults, ..
            } => {
                for &d in defaults {
                    self.walk(d);
                }
                self.events.push(Event::Assign(*target));
            }
            NodeKind::ClassDef { target, bases, .. } => {
                for &b in bases {
                    self.walk(b);
                }
                self.events.push(Event::Assign(*target));
            }
            NodeKind::WhileLoop { condition, body } => {
                self.walk(*condition);
                self.walk(*body);
                let saved = self.suspends_live;
                self.suspends_live = false;
                self.walk(*body);
                self.walk(*condition);
                self.suspends_live = saved;
            }
            NodeKind::ForLoop {
                iterable,
                target,
                body,
            } => {
                self.walk(*iterable);
                self.events.push(Event::Assign(*target));
                self.walk(*body);
                let saved = self.suspends_live;
                self.suspends_live = false;
                self.events.push(Event::Assign(*target));
                self.walk(*body);
                self.suspends_live = saved;
            }
            NodeKind::Yield { value } => {
                if let Some(value) = value {
                    self.walk(*value);
                }
                self.suspend();
            }
            NodeKind::YieldFrom { source } => {
                self.walk(*source);
                self.suspend();
            }
            NodeKind::Await { awaited } => {
                self.walk(*awaited);
                self.suspend();
            }
            other => {
                for child in other.children() {
                    self.walk(child);
                }
            }
        }
    }
}

/// Computes the state machine of a resumable function body.
pub fn analyze(tree: &Tree, scopes: &ScopeTree, scope: ScopeId, body: NodeId) -> StateMachine {
    let mut scan = Scan {
        tree,
        events: Vec::new(),
        suspends_live: true,
    };
    // Parameters are bound at entry.
    for param in scopes.parameters(scope) {
        scan.events.push(Event::Assign(param));
    }
    scan.walk(body);
    let events = scan.events;

    let suspend_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter_map(|(at, e)| matches!(e, Event::Suspend).then_some(at))
        .collect();

    let mut states = vec![ResumeState {
        index: 0,
        live: Vec::new(),
    }];
    let mut context: BTreeSet<VarId> = BTreeSet::new();
    for (k, &pos) in suspend_positions.iter().enumerate() {
        let assigned_before: BTreeSet<VarId> = events[..pos]
            .iter()
            .filter_map(|e| match e {
                Event::Assign(var) => Some(*var),
                _ => None,
            })
            .collect();
        let used_after: BTreeSet<VarId> = events[pos + 1..]
            .iter()
            .filter_map(|e| match e {
                Event::Use(var) => Some(*var),
                _ => None,
            })
            .collect();
        let live: Vec<VarId> = assigned_before.intersection(&used_after).copied().collect();
        context.extend(live.iter().copied());
        states.push(ResumeState {
            index: (k + 1) as u32,
            live,
        });
    }

    // Shared storage is reachable from closures at any time and always
    // lives in the context record.
    for var in scopes.scope_locals(scope) {
        let variable = scopes.variable(var);
        if variable.shared
            && matches!(
                variable.kind,
                VariableKind::LocalVar | VariableKind::Parameter
            )
        {
            context.insert(var);
        }
    }

    StateMachine {
        states,
        context_vars: context.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ConstantValue;
    use crate::location::SourceLoc;
    use crate::scopes::{FunctionFlavor, ScopeKind, ScopeTree};
    use crate::tree::Tree;

    fn constant(tree: &mut Tree, v: i64) -> NodeId {
        tree.insert(
            NodeKind::Constant {
                value: ConstantValue::int(v),
            },
            SourceLoc::default(),
        )
    }

    fn assign(tree: &mut Tree, var: VarId, source: NodeId) -> NodeId {
        tree.insert(NodeKind::AssignVariable { var, source }, SourceLoc::default())
    }

    fn read(tree: &mut Tree, var: VarId) -> NodeId {
        tree.insert(NodeKind::VariableRef { var }, SourceLoc::default())
    }

    fn yield_stmt(tree: &mut Tree, value: NodeId) -> NodeId {
        let y = tree.insert(NodeKind::Yield { value: Some(value) }, SourceLoc::default());
        tree.insert(NodeKind::ExpressionStatement { expression: y }, SourceLoc::default())
    }

    #[test]
    fn liveness_tracks_values_across_suspensions() {
        let mut scopes = ScopeTree::new();
        let module = scopes.add_scope(ScopeKind::Module, None);
        let gen = scopes.add_scope(
            ScopeKind::Function(FunctionFlavor::Generator),
            Some(module),
        );
        let x = scopes.variable_for_assignment(gen, "x");
        let y = scopes.variable_for_assignment(gen, "y");

        // x = 1; yield x; y = 2; yield y; return x
        let mut tree = Tree::new();
        let one = constant(&mut tree, 1);
        let s1 = assign(&mut tree, x, one);
        let rx = read(&mut tree, x);
        let s2 = yield_stmt(&mut tree, rx);
        let two = constant(&mut tree, 2);
        let s3 = assign(&mut tree, y, two);
        let ry = read(&mut tree, y);
        let s4 = yield_stmt(&mut tree, ry);
        let rx2 = read(&mut tree, x);
        let s5 = tree.insert(
            NodeKind::ReturnStatement { value: Some(rx2) },
            SourceLoc::default(),
        );
        let body = tree.insert(
            NodeKind::Suite {
                statements: vec![s1, s2, s3, s4, s5],
            },
            SourceLoc::default(),
        );

        let machine = analyze(&tree, &scopes, gen, body);
        assert_eq!(machine.states.len(), 3);
        assert!(machine.states[0].live.is_empty());
        assert_eq!(machine.states[1].live, vec![x]);
        // y dies at the second suspension; only x is used afterwards.
        assert_eq!(machine.states[2].live, vec![x]);
        assert_eq!(machine.context_vars, vec![x]);
    }

    #[test]
    fn loop_back_edge_keeps_carried_value_live() {
        let mut scopes = ScopeTree::new();
        let module = scopes.add_scope(ScopeKind::Module, None);
        let gen = scopes.add_scope(
            ScopeKind::Function(FunctionFlavor::Generator),
            Some(module),
        );
        let t = scopes.add_parameter(gen, "t");
        let i = scopes.variable_for_assignment(gen, "i");
        let y = scopes.variable_for_assignment(gen, "y");

        // y = 0
        // for i in t:
        //     yield y
        //     y = i
        let mut tree = Tree::new();
        let zero = constant(&mut tree, 0);
        let s1 = assign(&mut tree, y, zero);
        let ry = read(&mut tree, y);
        let s2 = yield_stmt(&mut tree, ry);
        let ri = read(&mut tree, i);
        let s3 = assign(&mut tree, y, ri);
        let loop_body = tree.insert(
            NodeKind::Suite {
                statements: vec![s2, s3],
            },
            SourceLoc::default(),
        );
        let rt = read(&mut tree, t);
        let s4 = tree.insert(
            NodeKind::ForLoop {
                iterable: rt,
                target: i,
                body: loop_body,
            },
            SourceLoc::default(),
        );
        let body = tree.insert(
            NodeKind::Suite {
                statements: vec![s1, s4],
            },
            SourceLoc::default(),
        );

        let machine = analyze(&tree, &scopes, gen, body);
        assert_eq!(machine.states.len(), 2);
        // The next iteration reads y after the suspension even though the
        // only textual use precedes it.
        assert!(machine.states[1].live.contains(&y));
        assert!(machine.states[1].live.contains(&i));
    }

    #[test]
    fn single_suspension_count_inside_loop() {
        let mut scopes = ScopeTree::new();
        let module = scopes.add_scope(ScopeKind::Module, None);
        let gen = scopes.add_scope(
            ScopeKind::Function(FunctionFlavor::Generator),
            Some(module),
        );
        let t = scopes.add_parameter(gen, "t");
        let i = scopes.variable_for_assignment(gen, "i");

        let mut tree = Tree::new();
        let ri = read(&mut tree, i);
        let s1 = yield_stmt(&mut tree, ri);
        let loop_body = tree.insert(
            NodeKind::Suite {
                statements: vec![s1],
            },
            SourceLoc::default(),
        );
        let rt = read(&mut tree, t);
        let s2 = tree.insert(
            NodeKind::ForLoop {
                iterable: rt,
                target: i,
                body: loop_body,
            },
            SourceLoc::default(),
        );
        let body = tree.insert(
            NodeKind::Suite {
                statements: vec![s2],
            },
            SourceLoc::default(),
        );

        let machine = analyze(&tree, &scopes, gen, body);
        // One yield means exactly two states, no matter how often the
        // loop body is re-walked for liveness.
        assert_eq!(machine.states.len(), 2);
    }
}

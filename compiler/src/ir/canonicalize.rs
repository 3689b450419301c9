//! Graph Canonicalization
//!
//! Simplification passes run after escape analysis:
//! - guards with constant conditions are removed or turned into deopt exits
//! - code after a deopt exit is dropped
//! - comparisons, selects and conversions of constants are folded
//! - frame allocations and floating nodes without usages are deleted

use super::{CompareOp, Constant, Graph, Node, NodeId};
use std::collections::HashMap;

/// A graph-to-graph simplification
pub trait GraphPass {
    /// Get the name of this pass
    fn name(&self) -> &'static str;

    /// Run the pass on a graph
    fn run(&mut self, graph: &mut Graph) -> PassResult;
}

/// Result of running a pass
#[derive(Debug, Clone, Default)]
pub struct PassResult {
    /// Whether the graph was modified
    pub modified: bool,

    /// Number of nodes deleted
    pub nodes_eliminated: usize,

    /// Other statistics
    pub stats: HashMap<String, usize>,
}

impl PassResult {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn changed() -> Self {
        Self {
            modified: true,
            ..Self::default()
        }
    }

    fn bump(&mut self, stat: &str, by: usize) {
        if by > 0 {
            self.modified = true;
            *self.stats.entry(stat.to_string()).or_insert(0) += by;
        }
    }

    /// Merge two results
    pub fn combine(mut self, other: PassResult) -> Self {
        self.modified |= other.modified;
        self.nodes_eliminated += other.nodes_eliminated;
        for (key, value) in other.stats {
            *self.stats.entry(key).or_insert(0) += value;
        }
        self
    }
}

/// Runs passes until none of them changes the graph
pub struct PassManager {
    passes: Vec<Box<dyn GraphPass>>,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn add_pass<P: GraphPass + 'static>(&mut self, pass: P) {
        self.passes.push(Box::new(pass));
    }

    /// Guard lowering, constant folding and dead node elimination.
    pub fn canonicalizer() -> Self {
        let mut manager = Self::new();
        manager.add_pass(GuardSimplificationPass);
        manager.add_pass(ConstantFoldingPass);
        manager.add_pass(DeadNodeEliminationPass);
        manager
    }

    pub fn run(&mut self, graph: &mut Graph) -> PassResult {
        let mut total = PassResult::unchanged();
        loop {
            let mut changed = false;
            for pass in &mut self.passes {
                let result = pass.run(graph);
                if result.modified {
                    log::trace!("{}: {} changed the graph", graph.name, pass.name());
                    changed = true;
                }
                total = total.combine(result);
            }
            if !changed {
                break;
            }
        }
        total
    }
}

/// Canonicalize `graph` with the default pass set.
pub fn canonicalize(graph: &mut Graph) -> PassResult {
    let result = PassManager::canonicalizer().run(graph);
    log::debug!(
        "{}: canonicalization removed {} nodes",
        graph.name,
        result.nodes_eliminated
    );
    result
}

/// Removes guards that always pass and turns guards that always fail into
/// deoptimization exits, dropping everything scheduled after an exit.
pub struct GuardSimplificationPass;

impl GraphPass for GuardSimplificationPass {
    fn name(&self) -> &'static str {
        "guard-simplification"
    }

    fn run(&mut self, graph: &mut Graph) -> PassResult {
        let mut result = PassResult::unchanged();
        let schedule: Vec<NodeId> = graph.schedule().to_vec();
        for id in schedule {
            let node = match graph.get(id) {
                Some(node) => node.clone(),
                None => continue,
            };
            match node {
                Node::Guard {
                    condition,
                    negated,
                    reason,
                    action,
                    speculation,
                } => {
                    let Some(value) = graph.as_constant(condition).and_then(Constant::as_bool) else {
                        continue;
                    };
                    if value != negated {
                        graph.delete(id);
                        result.nodes_eliminated += 1;
                        result.bump("guards_removed", 1);
                        continue;
                    }
                    graph.replace_node(
                        id,
                        Node::Deoptimize {
                            reason,
                            action,
                            speculation,
                        },
                    );
                    result.bump("guards_to_deopt", 1);
                    let dropped = graph.truncate_after(id).len();
                    result.nodes_eliminated += dropped;
                    result.bump("unreachable_removed", dropped);
                    break;
                }
                Node::Deoptimize { .. } => {
                    let dropped = graph.truncate_after(id).len();
                    result.nodes_eliminated += dropped;
                    result.bump("unreachable_removed", dropped);
                    break;
                }
                _ => {}
            }
        }
        result
    }
}

/// Folds comparisons, selects and conversions whose inputs are constants
pub struct ConstantFoldingPass;

impl ConstantFoldingPass {
    fn fold(graph: &Graph, node: &Node) -> Option<Fold> {
        match *node {
            Node::Compare { op, x, y } => {
                if x == y {
                    return Some(Fold::Constant(Constant::Boolean(op == CompareOp::Eq)));
                }
                let a = graph.as_constant(x)?;
                let b = graph.as_constant(y)?;
                let equal = a == b;
                Some(Fold::Constant(Constant::Boolean(match op {
                    CompareOp::Eq => equal,
                    CompareOp::Ne => !equal,
                })))
            }
            Node::Conditional {
                condition,
                true_value,
                false_value,
                ..
            } => {
                if true_value == false_value {
                    return Some(Fold::Node(true_value));
                }
                let value = graph.as_constant(condition)?.as_bool()?;
                Some(Fold::Node(if value { true_value } else { false_value }))
            }
            Node::Narrow { value, to } | Node::Reinterpret { value, to } => {
                let raw = graph.as_constant(value)?.raw_bits()?;
                Constant::from_raw_bits(to, raw).map(Fold::Constant)
            }
            _ => None,
        }
    }
}

enum Fold {
    Constant(Constant),
    Node(NodeId),
}

impl GraphPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn run(&mut self, graph: &mut Graph) -> PassResult {
        let mut result = PassResult::unchanged();
        let ids: Vec<NodeId> = graph.node_ids().collect();
        for id in ids {
            let Some(fold) = graph.get(id).and_then(|node| Self::fold(graph, node)) else {
                continue;
            };
            let replacement = match fold {
                Fold::Constant(value) => graph.constant(value),
                Fold::Node(node) => node,
            };
            if replacement == id {
                continue;
            }
            graph.replace_at_usages(id, replacement);
            graph.delete(id);
            result.nodes_eliminated += 1;
            result.bump("folded", 1);
        }
        result
    }
}

/// Deletes floating nodes and frame allocations nothing uses
pub struct DeadNodeEliminationPass;

impl DeadNodeEliminationPass {
    fn is_removable(node: &Node) -> bool {
        match node {
            Node::Parameter { .. } => false,
            Node::NewFrame(_) => true,
            other => !other.is_fixed(),
        }
    }
}

impl GraphPass for DeadNodeEliminationPass {
    fn name(&self) -> &'static str {
        "dead-node-elimination"
    }

    fn run(&mut self, graph: &mut Graph) -> PassResult {
        let mut result = PassResult::unchanged();
        loop {
            let dead: Vec<NodeId> = graph
                .node_ids()
                .filter(|&id| graph.get(id).map(Self::is_removable).unwrap_or(false))
                .filter(|&id| !graph.has_usages(id))
                .collect();
            if dead.is_empty() {
                break;
            }
            for id in dead {
                graph.delete(id);
                result.nodes_eliminated += 1;
                result.bump("dead_removed", 1);
            }
        }
        result
    }
}

//! Arena Graph
//!
//! Owns every node of one compilation unit. Nodes live in a vector arena and
//! are addressed by `NodeId`; deleting a node leaves a tombstone so ids stay
//! stable while escape analysis rewrites the graph.

use super::{Constant, Node, NodeId, SourcePosition, ValueKind};
use crate::frame::CallTargetId;
use fxhash::FxHashMap;
use std::ops::Index;

/// A node together with its bookkeeping
#[derive(Debug, Clone)]
pub struct NodeData {
    pub node: Node,
    pub source: SourcePosition,
}

/// Graph of one compiled call target
#[derive(Debug, Clone)]
pub struct Graph {
    /// Human-readable name (for dumps)
    pub name: String,

    /// Call target this graph is compiled for
    call_target: CallTargetId,

    /// Node arena; `None` marks a deleted node
    nodes: Vec<Option<NodeData>>,

    /// Fixed nodes in execution order
    schedule: Vec<NodeId>,

    /// Interned constants
    constants: FxHashMap<Constant, NodeId>,
}

impl Graph {
    pub fn new(name: impl Into<String>, call_target: CallTargetId) -> Self {
        Self {
            name: name.into(),
            call_target,
            nodes: Vec::new(),
            schedule: Vec::new(),
            constants: FxHashMap::default(),
        }
    }

    pub fn call_target(&self) -> CallTargetId {
        self.call_target
    }

    /// Add a node. Fixed nodes are appended to the schedule.
    pub fn add(&mut self, node: Node) -> NodeId {
        self.add_with_source(node, SourcePosition::unknown())
    }

    pub fn add_with_source(&mut self, node: Node, source: SourcePosition) -> NodeId {
        if let Node::Constant(c) = node {
            return self.constant(c);
        }
        let fixed = node.is_fixed();
        let id = self.push(node, source);
        if fixed {
            self.schedule.push(id);
        }
        id
    }

    /// Add a node; a fixed node is scheduled right before `anchor`.
    pub fn add_before(&mut self, anchor: NodeId, node: Node) -> NodeId {
        if let Node::Constant(c) = node {
            return self.constant(c);
        }
        let fixed = node.is_fixed();
        let source = self.get_data(anchor).map(|d| d.source).unwrap_or_default();
        let id = self.push(node, source);
        if fixed {
            match self.schedule.iter().position(|&n| n == anchor) {
                Some(pos) => self.schedule.insert(pos, id),
                None => self.schedule.push(id),
            }
        }
        id
    }

    fn push(&mut self, node: Node, source: SourcePosition) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(Some(NodeData { node, source }));
        id
    }

    /// Get (or create) the node for a constant.
    pub fn constant(&mut self, value: Constant) -> NodeId {
        self.intern_constant(value).0
    }

    /// Like [`Graph::constant`], also reporting whether the node is new.
    pub fn intern_constant(&mut self, value: Constant) -> (NodeId, bool) {
        if let Some(&id) = self.constants.get(&value) {
            if self.is_alive(id) {
                return (id, false);
            }
        }
        let id = self.push(Node::Constant(value.clone()), SourcePosition::unknown());
        self.constants.insert(value, id);
        (id, true)
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.index()), Some(Some(_)))
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.get_data(id).map(|d| &d.node)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .map(|d| &mut d.node)
    }

    pub fn get_data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.index()).and_then(|slot| slot.as_ref())
    }

    pub fn source(&self, id: NodeId) -> SourcePosition {
        self.get_data(id).map(|d| d.source).unwrap_or_default()
    }

    /// Kind of the value produced by `id` (`Illegal` for deleted nodes).
    pub fn kind(&self, id: NodeId) -> ValueKind {
        self.get(id).map(Node::kind).unwrap_or(ValueKind::Illegal)
    }

    pub fn as_constant(&self, id: NodeId) -> Option<&Constant> {
        self.get(id).and_then(Node::as_constant)
    }

    /// Fixed nodes in execution order.
    pub fn schedule(&self) -> &[NodeId] {
        &self.schedule
    }

    pub fn is_scheduled(&self, id: NodeId) -> bool {
        self.schedule.contains(&id)
    }

    /// Live node ids in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| NodeId::new(i as u32))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Nodes that use `id` as an input.
    pub fn usages(&self, id: NodeId) -> Vec<NodeId> {
        self.node_ids()
            .filter(|&user| {
                self.get(user)
                    .map(|n| n.inputs().contains(&id))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn has_usages(&self, id: NodeId) -> bool {
        self.node_ids().any(|user| {
            self.get(user)
                .map(|n| n.inputs().contains(&id))
                .unwrap_or(false)
        })
    }

    /// Redirect every input edge pointing at `old` to `new`.
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) -> usize {
        let mut replaced = 0;
        for slot in self.nodes.iter_mut().flatten() {
            replaced += slot.node.replace_input(old, new);
        }
        replaced
    }

    /// Redirect the `old` inputs of a single node.
    pub fn replace_input(&mut self, user: NodeId, old: NodeId, new: NodeId) -> usize {
        self.get_mut(user)
            .map(|n| n.replace_input(old, new))
            .unwrap_or(0)
    }

    /// Remove a node from the schedule without deleting it.
    pub fn unschedule(&mut self, id: NodeId) {
        self.schedule.retain(|&n| n != id);
    }

    /// Delete a node. Remaining usages are left dangling; callers replace
    /// them first.
    pub fn delete(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(id.index()) {
            if let Some(data) = slot.take() {
                if let Node::Constant(c) = data.node {
                    if self.constants.get(&c) == Some(&id) {
                        self.constants.remove(&c);
                    }
                }
            }
        }
        self.unschedule(id);
    }

    /// Replace the payload of a node in place, keeping its id and position.
    pub fn replace_node(&mut self, id: NodeId, node: Node) {
        if let Some(Some(data)) = self.nodes.get_mut(id.index()) {
            data.node = node;
        }
    }

    /// Delete every fixed node scheduled after `id`.
    ///
    /// Returns the deleted nodes.
    pub fn truncate_after(&mut self, id: NodeId) -> Vec<NodeId> {
        let Some(pos) = self.schedule.iter().position(|&n| n == id) else {
            return Vec::new();
        };
        let removed: Vec<NodeId> = self.schedule.split_off(pos + 1);
        for &dead in &removed {
            if let Some(slot) = self.nodes.get_mut(dead.index()) {
                *slot = None;
            }
        }
        removed
    }
}

impl Index<NodeId> for Graph {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        match self.get(id) {
            Some(node) => node,
            None => panic!("node {} was deleted", id),
        }
    }
}

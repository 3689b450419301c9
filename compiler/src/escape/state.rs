//! Virtualization State
//!
//! Per-compilation symbolic state of escape analysis: which nodes stand for
//! which virtual objects, the current entries of every virtual object, and
//! which virtual objects have been materialized. The state is a plain value so
//! the driver can snapshot it before virtualizing a node and restore it when
//! the node falls back to deoptimization.

use crate::ir::{NodeId, VirtualObjectShape};
use fxhash::{FxHashMap, FxHashSet};

/// Symbolic state of one virtual object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectState {
    pub shape: VirtualObjectShape,
    pub entries: Vec<NodeId>,
    /// The object must not escape except through an explicit materialization
    pub ensure_virtualized: bool,
    /// Real allocation replacing the object, once materialized
    pub materialized: Option<NodeId>,
}

impl ObjectState {
    pub fn new(shape: VirtualObjectShape, entries: Vec<NodeId>, ensure_virtualized: bool) -> Self {
        Self {
            shape,
            entries,
            ensure_virtualized,
            materialized: None,
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.materialized.is_none()
    }
}

/// Alias map plus virtual object states
#[derive(Debug, Clone, Default)]
pub struct VirtualState {
    aliases: FxHashMap<NodeId, NodeId>,
    objects: FxHashMap<NodeId, ObjectState>,
}

impl VirtualState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `value` to the virtual object it stands for, or to the real
    /// allocation that object was materialized into.
    pub fn get_alias(&self, value: NodeId) -> NodeId {
        let target = self.aliases.get(&value).copied().unwrap_or(value);
        self.objects
            .get(&target)
            .and_then(|object| object.materialized)
            .unwrap_or(target)
    }

    pub fn set_alias(&mut self, node: NodeId, object: NodeId) {
        self.aliases.insert(node, object);
    }

    pub fn add_object(&mut self, id: NodeId, state: ObjectState) {
        self.objects.insert(id, state);
    }

    /// State of a virtual object, whether or not it is materialized.
    pub fn object(&self, id: NodeId) -> Option<&ObjectState> {
        self.objects.get(&id)
    }

    pub fn object_mut(&mut self, id: NodeId) -> Option<&mut ObjectState> {
        self.objects.get_mut(&id)
    }

    /// State of `id` if it is a virtual object that was not materialized.
    pub fn virtual_object(&self, id: NodeId) -> Option<&ObjectState> {
        self.objects.get(&id).filter(|object| object.is_virtual())
    }

    pub fn is_virtual(&self, id: NodeId) -> bool {
        self.virtual_object(id).is_some()
    }

    pub fn materialized(&self, id: NodeId) -> Option<NodeId> {
        self.objects.get(&id).and_then(|object| object.materialized)
    }

    pub fn set_materialized(&mut self, id: NodeId, allocation: NodeId) {
        if let Some(object) = self.objects.get_mut(&id) {
            object.materialized = Some(allocation);
        }
    }

    /// Virtual objects reachable from `root` (including `root`) that still
    /// need a real allocation, in post order: entries before the objects
    /// holding them, except along reference cycles.
    pub fn materialization_order(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut visited = FxHashSet::default();
        self.visit(root, &mut visited, &mut order);
        order
    }

    fn visit(&self, id: NodeId, visited: &mut FxHashSet<NodeId>, order: &mut Vec<NodeId>) {
        let Some(object) = self.virtual_object(id) else {
            return;
        };
        if !visited.insert(id) {
            return;
        }
        for &entry in &object.entries {
            self.visit(self.get_alias(entry), visited, order);
        }
        order.push(id);
    }

    /// Ids of all virtual objects created so far, sorted.
    pub fn object_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.objects.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Nodes aliased to a virtual object, sorted.
    pub fn aliased_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.aliases.keys().copied().collect();
        nodes.sort();
        nodes
    }
}

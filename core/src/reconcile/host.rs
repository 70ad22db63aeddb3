// What the reconciler needs to know about the flow engine hosting the nodes

use std::collections::HashMap;

use crate::model::EntityKind;

/// Deployment state of a node referenced from a child list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Active,
    /// Declared but disabled; carries the kind of entity it would become
    Disabled(EntityKind),
    /// Not declared anywhere, i.e. deleted
    Absent,
}

/// The flow engine as seen from the reconciler
#[cfg_attr(test, mockall::automock)]
pub trait DashboardHost {
    fn node_state(&self, node_id: &str) -> NodeState;
}

/// Map-backed host for embedders that track node states themselves
#[derive(Clone, Debug, Default)]
pub struct DeclaredNodes {
    nodes: HashMap<String, NodeState>,
}

impl DeclaredNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&mut self, node_id: impl Into<String>) {
        self.nodes.insert(node_id.into(), NodeState::Active);
    }

    pub fn disable(&mut self, node_id: impl Into<String>, kind: EntityKind) {
        self.nodes.insert(node_id.into(), NodeState::Disabled(kind));
    }

    pub fn remove(&mut self, node_id: &str) {
        self.nodes.remove(node_id);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl DashboardHost for DeclaredNodes {
    fn node_state(&self, node_id: &str) -> NodeState {
        self.nodes.get(node_id).copied().unwrap_or(NodeState::Absent)
    }
}

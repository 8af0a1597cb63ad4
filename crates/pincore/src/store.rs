use crate::{ConnectionId, Flow, FlowId, GraphError, NodeId};
use std::collections::HashMap;

/// Every flow known to the kernel, keyed by id
#[derive(Debug, Default)]
pub struct GraphStore {
    flows: HashMap<FlowId, Flow>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_flow(
        &mut self,
        name: impl Into<String>,
        parent: Option<FlowId>,
    ) -> Result<FlowId, GraphError> {
        let mut flow = Flow::new(name);
        if let Some(parent) = parent {
            self.flow(parent)?;
            flow = flow.with_parent(parent);
        }
        let id = flow.id;
        tracing::info!(flow_id = %id, name = %flow.name, parent = ?parent, "Flow created");
        self.flows.insert(id, flow);
        Ok(id)
    }

    /// Admit an externally built flow after re-validating its structure
    pub fn insert_flow(&mut self, flow: Flow) -> Result<FlowId, GraphError> {
        if self.flows.contains_key(&flow.id) {
            return Err(GraphError::Invalid(format!("flow {} already exists", flow.id)));
        }
        if let Some(parent) = flow.parent {
            self.flow(parent)?;
        }
        let flow = flow.revalidated()?;
        let id = flow.id;
        self.flows.insert(id, flow);
        Ok(id)
    }

    pub fn delete_flow(&mut self, id: FlowId) -> Result<Flow, GraphError> {
        let flow = self.flow(id)?;
        if !self.children(id).is_empty() {
            return Err(GraphError::Invalid(format!(
                "flow '{}' still has child flows",
                flow.name
            )));
        }
        if flow.has_busy_nodes() {
            return Err(GraphError::NodeBusy(flow.name.clone()));
        }
        self.flows.remove(&id).ok_or(GraphError::FlowNotFound(id))
    }

    pub fn flow(&self, id: FlowId) -> Result<&Flow, GraphError> {
        self.flows.get(&id).ok_or(GraphError::FlowNotFound(id))
    }

    pub fn flow_mut(&mut self, id: FlowId) -> Result<&mut Flow, GraphError> {
        self.flows.get_mut(&id).ok_or(GraphError::FlowNotFound(id))
    }

    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    pub fn children(&self, id: FlowId) -> Vec<FlowId> {
        self.flows
            .values()
            .filter(|f| f.parent == Some(id))
            .map(|f| f.id)
            .collect()
    }

    pub fn flow_of_node(&self, node: NodeId) -> Option<FlowId> {
        self.flows
            .values()
            .find(|f| f.node(node).is_some())
            .map(|f| f.id)
    }

    pub fn flow_of_connection(&self, connection: ConnectionId) -> Option<FlowId> {
        self.flows
            .values()
            .find(|f| f.connection(connection).is_some())
            .map(|f| f.id)
    }
}

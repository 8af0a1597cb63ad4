use pincore::{
    ErrorKind, ExecutionId, FlowId, FlowNode, NodeId, NodeRunState, RunStatus, StreamEvent, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    RunFlow,
    RunNode,
}

/// A node that ended `Failed`, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node_id: NodeId,
    pub node_name: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Final view of one node within a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub name: String,
    pub node_type: String,
    pub state: NodeRunState,
    pub fired_port: Option<String>,
    pub outputs: HashMap<String, Value>,
    /// Partial outputs of the latest run, ending with `StreamEvent::Done`
    pub partials: Vec<StreamEvent>,
    pub failure: Option<NodeFailure>,
    pub duration_ms: u64,
    /// Number of times the node was launched (loops run a node repeatedly)
    pub runs: u32,
}

impl NodeReport {
    pub(crate) fn new(node: &FlowNode) -> Self {
        Self {
            node_id: node.id,
            name: node.name.clone(),
            node_type: node.node_type.clone(),
            state: NodeRunState::NotStarted,
            fired_port: None,
            outputs: HashMap::new(),
            partials: Vec::new(),
            failure: None,
            duration_ms: 0,
            runs: 0,
        }
    }
}

/// Result of an execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    pub request: RequestKind,
    pub status: RunStatus,
    /// Nodes in launch order; a node appears once per run
    pub order: Vec<NodeId>,
    /// Every node the request touched, in flow order
    pub nodes: Vec<NodeReport>,
    /// Failures no failure branch absorbed
    pub failures: Vec<NodeFailure>,
    pub duration_ms: u64,
}

impl ExecutionReport {
    pub fn node(&self, id: NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node_id == id)
    }

    pub fn state_of(&self, id: NodeId) -> NodeRunState {
        self.node(id).map(|n| n.state).unwrap_or_default()
    }

    pub fn output(&self, id: NodeId, port: &str) -> Option<&Value> {
        self.node(id).and_then(|n| n.outputs.get(port))
    }

    pub fn ran(&self, id: NodeId) -> bool {
        self.order.contains(&id)
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

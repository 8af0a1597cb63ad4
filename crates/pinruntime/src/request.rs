use crate::report::ExecutionReport;
use pincore::{
    ConnectionId, ConnectionKind, Endpoint, Flow, FlowId, FlowNode, NodeId, NodeRole, NodeSchema,
    Value,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything the kernel can be asked to do. Requests that take an optional
/// `flow` fall back to the current flow of the context stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum Request {
    CreateFlow {
        name: String,
        #[serde(default)]
        parent: Option<FlowId>,
    },
    DeleteFlow {
        flow_id: FlowId,
    },
    CreateNode {
        #[serde(default)]
        flow: Option<FlowId>,
        node_type: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    DeleteNode {
        node_id: NodeId,
    },
    SetParameterValue {
        node_id: NodeId,
        parameter: String,
        value: Value,
    },
    CreateConnection {
        kind: ConnectionKind,
        from: Endpoint,
        to: Endpoint,
    },
    DeleteConnection {
        connection_id: ConnectionId,
    },
    PairLoop {
        start: NodeId,
        end: NodeId,
    },
    SetStartNode {
        node_id: NodeId,
    },
    RunFlow {
        #[serde(default)]
        flow: Option<FlowId>,
    },
    RunNode {
        node_id: NodeId,
    },
    CancelRun {
        #[serde(default)]
        flow: Option<FlowId>,
    },
    PushContext {
        flow_id: FlowId,
    },
    PopContext,
    ResetContext,
    ListNodes {
        #[serde(default)]
        flow: Option<FlowId>,
    },
    ListNodeTypes,
    ExportFlow {
        #[serde(default)]
        flow: Option<FlowId>,
    },
    ImportFlow {
        flow: Flow,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::CreateFlow { .. } => "create_flow",
            Request::DeleteFlow { .. } => "delete_flow",
            Request::CreateNode { .. } => "create_node",
            Request::DeleteNode { .. } => "delete_node",
            Request::SetParameterValue { .. } => "set_parameter_value",
            Request::CreateConnection { .. } => "create_connection",
            Request::DeleteConnection { .. } => "delete_connection",
            Request::PairLoop { .. } => "pair_loop",
            Request::SetStartNode { .. } => "set_start_node",
            Request::RunFlow { .. } => "run_flow",
            Request::RunNode { .. } => "run_node",
            Request::CancelRun { .. } => "cancel_run",
            Request::PushContext { .. } => "push_context",
            Request::PopContext => "pop_context",
            Request::ResetContext => "reset_context",
            Request::ListNodes { .. } => "list_nodes",
            Request::ListNodeTypes => "list_node_types",
            Request::ExportFlow { .. } => "export_flow",
            Request::ImportFlow { .. } => "import_flow",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum Response {
    FlowCreated {
        flow_id: FlowId,
    },
    FlowDeleted {
        flow_id: FlowId,
    },
    NodeCreated {
        flow_id: FlowId,
        node_id: NodeId,
        name: String,
    },
    NodeDeleted {
        node_id: NodeId,
        removed_connections: Vec<ConnectionId>,
    },
    ParameterSet {
        node_id: NodeId,
        parameter: String,
    },
    ConnectionCreated {
        connection_id: ConnectionId,
    },
    ConnectionDeleted {
        connection_id: ConnectionId,
    },
    LoopPaired {
        start: NodeId,
        end: NodeId,
    },
    StartNodeSet {
        node_id: NodeId,
    },
    Executed {
        report: ExecutionReport,
    },
    RunCancelled {
        flow_id: FlowId,
        /// False when nothing was running on the flow
        cancelled: bool,
    },
    ContextPushed {
        flow_id: FlowId,
        depth: usize,
    },
    ContextPopped {
        flow_id: FlowId,
        depth: usize,
    },
    ContextReset,
    Nodes {
        nodes: Vec<NodeSummary>,
    },
    NodeTypes {
        types: Vec<NodeSchema>,
    },
    FlowExported {
        flow: Flow,
    },
    FlowImported {
        flow_id: FlowId,
    },
}

/// Listing entry for a node: identity plus current parameter values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node_id: NodeId,
    pub name: String,
    pub node_type: String,
    pub role: NodeRole,
    pub busy: bool,
    pub values: HashMap<String, Value>,
}

impl NodeSummary {
    pub(crate) fn new(node: &FlowNode, busy: bool) -> Self {
        Self {
            node_id: node.id,
            name: node.name.clone(),
            node_type: node.node_type.clone(),
            role: node.role,
            busy,
            values: node
                .parameters
                .iter()
                .filter_map(|p| p.current_value().map(|v| (p.name().to_string(), v.clone())))
                .collect(),
        }
    }
}

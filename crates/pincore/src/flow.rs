use crate::{
    validator, GraphError, NodeRole, NodeSchema, Parameter, ParameterMode, Value, LOOP_CONTINUE,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub type FlowId = Uuid;
pub type NodeId = Uuid;
pub type ConnectionId = Uuid;

/// A node instance placed in a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: NodeId,
    pub name: String,
    pub node_type: String,
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub exec_in: Vec<String>,
    #[serde(default)]
    pub exec_out: Vec<String>,
    #[serde(default)]
    pub failure_port: Option<String>,
    /// Per-node override of the runtime's default timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl FlowNode {
    pub fn from_schema(name: impl Into<String>, schema: &NodeSchema) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            node_type: schema.node_type.clone(),
            role: schema.role,
            parameters: schema.parameters.iter().cloned().map(Parameter::from).collect(),
            exec_in: schema.exec_in.clone(),
            exec_out: schema.exec_out.clone(),
            failure_port: schema.failure_port.clone(),
            timeout_ms: None,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    fn parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.parameters.iter_mut().find(|p| p.name() == name)
    }

    pub fn has_exec_in(&self, port: &str) -> bool {
        self.exec_in.iter().any(|p| p == port)
    }

    pub fn has_exec_out(&self, port: &str) -> bool {
        self.exec_out.iter().any(|p| p == port)
    }

    /// Exec-out fired on success when the node names no branch
    pub fn default_branch(&self) -> Option<&str> {
        self.exec_out
            .iter()
            .find(|p| self.failure_port.as_ref() != Some(*p))
            .map(String::as_str)
    }

    /// Property values, falling back to declared defaults
    pub fn properties(&self) -> HashMap<String, Value> {
        self.parameters
            .iter()
            .filter(|p| p.mode() == ParameterMode::Property)
            .filter_map(|p| p.current_value().map(|v| (p.name().to_string(), v.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Output parameter -> input parameter
    Data,
    /// Exec-out port -> exec-in port
    Control,
}

/// A parameter name or control port on a specific node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: NodeId,
    pub port: String,
}

impl Endpoint {
    pub fn new(node: NodeId, port: impl Into<String>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub kind: ConnectionKind,
    pub from: Endpoint,
    pub to: Endpoint,
}

impl Connection {
    pub fn touches(&self, node: NodeId) -> bool {
        self.from.node == node || self.to.node == node
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopPair {
    pub start: NodeId,
    pub end: NodeId,
}

/// An owned collection of nodes and the connections between them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    #[serde(default)]
    pub parent: Option<FlowId>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    nodes: Vec<FlowNode>,
    #[serde(default)]
    connections: Vec<Connection>,
    #[serde(default)]
    loop_pairs: Vec<LoopPair>,
    #[serde(default)]
    start_node: Option<NodeId>,
    #[serde(skip)]
    busy: HashSet<NodeId>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            parent: None,
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
            loop_pairs: Vec::new(),
            start_node: None,
            busy: HashSet::new(),
        }
    }

    pub fn with_parent(mut self, parent: FlowId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Instantiate `schema` as a new node; duplicate names get a numeric suffix
    pub fn add_node(&mut self, name: Option<&str>, schema: &NodeSchema) -> NodeId {
        let base = name.unwrap_or(&schema.node_type);
        let node = FlowNode::from_schema(self.unique_name(base), schema);
        let id = node.id;
        tracing::debug!(flow = %self.name, node = %node.name, node_type = %node.node_type, "Node added");
        self.nodes.push(node);
        id
    }

    /// Insert a fully formed node (import path); ids and names must be unique
    pub fn insert_node(&mut self, node: FlowNode) -> Result<NodeId, GraphError> {
        if self.node(node.id).is_some() {
            return Err(GraphError::Invalid(format!("duplicate node id {}", node.id)));
        }
        if self.node_by_name(&node.name).is_some() {
            return Err(GraphError::Invalid(format!("duplicate node name '{}'", node.name)));
        }
        let id = node.id;
        self.nodes.push(node);
        Ok(id)
    }

    fn unique_name(&self, base: &str) -> String {
        if self.node_by_name(base).is_none() {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| self.node_by_name(candidate).is_none())
            .unwrap_or_else(|| format!("{}_{}", base, Uuid::new_v4()))
    }

    /// Remove a node and every connection touching it
    pub fn remove_node(&mut self, id: NodeId) -> Result<Vec<Connection>, GraphError> {
        let index = self.node_index(id).ok_or(GraphError::NodeNotFound(id))?;
        if self.busy.contains(&id) {
            return Err(GraphError::NodeBusy(self.nodes[index].name.clone()));
        }

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.connections)
            .into_iter()
            .partition(|c| c.touches(id));
        self.connections = kept;
        self.loop_pairs.retain(|p| p.start != id && p.end != id);
        if self.start_node == Some(id) {
            self.start_node = None;
        }
        let node = self.nodes.remove(index);
        tracing::debug!(flow = %self.name, node = %node.name, removed = removed.len(), "Node removed");
        Ok(removed)
    }

    /// Admit a new connection after the connection validator approves it
    pub fn connect(
        &mut self,
        kind: ConnectionKind,
        from: Endpoint,
        to: Endpoint,
    ) -> Result<ConnectionId, GraphError> {
        self.insert_connection(Connection {
            id: Uuid::new_v4(),
            kind,
            from,
            to,
        })
    }

    pub fn insert_connection(&mut self, connection: Connection) -> Result<ConnectionId, GraphError> {
        validator::validate_connection(self, connection.kind, &connection.from, &connection.to)?;
        if self.connection(connection.id).is_some() {
            return Err(GraphError::Invalid(format!(
                "duplicate connection id {}",
                connection.id
            )));
        }
        let id = connection.id;
        self.connections.push(connection);
        Ok(id)
    }

    pub fn disconnect(&mut self, id: ConnectionId) -> Result<Connection, GraphError> {
        let index = self
            .connections
            .iter()
            .position(|c| c.id == id)
            .ok_or(GraphError::ConnectionNotFound(id))?;
        Ok(self.connections.remove(index))
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> &[FlowNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn require_node(&self, id: NodeId) -> Result<&FlowNode, GraphError> {
        self.node(id).ok_or(GraphError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut FlowNode, GraphError> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(GraphError::NodeNotFound(id))
    }

    pub fn node_by_name(&self, name: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Position in insertion order; used as the stable scheduling tie-break
    pub fn node_index(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    pub fn connections_touching(&self, node: NodeId) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.touches(node)).collect()
    }

    /// The single data connection feeding `parameter` on `node`, if any
    pub fn data_source(&self, node: NodeId, parameter: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| {
            c.kind == ConnectionKind::Data && c.to.node == node && c.to.port == parameter
        })
    }

    /// Distinct nodes whose outputs feed `node`
    pub fn data_producers(&self, node: NodeId) -> Vec<NodeId> {
        let mut producers = Vec::new();
        for c in &self.connections {
            if c.kind == ConnectionKind::Data && c.to.node == node && !producers.contains(&c.from.node) {
                producers.push(c.from.node);
            }
        }
        producers
    }

    /// Nodes wired to `port` of `node`, in connection order
    pub fn control_targets(&self, node: NodeId, port: &str) -> Vec<NodeId> {
        self.connections
            .iter()
            .filter(|c| {
                c.kind == ConnectionKind::Control && c.from.node == node && c.from.port == port
            })
            .map(|c| c.to.node)
            .collect()
    }

    pub fn set_parameter_value(
        &mut self,
        node: NodeId,
        parameter: &str,
        value: Value,
    ) -> Result<(), GraphError> {
        let target = self.node_mut(node)?;
        let node_name = target.name.clone();
        let param = target
            .parameter_mut(parameter)
            .ok_or_else(|| GraphError::ParameterNotFound {
                node: node_name.clone(),
                parameter: parameter.to_string(),
            })?;

        if param.mode() == ParameterMode::Output {
            return Err(GraphError::IncompatibleModes(format!(
                "'{}.{}' is an output and is only written by its node",
                node_name, parameter
            )));
        }
        if value.is_null() {
            param.value = None;
            return Ok(());
        }

        let coerced = param
            .spec
            .coerce(&value)
            .ok_or_else(|| GraphError::IncompatibleTypes {
                from_type: value.data_type().to_string(),
                target: format!("{}.{}", node_name, parameter),
                accepted: param.spec.describe_types(),
            })?;
        param.value = Some(coerced);
        Ok(())
    }

    pub fn set_node_timeout(&mut self, node: NodeId, timeout_ms: Option<u64>) -> Result<(), GraphError> {
        self.node_mut(node)?.timeout_ms = timeout_ms;
        Ok(())
    }

    /// Store the values a node just produced on its output-capable parameters
    pub fn record_outputs(&mut self, node: NodeId, outputs: &HashMap<String, Value>) {
        if let Ok(target) = self.node_mut(node) {
            for param in target.parameters.iter_mut().filter(|p| p.mode().produces_output()) {
                if let Some(value) = outputs.get(param.name()) {
                    param.value = Some(value.clone());
                }
            }
        }
    }

    pub fn pair_loop(&mut self, start: NodeId, end: NodeId) -> Result<(), GraphError> {
        let start_node = self.require_node(start)?;
        let end_node = self.require_node(end)?;
        if start_node.role != NodeRole::LoopStart || end_node.role != NodeRole::LoopEnd {
            return Err(GraphError::Invalid(format!(
                "'{}' and '{}' are not a loop-start/loop-end pair",
                start_node.name, end_node.name
            )));
        }
        if self
            .loop_pairs
            .iter()
            .any(|p| p.start == start || p.end == end)
        {
            return Err(GraphError::Invalid(format!(
                "'{}' or '{}' is already paired",
                start_node.name, end_node.name
            )));
        }
        self.loop_pairs.push(LoopPair { start, end });
        Ok(())
    }

    pub fn loop_pairs(&self) -> &[LoopPair] {
        &self.loop_pairs
    }

    pub fn paired_start(&self, end: NodeId) -> Option<NodeId> {
        self.loop_pairs.iter().find(|p| p.end == end).map(|p| p.start)
    }

    /// A control edge from a loop-end's `continue` port back to its own
    /// loop-start. The loop-end's other exec-outs are exits.
    pub fn is_back_edge(&self, from: NodeId, port: &str, to: NodeId) -> bool {
        port == LOOP_CONTINUE && self.loop_pairs.iter().any(|p| p.end == from && p.start == to)
    }

    pub fn set_start_node(&mut self, node: NodeId) -> Result<(), GraphError> {
        self.require_node(node)?;
        self.start_node = Some(node);
        Ok(())
    }

    /// Explicit start node, else the first node with the `Start` role
    pub fn start_node(&self) -> Option<NodeId> {
        self.start_node
            .filter(|id| self.node(*id).is_some())
            .or_else(|| {
                self.nodes
                    .iter()
                    .find(|n| n.role == NodeRole::Start)
                    .map(|n| n.id)
            })
    }

    pub fn mark_busy(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        self.busy.extend(nodes);
    }

    pub fn release(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        for node in nodes {
            self.busy.remove(&node);
        }
    }

    pub fn is_busy(&self, node: NodeId) -> bool {
        self.busy.contains(&node)
    }

    pub fn has_busy_nodes(&self) -> bool {
        !self.busy.is_empty()
    }

    /// Rebuild this flow through the normal mutation path so every
    /// connection passes the validator again (used on import)
    pub fn revalidated(self) -> Result<Flow, GraphError> {
        let mut flow = Flow {
            id: self.id,
            name: self.name,
            parent: self.parent,
            description: self.description,
            nodes: Vec::new(),
            connections: Vec::new(),
            loop_pairs: Vec::new(),
            start_node: None,
            busy: HashSet::new(),
        };
        for node in self.nodes {
            flow.insert_node(node)?;
        }
        for pair in self.loop_pairs {
            flow.pair_loop(pair.start, pair.end)?;
        }
        for connection in self.connections {
            flow.insert_connection(connection)?;
        }
        if let Some(start) = self.start_node {
            flow.set_start_node(start)?;
        }
        Ok(flow)
    }
}

use crate::{ConnectionId, FlowId, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable classification of every failure the kernel can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    IncompatibleTypes,
    IncompatibleModes,
    MultipleWritersNotAllowed,
    CyclicDependency,
    UnresolvableCycle,
    NodeBusy,
    MissingRequiredInput,
    ValidationFailed,
    ComputationFailed,
    Timeout,
    UnbalancedContext,
    NotFound,
    UnknownNodeType,
    InvalidRequest,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Unresolvable cycle among nodes: {}", .0.join(", "))]
    UnresolvableCycle(Vec<String>),

    #[error("Node '{node}' is missing required input '{parameter}'")]
    MissingRequiredInput { node: String, parameter: String },

    #[error("Node '{node}' failed: {error}")]
    NodeFailed {
        node_id: NodeId,
        node: String,
        error: NodeError,
    },

    #[error("Unbalanced context: expected depth {expected}, found {actual}")]
    UnbalancedContext { expected: usize, actual: usize },

    #[error("Context stack was invalidated and must be reset")]
    ContextInvalidated,

    #[error("No active flow in context")]
    EmptyContext,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::Graph(e) => e.kind(),
            FlowError::Node(e) => e.kind(),
            FlowError::UnresolvableCycle(_) => ErrorKind::UnresolvableCycle,
            FlowError::MissingRequiredInput { .. } => ErrorKind::MissingRequiredInput,
            FlowError::NodeFailed { error, .. } => error.kind(),
            FlowError::UnbalancedContext { .. } | FlowError::ContextInvalidated => {
                ErrorKind::UnbalancedContext
            }
            FlowError::EmptyContext | FlowError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            FlowError::Execution(_) => ErrorKind::ComputationFailed,
            FlowError::Serialization(_) => ErrorKind::InvalidRequest,
        }
    }
}

/// Node-local failures; these become a node's outcome rather than a kernel fault
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::MissingInput(_)
            | NodeError::InvalidInputType { .. }
            | NodeError::Configuration(_)
            | NodeError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            NodeError::ExecutionFailed(_) => ErrorKind::ComputationFailed,
            NodeError::Timeout { .. } => ErrorKind::Timeout,
            NodeError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Structural and connection-time errors; raised before any mutation happens
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Flow not found: {0}")]
    FlowNotFound(FlowId),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("Node '{node}' has no parameter '{parameter}'")]
    ParameterNotFound { node: String, parameter: String },

    #[error("Node '{node}' has no control port '{port}'")]
    PortNotFound { node: String, port: String },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Incompatible modes: {0}")]
    IncompatibleModes(String),

    #[error("Incompatible types: {from_type} cannot feed '{target}' (accepts {accepted})")]
    IncompatibleTypes {
        from_type: String,
        target: String,
        accepted: String,
    },

    #[error("Input '{target}' already has an incoming connection")]
    MultipleWritersNotAllowed { target: String },

    #[error("Connecting {from} -> {to} would create a cycle")]
    CyclicDependency { from: String, to: String },

    #[error("Node '{0}' is busy in a running execution")]
    NodeBusy(String),

    #[error("Invalid flow: {0}")]
    Invalid(String),
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::FlowNotFound(_)
            | GraphError::NodeNotFound(_)
            | GraphError::ConnectionNotFound(_)
            | GraphError::ParameterNotFound { .. }
            | GraphError::PortNotFound { .. } => ErrorKind::NotFound,
            GraphError::UnknownNodeType(_) => ErrorKind::UnknownNodeType,
            GraphError::IncompatibleModes(_) => ErrorKind::IncompatibleModes,
            GraphError::IncompatibleTypes { .. } => ErrorKind::IncompatibleTypes,
            GraphError::MultipleWritersNotAllowed { .. } => ErrorKind::MultipleWritersNotAllowed,
            GraphError::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            GraphError::NodeBusy(_) => ErrorKind::NodeBusy,
            GraphError::Invalid(_) => ErrorKind::InvalidRequest,
        }
    }
}

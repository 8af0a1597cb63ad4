use crate::secrets::{EnvSecrets, SecretLookup};
use crate::stream::OutputStream;
use crate::{events::EventEmitter, NodeError, NodeId, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Core trait that all executable nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g., "text.concat", "flow.loop_end")
    fn node_type(&self) -> &str;

    /// Pre-run hook; a failure marks the node `Failed` without running it
    fn validate(&self, _ctx: &NodeContext) -> Result<(), NodeError> {
        Ok(())
    }

    /// Execute the node with given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    /// Unique node instance ID
    pub node_id: NodeId,

    pub node_name: String,

    /// Input values, already coerced to their declared types
    pub inputs: HashMap<String, Value>,

    /// Property values (set or defaulted)
    pub properties: HashMap<String, Value>,

    /// Pass index of the innermost active loop, 0 outside loops
    pub iteration: u32,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Partial output sequence consumed by the executor
    pub stream: OutputStream,

    /// Signalled when the request is cancelled; running nodes may finish anyway
    pub cancellation: CancellationToken,

    pub secrets: Arc<dyn SecretLookup>,
}

impl NodeContext {
    pub fn new(node_id: NodeId, events: EventEmitter) -> Self {
        Self {
            node_id,
            node_name: String::new(),
            inputs: HashMap::new(),
            properties: HashMap::new(),
            iteration: 0,
            events,
            stream: OutputStream::disconnected(),
            cancellation: CancellationToken::new(),
            secrets: Arc::new(EnvSecrets::new()),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get property value or return error
    pub fn require_property(&self, name: &str) -> Result<&Value, NodeError> {
        self.properties
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing property: {}", name)))
    }

    /// Get property with default
    pub fn get_property_or(&self, name: &str, default: Value) -> Value {
        self.properties.get(name).cloned().unwrap_or(default)
    }

    pub fn secret(&self, key: &str) -> Result<String, NodeError> {
        self.secrets
            .lookup(key)
            .ok_or_else(|| NodeError::Configuration(format!("Secret not available: {}", key)))
    }
}

/// Lifecycle of a node within one execution request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRunState {
    #[default]
    NotStarted,
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeRunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeRunState::Succeeded | NodeRunState::Failed | NodeRunState::Skipped
        )
    }
}

/// Output from node execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Output port values
    pub outputs: HashMap<String, Value>,

    /// Exec-out port to fire; `None` fires the node's default branch
    pub branch: Option<String>,

    /// Execution metadata
    pub metadata: NodeMetadata,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            branch: None,
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_branch(mut self, port: impl Into<String>) -> Self {
        self.branch = Some(port.into());
        self
    }
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub execution_time_ms: u64,
    pub custom: HashMap<String, Value>,
}

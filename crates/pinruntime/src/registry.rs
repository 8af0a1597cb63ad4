use pincore::{GraphError, Node, NodeError, NodeSchema};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Parameter and control-port declarations for this node type
    fn schema(&self) -> NodeSchema;

    /// Create a fresh instance; one is created per node run
    fn create(&self) -> Result<Box<dyn Node>, NodeError>;
}

/// Registry of available node types
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Create a node instance for a node type
    pub fn create_node(&self, node_type: &str) -> Result<Box<dyn Node>, NodeError> {
        let factory = self.factories.get(node_type).ok_or_else(|| {
            NodeError::Configuration(format!("Unknown node type: {}", node_type))
        })?;

        factory.create()
    }

    pub fn schema(&self, node_type: &str) -> Result<NodeSchema, GraphError> {
        self.factories
            .get(node_type)
            .map(|f| f.schema())
            .ok_or_else(|| GraphError::UnknownNodeType(node_type.to_string()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn schemas(&self) -> Vec<NodeSchema> {
        self.list_node_types()
            .iter()
            .filter_map(|t| self.factories.get(t).map(|f| f.schema()))
            .collect()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

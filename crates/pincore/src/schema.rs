use crate::ParameterSpec;
use serde::{Deserialize, Serialize};

/// Default sequencing pin names
pub const EXEC_IN: &str = "exec_in";
pub const EXEC_OUT: &str = "exec_out";
/// Exec-out of a loop-end that re-enters its paired loop-start
pub const LOOP_CONTINUE: &str = "continue";

/// Structural role a node type plays in control resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    #[default]
    Standard,
    /// Entry point of a Run-Flow walk
    Start,
    /// Head of a bounded loop; re-entered through its paired loop-end
    LoopStart,
    /// Tail of a bounded loop; one exec-out re-enters the loop-start
    LoopEnd,
}

/// Everything the kernel needs to know about a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    pub node_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    pub exec_in: Vec<String>,
    pub exec_out: Vec<String>,
    #[serde(default)]
    pub failure_port: Option<String>,
    #[serde(default)]
    pub role: NodeRole,
}

impl NodeSchema {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            description: String::new(),
            category: "general".to_string(),
            parameters: Vec::new(),
            exec_in: vec![EXEC_IN.to_string()],
            exec_out: vec![EXEC_OUT.to_string()],
            failure_port: None,
            role: NodeRole::Standard,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_exec_in<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec_in = ports.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_exec_out<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec_out = ports.into_iter().map(Into::into).collect();
        self
    }

    /// Designate the exec-out fired when the node fails; added to exec-out if missing
    pub fn with_failure_port(mut self, port: impl Into<String>) -> Self {
        let port = port.into();
        if !self.exec_out.contains(&port) {
            self.exec_out.push(port.clone());
        }
        self.failure_port = Some(port);
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

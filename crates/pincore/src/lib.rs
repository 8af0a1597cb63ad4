//! Core abstractions for the flow kernel
//!
//! This crate holds the graph model (flows, nodes, parameters, connections),
//! the connection validator, and the node interface every executable node
//! type implements. It knows nothing about scheduling.

mod error;
pub mod events;
mod flow;
pub mod graph;
mod node;
mod parameter;
mod schema;
pub mod secrets;
mod store;
pub mod stream;
pub mod validator;
mod value;

pub use error::{ErrorKind, FlowError, GraphError, NodeError};
pub use events::*;
pub use flow::{
    Connection, ConnectionId, ConnectionKind, Endpoint, Flow, FlowId, FlowNode, LoopPair, NodeId,
};
pub use node::{Node, NodeContext, NodeMetadata, NodeOutput, NodeRunState};
pub use parameter::{Parameter, ParameterMode, ParameterSpec};
pub use schema::{NodeRole, NodeSchema, EXEC_IN, EXEC_OUT, LOOP_CONTINUE};
pub use secrets::{EnvSecrets, SecretLookup, StaticSecrets};
pub use store::GraphStore;
pub use stream::{OutputStream, StreamEvent};
pub use value::{DataType, Value};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;

//! Flow execution runtime
//!
//! This crate resolves execution requests against the graph model, drives
//! nodes through their lifecycle on tokio tasks, and exposes the command bus
//! every mutation and run goes through.

mod context;
mod executor;
mod registry;
mod report;
mod request;
mod resolver;
mod runtime;

pub use context::ContextStack;
pub use executor::{ExecutionEnv, FlowExecutor};
pub use registry::{NodeFactory, NodeRegistry};
pub use report::{ExecutionReport, NodeFailure, NodeReport, RequestKind};
pub use request::{NodeSummary, Request, Response};
pub use resolver::Resolver;
pub use runtime::{FlowRuntime, RuntimeConfig};

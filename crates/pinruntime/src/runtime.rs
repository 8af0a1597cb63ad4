use crate::context::ContextStack;
use crate::executor::{ExecutionEnv, FlowExecutor};
use crate::registry::NodeRegistry;
use crate::request::{NodeSummary, Request, Response};
use pincore::{
    EnvSecrets, EventBus, ExecutionEvent, Flow, FlowError, FlowId, GraphError, GraphStore, NodeId,
    SecretLookup,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

/// Command bus: the single entry point for every mutation and execution
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    executor: Arc<FlowExecutor>,
    event_bus: Arc<EventBus>,
    graph: Arc<RwLock<GraphStore>>,
    /// Editing context; execution requests work on a fork of it
    context: Mutex<ContextStack>,
    /// One FIFO slot per flow so requests on the same flow never interleave
    slots: Mutex<HashMap<FlowId, Arc<Mutex<()>>>>,
    runs: Mutex<HashMap<FlowId, CancellationToken>>,
    secrets: Arc<dyn SecretLookup>,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let registry = Arc::new(NodeRegistry::new());
        Self::with_registry(registry, config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let executor = Arc::new(FlowExecutor::new(config));

        Self {
            registry,
            executor,
            event_bus,
            graph: Arc::new(RwLock::new(GraphStore::new())),
            context: Mutex::new(ContextStack::new()),
            slots: Mutex::new(HashMap::new()),
            runs: Mutex::new(HashMap::new()),
            secrets: Arc::new(EnvSecrets::new()),
        }
    }

    /// Replace the secret lookup handed to every node
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretLookup>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Get access to the node registry
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.executor.config()
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Read-only copy of a flow, for inspection outside the bus
    pub async fn snapshot(&self, flow_id: FlowId) -> Result<Flow, FlowError> {
        Ok(self.graph.read().await.flow(flow_id)?.clone())
    }

    pub async fn current_flow(&self) -> Option<FlowId> {
        self.context.lock().await.current()
    }

    pub async fn context_depth(&self) -> usize {
        self.context.lock().await.depth()
    }

    pub async fn handle_request(&self, request: Request) -> Result<Response, FlowError> {
        tracing::info!(request = request.name(), "Handling request");

        let result = self.dispatch(request).await;
        if let Err(e) = &result {
            tracing::warn!(kind = %e.kind(), "Request rejected: {}", e);
        }
        result
    }

    async fn dispatch(&self, request: Request) -> Result<Response, FlowError> {
        if !matches!(request, Request::ResetContext | Request::CancelRun { .. }) {
            self.context.lock().await.ensure_valid()?;
        }

        match request {
            Request::CreateFlow { name, parent } => {
                let flow_id = self.graph.write().await.create_flow(name, parent)?;
                Ok(Response::FlowCreated { flow_id })
            }

            Request::DeleteFlow { flow_id } => {
                let _slot = self.acquire_slot(flow_id).await;
                self.graph.write().await.delete_flow(flow_id)?;
                self.context.lock().await.forget(flow_id);
                self.slots.lock().await.remove(&flow_id);
                tracing::info!(flow_id = %flow_id, "Flow deleted");
                Ok(Response::FlowDeleted { flow_id })
            }

            Request::CreateNode {
                flow,
                node_type,
                name,
                timeout_ms,
            } => {
                let flow_id = self.target_flow(flow).await?;
                let schema = self.registry.schema(&node_type)?;
                let _slot = self.acquire_slot(flow_id).await;

                let mut graph = self.graph.write().await;
                let flow = graph.flow_mut(flow_id)?;
                let node_id = flow.add_node(name.as_deref(), &schema);
                flow.set_node_timeout(node_id, timeout_ms)?;
                let name = flow.require_node(node_id)?.name.clone();
                Ok(Response::NodeCreated {
                    flow_id,
                    node_id,
                    name,
                })
            }

            Request::DeleteNode { node_id } => {
                let flow_id = self.flow_of_node(node_id).await?;
                let _slot = self.acquire_slot(flow_id).await;
                let removed = self
                    .graph
                    .write()
                    .await
                    .flow_mut(flow_id)?
                    .remove_node(node_id)?;
                Ok(Response::NodeDeleted {
                    node_id,
                    removed_connections: removed.into_iter().map(|c| c.id).collect(),
                })
            }

            Request::SetParameterValue {
                node_id,
                parameter,
                value,
            } => {
                let flow_id = self.flow_of_node(node_id).await?;
                let _slot = self.acquire_slot(flow_id).await;
                self.graph
                    .write()
                    .await
                    .flow_mut(flow_id)?
                    .set_parameter_value(node_id, &parameter, value)?;
                Ok(Response::ParameterSet { node_id, parameter })
            }

            Request::CreateConnection { kind, from, to } => {
                let flow_id = self.flow_of_node(from.node).await?;
                let _slot = self.acquire_slot(flow_id).await;
                let connection_id = self
                    .graph
                    .write()
                    .await
                    .flow_mut(flow_id)?
                    .connect(kind, from, to)?;
                Ok(Response::ConnectionCreated { connection_id })
            }

            Request::DeleteConnection { connection_id } => {
                let flow_id = self
                    .graph
                    .read()
                    .await
                    .flow_of_connection(connection_id)
                    .ok_or(GraphError::ConnectionNotFound(connection_id))?;
                let _slot = self.acquire_slot(flow_id).await;
                self.graph
                    .write()
                    .await
                    .flow_mut(flow_id)?
                    .disconnect(connection_id)?;
                Ok(Response::ConnectionDeleted { connection_id })
            }

            Request::PairLoop { start, end } => {
                let flow_id = self.flow_of_node(start).await?;
                let _slot = self.acquire_slot(flow_id).await;
                self.graph
                    .write()
                    .await
                    .flow_mut(flow_id)?
                    .pair_loop(start, end)?;
                Ok(Response::LoopPaired { start, end })
            }

            Request::SetStartNode { node_id } => {
                let flow_id = self.flow_of_node(node_id).await?;
                let _slot = self.acquire_slot(flow_id).await;
                self.graph
                    .write()
                    .await
                    .flow_mut(flow_id)?
                    .set_start_node(node_id)?;
                Ok(Response::StartNodeSet { node_id })
            }

            Request::RunFlow { flow } => {
                let flow_id = self.target_flow(flow).await?;
                self.execute(flow_id, None).await
            }

            Request::RunNode { node_id } => {
                let flow_id = self.flow_of_node(node_id).await?;
                self.execute(flow_id, Some(node_id)).await
            }

            Request::CancelRun { flow } => {
                let flow_id = self.target_flow(flow).await?;
                let cancelled = match self.runs.lock().await.get(&flow_id) {
                    Some(token) => {
                        token.cancel();
                        true
                    }
                    None => false,
                };
                tracing::info!(flow_id = %flow_id, cancelled, "Cancel requested");
                Ok(Response::RunCancelled { flow_id, cancelled })
            }

            Request::PushContext { flow_id } => {
                self.graph.read().await.flow(flow_id)?;
                let mut context = self.context.lock().await;
                context.push(flow_id)?;
                Ok(Response::ContextPushed {
                    flow_id,
                    depth: context.depth(),
                })
            }

            Request::PopContext => {
                let mut context = self.context.lock().await;
                let flow_id = context.pop()?;
                Ok(Response::ContextPopped {
                    flow_id,
                    depth: context.depth(),
                })
            }

            Request::ResetContext => {
                self.context.lock().await.reset();
                tracing::info!("Context stack reset");
                Ok(Response::ContextReset)
            }

            Request::ListNodes { flow } => {
                let flow_id = self.target_flow(flow).await?;
                let graph = self.graph.read().await;
                let flow = graph.flow(flow_id)?;
                let nodes = flow
                    .nodes()
                    .iter()
                    .map(|n| NodeSummary::new(n, flow.is_busy(n.id)))
                    .collect();
                Ok(Response::Nodes { nodes })
            }

            Request::ListNodeTypes => Ok(Response::NodeTypes {
                types: self.registry.schemas(),
            }),

            Request::ExportFlow { flow } => {
                let flow_id = self.target_flow(flow).await?;
                let flow = self.graph.read().await.flow(flow_id)?.clone();
                Ok(Response::FlowExported { flow })
            }

            Request::ImportFlow { flow } => {
                for node in flow.nodes() {
                    if !self.registry.contains(&node.node_type) {
                        return Err(GraphError::UnknownNodeType(node.node_type.clone()).into());
                    }
                }
                let flow_id = self.graph.write().await.insert_flow(flow)?;
                tracing::info!(flow_id = %flow_id, "Flow imported");
                Ok(Response::FlowImported { flow_id })
            }
        }
    }

    /// Run a request against a fork of the editing context, holding the
    /// flow's slot for the whole run
    async fn execute(&self, flow_id: FlowId, target: Option<NodeId>) -> Result<Response, FlowError> {
        let _slot = self.acquire_slot(flow_id).await;

        let mut context = {
            let editing = self.context.lock().await;
            editing.ensure_valid()?;
            editing.clone()
        };
        let checkpoint = context.checkpoint();
        let entered = context.current() != Some(flow_id);
        if entered {
            context.push(flow_id)?;
        }

        let token = CancellationToken::new();
        self.runs.lock().await.insert(flow_id, token.clone());

        let env = ExecutionEnv {
            graph: self.graph.clone(),
            registry: self.registry.clone(),
            events: self.event_bus.clone(),
            secrets: self.secrets.clone(),
            cancellation: token,
        };
        let result = match target {
            Some(node_id) => self.executor.run_node(&env, flow_id, node_id).await,
            None => self.executor.run_flow(&env, flow_id).await,
        };

        self.runs.lock().await.remove(&flow_id);
        let popped = if entered { context.pop().map(|_| ()) } else { Ok(()) };
        // nodes never push flows, so this only catches the bus's own pairing
        // going wrong; it is still settled before any pop error surfaces
        self.context.lock().await.settle_fork(&context, checkpoint)?;
        popped?;

        let report = result?;
        Ok(Response::Executed { report })
    }

    async fn acquire_slot(&self, flow_id: FlowId) -> OwnedMutexGuard<()> {
        let slot = self
            .slots
            .lock()
            .await
            .entry(flow_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        slot.lock_owned().await
    }

    async fn target_flow(&self, flow: Option<FlowId>) -> Result<FlowId, FlowError> {
        let flow_id = match flow {
            Some(id) => id,
            None => self
                .context
                .lock()
                .await
                .current()
                .ok_or(FlowError::EmptyContext)?,
        };
        self.graph.read().await.flow(flow_id)?;
        Ok(flow_id)
    }

    async fn flow_of_node(&self, node_id: NodeId) -> Result<FlowId, FlowError> {
        self.graph
            .read()
            .await
            .flow_of_node(node_id)
            .ok_or_else(|| GraphError::NodeNotFound(node_id).into())
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// Applied to nodes without their own `timeout_ms`
    pub default_node_timeout_ms: Option<u64>,
    pub max_loop_iterations: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            default_node_timeout_ms: None,
            max_loop_iterations: 1000,
        }
    }
}

use crate::registry::NodeRegistry;
use crate::report::{ExecutionReport, NodeFailure, NodeReport, RequestKind};
use crate::resolver::Resolver;
use crate::RuntimeConfig;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use pincore::{
    ErrorKind, EventBus, EventEmitter, ExecutionEvent, ExecutionId, Flow, FlowError, FlowId,
    GraphStore, Node, NodeContext, NodeError, NodeEvent, NodeId, NodeOutput, NodeRole,
    NodeRunState, RunStatus, SecretLookup, StreamEvent, Value,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Shared handles an execution request runs against
#[derive(Clone)]
pub struct ExecutionEnv {
    pub graph: Arc<RwLock<GraphStore>>,
    pub registry: Arc<NodeRegistry>,
    pub events: Arc<EventBus>,
    pub secrets: Arc<dyn SecretLookup>,
    pub cancellation: CancellationToken,
}

/// Drives resolved plans: walks control edges, runs units of work on a
/// bounded set of tokio tasks, and interprets branch outcomes
pub struct FlowExecutor {
    config: RuntimeConfig,
}

impl FlowExecutor {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run-Flow: start at the flow's start node and follow fired control ports
    pub async fn run_flow(
        &self,
        env: &ExecutionEnv,
        flow_id: FlowId,
    ) -> Result<ExecutionReport, FlowError> {
        let snapshot = env.graph.read().await.flow(flow_id)?.clone();
        let start = snapshot.start_node().ok_or_else(|| {
            FlowError::InvalidRequest(format!("flow '{}' has no start node", snapshot.name))
        })?;

        let mut run = Run::new(&self.config, env, &snapshot);
        let scope = run.resolver.flow_scope(start)?;

        tracing::info!(flow = %snapshot.name, execution_id = %run.execution_id, "Starting run-flow");
        run.emit_started(None);
        set_busy(env, flow_id, &scope, true).await;

        let walked = run.walk(start).await;

        set_busy(env, flow_id, &scope, false).await;
        let report = run.finish(RequestKind::RunFlow);
        walked?;
        Ok(report)
    }

    /// Run-Node: the target plus its transitive data dependencies; control
    /// edges are ignored and any failure fails the request
    pub async fn run_node(
        &self,
        env: &ExecutionEnv,
        flow_id: FlowId,
        target: NodeId,
    ) -> Result<ExecutionReport, FlowError> {
        let snapshot = env.graph.read().await.flow(flow_id)?.clone();

        let mut run = Run::new(&self.config, env, &snapshot);
        let plan = run.resolver.plan_node(target)?;

        tracing::info!(flow = %snapshot.name, target = %target, steps = plan.len(), "Starting run-node");
        run.emit_started(Some(target));
        set_busy(env, flow_id, &plan, true).await;

        let ran = run.run_unit(&plan, 0).await;

        set_busy(env, flow_id, &plan, false).await;
        let first_error = run.errors.first().cloned();
        let report = run.finish(RequestKind::RunNode);
        ran?;

        if let Some((node_id, error)) = first_error {
            let node = snapshot
                .node(node_id)
                .map(|n| n.name.clone())
                .unwrap_or_else(|| node_id.to_string());
            return Err(FlowError::NodeFailed {
                node_id,
                node,
                error,
            });
        }
        Ok(report)
    }
}

async fn set_busy(env: &ExecutionEnv, flow_id: FlowId, nodes: &[NodeId], busy: bool) {
    let mut graph = env.graph.write().await;
    if let Ok(flow) = graph.flow_mut(flow_id) {
        if busy {
            flow.mark_busy(nodes.iter().copied());
        } else {
            flow.release(nodes.iter().copied());
        }
    }
}

/// One pass through a paired loop
struct LoopFrame {
    start: NodeId,
    iteration: u32,
    /// Nodes settled since the loop-start was entered; reset on re-entry
    executed: Vec<NodeId>,
}

enum Readiness {
    Ready,
    Waiting,
    Blocked(String),
}

/// Sent back by a node task when its computation ends
struct Completion {
    node_id: NodeId,
    result: Result<NodeOutput, NodeError>,
    partials: Vec<StreamEvent>,
    duration_ms: u64,
}

/// Per-request bookkeeping; discarded once the report is built
struct Run<'a> {
    config: &'a RuntimeConfig,
    env: &'a ExecutionEnv,
    flow: &'a Flow,
    resolver: Resolver<'a>,
    execution_id: ExecutionId,
    started: Instant,
    states: HashMap<NodeId, NodeRunState>,
    outputs: HashMap<NodeId, HashMap<String, Value>>,
    /// Port each settled node fires once control reaches it
    branches: HashMap<NodeId, Option<String>>,
    fired: HashSet<NodeId>,
    reports: HashMap<NodeId, NodeReport>,
    order: Vec<NodeId>,
    errors: Vec<(NodeId, NodeError)>,
    unhandled: Vec<NodeFailure>,
    cancelled: bool,
}

impl<'a> Run<'a> {
    fn new(config: &'a RuntimeConfig, env: &'a ExecutionEnv, flow: &'a Flow) -> Self {
        Self {
            config,
            env,
            flow,
            resolver: Resolver::new(flow),
            execution_id: ExecutionId::new_v4(),
            started: Instant::now(),
            states: HashMap::new(),
            outputs: HashMap::new(),
            branches: HashMap::new(),
            fired: HashSet::new(),
            reports: HashMap::new(),
            order: Vec::new(),
            errors: Vec::new(),
            unhandled: Vec::new(),
            cancelled: false,
        }
    }

    fn state(&self, id: NodeId) -> NodeRunState {
        self.states.get(&id).copied().unwrap_or_default()
    }

    fn set_state(&mut self, id: NodeId, state: NodeRunState) {
        self.states.insert(id, state);
        if let Some(node) = self.flow.node(id) {
            self.reports
                .entry(id)
                .or_insert_with(|| NodeReport::new(node))
                .state = state;
        }
    }

    fn report_mut(&mut self, id: NodeId) -> Option<&mut NodeReport> {
        let node = self.flow.node(id)?;
        Some(self.reports.entry(id).or_insert_with(|| NodeReport::new(node)))
    }

    fn name(&self, id: NodeId) -> String {
        self.flow
            .node(id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Control walk from `start`. Each node reached is preceded by the
    /// unsatisfied part of its data closure; only fired ports continue it.
    async fn walk(&mut self, start: NodeId) -> Result<(), FlowError> {
        let flow = self.flow;
        let mut queue = VecDeque::from([start]);
        let mut loops: Vec<LoopFrame> = Vec::new();
        let mut deferred = 0usize;

        while let Some(id) = queue.pop_front() {
            if self.env.cancellation.is_cancelled() {
                self.note_cancelled();
                break;
            }
            // first arrival wins
            if self.fired.contains(&id) {
                tracing::debug!(node = %self.name(id), "Already fired in this pass");
                continue;
            }
            let node = flow.require_node(id)?;

            // a loop-end decides only after the rest of its pass has been walked
            if node.role == NodeRole::LoopEnd && deferred < queue.len() {
                if let Some(loop_start) = flow.paired_start(id) {
                    let body = self.resolver.loop_body(loop_start, id);
                    if queue.iter().any(|queued| body.contains(queued)) {
                        tracing::debug!(node = %node.name, "Loop-end waiting for the rest of its pass");
                        deferred += 1;
                        queue.push_back(id);
                        continue;
                    }
                }
            }
            deferred = 0;

            if node.role == NodeRole::LoopStart && !loops.iter().any(|f| f.start == id) {
                loops.push(LoopFrame {
                    start: id,
                    iteration: 0,
                    executed: Vec::new(),
                });
            }
            let iteration = loops.last().map_or(0, |f| f.iteration);

            if !self.state(id).is_terminal() {
                let unit = self.resolver.resolve_node(id, &self.states)?;
                self.run_unit(&unit, iteration).await?;
                for frame in loops.iter_mut() {
                    frame.executed.extend(unit.iter().copied());
                }
            }
            if self.cancelled {
                break;
            }

            self.fired.insert(id);
            let Some(port) = self.branches.get(&id).cloned().flatten() else {
                continue;
            };

            let targets = flow.control_targets(id, &port);
            let back_edge = targets
                .iter()
                .copied()
                .find(|t| flow.is_back_edge(id, &port, *t));
            queue.extend(targets.iter().copied().filter(|t| Some(*t) != back_edge));

            match back_edge {
                Some(loop_start) => self.reenter_loop(&mut loops, id, loop_start, &mut queue),
                None if node.role == NodeRole::LoopEnd => {
                    if let Some(loop_start) = flow.paired_start(id) {
                        loops.retain(|f| f.start != loop_start);
                    }
                }
                None => {}
            }
        }

        if !self.cancelled {
            for id in self.resolver.control_reachable(start) {
                if self.state(id) == NodeRunState::NotStarted {
                    self.skip(id, "not reached by any fired control port".to_string());
                }
            }
        }

        Ok(())
    }

    fn reenter_loop(
        &mut self,
        loops: &mut Vec<LoopFrame>,
        end: NodeId,
        start: NodeId,
        queue: &mut VecDeque<NodeId>,
    ) {
        let Some(pos) = loops.iter().position(|f| f.start == start) else {
            queue.push_back(start);
            return;
        };
        loops.truncate(pos + 1);
        let frame = &mut loops[pos];
        frame.iteration += 1;

        if frame.iteration >= self.config.max_loop_iterations {
            let limit = self.config.max_loop_iterations;
            loops.truncate(pos);
            self.record_failure(
                end,
                NodeError::ExecutionFailed(format!("loop exceeded {} iterations", limit)),
                0,
                Vec::new(),
            );
            if let Some(port) = self.flow.node(end).and_then(|n| n.failure_port.clone()) {
                queue.extend(self.flow.control_targets(end, &port));
            }
            return;
        }

        tracing::debug!(loop_start = %self.name(start), iteration = frame.iteration, "Re-entering loop");
        let executed = std::mem::take(&mut frame.executed);
        let body = self.resolver.loop_body(start, end);
        for id in executed.into_iter().chain(body).chain([start, end]) {
            self.states.remove(&id);
            self.branches.remove(&id);
            self.fired.remove(&id);
        }
        queue.push_back(start);
    }

    /// Run `unit` (already in dependency order), releasing each node to a
    /// task once every data producer has succeeded
    async fn run_unit(&mut self, unit: &[NodeId], iteration: u32) -> Result<(), FlowError> {
        let max_parallel = self.config.max_parallel_nodes.max(1);
        let mut pending = Vec::new();
        for &id in unit {
            if !self.state(id).is_terminal() {
                self.set_state(id, NodeRunState::Pending);
                pending.push(id);
            }
        }

        let mut running = FuturesUnordered::new();

        loop {
            if self.env.cancellation.is_cancelled() && !pending.is_empty() {
                self.note_cancelled();
                for id in pending.drain(..) {
                    self.set_state(id, NodeRunState::NotStarted);
                }
            }

            let mut progressed = true;
            while progressed && running.len() < max_parallel {
                progressed = false;
                let mut i = 0;
                while i < pending.len() && running.len() < max_parallel {
                    let id = pending[i];
                    match self.readiness(id) {
                        Readiness::Waiting => i += 1,
                        Readiness::Blocked(reason) => {
                            pending.remove(i);
                            self.skip(id, reason);
                            progressed = true;
                        }
                        Readiness::Ready => {
                            pending.remove(i);
                            self.set_state(id, NodeRunState::Ready);
                            match self.launch(id, iteration) {
                                Ok(handle) => running.push(handle.map(move |joined| (id, joined))),
                                Err(error) => self.record_failure(id, error, 0, Vec::new()),
                            }
                            progressed = true;
                        }
                    }
                }
            }

            if running.is_empty() {
                for id in pending.drain(..) {
                    self.skip(id, "data producers never completed".to_string());
                }
                break;
            }

            match running.next().await {
                Some((_, Ok(completion))) => self.complete(completion).await,
                Some((id, Err(error))) => self.record_failure(id, join_failure(error), 0, Vec::new()),
                None => {}
            }
        }

        Ok(())
    }

    fn readiness(&self, id: NodeId) -> Readiness {
        let mut waiting = false;
        for producer in self.resolver.data_producers(id) {
            match self.state(producer) {
                NodeRunState::Succeeded => {}
                NodeRunState::Failed | NodeRunState::Skipped => {
                    return Readiness::Blocked(format!(
                        "producer '{}' did not succeed",
                        self.name(producer)
                    ));
                }
                _ => waiting = true,
            }
        }
        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    fn launch(&mut self, id: NodeId, iteration: u32) -> Result<JoinHandle<Completion>, NodeError> {
        let flow = self.flow;
        let node = flow
            .node(id)
            .ok_or_else(|| NodeError::Configuration(format!("node {} is not in the flow", id)))?;
        let instance: Arc<dyn Node> = Arc::from(self.env.registry.create_node(&node.node_type)?);
        let inputs = self.gather_inputs(id)?;

        let mut ctx = NodeContext::new(id, self.env.events.create_emitter(self.execution_id, id));
        ctx.node_name = node.name.clone();
        ctx.inputs = inputs;
        ctx.properties = node.properties();
        ctx.iteration = iteration;
        ctx.secrets = self.env.secrets.clone();

        // rejected by the pre-run hook: failed, but never started
        if let Err(error) = instance.validate(&ctx) {
            return Err(match error.kind() {
                ErrorKind::ValidationFailed => error,
                _ => NodeError::ValidationFailed(error.to_string()),
            });
        }

        let limit = node.timeout_ms.or(self.config.default_node_timeout_ms);

        self.set_state(id, NodeRunState::Running);
        self.order.push(id);
        if let Some(report) = self.report_mut(id) {
            report.runs += 1;
        }

        tracing::debug!(node = %node.name, node_type = %node.node_type, iteration, "Launching node");
        self.env.events.emit(ExecutionEvent::NodeStarted {
            execution_id: self.execution_id,
            node_id: id,
            node_type: node.node_type.clone(),
            timestamp: Utc::now(),
        });

        Ok(tokio::spawn(drive_node(instance, ctx, limit)))
    }

    /// Input values from connected producers, else the parameter's own value
    fn gather_inputs(&self, id: NodeId) -> Result<HashMap<String, Value>, NodeError> {
        let node = self
            .flow
            .node(id)
            .ok_or_else(|| NodeError::Configuration(format!("node {} is not in the flow", id)))?;
        let mut inputs = HashMap::new();

        for param in node.parameters.iter().filter(|p| p.mode().accepts_connection()) {
            let value = match self.flow.data_source(id, param.name()) {
                Some(conn) => self
                    .outputs
                    .get(&conn.from.node)
                    .and_then(|o| o.get(&conn.from.port))
                    .cloned()
                    .or_else(|| {
                        (!param.spec.required)
                            .then(|| param.current_value().cloned())
                            .flatten()
                    }),
                None => param.current_value().cloned(),
            };

            match value {
                Some(value) => {
                    let coerced =
                        param
                            .spec
                            .coerce(&value)
                            .ok_or_else(|| NodeError::InvalidInputType {
                                field: param.name().to_string(),
                                expected: param.spec.describe_types(),
                                actual: value.data_type().to_string(),
                            })?;
                    inputs.insert(param.name().to_string(), coerced);
                }
                None if param.spec.required => {
                    return Err(NodeError::MissingInput(param.name().to_string()));
                }
                None => {}
            }
        }

        Ok(inputs)
    }

    async fn complete(&mut self, completion: Completion) {
        let Completion {
            node_id: id,
            result,
            partials,
            duration_ms,
        } = completion;
        let flow = self.flow;
        let Some(node) = flow.node(id) else {
            return;
        };

        let output = match result {
            Ok(output) => output,
            Err(error) => return self.record_failure(id, error, duration_ms, partials),
        };

        if let Some(port) = &output.branch {
            if !node.has_exec_out(port) {
                let error = NodeError::ExecutionFailed(format!(
                    "branch '{}' is not an exec-out of '{}'",
                    port, node.name
                ));
                return self.record_failure(id, error, duration_ms, partials);
            }
        }
        let fired = output
            .branch
            .clone()
            .or_else(|| node.default_branch().map(String::from));

        {
            let mut graph = self.env.graph.write().await;
            if let Ok(live) = graph.flow_mut(flow.id) {
                live.record_outputs(id, &output.outputs);
            }
        }

        tracing::info!(node = %node.name, duration_ms, fired = ?fired, "Node completed");
        self.env.events.emit(ExecutionEvent::NodeCompleted {
            execution_id: self.execution_id,
            node_id: id,
            outputs: output.outputs.clone(),
            fired_port: fired.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });

        self.set_state(id, NodeRunState::Succeeded);
        self.branches.insert(id, fired.clone());
        self.outputs.insert(id, output.outputs.clone());
        if let Some(report) = self.report_mut(id) {
            report.fired_port = fired;
            report.outputs = output.outputs;
            report.partials = partials;
            report.failure = None;
            report.duration_ms = duration_ms;
        }
    }

    fn record_failure(
        &mut self,
        id: NodeId,
        error: NodeError,
        duration_ms: u64,
        partials: Vec<StreamEvent>,
    ) {
        let flow = self.flow;
        let Some(node) = flow.node(id) else {
            return;
        };

        tracing::error!(node = %node.name, kind = %error.kind(), "Node failed: {}", error);
        self.env.events.emit(ExecutionEvent::NodeFailed {
            execution_id: self.execution_id,
            node_id: id,
            kind: error.kind(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });

        let failure = NodeFailure {
            node_id: id,
            node_name: node.name.clone(),
            kind: error.kind(),
            message: error.to_string(),
        };

        self.set_state(id, NodeRunState::Failed);
        self.branches.insert(id, node.failure_port.clone());
        if node.failure_port.is_none() {
            self.unhandled.push(failure.clone());
        }
        self.errors.push((id, error));
        if let Some(report) = self.report_mut(id) {
            report.fired_port = node.failure_port.clone();
            report.outputs.clear();
            report.partials = partials;
            report.failure = Some(failure);
            report.duration_ms = duration_ms;
        }
    }

    fn skip(&mut self, id: NodeId, reason: String) {
        tracing::warn!(node = %self.name(id), reason = %reason, "Node skipped");
        self.env.events.emit(ExecutionEvent::NodeSkipped {
            execution_id: self.execution_id,
            node_id: id,
            reason,
            timestamp: Utc::now(),
        });
        self.set_state(id, NodeRunState::Skipped);
        self.branches.insert(id, None);
    }

    fn note_cancelled(&mut self) {
        if !self.cancelled {
            tracing::warn!(execution_id = %self.execution_id, "Execution cancelled; no further nodes will be scheduled");
        }
        self.cancelled = true;
    }

    fn emit_started(&self, target: Option<NodeId>) {
        self.env.events.emit(ExecutionEvent::RunStarted {
            execution_id: self.execution_id,
            flow_id: self.flow.id,
            target,
            timestamp: Utc::now(),
        });
    }

    fn finish(self, request: RequestKind) -> ExecutionReport {
        let status = if self.cancelled {
            RunStatus::Cancelled
        } else if !self.unhandled.is_empty() || (request == RequestKind::RunNode && !self.errors.is_empty()) {
            RunStatus::PartiallyCompleted
        } else {
            RunStatus::Completed
        };
        let duration_ms = self.started.elapsed().as_millis() as u64;

        tracing::info!(execution_id = %self.execution_id, status = ?status, duration_ms, "Execution finished");
        self.env.events.emit(ExecutionEvent::RunCompleted {
            execution_id: self.execution_id,
            status,
            duration_ms,
            timestamp: Utc::now(),
        });

        let mut reports = self.reports;
        let nodes = self
            .flow
            .nodes()
            .iter()
            .filter_map(|n| reports.remove(&n.id))
            .collect();

        ExecutionReport {
            execution_id: self.execution_id,
            flow_id: self.flow.id,
            request,
            status,
            order: self.order,
            nodes,
            failures: self.unhandled,
            duration_ms,
        }
    }
}

/// Body of a node task: computation under the optional timeout, and
/// in-order draining of the node's partial outputs.
///
/// The node's cancellation token is its own. It fires only when the node is
/// abandoned on timeout; cancelling the request lets a running node finish.
async fn drive_node(node: Arc<dyn Node>, mut ctx: NodeContext, limit: Option<u64>) -> Completion {
    let node_id = ctx.node_id;
    let events = ctx.events.clone();
    let abandon = ctx.cancellation.clone();
    let started = Instant::now();

    let (stream, mut receiver) = pincore::stream::output_stream();
    ctx.stream = stream;
    let compute = node.execute(ctx);
    let bounded = async move {
        match limit {
            Some(millis) => match timeout(Duration::from_millis(millis), compute).await {
                Ok(result) => result,
                Err(_) => {
                    abandon.cancel();
                    Err(NodeError::Timeout { millis })
                }
            },
            None => compute.await,
        }
    };
    tokio::pin!(bounded);

    let mut partials = Vec::new();
    let result = loop {
        tokio::select! {
            biased;
            Some(event) = receiver.recv() => forward_partial(&events, &mut partials, event),
            result = &mut bounded => break result,
        }
    };
    while let Ok(event) = receiver.try_recv() {
        forward_partial(&events, &mut partials, event);
    }
    partials.push(StreamEvent::Done);
    events.emit(NodeEvent::StreamDone);

    Completion {
        node_id,
        result,
        partials,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// A node task that died without reporting back, usually a panic
fn join_failure(error: JoinError) -> NodeError {
    if !error.is_panic() {
        return NodeError::ExecutionFailed(format!("node task ended abnormally: {}", error));
    }
    let payload = error.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    NodeError::ExecutionFailed(format!("node panicked: {}", message))
}

fn forward_partial(events: &EventEmitter, partials: &mut Vec<StreamEvent>, event: StreamEvent) {
    if let StreamEvent::Partial { port, value } = &event {
        events.data(port.clone(), value.clone());
    }
    partials.push(event);
}

#![allow(dead_code)]

use async_trait::async_trait;
use pincore::{
    ConnectionId, ConnectionKind, DataType, Endpoint, FlowError, FlowId, Node, NodeContext,
    NodeError, NodeId, NodeOutput, NodeRole, NodeSchema, ParameterSpec, Value, EXEC_IN, EXEC_OUT,
};
use pinruntime::{
    ExecutionReport, FlowRuntime, NodeFactory, NodeRegistry, Request, Response, RuntimeConfig,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Names of nodes whose computation ran, in call order
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn record(&self, name: &str) {
        self.0.lock().unwrap().push(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == name).count()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    /// Empty output, default branch
    Pass,
    /// `out` = property `value`
    Emit,
    /// `out` = inputs `a` and `b` joined with '+'
    Join,
    /// `out` = input `in`
    Echo,
    /// Fires `failure` when property `fail` is true, `success` otherwise
    Branch,
    Fail,
    /// Sleeps for property `ms`, then echoes `in` when present
    Sleep,
    /// Streams each word of property `text` on `word`
    Stream,
    /// `index` = loop iteration
    LoopStart,
    /// Fires `continue` until `count` passes have completed
    LoopEnd,
    /// Pre-run hook always rejects
    Reject,
    /// Fires a port it never declared
    BadBranch,
    Panic,
}

struct TestFactory {
    schema: NodeSchema,
    behavior: Behavior,
    log: CallLog,
}

impl NodeFactory for TestFactory {
    fn node_type(&self) -> &str {
        &self.schema.node_type
    }

    fn schema(&self) -> NodeSchema {
        self.schema.clone()
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(TestNode {
            node_type: self.schema.node_type.clone(),
            behavior: self.behavior,
            log: self.log.clone(),
        }))
    }
}

struct TestNode {
    node_type: String,
    behavior: Behavior,
    log: CallLog,
}

#[async_trait]
impl Node for TestNode {
    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn validate(&self, _ctx: &NodeContext) -> Result<(), NodeError> {
        match self.behavior {
            Behavior::Reject => Err(NodeError::ValidationFailed("rejected".to_string())),
            _ => Ok(()),
        }
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.log.record(&ctx.node_name);

        match self.behavior {
            Behavior::Pass | Behavior::Reject => Ok(NodeOutput::new()),
            Behavior::Emit => {
                let value = ctx.get_property_or("value", Value::Null);
                Ok(NodeOutput::new().with_output("out", value))
            }
            Behavior::Join => {
                let a = ctx.inputs.get("a").and_then(|v| v.as_str()).unwrap_or("-");
                let b = ctx.inputs.get("b").and_then(|v| v.as_str()).unwrap_or("-");
                Ok(NodeOutput::new().with_output("out", format!("{}+{}", a, b)))
            }
            Behavior::Echo => {
                let value = ctx.require_input("in")?.clone();
                Ok(NodeOutput::new().with_output("out", value))
            }
            Behavior::Branch => {
                let fail = ctx
                    .get_property_or("fail", Value::Bool(false))
                    .as_bool()
                    .unwrap_or(false);
                Ok(NodeOutput::new().with_branch(if fail { "failure" } else { "success" }))
            }
            Behavior::Fail => Err(NodeError::ExecutionFailed("boom".to_string())),
            Behavior::Sleep => {
                let ms = ctx
                    .get_property_or("ms", Value::Number(10.0))
                    .as_f64()
                    .unwrap_or(10.0);
                tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                let mut output = NodeOutput::new().with_output("done", true);
                if let Some(value) = ctx.inputs.get("in") {
                    output = output.with_output("out", value.clone());
                }
                Ok(output)
            }
            Behavior::Stream => {
                let text = ctx
                    .get_property_or("text", Value::from(""))
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                for word in text.split_whitespace() {
                    ctx.stream.send("word", word);
                }
                Ok(NodeOutput::new().with_output("text", text))
            }
            Behavior::LoopStart => {
                Ok(NodeOutput::new().with_output("index", ctx.iteration as f64))
            }
            Behavior::LoopEnd => {
                let count = ctx
                    .get_property_or("count", Value::Number(1.0))
                    .as_f64()
                    .unwrap_or(1.0) as u32;
                if ctx.iteration + 1 < count {
                    Ok(NodeOutput::new().with_branch("continue"))
                } else {
                    Ok(NodeOutput::new().with_branch(EXEC_OUT))
                }
            }
            Behavior::BadBranch => Ok(NodeOutput::new().with_branch("nowhere")),
            Behavior::Panic => panic!("node blew up"),
        }
    }
}

fn any_input(name: &str) -> ParameterSpec {
    ParameterSpec::input(name, DataType::String).accept_any().optional()
}

fn test_types() -> Vec<(NodeSchema, Behavior)> {
    vec![
        (
            NodeSchema::new("test.start")
                .with_exec_in(Vec::<String>::new())
                .with_role(NodeRole::Start),
            Behavior::Pass,
        ),
        (NodeSchema::new("test.pass"), Behavior::Pass),
        (
            NodeSchema::new("test.emit")
                .with_parameter(ParameterSpec::property("value", DataType::String).accept_any())
                .with_parameter(ParameterSpec::output("out", DataType::String)),
            Behavior::Emit,
        ),
        (
            NodeSchema::new("test.join")
                .with_parameter(any_input("a"))
                .with_parameter(any_input("b"))
                .with_parameter(ParameterSpec::output("out", DataType::String)),
            Behavior::Join,
        ),
        (
            NodeSchema::new("test.echo")
                .with_parameter(ParameterSpec::input("in", DataType::String))
                .with_parameter(ParameterSpec::output("out", DataType::String)),
            Behavior::Echo,
        ),
        (
            NodeSchema::new("test.number")
                .with_parameter(ParameterSpec::input("in", DataType::Number))
                .with_parameter(ParameterSpec::output("out", DataType::Number)),
            Behavior::Echo,
        ),
        (
            NodeSchema::new("test.branch")
                .with_parameter(
                    ParameterSpec::property("fail", DataType::Bool).with_default(false),
                )
                .with_exec_out(["success", "failure"]),
            Behavior::Branch,
        ),
        (NodeSchema::new("test.fail"), Behavior::Fail),
        (
            NodeSchema::new("test.guarded").with_failure_port("failure"),
            Behavior::Fail,
        ),
        (
            NodeSchema::new("test.sleep")
                .with_parameter(ParameterSpec::property("ms", DataType::Number).with_default(10.0))
                .with_parameter(any_input("in"))
                .with_parameter(ParameterSpec::output("done", DataType::Bool))
                .with_parameter(ParameterSpec::output("out", DataType::String)),
            Behavior::Sleep,
        ),
        (
            NodeSchema::new("test.guarded_sleep")
                .with_parameter(ParameterSpec::property("ms", DataType::Number).with_default(10.0))
                .with_parameter(ParameterSpec::output("done", DataType::Bool))
                .with_failure_port("timed_out"),
            Behavior::Sleep,
        ),
        (
            NodeSchema::new("test.stream")
                .with_parameter(ParameterSpec::property("text", DataType::String).with_default(""))
                .with_parameter(ParameterSpec::output("text", DataType::String))
                .with_parameter(ParameterSpec::output("word", DataType::String)),
            Behavior::Stream,
        ),
        (
            NodeSchema::new("test.loop_start")
                .with_role(NodeRole::LoopStart)
                .with_parameter(ParameterSpec::output("index", DataType::Number)),
            Behavior::LoopStart,
        ),
        (
            NodeSchema::new("test.loop_end")
                .with_role(NodeRole::LoopEnd)
                .with_parameter(ParameterSpec::property("count", DataType::Number).with_default(1.0))
                .with_exec_out(["continue", EXEC_OUT]),
            Behavior::LoopEnd,
        ),
        (NodeSchema::new("test.reject"), Behavior::Reject),
        (NodeSchema::new("test.bad_branch"), Behavior::BadBranch),
        (NodeSchema::new("test.panic"), Behavior::Panic),
        (
            NodeSchema::new("test.guarded_panic").with_failure_port("failure"),
            Behavior::Panic,
        ),
    ]
}

pub struct Harness {
    pub runtime: Arc<FlowRuntime>,
    pub log: CallLog,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let log = CallLog::default();
        let mut registry = NodeRegistry::new();
        for (schema, behavior) in test_types() {
            registry.register(Arc::new(TestFactory {
                schema,
                behavior,
                log: log.clone(),
            }));
        }

        Self {
            runtime: Arc::new(FlowRuntime::with_registry(Arc::new(registry), config)),
            log,
        }
    }

    pub async fn send(&self, request: Request) -> Result<Response, FlowError> {
        self.runtime.handle_request(request).await
    }

    pub async fn flow(&self, name: &str) -> FlowId {
        match self.send(Request::CreateFlow {
            name: name.to_string(),
            parent: None,
        })
        .await
        {
            Ok(Response::FlowCreated { flow_id }) => flow_id,
            other => panic!("unexpected response: {:?}", other),
        }
    }

    pub async fn node(&self, flow: FlowId, node_type: &str, name: &str) -> NodeId {
        self.node_with_timeout(flow, node_type, name, None).await
    }

    pub async fn node_with_timeout(
        &self,
        flow: FlowId,
        node_type: &str,
        name: &str,
        timeout_ms: Option<u64>,
    ) -> NodeId {
        match self.send(Request::CreateNode {
            flow: Some(flow),
            node_type: node_type.to_string(),
            name: Some(name.to_string()),
            timeout_ms,
        })
        .await
        {
            Ok(Response::NodeCreated { node_id, .. }) => node_id,
            other => panic!("unexpected response: {:?}", other),
        }
    }

    pub async fn set(&self, node: NodeId, parameter: &str, value: impl Into<Value>) {
        self.send(Request::SetParameterValue {
            node_id: node,
            parameter: parameter.to_string(),
            value: value.into(),
        })
        .await
        .unwrap();
    }

    pub async fn try_data(
        &self,
        from: NodeId,
        output: &str,
        to: NodeId,
        input: &str,
    ) -> Result<ConnectionId, FlowError> {
        self.connect(ConnectionKind::Data, from, output, to, input).await
    }

    pub async fn data(&self, from: NodeId, output: &str, to: NodeId, input: &str) -> ConnectionId {
        self.try_data(from, output, to, input).await.unwrap()
    }

    /// Control edge from `port` to the target's default exec-in
    pub async fn control(&self, from: NodeId, port: &str, to: NodeId) -> ConnectionId {
        self.connect(ConnectionKind::Control, from, port, to, EXEC_IN)
            .await
            .unwrap()
    }

    pub async fn connect(
        &self,
        kind: ConnectionKind,
        from: NodeId,
        from_port: &str,
        to: NodeId,
        to_port: &str,
    ) -> Result<ConnectionId, FlowError> {
        match self
            .send(Request::CreateConnection {
                kind,
                from: Endpoint::new(from, from_port),
                to: Endpoint::new(to, to_port),
            })
            .await?
        {
            Response::ConnectionCreated { connection_id } => Ok(connection_id),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    pub async fn run_flow(&self, flow: FlowId) -> Result<ExecutionReport, FlowError> {
        Self::report(self.send(Request::RunFlow { flow: Some(flow) }).await)
    }

    pub async fn run_node(&self, node: NodeId) -> Result<ExecutionReport, FlowError> {
        Self::report(self.send(Request::RunNode { node_id: node }).await)
    }

    fn report(response: Result<Response, FlowError>) -> Result<ExecutionReport, FlowError> {
        match response? {
            Response::Executed { report } => Ok(report),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}

/// Node names in launch order
pub fn order_names(report: &ExecutionReport) -> Vec<String> {
    report
        .order
        .iter()
        .filter_map(|id| report.node(*id).map(|n| n.name.clone()))
        .collect()
}

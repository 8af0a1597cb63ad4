use async_trait::async_trait;
use pincore::{
    DataType, Node, NodeContext, NodeError, NodeOutput, NodeRole, NodeSchema, ParameterSpec,
    Value, EXEC_OUT, LOOP_CONTINUE,
};
use pinruntime::NodeFactory;

/// Entry point of a flow; does nothing but fire its exec-out
pub struct StartNode;

#[async_trait]
impl Node for StartNode {
    fn node_type(&self) -> &str {
        "flow.start"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        tracing::debug!(node = %ctx.node_name, "Flow started");
        Ok(NodeOutput::new())
    }
}

pub struct StartNodeFactory;

impl NodeFactory for StartNodeFactory {
    fn node_type(&self) -> &str {
        "flow.start"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("flow.start")
            .with_description("Where a run-flow request begins")
            .with_category("flow")
            .with_exec_in(Vec::<String>::new())
            .with_role(NodeRole::Start)
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(StartNode))
    }
}

/// Head of a loop; exposes the current pass as `index`
pub struct LoopStartNode;

#[async_trait]
impl Node for LoopStartNode {
    fn node_type(&self) -> &str {
        "flow.loop_start"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new().with_output("index", ctx.iteration as f64))
    }
}

pub struct LoopStartNodeFactory;

impl NodeFactory for LoopStartNodeFactory {
    fn node_type(&self) -> &str {
        "flow.loop_start"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("flow.loop_start")
            .with_description("Start of a bounded loop; pair it with a flow.loop_end")
            .with_category("flow")
            .with_role(NodeRole::LoopStart)
            .with_parameter(
                ParameterSpec::output("index", DataType::Number)
                    .with_description("Zero-based pass number"),
            )
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(LoopStartNode))
    }
}

/// Tail of a loop. Fires `continue` (wired back to the loop-start) until
/// `max_iterations` passes have run or `done` turns true, then `exec_out`.
pub struct LoopEndNode;

#[async_trait]
impl Node for LoopEndNode {
    fn node_type(&self) -> &str {
        "flow.loop_end"
    }

    fn validate(&self, ctx: &NodeContext) -> Result<(), NodeError> {
        let max = ctx
            .get_property_or("max_iterations", Value::Number(1.0))
            .as_f64()
            .unwrap_or(1.0);
        if max < 1.0 {
            return Err(NodeError::ValidationFailed(format!(
                "max_iterations must be at least 1, got {}",
                max
            )));
        }
        Ok(())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let max = ctx
            .get_property_or("max_iterations", Value::Number(1.0))
            .as_f64()
            .unwrap_or(1.0) as u32;
        let done = ctx
            .inputs
            .get("done")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let pass = ctx.iteration + 1;
        let output = NodeOutput::new().with_output("passes", pass as f64);
        if done || pass >= max {
            ctx.events.info(format!("Loop finished after {} passes", pass));
            Ok(output.with_branch(EXEC_OUT))
        } else {
            Ok(output.with_branch(LOOP_CONTINUE))
        }
    }
}

pub struct LoopEndNodeFactory;

impl NodeFactory for LoopEndNodeFactory {
    fn node_type(&self) -> &str {
        "flow.loop_end"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("flow.loop_end")
            .with_description("End of a bounded loop; `continue` re-enters the paired loop start")
            .with_category("flow")
            .with_role(NodeRole::LoopEnd)
            .with_exec_out([LOOP_CONTINUE, EXEC_OUT])
            .with_parameter(
                ParameterSpec::property("max_iterations", DataType::Number).with_default(10.0),
            )
            .with_parameter(ParameterSpec::input("done", DataType::Bool).optional())
            .with_parameter(ParameterSpec::output("passes", DataType::Number))
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(LoopEndNode))
    }
}

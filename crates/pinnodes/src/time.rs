use async_trait::async_trait;
use pincore::{DataType, Node, NodeContext, NodeError, NodeOutput, NodeSchema, ParameterSpec, Value};
use pinruntime::NodeFactory;
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration, then pass `value` through
pub struct DelayNode;

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay_ms = ctx
            .get_property_or("delay_ms", Value::Number(1000.0))
            .as_f64()
            .unwrap_or(1000.0) as u64;

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => {
                return Err(NodeError::Cancelled);
            }
        }

        let mut output = NodeOutput::new();
        if let Some(value) = ctx.inputs.get("value") {
            output = output.with_output("value", value.clone());
        }
        Ok(output)
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("time.delay")
            .with_description("Delay execution for specified milliseconds")
            .with_category("time")
            .with_parameter(ParameterSpec::property("delay_ms", DataType::Number).with_default(1000.0))
            .with_parameter(
                ParameterSpec::input_output("value", DataType::Json)
                    .accept_any()
                    .optional(),
            )
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DelayNode))
    }
}

use async_trait::async_trait;
use pincore::{DataType, Node, NodeContext, NodeError, NodeOutput, NodeSchema, ParameterSpec};
use pinruntime::NodeFactory;

/// Logs its input and passes it through
pub struct DebugNode;

#[async_trait]
impl Node for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let label = ctx
            .properties
            .get("label")
            .and_then(|v| v.as_str())
            .unwrap_or("debug")
            .to_string();

        let Some(value) = ctx.inputs.get("value").cloned() else {
            ctx.events.info(format!("{}: (no value)", label));
            return Ok(NodeOutput::new());
        };

        let rendered = match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_json().to_string(),
        };
        tracing::info!(node = %ctx.node_name, "{}: {}", label, rendered);
        ctx.events.info(format!("{}: {}", label, rendered));

        Ok(NodeOutput::new().with_output("value", value))
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("debug.log")
            .with_description("Logs input values for debugging")
            .with_category("debug")
            .with_parameter(ParameterSpec::property("label", DataType::String).with_default("debug"))
            .with_parameter(
                ParameterSpec::input_output("value", DataType::Json)
                    .accept_any()
                    .optional(),
            )
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DebugNode))
    }
}

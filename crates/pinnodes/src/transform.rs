use async_trait::async_trait;
use pincore::{DataType, Node, NodeContext, NodeError, NodeOutput, NodeSchema, ParameterSpec, Value};
use pinruntime::NodeFactory;

/// Parse a JSON string into a value
pub struct JsonParseNode;

#[async_trait]
impl Node for JsonParseNode {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let input = ctx.require_input("json")?;
        let text = input.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "json".to_string(),
            expected: "string".to_string(),
            actual: input.data_type().to_string(),
        })?;

        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(NodeOutput::new().with_output("parsed", Value::Json(parsed)))
    }
}

pub struct JsonParseNodeFactory;

impl NodeFactory for JsonParseNodeFactory {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("transform.json_parse")
            .with_description("Parse JSON string")
            .with_category("transform")
            .with_parameter(ParameterSpec::input("json", DataType::String))
            .with_parameter(ParameterSpec::output("parsed", DataType::Json))
            .with_failure_port("invalid")
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(JsonParseNode))
    }
}

/// Render any value as a JSON string
pub struct JsonStringifyNode;

#[async_trait]
impl Node for JsonStringifyNode {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.require_input("value")?;
        let pretty = ctx
            .get_property_or("pretty", Value::Bool(false))
            .as_bool()
            .unwrap_or(false);

        let json = if pretty {
            serde_json::to_string_pretty(&value.to_json())
        } else {
            serde_json::to_string(&value.to_json())
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(NodeOutput::new().with_output("json", json))
    }
}

pub struct JsonStringifyNodeFactory;

impl NodeFactory for JsonStringifyNodeFactory {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("transform.json_stringify")
            .with_description("Convert value to JSON string")
            .with_category("transform")
            .with_parameter(ParameterSpec::input("value", DataType::Json).accept_any())
            .with_parameter(ParameterSpec::property("pretty", DataType::Bool).with_default(false))
            .with_parameter(ParameterSpec::output("json", DataType::String))
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(JsonStringifyNode))
    }
}

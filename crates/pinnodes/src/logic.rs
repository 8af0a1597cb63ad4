use async_trait::async_trait;
use pincore::{DataType, Node, NodeContext, NodeError, NodeOutput, NodeSchema, ParameterSpec, Value};
use pinruntime::NodeFactory;

/// Fires `then` or `else` depending on `condition`
pub struct IfNode;

#[async_trait]
impl Node for IfNode {
    fn node_type(&self) -> &str {
        "logic.if"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let condition = truthy(ctx.require_input("condition")?);
        tracing::debug!(node = %ctx.node_name, condition, "Branching");

        Ok(NodeOutput::new()
            .with_output("result", condition)
            .with_branch(if condition { "then" } else { "else" }))
    }
}

pub struct IfNodeFactory;

impl NodeFactory for IfNodeFactory {
    fn node_type(&self) -> &str {
        "logic.if"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("logic.if")
            .with_description("Choose a branch from a condition")
            .with_category("logic")
            .with_exec_out(["then", "else"])
            .with_parameter(ParameterSpec::input("condition", DataType::Bool).accept_any())
            .with_parameter(ParameterSpec::output("result", DataType::Bool))
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(IfNode))
    }
}

/// Fails unless `actual` equals `expected`; the failure port carries the
/// mismatch onward instead of stopping the flow
pub struct AssertNode;

#[async_trait]
impl Node for AssertNode {
    fn node_type(&self) -> &str {
        "logic.assert"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let actual = ctx.require_input("actual")?;
        let expected = ctx.get_property_or("expected", Value::Null);

        if actual.to_json() != expected.to_json() {
            return Err(NodeError::ExecutionFailed(format!(
                "expected {}, got {}",
                expected.to_json(),
                actual.to_json()
            )));
        }
        Ok(NodeOutput::new().with_branch("success"))
    }
}

pub struct AssertNodeFactory;

impl NodeFactory for AssertNodeFactory {
    fn node_type(&self) -> &str {
        "logic.assert"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("logic.assert")
            .with_description("Compare a value against an expectation")
            .with_category("logic")
            .with_exec_out(["success"])
            .with_failure_port("failure")
            .with_parameter(ParameterSpec::input("actual", DataType::Json).accept_any())
            .with_parameter(ParameterSpec::property("expected", DataType::Json).accept_any())
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(AssertNode))
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0,
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Bytes(b) => !b.is_empty(),
        Value::Json(json) => !json.is_null() && json != &serde_json::Value::Bool(false),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

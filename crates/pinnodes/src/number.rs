use async_trait::async_trait;
use pincore::{DataType, Node, NodeContext, NodeError, NodeOutput, NodeSchema, ParameterSpec, Value};
use pinruntime::NodeFactory;

fn number_input(ctx: &NodeContext, name: &str) -> Result<f64, NodeError> {
    let value = ctx.require_input(name)?;
    value.as_f64().ok_or_else(|| NodeError::InvalidInputType {
        field: name.to_string(),
        expected: "number".to_string(),
        actual: value.data_type().to_string(),
    })
}

pub struct NumberConstantNode;

#[async_trait]
impl Node for NumberConstantNode {
    fn node_type(&self) -> &str {
        "number.constant"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.get_property_or("value", Value::Number(0.0));
        Ok(NodeOutput::new().with_output("number", value))
    }
}

pub struct NumberConstantNodeFactory;

impl NodeFactory for NumberConstantNodeFactory {
    fn node_type(&self) -> &str {
        "number.constant"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("number.constant")
            .with_description("A fixed number")
            .with_category("number")
            .with_parameter(ParameterSpec::property("value", DataType::Number).with_default(0.0))
            .with_parameter(ParameterSpec::output("number", DataType::Number))
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(NumberConstantNode))
    }
}

pub struct AddNode;

#[async_trait]
impl Node for AddNode {
    fn node_type(&self) -> &str {
        "number.add"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let sum = number_input(&ctx, "a")? + number_input(&ctx, "b")?;
        if !sum.is_finite() {
            return Err(NodeError::ExecutionFailed(format!("sum is not finite: {}", sum)));
        }
        Ok(NodeOutput::new().with_output("sum", sum))
    }
}

pub struct AddNodeFactory;

impl NodeFactory for AddNodeFactory {
    fn node_type(&self) -> &str {
        "number.add"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("number.add")
            .with_description("Add two numbers")
            .with_category("number")
            .with_parameter(ParameterSpec::input("a", DataType::Number))
            .with_parameter(ParameterSpec::input("b", DataType::Number).with_default(0.0).optional())
            .with_parameter(ParameterSpec::output("sum", DataType::Number))
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(AddNode))
    }
}

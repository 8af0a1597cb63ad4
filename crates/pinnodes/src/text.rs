use async_trait::async_trait;
use pincore::{DataType, Node, NodeContext, NodeError, NodeOutput, NodeSchema, ParameterSpec, Value};
use pinruntime::NodeFactory;
use std::time::Duration;

fn text_input(ctx: &NodeContext, name: &str) -> Result<String, NodeError> {
    ctx.require_input(name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "string".to_string(),
            actual: ctx.inputs.get(name).map(|v| v.data_type().to_string()).unwrap_or_default(),
        })
}

/// Emits its `value` property on `text`
pub struct TextConstantNode;

#[async_trait]
impl Node for TextConstantNode {
    fn node_type(&self) -> &str {
        "text.constant"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let text = ctx.require_property("value")?.clone();
        Ok(NodeOutput::new().with_output("text", text))
    }
}

pub struct TextConstantNodeFactory;

impl NodeFactory for TextConstantNodeFactory {
    fn node_type(&self) -> &str {
        "text.constant"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("text.constant")
            .with_description("A fixed piece of text")
            .with_category("text")
            .with_parameter(ParameterSpec::property("value", DataType::String).with_default(""))
            .with_parameter(ParameterSpec::output("text", DataType::String))
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(TextConstantNode))
    }
}

/// Joins `left` and `right` with the `separator` property
pub struct ConcatNode;

#[async_trait]
impl Node for ConcatNode {
    fn node_type(&self) -> &str {
        "text.concat"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let left = text_input(&ctx, "left")?;
        let right = text_input(&ctx, "right")?;
        let separator = ctx
            .get_property_or("separator", Value::from(""))
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(NodeOutput::new().with_output("text", format!("{}{}{}", left, separator, right)))
    }
}

pub struct ConcatNodeFactory;

impl NodeFactory for ConcatNodeFactory {
    fn node_type(&self) -> &str {
        "text.concat"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("text.concat")
            .with_description("Concatenate two strings")
            .with_category("text")
            .with_parameter(ParameterSpec::input("left", DataType::String))
            .with_parameter(ParameterSpec::input("right", DataType::String))
            .with_parameter(ParameterSpec::property("separator", DataType::String).with_default(""))
            .with_parameter(ParameterSpec::output("text", DataType::String))
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ConcatNode))
    }
}

pub struct UppercaseNode;

#[async_trait]
impl Node for UppercaseNode {
    fn node_type(&self) -> &str {
        "text.uppercase"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let text = text_input(&ctx, "text")?;
        Ok(NodeOutput::new().with_output("text", text.to_uppercase()))
    }
}

pub struct UppercaseNodeFactory;

impl NodeFactory for UppercaseNodeFactory {
    fn node_type(&self) -> &str {
        "text.uppercase"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("text.uppercase")
            .with_description("Uppercase a string")
            .with_category("text")
            .with_parameter(ParameterSpec::input_output("text", DataType::String).required())
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(UppercaseNode))
    }
}

/// Streams `text` word by word on `word`, then outputs the whole text.
///
/// `interval_ms` spaces the partial outputs out. A fired cancellation token
/// stops the stream early and the node still succeeds with what it sent.
pub struct StreamWordsNode;

#[async_trait]
impl Node for StreamWordsNode {
    fn node_type(&self) -> &str {
        "text.stream_words"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let text = text_input(&ctx, "text")?;
        let interval = ctx
            .get_property_or("interval_ms", Value::Number(0.0))
            .as_f64()
            .unwrap_or(0.0) as u64;

        let mut sent = 0usize;
        for word in text.split_whitespace() {
            if ctx.cancellation.is_cancelled() {
                ctx.events.warn("Stream cut short by cancellation");
                break;
            }
            ctx.stream.send("word", word);
            sent += 1;
            if interval > 0 {
                tokio::time::sleep(Duration::from_millis(interval)).await;
            }
        }

        Ok(NodeOutput::new()
            .with_output("text", text)
            .with_output("count", sent as f64))
    }
}

pub struct StreamWordsNodeFactory;

impl NodeFactory for StreamWordsNodeFactory {
    fn node_type(&self) -> &str {
        "text.stream_words"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("text.stream_words")
            .with_description("Emit each word as a partial output")
            .with_category("text")
            .with_parameter(ParameterSpec::input_output("text", DataType::String).required())
            .with_parameter(ParameterSpec::property("interval_ms", DataType::Number).with_default(0.0))
            .with_parameter(ParameterSpec::output("word", DataType::String))
            .with_parameter(ParameterSpec::output("count", DataType::Number))
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(StreamWordsNode))
    }
}

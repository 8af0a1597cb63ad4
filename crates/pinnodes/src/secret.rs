use async_trait::async_trait;
use pincore::{DataType, Node, NodeContext, NodeError, NodeOutput, NodeSchema, ParameterSpec};
use pinruntime::NodeFactory;

/// Reads a secret through the injected lookup. The value only travels on
/// the `value` output; `found` tells downstream nodes whether it exists.
pub struct SecretLookupNode;

#[async_trait]
impl Node for SecretLookupNode {
    fn node_type(&self) -> &str {
        "secret.lookup"
    }

    fn validate(&self, ctx: &NodeContext) -> Result<(), NodeError> {
        let key = ctx.require_property("key")?;
        match key.as_str() {
            Some(k) if !k.trim().is_empty() => Ok(()),
            _ => Err(NodeError::ValidationFailed("secret key is empty".to_string())),
        }
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let key = ctx
            .require_property("key")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let required = ctx
            .properties
            .get("required")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        match ctx.secrets.lookup(&key) {
            Some(value) => Ok(NodeOutput::new()
                .with_output("value", value)
                .with_output("found", true)),
            None if required => Err(NodeError::Configuration(format!(
                "Secret not available: {}",
                key
            ))),
            None => {
                ctx.events.warn(format!("Secret '{}' not set", key));
                Ok(NodeOutput::new().with_output("found", false))
            }
        }
    }
}

pub struct SecretLookupNodeFactory;

impl NodeFactory for SecretLookupNodeFactory {
    fn node_type(&self) -> &str {
        "secret.lookup"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("secret.lookup")
            .with_description("Fetch a credential from the configured secret source")
            .with_category("secrets")
            .with_parameter(ParameterSpec::property("key", DataType::String).required())
            .with_parameter(ParameterSpec::property("required", DataType::Bool).with_default(true))
            .with_parameter(ParameterSpec::output("value", DataType::String))
            .with_parameter(ParameterSpec::output("found", DataType::Bool))
    }

    fn create(&self) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(SecretLookupNode))
    }
}

//! Standard node library
//!
//! Built-in node types: flow structure (start, loop pair), text and number
//! transforms, branching, delays, streaming and secret lookup.

mod debug;
mod flow;
mod logic;
mod number;
mod secret;
mod text;
mod time;
mod transform;

pub use debug::DebugNode;
pub use flow::{LoopEndNode, LoopStartNode, StartNode};
pub use pincore::LOOP_CONTINUE;
pub use logic::{AssertNode, IfNode};
pub use number::{AddNode, NumberConstantNode};
pub use secret::SecretLookupNode;
pub use text::{ConcatNode, StreamWordsNode, TextConstantNode, UppercaseNode};
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};
use pinruntime::NodeRegistry;

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(flow::StartNodeFactory));
    registry.register(Arc::new(flow::LoopStartNodeFactory));
    registry.register(Arc::new(flow::LoopEndNodeFactory));
    registry.register(Arc::new(debug::DebugNodeFactory));
    registry.register(Arc::new(text::TextConstantNodeFactory));
    registry.register(Arc::new(text::ConcatNodeFactory));
    registry.register(Arc::new(text::UppercaseNodeFactory));
    registry.register(Arc::new(text::StreamWordsNodeFactory));
    registry.register(Arc::new(number::NumberConstantNodeFactory));
    registry.register(Arc::new(number::AddNodeFactory));
    registry.register(Arc::new(logic::IfNodeFactory));
    registry.register(Arc::new(logic::AssertNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
    registry.register(Arc::new(transform::JsonParseNodeFactory));
    registry.register(Arc::new(transform::JsonStringifyNodeFactory));
    registry.register(Arc::new(secret::SecretLookupNodeFactory));
}

/// A registry holding every standard node type
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}

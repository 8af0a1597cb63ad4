use crate::Value;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One item of a node's partial-output sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    Partial { port: String, value: Value },
    /// Terminal marker appended once the node's computation has returned
    Done,
}

/// Sender half handed to a running node for streaming partial outputs
#[derive(Clone, Default)]
pub struct OutputStream {
    sender: Option<mpsc::UnboundedSender<StreamEvent>>,
}

impl OutputStream {
    /// A stream whose events are dropped
    pub fn disconnected() -> Self {
        Self { sender: None }
    }

    /// Push a partial value for `port`; ignored once the consumer has gone away
    pub fn send(&self, port: impl Into<String>, value: impl Into<Value>) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(StreamEvent::Partial {
                port: port.into(),
                value: value.into(),
            });
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }
}

/// Fresh stream for a single node run
pub fn output_stream() -> (OutputStream, mpsc::UnboundedReceiver<StreamEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        OutputStream {
            sender: Some(sender),
        },
        receiver,
    )
}

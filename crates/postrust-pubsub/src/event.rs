//! Lifecycle and traffic events emitted by the pub/sub facade's event bus.

use serde_json::Value;

/// Events emitted on [`crate::pubsub::PubSub::events`], in producer order.
#[derive(Clone, Debug)]
pub enum PubSubEvent {
    Connect,
    Reconnect(u32),
    End,
    Close,
    Error(String),
    Listen(String),
    Unlisten(Vec<String>),
    Notify(String, Value),
    Message(String, Value),
}

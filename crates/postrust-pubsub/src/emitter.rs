//! Per-channel fan-out of payloads to user handlers.
//!
//! A small, explicit subscription registry — no inheritance hierarchy, just
//! a concrete struct mapping channel name to a list of handlers. Handlers
//! within one channel fire synchronously, in registration order; there is
//! no ordering guarantee across channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// Identifier returned by [`ChannelEmitter::on`]/[`ChannelEmitter::once`],
/// used to remove a specific handler with [`ChannelEmitter::off`].
pub type HandlerId = u64;

type Handler = dyn Fn(&str, &Value) + Send + Sync;

struct Entry {
    id: HandlerId,
    once: bool,
    handler: Arc<Handler>,
}

/// A publish/subscribe hub keyed by channel name.
#[derive(Default)]
pub struct ChannelEmitter {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<Entry>>>,
}

impl ChannelEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler invoked on every emission for `channel`.
    pub fn on<F>(&self, channel: &str, handler: F) -> HandlerId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.register(channel, handler, false)
    }

    /// Register a handler invoked at most once for `channel`, then removed.
    pub fn once<F>(&self, channel: &str, handler: F) -> HandlerId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.register(channel, handler, true)
    }

    fn register<F>(&self, channel: &str, handler: F, once: bool) -> HandlerId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self.handlers.lock().unwrap();
        handlers
            .entry(channel.to_string())
            .or_default()
            .push(Entry {
                id,
                once,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove a single handler by id. Returns `true` if it was present.
    pub fn off(&self, channel: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap();
        if let Some(entries) = handlers.get_mut(channel) {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                handlers.remove(channel);
            }
            return entries.len() != before;
        }
        false
    }

    /// Remove every handler registered for `channel`.
    pub fn remove_all(&self, channel: &str) {
        self.handlers.lock().unwrap().remove(channel);
    }

    /// Remove every handler on every channel.
    pub fn clear(&self) {
        self.handlers.lock().unwrap().clear();
    }

    /// Invoke every handler registered for `channel` with `payload`, in
    /// registration order, dropping any one-shot handlers afterward.
    pub fn emit(&self, channel: &str, payload: &Value) {
        let to_call = {
            let mut handlers = self.handlers.lock().unwrap();
            let Some(entries) = handlers.get_mut(channel) else {
                return;
            };
            let to_call: Vec<Arc<Handler>> = entries.iter().map(|e| e.handler.clone()).collect();
            entries.retain(|e| !e.once);
            if entries.is_empty() {
                handlers.remove(channel);
            }
            to_call
        };

        for handler in to_call {
            handler(channel, payload);
        }
    }

    /// Number of channels with at least one handler registered.
    pub fn channel_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_calls_handlers_in_order() {
        let emitter = ChannelEmitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        emitter.on("c", move |_, _| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        emitter.on("c", move |_, _| o2.lock().unwrap().push(2));

        emitter.emit("c", &json!(null));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_once_handler_fires_only_once() {
        let emitter = ChannelEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        emitter.once("c", move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit("c", &json!(1));
        emitter.emit("c", &json!(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_removes_only_named_handler() {
        let emitter = ChannelEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = emitter.on("c", move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.on("c", |_, _| {});

        assert!(emitter.off("c", id));
        emitter.emit("c", &json!(null));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.channel_count(), 1);
    }

    #[test]
    fn test_emit_on_unknown_channel_is_noop() {
        let emitter = ChannelEmitter::new();
        emitter.emit("nope", &json!(null));
    }

    #[test]
    fn test_remove_all_and_clear() {
        let emitter = ChannelEmitter::new();
        emitter.on("a", |_, _| {});
        emitter.on("b", |_, _| {});
        emitter.remove_all("a");
        assert_eq!(emitter.channel_count(), 1);
        emitter.clear();
        assert_eq!(emitter.channel_count(), 0);
    }
}

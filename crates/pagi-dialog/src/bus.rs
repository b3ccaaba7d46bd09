//! Outbound message bus. Publishing is fire-and-forget.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// One published message.
#[derive(Debug, Clone, Serialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Anything the host can publish to. Implementations must not block.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}

/// In-process bus on a tokio broadcast channel.
pub struct BroadcastBus {
    tx: broadcast::Sender<BusMessage>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MessageBus for BroadcastBus {
    fn publish(&self, topic: &str, payload: Value) {
        // No receiver is not an error.
        let _ = self.tx.send(BusMessage::new(topic, payload));
    }
}

/// Recording bus. Keeps every message and lets a thread wait for a topic.
#[derive(Default)]
pub struct MemoryBus {
    messages: Mutex<Vec<BusMessage>>,
    published: Condvar,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<BusMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.topic).collect()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<BusMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    pub fn clear(&self) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Block until a message on `topic` exists or `timeout` elapses.
    pub fn wait_for_topic(&self, topic: &str, timeout: Duration) -> Option<BusMessage> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(m) = guard.iter().find(|m| m.topic == topic) {
                return Some(m.clone());
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            guard = self
                .published
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl MessageBus for MemoryBus {
    fn publish(&self, topic: &str, payload: Value) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(BusMessage::new(topic, payload));
        self.published.notify_all();
    }
}

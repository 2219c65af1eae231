//! Structured lifecycle events.
//!
//! Connections and requests report what happens to them as [`Event`]s
//! delivered to an [`EventSink`]. Sinks are fire-and-forget: emitting never
//! fails and never blocks a request.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
}

/// Key/value context attached to an event.
///
/// Built once with [`EventContextBuilder`]; a builder can start from an
/// existing context so per-request fields extend per-connection ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EventContext {
    pub fn builder() -> EventContextBuilder {
        EventContextBuilder {
            context: EventContext::default(),
        }
    }

    /// Starts a builder pre-populated with every field of `base`.
    pub fn builder_from(base: &EventContext) -> EventContextBuilder {
        EventContextBuilder {
            context: base.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone)]
pub struct EventContextBuilder {
    context: EventContext,
}

impl EventContextBuilder {
    pub fn remote(mut self, remote: impl Into<String>) -> Self {
        self.context.remote = Some(remote.into());
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.context.bucket = Some(bucket.into());
        self
    }

    /// Adds or replaces an extra field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.fields.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> EventContext {
        self.context
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub name: &'static str,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub context: EventContext,
}

impl Event {
    pub fn new(name: &'static str, severity: Severity, context: EventContext) -> Self {
        Self {
            name,
            severity,
            timestamp: Utc::now(),
            context,
        }
    }
}

/// Receives lifecycle and diagnostic events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Forwards events to `tracing` at their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        let timestamp = event.timestamp.to_rfc3339();
        let context = event.context.to_json();
        match event.severity {
            Severity::Debug => {
                tracing::debug!(event = event.name, %timestamp, %context, "kvwire event")
            }
            Severity::Info => {
                tracing::info!(event = event.name, %timestamp, %context, "kvwire event")
            }
            Severity::Warn => {
                tracing::warn!(event = event.name, %timestamp, %context, "kvwire event")
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.name).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}

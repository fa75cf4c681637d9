//! Tracked events and the in-memory collector they wait in before delivery.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Free-form event properties.
pub type Properties = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Impression,
    Conversion,
    Custom,
}

/// One tracked occurrence, attributed to a test variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub test_id: String,
    pub variant_id: String,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        test_id: impl Into<String>,
        variant_id: impl Into<String>,
        event_type: EventType,
        details: EventDetails,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            variant_id: variant_id.into(),
            event_type,
            event_name: details.event_name,
            value: details.value,
            properties: details.properties,
            timestamp,
        }
    }
}

/// Optional payload of a conversion or custom event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventDetails {
    pub event_name: Option<String>,
    pub value: Option<f64>,
    pub properties: Option<Properties>,
}

impl EventDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new().name(name)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.event_name = Some(name.into());
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.properties
            .get_or_insert_with(Properties::new)
            .insert(key.into(), value);
        self
    }
}

/// Ordered buffer of events awaiting delivery.
#[derive(Debug)]
pub struct EventQueue {
    events: Mutex<Vec<Event>>,
    max_size: usize,
}

impl EventQueue {
    /// `max_size` of zero never reports the queue as full.
    pub fn new(max_size: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            max_size,
        }
    }

    /// Append an event. Returns `true` once the queue has reached its maximum.
    pub fn push(&self, event: Event) -> bool {
        let mut events = self.lock();
        events.push(event);
        self.max_size > 0 && events.len() >= self.max_size
    }

    /// Take every buffered event, leaving the live buffer empty.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.lock())
    }

    /// Put a failed batch back ahead of anything tracked since it was taken.
    pub fn requeue_front(&self, batch: Vec<Event>) {
        let mut events = self.lock();
        let newer = std::mem::replace(&mut *events, batch);
        events.extend(newer);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the buffered events in order.
    pub fn snapshot(&self) -> Vec<Event> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Event>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

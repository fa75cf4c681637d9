//! Destinations for batches of tracked events.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::SinkError;
use crate::events::Event;

/// Receives batches of events in the order they were tracked.
///
/// A returned error leaves the batch queued for the next flush.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn deliver(&self, events: &[Event]) -> Result<(), SinkError>;
}

/// Keeps delivered batches in memory. Can be told to fail or stall.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<Event>>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every delivery while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Sleep this long inside each delivery.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self
            .delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = delay;
    }

    /// Successfully delivered batches.
    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Successfully delivered events, flattened in delivery order.
    pub fn events(&self) -> Vec<Event> {
        self.batches().into_iter().flatten().collect()
    }

    /// Deliveries attempted, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyticsSink for MemorySink {
    async fn deliver(&self, events: &[Event]) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self
            .delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("memory sink set to fail".to_string()));
        }
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(events.to_vec());
        Ok(())
    }
}

/// Writes each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl AnalyticsSink for TracingSink {
    async fn deliver(&self, events: &[Event]) -> Result<(), SinkError> {
        for event in events {
            info!(
                test_id = %event.test_id,
                variant_id = %event.variant_id,
                event_type = ?event.event_type,
                event_name = event.event_name.as_deref(),
                value = event.value,
                timestamp = %event.timestamp,
                "ab test event"
            );
        }
        Ok(())
    }
}

/// Appends events to a file, one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AnalyticsSink for JsonLinesSink {
    async fn deliver(&self, events: &[Event]) -> Result<(), SinkError> {
        let mut buf = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buf, event)?;
            buf.push(b'\n');
        }
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(&buf)?;
            file.flush()
        })
        .await
        .map_err(|e| SinkError::Rejected(format!("writer task failed: {e}")))??;
        Ok(())
    }
}

#[cfg(feature = "http")]
pub use http::HttpSink;

#[cfg(feature = "http")]
mod http {
    use async_trait::async_trait;
    use serde::Serialize;

    use super::AnalyticsSink;
    use crate::SinkError;
    use crate::events::Event;

    #[derive(Serialize)]
    struct Payload<'a> {
        events: &'a [Event],
    }

    /// POSTs each batch as `{"events": [...]}` to a collector endpoint.
    #[derive(Debug, Clone)]
    pub struct HttpSink {
        client: reqwest::Client,
        endpoint: String,
    }

    impl HttpSink {
        pub fn new(endpoint: impl Into<String>) -> Self {
            Self::with_client(reqwest::Client::new(), endpoint)
        }

        pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
            Self {
                client,
                endpoint: endpoint.into(),
            }
        }
    }

    #[async_trait]
    impl AnalyticsSink for HttpSink {
        async fn deliver(&self, events: &[Event]) -> Result<(), SinkError> {
            let response = self
                .client
                .post(&self.endpoint)
                .json(&Payload { events })
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SinkError::HttpStatus {
                    status: status.as_u16(),
                });
            }
            Ok(())
        }
    }
}

//! Event delivery: batching, retry on failure and the periodic flush task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::SinkError;
use crate::events::{Event, EventQueue};
use crate::sink::AnalyticsSink;

/// What one flush attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued.
    Empty,
    /// The sink accepted this many events.
    Delivered(usize),
    /// Delivery failed and this many events went back to the queue.
    Requeued(usize),
}

/// Queue plus sink. At most one delivery is in flight at a time.
pub struct EventPipeline {
    queue: EventQueue,
    sink: Arc<dyn AnalyticsSink>,
    delivery_timeout: Option<Duration>,
    flush_gate: AsyncMutex<()>,
    trigger: Notify,
    scheduled: AtomicBool,
}

impl EventPipeline {
    pub fn new(
        sink: Arc<dyn AnalyticsSink>,
        max_queue_size: usize,
        delivery_timeout: Option<Duration>,
    ) -> Self {
        Self {
            queue: EventQueue::new(max_queue_size),
            sink,
            delivery_timeout,
            flush_gate: AsyncMutex::new(()),
            trigger: Notify::new(),
            scheduled: AtomicBool::new(false),
        }
    }

    /// Queue an event. Reaching the queue limit requests a flush: the
    /// scheduler is woken if running, otherwise a one-off flush is spawned on
    /// the ambient runtime when there is one.
    pub fn track(self: &Arc<Self>, event: Event) {
        if !self.queue.push(event) {
            return;
        }
        if self.scheduled.load(Ordering::Acquire) {
            self.trigger.notify_one();
        } else if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pipeline = Arc::clone(self);
            handle.spawn(async move {
                pipeline.flush().await;
            });
        }
    }

    /// Deliver everything queued as one batch.
    ///
    /// The queue is cleared before the sink is called, so events tracked
    /// meanwhile land in the next batch. On failure the batch goes back to the
    /// front of the queue.
    pub async fn flush(&self) -> FlushOutcome {
        let _gate = self.flush_gate.lock().await;
        let batch = self.queue.take();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        let count = batch.len();
        match self.deliver(&batch).await {
            Ok(()) => {
                debug!(events = count, "delivered event batch");
                FlushOutcome::Delivered(count)
            }
            Err(e) => {
                warn!(error = %e, events = count, "event delivery failed, keeping batch for retry");
                self.queue.requeue_front(batch);
                FlushOutcome::Requeued(count)
            }
        }
    }

    async fn deliver(&self, batch: &[Event]) -> Result<(), SinkError> {
        match self.delivery_timeout {
            Some(limit) => tokio::time::timeout(limit, self.sink.deliver(batch))
                .await
                .unwrap_or(Err(SinkError::Timeout(limit))),
            None => self.sink.deliver(batch).await,
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Copy of the queued events in delivery order.
    pub fn queued_events(&self) -> Vec<Event> {
        self.queue.snapshot()
    }

    pub fn flush_in_progress(&self) -> bool {
        self.flush_gate.try_lock().is_err()
    }
}

/// Background task flushing an [`EventPipeline`] on a fixed period and
/// whenever the queue fills up.
pub struct FlushScheduler {
    pipeline: Arc<EventPipeline>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FlushScheduler {
    /// Spawn the flush loop on the current runtime.
    pub fn start(pipeline: Arc<EventPipeline>, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        pipeline.scheduled.store(true, Ordering::Release);
        let worker = Arc::clone(&pipeline);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = worker.trigger.notified() => {}
                    _ = ticker.tick() => {
                        if worker.queued() == 0 {
                            continue;
                        }
                    }
                }
                worker.flush().await;
            }
            debug!("flush scheduler stopped");
        });
        Self {
            pipeline,
            shutdown,
            task,
        }
    }

    /// Stop the loop, letting an in-flight flush finish first.
    pub async fn stop(self) {
        self.pipeline.scheduled.store(false, Ordering::Release);
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "flush scheduler ended abnormally");
        }
    }
}

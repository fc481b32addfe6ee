//! Drain task for one event class

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use forum_core::{Delivery, DeliveryTag, EventClass, EventConsumer};

use super::batch::CoalescedBatch;
use super::dead_letter::{hand_off, DeadLetter, DeadLetterOutcome};
use super::flusher::BatchFlusher;
use super::overflow_log::OverflowLog;
use super::DrainState;

pub struct DrainWorker {
    class: EventClass,
    consumer: Box<dyn EventConsumer>,
    flusher: BatchFlusher,
    dead_letter: mpsc::Sender<DeadLetter>,
    overflow: OverflowLog,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<DrainState>,
}

/// Handle to a spawned [`DrainWorker`]
pub struct DrainHandle {
    class: EventClass,
    state: watch::Receiver<DrainState>,
    task: JoinHandle<()>,
}

impl DrainHandle {
    pub fn class(&self) -> EventClass {
        self.class
    }

    pub fn state(&self) -> DrainState {
        *self.state.borrow()
    }

    /// Wait for the worker to finish its final flush
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}

impl DrainWorker {
    pub fn new(
        class: EventClass,
        consumer: Box<dyn EventConsumer>,
        flusher: BatchFlusher,
        dead_letter: mpsc::Sender<DeadLetter>,
        overflow: OverflowLog,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state, _) = watch::channel(DrainState::Accumulating);
        Self {
            class,
            consumer,
            flusher,
            dead_letter,
            overflow,
            shutdown,
            state,
        }
    }

    pub fn spawn(self) -> DrainHandle {
        let class = self.class;
        let state = self.state.subscribe();
        let task = tokio::spawn(self.run());
        DrainHandle { class, state, task }
    }

    /// Accumulate deliveries and flush on size or age until shutdown is signalled.
    /// Whatever is buffered at shutdown is flushed before returning.
    #[instrument(skip(self), fields(class = %self.class))]
    pub async fn run(mut self) {
        let config = self.flusher.context().drain_config().clone();
        let max_batch = config.max_batch_size.max(1);
        let max_wait = config.max_wait();
        let mut buffer: Vec<Delivery> = Vec::with_capacity(max_batch);
        let mut deadline = Instant::now() + max_wait;

        info!(max_batch, max_wait_ms = config.max_wait_ms, "Drain worker started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.consumer.next().await {
                Ok(Some(delivery)) => {
                    if buffer.is_empty() {
                        deadline = Instant::now() + max_wait;
                    }
                    buffer.push(delivery);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to read from event queue");
                    tokio::time::sleep(config.retry_backoff()).await;
                }
            }

            let aged = !buffer.is_empty() && Instant::now() >= deadline;
            if buffer.len() >= max_batch || aged {
                self.flush(std::mem::take(&mut buffer)).await;
            }
        }

        if !buffer.is_empty() {
            self.flush(buffer).await;
        }
        info!("Drain worker stopped");
    }

    async fn flush(&mut self, deliveries: Vec<Delivery>) {
        self.state.send_replace(DrainState::Flushing);

        let tags: Vec<DeliveryTag> = deliveries.iter().map(|d| d.tag).collect();
        let batch = CoalescedBatch::coalesce(self.class, deliveries.into_iter().map(|d| d.event));

        let settled = match self.flusher.flush(batch).await {
            Ok(report) => {
                debug!(written = report.written, "Batch settled");
                true
            }
            Err(failure) => {
                let outcome = hand_off(&self.dead_letter, &self.overflow, failure).await;
                outcome != DeadLetterOutcome::Lost
            }
        };

        if settled {
            let acked = self
                .flusher
                .context()
                .queued(self.consumer.ack(&tags))
                .await;
            if let Err(e) = acked {
                warn!(error = %e, deliveries = tags.len(), "Failed to acknowledge deliveries");
            }
        } else {
            error!(
                deliveries = tags.len(),
                "Batch is neither committed nor logged, leaving deliveries unacknowledged"
            );
        }

        self.state.send_replace(DrainState::Accumulating);
    }
}

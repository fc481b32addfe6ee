//! Runtime lifecycle
//!
//! Owns the background side of the service: one drain worker per batched
//! event class and the dead-letter consumer behind them.

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use forum_core::EventClass;

use crate::drain::{
    replay_overflow, BatchFlusher, DeadLetter, DeadLetterConsumer, DrainHandle, DrainState,
    DrainWorker, OverflowLog, OverflowLogError, ReplaySummary,
};
use crate::services::{ServiceContext, ServiceResult};

pub struct ForumRuntime {
    ctx: ServiceContext,
    flusher: BatchFlusher,
    overflow: OverflowLog,
    shutdown: watch::Sender<bool>,
    drains: Vec<DrainHandle>,
    dead_letter: mpsc::Sender<DeadLetter>,
    dead_letter_task: JoinHandle<()>,
}

impl ForumRuntime {
    /// Start the drain for every batched class.
    ///
    /// Deliveries a previous process left unacknowledged are returned to the
    /// queue first, so they are flushed by the new workers.
    #[instrument(skip(ctx))]
    pub async fn init(ctx: ServiceContext) -> ServiceResult<Self> {
        let config = ctx.drain_config().clone();
        let overflow = OverflowLog::new(config.overflow_log.clone());
        let flusher = BatchFlusher::new(ctx.clone());

        let mut consumers = Vec::new();
        for class in ctx.policies().batched_classes() {
            let recovered = ctx.queued(ctx.queue().recover(class)).await?;
            if recovered > 0 {
                info!(class = %class, recovered, "Recovered unacknowledged deliveries");
            }
            consumers.push((class, ctx.queued(ctx.queue().consume(class)).await?));
        }

        let (dead_letter, failures) = mpsc::channel(config.dead_letter_capacity.max(1));
        let dead_letter_task = tokio::spawn(
            DeadLetterConsumer::new(flusher.clone(), overflow.clone(), failures).run(),
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let drains: Vec<DrainHandle> = consumers
            .into_iter()
            .map(|(class, consumer)| {
                DrainWorker::new(
                    class,
                    consumer,
                    flusher.clone(),
                    dead_letter.clone(),
                    overflow.clone(),
                    shutdown_rx.clone(),
                )
                .spawn()
            })
            .collect();

        info!(
            drains = drains.len(),
            overflow_log = %overflow.path().display(),
            "Forum runtime started"
        );

        Ok(Self {
            ctx,
            flusher,
            overflow,
            shutdown,
            drains,
            dead_letter,
            dead_letter_task,
        })
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// State of the drain for `class`, if that class is batched
    pub fn drain_state(&self, class: EventClass) -> Option<DrainState> {
        self.drains
            .iter()
            .find(|d| d.class() == class)
            .map(DrainHandle::state)
    }

    /// Retry what the overflow log holds
    pub async fn replay_overflow(&self) -> Result<ReplaySummary, OverflowLogError> {
        replay_overflow(&self.flusher, &self.overflow).await
    }

    /// Flush every drain, then let the dead-letter consumer finish its backlog
    #[instrument(skip(self))]
    pub async fn shutdown(self) {
        self.shutdown.send(true).ok();

        for result in join_all(self.drains.into_iter().map(DrainHandle::join)).await {
            if let Err(e) = result {
                error!(error = %e, "Drain worker panicked");
            }
        }

        // The consumer stops once the last sender is gone
        drop(self.dead_letter);
        if let Err(e) = self.dead_letter_task.await {
            error!(error = %e, "Dead-letter consumer panicked");
        }
        info!("Forum runtime stopped");
    }
}

//! Last stop for batches the drain could not flush

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

use forum_core::{EventClass, PendingEvent};

use super::batch::{ClickCount, CoalescedBatch};
use super::flusher::{BatchFlusher, FlushFailure};
use super::overflow_log::{OverflowLog, OverflowLogError};
use super::FlushStage;
use crate::services::ServiceError;

/// One failed batch as written to the overflow log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub batch_id: Uuid,
    pub class: EventClass,
    pub stage: FlushStage,
    /// Flush attempts made so far, across the drain and the dead letter
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub events: Vec<PendingEvent>,
    #[serde(default)]
    pub clicks: Vec<ClickCount>,
}

impl DeadLetterRecord {
    pub fn new(batch: &CoalescedBatch, stage: FlushStage, error: impl Into<String>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            class: batch.class,
            stage,
            attempts: 0,
            error: error.into(),
            failed_at: Utc::now(),
            events: batch.actions.clone(),
            clicks: batch.clicks.clone(),
        }
    }

    pub fn from_failure(failure: &FlushFailure) -> Self {
        let mut record = Self::new(&failure.batch, failure.stage, failure.error.to_string());
        record.attempts = failure.attempts;
        record
    }

    /// The batch as it stood when it failed
    pub fn batch(&self) -> CoalescedBatch {
        CoalescedBatch {
            class: self.class,
            actions: self.events.clone(),
            clicks: self.clicks.clone(),
            received: self.events.len() + self.clicks.len(),
        }
    }

    pub fn to_error(&self) -> ServiceError {
        ServiceError::BatchCommitFailed {
            class: self.class,
            stage: self.stage,
            attempts: self.attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterOutcome {
    Recovered,
    /// Written to the overflow log
    Logged,
    /// Neither recovered nor written to the overflow log
    Lost,
}

/// Result of replaying the overflow log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub recovered: usize,
    /// Records that failed again and went back into the log
    pub remaining: usize,
}

/// A failed batch on its way to the dead-letter consumer.
///
/// The sender waits on `settled` before acknowledging the batch's deliveries.
#[derive(Debug)]
pub struct DeadLetter {
    pub failure: FlushFailure,
    pub settled: oneshot::Sender<DeadLetterOutcome>,
}

impl DeadLetter {
    pub fn new(failure: FlushFailure) -> (Self, oneshot::Receiver<DeadLetterOutcome>) {
        let (settled, outcome) = oneshot::channel();
        (Self { failure, settled }, outcome)
    }
}

pub struct DeadLetterConsumer {
    flusher: BatchFlusher,
    log: OverflowLog,
    rx: mpsc::Receiver<DeadLetter>,
}

impl DeadLetterConsumer {
    pub fn new(flusher: BatchFlusher, log: OverflowLog, rx: mpsc::Receiver<DeadLetter>) -> Self {
        Self { flusher, log, rx }
    }

    /// Handle failures until every sender is dropped
    pub async fn run(mut self) {
        while let Some(letter) = self.rx.recv().await {
            let outcome = handle_failure(&self.flusher, &self.log, letter.failure).await;
            // A drain that stopped waiting still left its deliveries unacknowledged
            letter.settled.send(outcome).ok();
        }
        info!("Dead-letter consumer stopped");
    }
}

/// Send `failure` to the dead-letter consumer and wait for its outcome.
/// Without a consumer the batch goes straight to the overflow log.
pub async fn hand_off(
    dead_letter: &mpsc::Sender<DeadLetter>,
    log: &OverflowLog,
    failure: FlushFailure,
) -> DeadLetterOutcome {
    let (letter, settled) = DeadLetter::new(failure);
    match dead_letter.send(letter).await {
        Ok(()) => settled.await.unwrap_or_else(|_| {
            error!("Dead-letter consumer dropped a batch without settling it");
            DeadLetterOutcome::Lost
        }),
        Err(mpsc::error::SendError(letter)) => {
            let record = DeadLetterRecord::from_failure(&letter.failure);
            error!(
                batch_id = %record.batch_id,
                error = %letter.failure.error,
                "Dead-letter consumer is gone, writing batch straight to overflow log"
            );
            persist(log, &record).await
        }
    }
}

/// Retry the failed stage once, then fall back to the overflow log
pub async fn handle_failure(flusher: &BatchFlusher, log: &OverflowLog, failure: FlushFailure) -> DeadLetterOutcome {
    let mut record = DeadLetterRecord::from_failure(&failure);
    warn!(
        batch_id = %record.batch_id,
        error = %failure.to_error(),
        cause = %failure.error,
        "Batch handed to dead letter"
    );
    retry_record(flusher, log, &mut record).await
}

async fn retry_record(flusher: &BatchFlusher, log: &OverflowLog, record: &mut DeadLetterRecord) -> DeadLetterOutcome {
    let batch = record.batch();
    let result = flusher.retry_from(&batch, record.stage).await;
    record.attempts += 1;

    let err = match result {
        Ok(()) => {
            info!(
                batch_id = %record.batch_id,
                class = %record.class,
                stage = %record.stage,
                attempts = record.attempts,
                "Dead-lettered batch recovered"
            );
            return DeadLetterOutcome::Recovered;
        }
        Err(e) => e,
    };

    record.error = err.to_string();
    record.failed_at = Utc::now();
    error!(
        batch_id = %record.batch_id,
        class = %record.class,
        stage = %record.stage,
        attempts = record.attempts,
        events = record.events.len() + record.clicks.len(),
        error = %err,
        "Batch failed after dead-letter retry, writing to overflow log"
    );
    persist(log, record).await
}

/// Append to the overflow log; if even that fails, the record goes to the error log in full
pub async fn persist(log: &OverflowLog, record: &DeadLetterRecord) -> DeadLetterOutcome {
    match log.append(record).await {
        Ok(()) => DeadLetterOutcome::Logged,
        Err(e) => {
            let payload = serde_json::to_string(record).unwrap_or_else(|_| format!("{record:?}"));
            error!(
                path = %log.path().display(),
                error = %e,
                record = %payload,
                "Could not write overflow log"
            );
            DeadLetterOutcome::Lost
        }
    }
}

/// Retry every record in the overflow log once. Records that fail again are appended back.
///
/// The replayed file is only removed once every record is settled; if a record
/// cannot be appended back the whole replay stays on disk for the next run.
pub async fn replay_overflow(flusher: &BatchFlusher, log: &OverflowLog) -> Result<ReplaySummary, OverflowLogError> {
    let mut replay = log.begin_replay().await?;
    let mut summary = ReplaySummary::default();

    for mut record in std::mem::take(&mut replay.records) {
        let batch = record.batch();
        match flusher.retry_from(&batch, record.stage).await {
            Ok(()) => summary.recovered += 1,
            Err(e) => {
                record.attempts += 1;
                record.error = e.to_string();
                record.failed_at = Utc::now();
                if let Err(append) = log.append(&record).await {
                    error!(
                        batch_id = %record.batch_id,
                        error = %append,
                        path = %log.replaying_path().display(),
                        "Could not return record to overflow log, keeping the replay file"
                    );
                    return Err(append);
                }
                summary.remaining += 1;
            }
        }
    }
    replay.finish().await?;

    info!(
        recovered = summary.recovered,
        remaining = summary.remaining,
        "Replayed overflow log"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::overflow_log::temp_log;
    use crate::test_support::{id, Harness};
    use forum_common::DrainConfig;
    use forum_core::{ActionClass, ActionRecord, ActionState, Metric, StoreKind};

    fn harness() -> Harness {
        Harness::with(|b| {
            b.drain_config(DrainConfig {
                max_retries: 1,
                retry_backoff_ms: 1,
                ..DrainConfig::default()
            })
        })
    }

    fn follow_batch() -> CoalescedBatch {
        let record = ActionRecord::new(id(1), id(2), ActionClass::Follow, ActionState::Following).unwrap();
        CoalescedBatch::coalesce(EventClass::Follow, vec![PendingEvent::action(id(50), &record)])
    }

    #[test]
    fn test_record_roundtrips_batch() {
        let batch = follow_batch();
        let record = DeadLetterRecord::new(&batch, FlushStage::FastStore, "timeout");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"stage\":\"fast_store\""));
        let back: DeadLetterRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.batch().actions, batch.actions);
        assert!(matches!(
            back.to_error(),
            ServiceError::BatchCommitFailed { class: EventClass::Follow, stage: FlushStage::FastStore, .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_retry_lands_in_overflow_log() {
        let h = harness();
        let flusher = BatchFlusher::new(h.ctx.clone());
        let log = temp_log();
        h.store.set_unavailable(true);

        let failure = flusher.flush(follow_batch()).await.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.error.unavailable_store(), Some(StoreKind::Relational));

        let outcome = handle_failure(&flusher, &log, failure).await;
        assert_eq!(outcome, DeadLetterOutcome::Logged);

        let logged = log.records().await.unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].attempts, 3);
        assert_eq!(logged[0].stage, FlushStage::Relational);
        assert_eq!(logged[0].events[0].target_id, id(2));

        tokio::fs::remove_file(log.path()).await.ok();
    }

    #[tokio::test]
    async fn test_retry_recovers_when_store_returns() {
        let h = harness();
        let flusher = BatchFlusher::new(h.ctx.clone());
        let log = temp_log();
        h.store.fail_next_commits(2);

        let failure = flusher.flush(follow_batch()).await.unwrap_err();
        let outcome = handle_failure(&flusher, &log, failure).await;

        assert_eq!(outcome, DeadLetterOutcome::Recovered);
        assert_eq!(h.store.records(ActionClass::Follow).await.len(), 1);
        assert_eq!(log.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replay_overflow_retries_and_keeps_failures() {
        let h = harness();
        let flusher = BatchFlusher::new(h.ctx.clone());
        let log = temp_log();
        log.append(&DeadLetterRecord::new(&follow_batch(), FlushStage::Relational, "down"))
            .await
            .unwrap();

        h.store.set_unavailable(true);
        let summary = replay_overflow(&flusher, &log).await.unwrap();
        assert_eq!(summary, ReplaySummary { recovered: 0, remaining: 1 });
        assert_eq!(log.count().await.unwrap(), 1);

        h.store.set_unavailable(false);
        let summary = replay_overflow(&flusher, &log).await.unwrap();
        assert_eq!(summary, ReplaySummary { recovered: 1, remaining: 0 });
        assert_eq!(h.counter(Metric::Followers, id(2)).await, None);
        assert_eq!(h.store.records(ActionClass::Follow).await.len(), 1);

        tokio::fs::remove_file(log.path()).await.ok();
    }

    #[tokio::test]
    async fn test_unwritable_log_is_reported_lost() {
        let h = harness();
        let flusher = BatchFlusher::new(h.ctx.clone());
        let log = OverflowLog::new(std::env::temp_dir().join(Uuid::new_v4().to_string()).join("missing").join("log.jsonl"));
        h.store.set_unavailable(true);

        let failure = flusher.flush(follow_batch()).await.unwrap_err();
        assert_eq!(handle_failure(&flusher, &log, failure).await, DeadLetterOutcome::Lost);
    }
}

//! Batched event drain.
//!
//! One worker per batched event class pulls deliveries from the queue,
//! coalesces them and flushes in two stages: a relational transaction, then a
//! fast-store pipeline. A stage that still fails after its retries sends the
//! batch to the dead-letter consumer, which tries once more and then appends
//! it to the overflow log. Deliveries are acknowledged only after their batch
//! is committed, recovered by the dead letter, or durably in the overflow log.
//! Anything else stays unacknowledged and is redelivered after recovery.

mod batch;
mod dead_letter;
mod flusher;
mod overflow_log;
mod worker;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use batch::{ClickCount, CoalescedBatch};
pub use dead_letter::{
    hand_off, handle_failure, replay_overflow, DeadLetter, DeadLetterConsumer, DeadLetterOutcome,
    DeadLetterRecord, ReplaySummary,
};
pub use flusher::{BatchFlusher, FlushFailure, FlushReport};
pub use overflow_log::{OverflowLog, OverflowLogError, Replay};
pub use worker::{DrainHandle, DrainWorker};

/// Observable phase of a drain worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Accumulating,
    Flushing,
}

/// Which half of a flush failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushStage {
    Relational,
    FastStore,
}

impl fmt::Display for FlushStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Relational => "relational",
            Self::FastStore => "fast-store",
        })
    }
}

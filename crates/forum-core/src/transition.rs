//! Counter deltas for a change of action state.
//!
//! For every metric a class moves, the delta is `[new counts] - [old counts]`,
//! which spans the full 3x3 table for votes (and the 2x2 table for binary
//! classes) without special cases. Self transitions yield no deltas.

use crate::entities::{ActionClass, ActionState, Metric};
use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDelta {
    pub metric: Metric,
    pub delta: i64,
}

/// Non-zero counter deltas for `class` moving from `from` to `to`
pub fn counter_deltas(
    class: ActionClass,
    from: ActionState,
    to: ActionState,
) -> Result<Vec<CounterDelta>, DomainError> {
    for state in [from, to] {
        if !class.admits(state) {
            return Err(DomainError::StateNotAdmitted { class, state });
        }
    }

    Ok(Metric::affected_by(class)
        .iter()
        .filter_map(|&metric| {
            let (_, counted) = metric.counted_records()?;
            let delta = i64::from(to == counted) - i64::from(from == counted);
            (delta != 0).then_some(CounterDelta { metric, delta })
        })
        .collect())
}

/// Net change in a post's vote score (up minus down)
pub fn score_delta(deltas: &[CounterDelta]) -> i64 {
    deltas
        .iter()
        .map(|d| match d.metric {
            Metric::VoteUp | Metric::CommentVoteUp => d.delta,
            Metric::VoteDown | Metric::CommentVoteDown => -d.delta,
            _ => 0,
        })
        .sum()
}

//! Result aggregation: reassemble per-chunk outcomes into submission order.

use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::error::{ErrorDetail, ErrorKind};
use crate::types::{BulkResult, MessageOutcome};

/// Merge chunk outcomes, which may arrive in any order, into a [`BulkResult`].
///
/// Positions with no outcome are reported as internal failures so that
/// `outcomes.len() == total` always holds.
pub fn aggregate(
    total: usize,
    per_chunk: Vec<Vec<MessageOutcome>>,
    started: Instant,
) -> BulkResult {
    let mut slots: Vec<Option<MessageOutcome>> = vec![None; total];
    for outcome in per_chunk.into_iter().flatten() {
        let index = outcome.original_index;
        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(outcome),
            Some(_) => warn!(index, "duplicate outcome ignored"),
            None => warn!(index, total, "outcome index out of range"),
        }
    }

    let mut missing: Option<Arc<ErrorDetail>> = None;
    let outcomes: Vec<MessageOutcome> = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| {
                let detail = missing
                    .get_or_insert_with(|| {
                        Arc::new(ErrorDetail::new(
                            ErrorKind::Internal,
                            "no outcome recorded for this message",
                        ))
                    })
                    .clone();
                MessageOutcome::failed(index, detail)
            })
        })
        .collect();

    let successful = outcomes.iter().filter(|o| o.success).count();
    let failed = outcomes.len() - successful;
    debug_assert_eq!(successful + failed, total);

    BulkResult {
        total,
        successful,
        failed,
        outcomes,
        elapsed: started.elapsed(),
    }
}

//! Per-message outcomes and the aggregated bulk result.

use crate::error::ErrorDetail;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// What a provider hands back for an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub message_id: Option<String>,
}

impl Receipt {
    pub fn new(message_id: Option<String>) -> Self {
        Self { message_id }
    }

    pub fn with_id(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
        }
    }
}

/// Result of one message inside a batch call, positionally aligned with the chunk.
pub type Delivery = std::result::Result<Receipt, Arc<ErrorDetail>>;

/// Final record for one submitted message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageOutcome {
    /// Position of the message in the submitted batch.
    pub original_index: usize,
    pub success: bool,
    pub message_id: Option<String>,
    /// Shared between every outcome affected by the same chunk-level failure.
    pub error: Option<Arc<ErrorDetail>>,
}

impl MessageOutcome {
    pub fn delivered(original_index: usize, receipt: Receipt) -> Self {
        Self {
            original_index,
            success: true,
            message_id: receipt.message_id,
            error: None,
        }
    }

    pub fn failed(original_index: usize, error: Arc<ErrorDetail>) -> Self {
        Self {
            original_index,
            success: false,
            message_id: None,
            error: Some(error),
        }
    }

    pub fn from_delivery(original_index: usize, delivery: Delivery) -> Self {
        match delivery {
            Ok(receipt) => Self::delivered(original_index, receipt),
            Err(error) => Self::failed(original_index, error),
        }
    }
}

/// Aggregated result of a bulk send. `outcomes` is always in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct BulkResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub outcomes: Vec<MessageOutcome>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl BulkResult {
    pub fn empty() -> Self {
        Self {
            total: 0,
            successful: 0,
            failed: 0,
            outcomes: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &MessageOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }
}

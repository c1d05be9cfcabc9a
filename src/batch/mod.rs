//! # Bulk Sending Module
//!
//! Provider-aware bulk delivery is split into three stages:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`partition`] | Splits the submitted batch into chunks of at most `max_batch_size` |
//! | [`BatchExecutor`] | Dispatches chunks through the adapter's bulk or single-send path |
//! | [`aggregate`] | Reassembles per-chunk outcomes into a [`crate::BulkResult`] |
//!
//! ## Example
//!
//! ```rust
//! use mailbridge::batch::partition;
//!
//! let chunks = partition((0..120).collect::<Vec<u32>>(), 50).unwrap();
//! assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![50, 50, 20]);
//! ```
//!
//! ## Strategies
//!
//! - **Sequential**: one chunk at a time; always used for connection-bound providers
//! - **Concurrent**: up to N chunks in flight, outcomes reordered by the aggregator

mod aggregate;
mod executor;
mod partition;

pub use aggregate::aggregate;
pub use executor::{BatchExecutor, BatchExecutorConfig, BatchStrategy};
pub use partition::{partition, BatchItem, Chunk, MessageChunk};

//! Batcher: split an ordered batch into provider-sized chunks.

use crate::error::{Error, ErrorContext};
use crate::types::Message;
use crate::Result;

/// One element of a chunk, tagged with its position in the submitted batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem<T> {
    pub index: usize,
    pub data: T,
}

impl<T> BatchItem<T> {
    pub fn new(index: usize, data: T) -> Self {
        Self { index, data }
    }
}

/// Contiguous slice of the submitted batch, at most `max_size` long.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    /// Position of this chunk in the partition.
    pub ordinal: usize,
    pub items: Vec<BatchItem<T>>,
}

/// Chunk of email messages, the unit handed to `NativeBulk::send_batch`.
pub type MessageChunk = Chunk<Message>;

impl<T> Chunk<T> {
    pub fn new(ordinal: usize, items: Vec<BatchItem<T>>) -> Self {
        Self { ordinal, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.items.iter().map(|i| i.index)
    }

    pub fn data(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|i| &i.data)
    }

    pub fn get(&self, position: usize) -> Option<&T> {
        self.items.get(position).map(|i| &i.data)
    }
}

/// Split `items` into chunks of at most `max_size`, keeping submission order.
///
/// Chunk `k` holds the items at indices `[k * max_size, (k + 1) * max_size)`.
/// An empty input yields no chunks; `max_size == 0` is a configuration error.
pub fn partition<T>(items: Vec<T>, max_size: usize) -> Result<Vec<Chunk<T>>> {
    if max_size == 0 {
        return Err(Error::configuration_with_context(
            "max batch size must be greater than zero",
            ErrorContext::new()
                .with_field_path("max_batch_size")
                .with_source("batcher"),
        ));
    }

    let mut chunks: Vec<Chunk<T>> = Vec::with_capacity(items.len().div_ceil(max_size));
    let mut current = Vec::with_capacity(max_size.min(items.len()));
    for (index, data) in items.into_iter().enumerate() {
        current.push(BatchItem::new(index, data));
        if current.len() == max_size {
            let ordinal = chunks.len();
            chunks.push(Chunk::new(ordinal, std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        let ordinal = chunks.len();
        chunks.push(Chunk::new(ordinal, current));
    }
    Ok(chunks)
}

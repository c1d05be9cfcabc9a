//! Batch executor: drives chunks through a provider adapter.
//!
//! Every chunk yields exactly one outcome per message, whatever happens inside the
//! adapter: errors, timeouts and panics are all turned into failed outcomes.

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::partition::{Chunk, MessageChunk};
use crate::drivers::{detail, ProviderAdapter};
use crate::error::{Error, ErrorDetail, ErrorKind, TransportError};
use crate::types::{Delivery, MessageOutcome};
use crate::Result;

/// How chunks are scheduled against the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStrategy {
    /// One chunk at a time, in partition order.
    Sequential,
    /// Up to `max_concurrency` chunks in flight.
    Concurrent { max_concurrency: usize },
}

impl Default for BatchStrategy {
    fn default() -> Self {
        BatchStrategy::Sequential
    }
}

#[derive(Debug, Clone)]
pub struct BatchExecutorConfig {
    pub strategy: BatchStrategy,
    /// When false, chunks not yet started after a failure are marked aborted.
    pub continue_on_error: bool,
    /// Upper bound on a single provider call.
    pub call_timeout: Option<Duration>,
    /// Chunks and messages not started by this instant fail without being sent.
    pub deadline: Option<Instant>,
}

impl Default for BatchExecutorConfig {
    fn default() -> Self {
        Self {
            strategy: BatchStrategy::default(),
            continue_on_error: true,
            call_timeout: None,
            deadline: None,
        }
    }
}

impl BatchExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_strategy(mut self, s: BatchStrategy) -> Self {
        self.strategy = s;
        self
    }
    pub fn with_continue_on_error(mut self, c: bool) -> Self {
        self.continue_on_error = c;
        self
    }
    pub fn with_call_timeout(mut self, t: Duration) -> Self {
        self.call_timeout = Some(t);
        self
    }
    pub fn with_deadline(mut self, d: Instant) -> Self {
        self.deadline = Some(d);
        self
    }
    /// Deadline relative to now.
    pub fn with_timeout(self, t: Duration) -> Self {
        self.with_deadline(Instant::now() + t)
    }
}

/// Pairs a successful `begin_batch` with exactly one release, even when the
/// bulk future is dropped before it completes.
struct BatchScope<'a> {
    adapter: &'a dyn ProviderAdapter,
    finished: bool,
}

impl BatchScope<'_> {
    async fn finish(mut self) {
        self.finished = true;
        self.adapter.finish_batch().await;
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                provider = self.adapter.name(),
                "bulk send dropped before completion, releasing batch state"
            );
            self.adapter.abandon_batch();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    config: BatchExecutorConfig,
}

impl BatchExecutor {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_config(config: BatchExecutorConfig) -> Self {
        Self { config }
    }
    pub fn config(&self) -> &BatchExecutorConfig {
        &self.config
    }

    /// Dispatch every chunk and return one outcome vector per chunk.
    ///
    /// The result vectors may come back in completion order; each outcome carries
    /// its `original_index` for reassembly.
    pub async fn run(
        &self,
        chunks: Vec<MessageChunk>,
        adapter: &dyn ProviderAdapter,
    ) -> Vec<Vec<MessageOutcome>> {
        if chunks.is_empty() {
            return Vec::new();
        }
        let provider = adapter.name().to_string();

        if let Err(e) = adapter.begin_batch().await {
            warn!(provider = %provider, error = %e, "could not prepare provider for batch");
            let shared = detail(&provider, &e);
            return chunks
                .iter()
                .map(|c| fail_all(c, &shared))
                .collect();
        }
        let scope = BatchScope {
            adapter,
            finished: false,
        };

        let strategy = if adapter.capability().exclusive_connection {
            BatchStrategy::Sequential
        } else {
            self.config.strategy
        };
        debug!(provider = %provider, chunks = chunks.len(), ?strategy, "starting bulk dispatch");

        let halted = AtomicBool::new(false);
        let results = match strategy {
            BatchStrategy::Sequential => {
                let mut out = Vec::with_capacity(chunks.len());
                for chunk in chunks {
                    out.push(self.dispatch_chunk(chunk, adapter, &halted).await);
                }
                out
            }
            BatchStrategy::Concurrent { max_concurrency } => {
                stream::iter(chunks)
                    .map(|chunk| self.dispatch_chunk(chunk, adapter, &halted))
                    .buffer_unordered(max_concurrency.max(1))
                    .collect::<Vec<_>>()
                    .await
            }
        };

        scope.finish().await;
        results
    }

    async fn dispatch_chunk(
        &self,
        chunk: MessageChunk,
        adapter: &dyn ProviderAdapter,
        halted: &AtomicBool,
    ) -> Vec<MessageOutcome> {
        let provider = adapter.name();

        if halted.load(Ordering::SeqCst) {
            warn!(provider, chunk = chunk.ordinal, "fail-fast: chunk skipped");
            let shared = Arc::new(
                ErrorDetail::new(
                    ErrorKind::Aborted,
                    "not sent: an earlier chunk failed and fail-fast is enabled",
                )
                .with_provider(provider),
            );
            return fail_all(&chunk, &shared);
        }
        if self.deadline_passed() {
            warn!(provider, chunk = chunk.ordinal, "deadline passed before chunk started");
            return fail_all(&chunk, &deadline_detail(provider));
        }

        debug!(provider, chunk = chunk.ordinal, size = chunk.len(), "dispatching chunk");
        let outcomes = match AssertUnwindSafe(self.send_chunk(&chunk, adapter))
            .catch_unwind()
            .await
        {
            Ok(outcomes) => outcomes,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(provider, chunk = chunk.ordinal, %reason, "adapter panicked");
                let shared = Arc::new(
                    ErrorDetail::new(ErrorKind::Internal, format!("adapter panicked: {}", reason))
                        .with_provider(provider),
                );
                fail_all(&chunk, &shared)
            }
        };

        if !self.config.continue_on_error && outcomes.iter().any(|o| !o.success) {
            halted.store(true, Ordering::SeqCst);
        }
        outcomes
    }

    async fn send_chunk(
        &self,
        chunk: &MessageChunk,
        adapter: &dyn ProviderAdapter,
    ) -> Vec<MessageOutcome> {
        let provider = adapter.name();
        let mut slots: Vec<Option<MessageOutcome>> = vec![None; chunk.len()];

        // Messages that fail local checks are never handed to the provider.
        let mut valid = Vec::with_capacity(chunk.len());
        for (pos, item) in chunk.items.iter().enumerate() {
            match adapter.check_message(&item.data) {
                Ok(()) => valid.push(pos),
                Err(e) => {
                    debug!(
                        provider,
                        index = item.index,
                        error = %e,
                        "message rejected before send"
                    );
                    slots[pos] = Some(MessageOutcome::failed(item.index, detail(provider, &e)));
                }
            }
        }

        if !valid.is_empty() {
            match adapter.native_bulk() {
                Some(bulk) => {
                    let filtered;
                    let sub = if valid.len() == chunk.len() {
                        chunk
                    } else {
                        filtered = Chunk::new(
                            chunk.ordinal,
                            valid.iter().map(|&p| chunk.items[p].clone()).collect(),
                        );
                        &filtered
                    };
                    match self.call(bulk.send_batch(sub)).await {
                        Ok(deliveries) => {
                            if deliveries.len() != valid.len() {
                                warn!(
                                    provider,
                                    expected = valid.len(),
                                    got = deliveries.len(),
                                    "batch response does not match chunk size"
                                );
                            }
                            let mut deliveries = deliveries.into_iter();
                            for &pos in &valid {
                                let index = chunk.items[pos].index;
                                let delivery: Delivery = deliveries.next().unwrap_or_else(|| {
                                    Err(Arc::new(
                                        ErrorDetail::new(
                                            ErrorKind::Internal,
                                            "adapter returned no result for this message",
                                        )
                                        .with_provider(provider),
                                    ))
                                });
                                slots[pos] = Some(MessageOutcome::from_delivery(index, delivery));
                            }
                        }
                        Err(e) => {
                            warn!(provider, chunk = chunk.ordinal, error = %e, "chunk failed");
                            let shared = detail(provider, &e);
                            for &pos in &valid {
                                slots[pos] = Some(MessageOutcome::failed(
                                    chunk.items[pos].index,
                                    shared.clone(),
                                ));
                            }
                        }
                    }
                }
                None => {
                    for &pos in &valid {
                        let item = &chunk.items[pos];
                        if self.deadline_passed() {
                            slots[pos] =
                                Some(MessageOutcome::failed(item.index, deadline_detail(provider)));
                            continue;
                        }
                        let outcome = match self.call(adapter.send_single(&item.data)).await {
                            Ok(receipt) => MessageOutcome::delivered(item.index, receipt),
                            Err(e) => {
                                debug!(provider, index = item.index, error = %e, "send failed");
                                MessageOutcome::failed(item.index, detail(provider, &e))
                            }
                        };
                        slots[pos] = Some(outcome);
                    }
                }
            }
        }

        slots
            .into_iter()
            .zip(chunk.items.iter())
            .map(|(slot, item)| {
                slot.unwrap_or_else(|| {
                    MessageOutcome::failed(
                        item.index,
                        Arc::new(
                            ErrorDetail::new(ErrorKind::Internal, "message was not dispatched")
                                .with_provider(provider),
                        ),
                    )
                })
            })
            .collect()
    }

    async fn call<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::from(TransportError::Timeout(limit)))?,
            None => fut.await,
        }
    }

    fn deadline_passed(&self) -> bool {
        self.config
            .deadline
            .map(|d| Instant::now() >= d)
            .unwrap_or(false)
    }
}

fn fail_all(chunk: &MessageChunk, shared: &Arc<ErrorDetail>) -> Vec<MessageOutcome> {
    chunk
        .indices()
        .map(|i| MessageOutcome::failed(i, shared.clone()))
        .collect()
}

fn deadline_detail(provider: &str) -> Arc<ErrorDetail> {
    detail(provider, &Error::from(TransportError::DeadlineExceeded))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::partition;
    use crate::drivers::{NativeBulk, ProviderCapability};
    use crate::types::{Message, Receipt};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl ProviderAdapter for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn capability(&self) -> ProviderCapability {
            ProviderCapability {
                max_batch_size: 2,
                supports_native_bulk: false,
                supports_templates: false,
                exclusive_connection: false,
            }
        }
        fn default_from(&self) -> Option<&str> {
            Some("noreply@example.com")
        }
        async fn send_single(&self, message: &Message) -> Result<Receipt> {
            Ok(Receipt::with_id(message.to[0].clone()))
        }
    }

    #[derive(Debug)]
    struct ShortBulk;

    #[async_trait]
    impl ProviderAdapter for ShortBulk {
        fn name(&self) -> &str {
            "short"
        }
        fn capability(&self) -> ProviderCapability {
            ProviderCapability {
                max_batch_size: 10,
                supports_native_bulk: true,
                supports_templates: true,
                exclusive_connection: false,
            }
        }
        fn default_from(&self) -> Option<&str> {
            Some("noreply@example.com")
        }
        async fn send_single(&self, _message: &Message) -> Result<Receipt> {
            Ok(Receipt::default())
        }
        fn native_bulk(&self) -> Option<&dyn NativeBulk> {
            Some(self)
        }
    }

    #[async_trait]
    impl NativeBulk for ShortBulk {
        async fn send_batch(&self, _chunk: &MessageChunk) -> Result<Vec<Delivery>> {
            Ok(vec![Ok(Receipt::with_id("only-one"))])
        }
    }

    fn msg(i: usize) -> Message {
        Message::builder()
            .to(format!("user{}@example.com", i))
            .subject("hi")
            .body("<p>hi</p>")
            .build()
    }

    #[tokio::test]
    async fn sequential_single_sends() {
        let chunks = partition((0..5).map(msg).collect(), 2).unwrap();
        let out = BatchExecutor::new().run(chunks, &Echo).await;
        assert_eq!(out.len(), 3);
        let flat: Vec<_> = out.into_iter().flatten().collect();
        assert!(flat.iter().all(|o| o.success));
        assert_eq!(flat[4].message_id.as_deref(), Some("user4@example.com"));
    }

    #[tokio::test]
    async fn invalid_messages_fail_without_blocking_the_chunk() {
        let mut messages: Vec<Message> = (0..2).map(msg).collect();
        messages[1].to.clear();
        let chunks = partition(messages, 2).unwrap();
        let out = BatchExecutor::new().run(chunks, &Echo).await.remove(0);
        assert!(out[0].success);
        assert!(!out[1].success);
        assert_eq!(out[1].error.as_ref().unwrap().kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn template_on_provider_without_templates_is_rejected() {
        let m = Message::builder().to("a@example.com").template("welcome").build();
        let chunks = partition(vec![m], 2).unwrap();
        let out = BatchExecutor::new().run(chunks, &Echo).await.remove(0);
        assert_eq!(out[0].error.as_ref().unwrap().kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn short_batch_response_yields_internal_failures() {
        let chunks = partition((0..3).map(msg).collect(), 10).unwrap();
        let out = BatchExecutor::new().run(chunks, &ShortBulk).await.remove(0);
        assert!(out[0].success);
        assert_eq!(out[1].error.as_ref().unwrap().kind, ErrorKind::Internal);
        assert_eq!(out[2].error.as_ref().unwrap().kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn expired_deadline_fails_every_chunk() {
        let config = BatchExecutorConfig::new().with_deadline(Instant::now());
        let chunks = partition((0..4).map(msg).collect(), 2).unwrap();
        let out = BatchExecutor::with_config(config).run(chunks, &Echo).await;
        for outcome in out.iter().flatten() {
            let err = outcome.error.as_ref().unwrap();
            assert_eq!(err.kind, ErrorKind::Transport);
            assert!(err.message.contains("deadline"));
        }
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let s: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(s.as_ref()), "bang");
    }
}

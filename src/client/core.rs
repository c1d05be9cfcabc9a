use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::batch::{aggregate, partition, BatchExecutor, BatchExecutorConfig};
use crate::client::builder::MailClientBuilder;
use crate::client::bulk::{BulkRequest, BulkRequestBuilder};
use crate::client::session::MailSession;
use crate::config::{MailConfig, ProviderKind};
use crate::drivers::{detail, ProviderAdapter, ProviderCapability};
use crate::error::{Error, TransportError};
use crate::types::{BulkResult, Message, MessageOutcome};
use crate::Result;

/// Unified mail client bound to one provider adapter.
///
/// Construct it with [`MailClient::new`], [`MailClient::from_env`] or
/// [`MailClient::builder`] and share it freely: every method takes `&self`.
#[derive(Debug, Clone)]
pub struct MailClient {
    pub(crate) adapter: Arc<dyn ProviderAdapter>,
    pub(crate) kind: Option<ProviderKind>,
    pub(crate) executor: BatchExecutorConfig,
}

impl MailClient {
    /// Validate `config` and build the matching adapter.
    pub async fn new(config: MailConfig) -> Result<Self> {
        MailClientBuilder::new().config(config).build().await
    }

    /// Build from `.env` / `MAIL_*` variables.
    pub async fn from_env() -> Result<Self> {
        Self::new(MailConfig::from_env()?).await
    }

    pub fn builder() -> MailClientBuilder {
        MailClientBuilder::new()
    }

    /// Provider identifier, e.g. `"sendgrid"`.
    pub fn provider(&self) -> &str {
        self.adapter.name()
    }

    /// Built-in provider kind; `None` for injected adapters.
    pub fn provider_kind(&self) -> Option<ProviderKind> {
        self.kind
    }

    pub fn capability(&self) -> ProviderCapability {
        self.adapter.capability()
    }

    pub fn supports_templates(&self) -> bool {
        self.capability().supports_templates
    }

    pub fn supports_bulk_sending(&self) -> bool {
        self.capability().supports_native_bulk
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    pub fn executor_config(&self) -> &BatchExecutorConfig {
        &self.executor
    }

    /// Send one message.
    ///
    /// Invalid messages are rejected with `Err` before any network traffic. Delivery
    /// failures come back as a failed [`MessageOutcome`].
    pub async fn send(&self, message: &Message) -> Result<MessageOutcome> {
        self.adapter.check_message(message)?;
        let provider = self.adapter.name();
        let sent = match self.executor.call_timeout {
            Some(limit) => tokio::time::timeout(limit, self.adapter.send_single(message))
                .await
                .unwrap_or_else(|_| Err(Error::from(TransportError::Timeout(limit)))),
            None => self.adapter.send_single(message).await,
        };
        Ok(match sent {
            Ok(receipt) => {
                debug!(provider, message_id = ?receipt.message_id, "message sent");
                MessageOutcome::delivered(0, receipt)
            }
            Err(e) => {
                debug!(provider, error = %e, "message failed");
                MessageOutcome::failed(0, detail(provider, &e))
            }
        })
    }

    /// Send a batch with the client's dispatch settings.
    ///
    /// Per-message failures never abort the batch; they are reported in the
    /// returned [`BulkResult`], whose outcomes follow submission order.
    pub async fn send_bulk(&self, messages: Vec<Message>) -> Result<BulkResult> {
        self.dispatch(messages, self.executor.clone()).await
    }

    /// Send a deserialized [`BulkRequest`].
    pub async fn send_bulk_request(&self, request: BulkRequest) -> Result<BulkResult> {
        self.bulk()
            .messages(request.messages)
            .default_from_opt(request.default_from)
            .tags(request.tags)
            .execute()
            .await
    }

    /// Bulk send with per-call options.
    pub fn bulk(&self) -> BulkRequestBuilder<'_> {
        BulkRequestBuilder::new(self)
    }

    /// Open a scoped session; for SMTP this holds one connection until closed.
    pub async fn session(&self) -> Result<MailSession<'_>> {
        let handle = self.adapter.open_session().await?;
        debug!(provider = self.adapter.name(), "session opened");
        Ok(MailSession::new(self, handle))
    }

    pub(crate) async fn dispatch(
        &self,
        messages: Vec<Message>,
        config: BatchExecutorConfig,
    ) -> Result<BulkResult> {
        let started = Instant::now();
        let total = messages.len();
        if total == 0 {
            return Ok(BulkResult::empty());
        }
        let provider = self.adapter.name();
        let chunks = partition(messages, self.adapter.capability().max_batch_size)?;
        info!(provider, total, chunks = chunks.len(), "bulk send started");

        let per_chunk = BatchExecutor::with_config(config)
            .run(chunks, self.adapter.as_ref())
            .await;
        let result = aggregate(total, per_chunk, started);

        info!(
            provider,
            total,
            successful = result.successful,
            failed = result.failed,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "bulk send finished"
        );
        Ok(result)
    }
}

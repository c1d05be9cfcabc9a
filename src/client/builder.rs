use crate::batch::{BatchExecutorConfig, BatchStrategy};
use crate::client::core::MailClient;
use crate::config::MailConfig;
use crate::drivers::{build_adapter, ProviderAdapter};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating clients with custom configuration.
///
/// Keep this surface area small and predictable.
#[derive(Default)]
pub struct MailClientBuilder {
    config: Option<MailConfig>,
    adapter: Option<Arc<dyn ProviderAdapter>>,
    strategy: Option<BatchStrategy>,
    fail_fast: bool,
    call_timeout: Option<Duration>,
}

impl MailClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider configuration; validated in [`MailClientBuilder::build`].
    pub fn config(mut self, config: MailConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom adapter instead of a built-in provider.
    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn strategy(mut self, strategy: BatchStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Dispatch up to `n` chunks concurrently.
    ///
    /// Defaults can also be enabled via env: `MAIL_BULK_CONCURRENCY`.
    pub fn max_concurrency(self, n: usize) -> Self {
        self.strategy(BatchStrategy::Concurrent {
            max_concurrency: n.max(1),
        })
    }

    /// Stop starting new chunks after the first failure.
    pub fn fail_fast(mut self, enable: bool) -> Self {
        self.fail_fast = enable;
        self
    }

    /// Upper bound on each provider call.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub async fn build(self) -> Result<MailClient> {
        let (adapter, kind) = match (self.adapter, self.config) {
            (Some(adapter), _) => (adapter, None),
            (None, Some(config)) => (build_adapter(&config).await?, Some(config.provider)),
            (None, None) => {
                let config = MailConfig::from_env()?;
                (build_adapter(&config).await?, Some(config.provider))
            }
        };

        let strategy = self.strategy.unwrap_or_else(|| {
            match std::env::var("MAIL_BULK_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
            {
                Some(n) if n > 1 => BatchStrategy::Concurrent { max_concurrency: n },
                _ => BatchStrategy::Sequential,
            }
        });

        let mut executor = BatchExecutorConfig::new()
            .with_strategy(strategy)
            .with_continue_on_error(!self.fail_fast);
        if let Some(t) = self.call_timeout {
            executor = executor.with_call_timeout(t);
        }

        tracing::debug!(provider = adapter.name(), ?strategy, "mail client ready");
        Ok(MailClient {
            adapter,
            kind,
            executor,
        })
    }
}

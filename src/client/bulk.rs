use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

use crate::client::core::MailClient;
use crate::error::{Error, ErrorContext};
use crate::types::{BulkResult, Message};
use crate::Result;

/// Serializable bulk request: messages plus values shared by all of them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub default_from: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Builder for one bulk send.
pub struct BulkRequestBuilder<'a> {
    client: &'a MailClient,
    messages: Vec<Message>,
    default_from: Option<String>,
    tags: BTreeSet<String>,
    require_recipients: bool,
    timeout: Option<Duration>,
    fail_fast: Option<bool>,
}

impl<'a> BulkRequestBuilder<'a> {
    pub(crate) fn new(client: &'a MailClient) -> Self {
        Self {
            client,
            messages: Vec::new(),
            default_from: None,
            tags: BTreeSet::new(),
            require_recipients: false,
            timeout: None,
            fail_fast: None,
        }
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Sender for messages that have none.
    pub fn default_from(mut self, from: impl Into<String>) -> Self {
        self.default_from = Some(from.into());
        self
    }

    pub(crate) fn default_from_opt(mut self, from: Option<String>) -> Self {
        self.default_from = from;
        self
    }

    /// Tag merged into every message.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Treat an empty batch as a validation error instead of an empty result.
    pub fn require_recipients(mut self) -> Self {
        self.require_recipients = true;
        self
    }

    /// Chunks not started within `timeout` fail with a deadline error.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn fail_fast(mut self, enable: bool) -> Self {
        self.fail_fast = Some(enable);
        self
    }

    pub async fn execute(self) -> Result<BulkResult> {
        if self.messages.is_empty() && self.require_recipients {
            return Err(Error::validation_with_context(
                "At least one message must be provided",
                ErrorContext::new()
                    .with_field_path("messages")
                    .with_source("bulk_request"),
            ));
        }

        let default_from = self.default_from;
        let tags = self.tags;
        let messages: Vec<Message> = self
            .messages
            .into_iter()
            .map(|mut m| {
                if m.from.is_none() {
                    m.from = default_from.clone();
                }
                m.tags.extend(tags.iter().cloned());
                m
            })
            .collect();

        let mut config = self.client.executor_config().clone();
        if let Some(t) = self.timeout {
            config = config.with_timeout(t);
        }
        if let Some(fail_fast) = self.fail_fast {
            config = config.with_continue_on_error(!fail_fast);
        }
        self.client.dispatch(messages, config).await
    }
}

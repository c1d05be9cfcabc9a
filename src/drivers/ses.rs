//! Amazon SES adapter (SES v2 API).
//!
//! Template messages are sent in bulk through `SendBulkEmail`, grouped by template
//! and sender. SES has no bulk call for non-template content, so those messages go
//! through `SendEmail` one by one.

use async_trait::async_trait;
use aws_sdk_sesv2::config::{Credentials, Region};
use aws_sdk_sesv2::error::DisplayErrorContext;
use aws_sdk_sesv2::primitives::Blob;
use aws_sdk_sesv2::types::{
    Body, BulkEmailContent, BulkEmailEntry, BulkEmailStatus, Content, Destination, EmailContent,
    Message as SesMessage, RawMessage, ReplacementEmailContent, ReplacementTemplate, Template,
};
use aws_sdk_sesv2::Client;
use serde_json::Value;
use std::fmt;

use super::{
    detail, group_positions, mime, sender, Deliveries, NativeBulk, ProviderAdapter,
    ProviderCapability,
};
use crate::batch::MessageChunk;
use crate::config::MailConfig;
use crate::error::{Error, ErrorDetail, ErrorKind, TransportError};
use crate::types::{Delivery, Message, Receipt};
use crate::Result;

const DEFAULT_REGION: &str = "us-east-1";
const MAX_BATCH_SIZE: usize = 50;

pub struct SesAdapter {
    client: Client,
    from_email: Option<String>,
    configuration_set: Option<String>,
}

/// Map an SDK failure onto the error taxonomy by its rendered error code.
fn classify(e: impl std::error::Error + 'static) -> Error {
    let msg = DisplayErrorContext(&e).to_string();
    if msg.contains("AccessDenied")
        || msg.contains("InvalidClientTokenId")
        || msg.contains("SignatureDoesNotMatch")
        || msg.contains("UnrecognizedClient")
    {
        Error::Transport(TransportError::Authentication(msg))
    } else if msg.contains("Throttling")
        || msg.contains("TooManyRequests")
        || msg.contains("dispatch failure")
        || msg.contains("timeout")
    {
        Error::Transport(TransportError::Ses(msg))
    } else {
        Error::provider_response("ses", None, msg)
    }
}

fn content(data: &str) -> Result<Content> {
    Content::builder()
        .data(data)
        .charset("UTF-8")
        .build()
        .map_err(|e| Error::validation(format!("invalid SES content: {}", e)))
}

fn destination(m: &Message) -> Destination {
    Destination::builder()
        .set_to_addresses(Some(m.to.clone()))
        .set_cc_addresses((!m.cc.is_empty()).then(|| m.cc.clone()))
        .set_bcc_addresses((!m.bcc.is_empty()).then(|| m.bcc.clone()))
        .build()
}

fn template_data(m: &Message) -> String {
    Value::Object(m.template_data.clone()).to_string()
}

impl SesAdapter {
    pub async fn from_config(config: &MailConfig) -> Result<Self> {
        let region = Region::new(
            config
                .region_name
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        );
        let mut loader = aws_config::from_env().region(region);
        if let (Some(access_key), Some(secret_key)) =
            (&config.aws_access_key_id, &config.aws_secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "mailbridge",
            ));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;
        Ok(Self::with_client(
            Client::new(&sdk_config),
            config.from_email.clone(),
            config.configuration_set_name.clone(),
        ))
    }

    pub fn with_client(
        client: Client,
        from_email: Option<String>,
        configuration_set: Option<String>,
    ) -> Self {
        Self {
            client,
            from_email,
            configuration_set,
        }
    }

    /// SendEmail content: stored template, raw MIME, or simple subject/body.
    fn email_content(&self, m: &Message, from: &str) -> Result<EmailContent> {
        if let Some(template) = &m.template_id {
            let template = Template::builder()
                .template_name(template.to_string())
                .template_data(template_data(m))
                .build();
            return Ok(EmailContent::builder().template(template).build());
        }
        if !m.attachments.is_empty() || !m.headers.is_empty() {
            let rendered = mime::render(m, from)?;
            let raw = RawMessage::builder()
                .data(Blob::new(rendered.to_bytes()))
                .build()
                .map_err(|e| Error::validation(format!("invalid SES raw message: {}", e)))?;
            return Ok(EmailContent::builder().raw(raw).build());
        }
        let body_content = content(m.body_or_empty())?;
        let body = if m.html {
            Body::builder().html(body_content).build()
        } else {
            Body::builder().text(body_content).build()
        };
        let message = SesMessage::builder()
            .subject(content(m.subject_or_empty())?)
            .body(body)
            .build();
        Ok(EmailContent::builder().simple(message).build())
    }

    async fn send_bulk_templated(&self, messages: &[&Message]) -> Result<Vec<Delivery>> {
        let Some(first) = messages.first() else {
            return Ok(Vec::new());
        };
        let from = sender(first, self.default_from())?;
        let template_name = first
            .template_id
            .as_ref()
            .map(|t| t.to_string())
            .ok_or_else(|| Error::runtime("SES bulk group without template"))?;

        let default_content = BulkEmailContent::builder()
            .template(
                Template::builder()
                    .template_name(template_name)
                    .template_data("{}")
                    .build(),
            )
            .build();
        let entries: Vec<BulkEmailEntry> = messages
            .iter()
            .map(|m| {
                BulkEmailEntry::builder()
                    .destination(destination(m))
                    .replacement_email_content(
                        ReplacementEmailContent::builder()
                            .replacement_template(
                                ReplacementTemplate::builder()
                                    .replacement_template_data(template_data(m))
                                    .build(),
                            )
                            .build(),
                    )
                    .build()
            })
            .collect();

        let mut request = self
            .client
            .send_bulk_email()
            .from_email_address(from)
            .default_content(default_content)
            .set_bulk_email_entries(Some(entries));
        if let Some(reply_to) = &first.reply_to {
            request = request.reply_to_addresses(reply_to);
        }
        if let Some(set) = &self.configuration_set {
            request = request.configuration_set_name(set);
        }
        let output = request.send().await.map_err(classify)?;

        Ok(output
            .bulk_email_entry_results()
            .iter()
            .map(|entry| match entry.status() {
                Some(BulkEmailStatus::Success) => {
                    Ok(Receipt::new(entry.message_id().map(|s| s.to_string())))
                }
                status => {
                    let reason = entry
                        .error()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("bulk entry status {:?}", status));
                    Err(std::sync::Arc::new(
                        ErrorDetail::new(ErrorKind::ProviderResponse, reason).with_provider("ses"),
                    ))
                }
            })
            .collect())
    }
}

impl fmt::Debug for SesAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SesAdapter")
            .field("from_email", &self.from_email)
            .field("configuration_set", &self.configuration_set)
            .finish()
    }
}

#[derive(PartialEq)]
struct BulkKey<'a> {
    template: String,
    from: Option<&'a str>,
    reply_to: Option<&'a str>,
}

fn bulk_key(m: &Message) -> Option<BulkKey<'_>> {
    m.template_id.as_ref().map(|t| BulkKey {
        template: t.to_string(),
        from: m.from.as_deref(),
        reply_to: m.reply_to.as_deref(),
    })
}

#[async_trait]
impl ProviderAdapter for SesAdapter {
    fn name(&self) -> &str {
        "ses"
    }

    fn capability(&self) -> ProviderCapability {
        ProviderCapability {
            max_batch_size: MAX_BATCH_SIZE,
            supports_native_bulk: true,
            supports_templates: true,
            exclusive_connection: false,
        }
    }

    fn default_from(&self) -> Option<&str> {
        self.from_email.as_deref()
    }

    async fn send_single(&self, message: &Message) -> Result<Receipt> {
        let from = sender(message, self.default_from())?;
        let mut request = self
            .client
            .send_email()
            .from_email_address(from)
            .destination(destination(message))
            .content(self.email_content(message, from)?);
        if let Some(reply_to) = &message.reply_to {
            request = request.reply_to_addresses(reply_to);
        }
        if let Some(set) = &self.configuration_set {
            request = request.configuration_set_name(set);
        }
        let output = request.send().await.map_err(classify)?;
        Ok(Receipt::new(output.message_id().map(|s| s.to_string())))
    }

    fn native_bulk(&self) -> Option<&dyn NativeBulk> {
        Some(self)
    }
}

#[async_trait]
impl NativeBulk for SesAdapter {
    async fn send_batch(&self, chunk: &MessageChunk) -> Result<Vec<Delivery>> {
        let (groups, singles) = group_positions(chunk, bulk_key);
        let mut deliveries = Deliveries::new("ses", chunk.len());
        for group in groups {
            let messages: Vec<&Message> = group
                .positions
                .iter()
                .filter_map(|&p| chunk.get(p))
                .collect();
            tracing::debug!(
                provider = "ses",
                template = %group.key.template,
                size = messages.len(),
                "sending bulk templated email"
            );
            let result = self.send_bulk_templated(&messages).await;
            deliveries.record_call(&group.positions, result);
        }
        for pos in singles {
            if let Some(m) = chunk.get(pos) {
                let result = self.send_single(m).await;
                if let Err(e) = &result {
                    tracing::debug!(provider = "ses", error = %detail("ses", e), "send failed");
                }
                deliveries.record(pos, result);
            }
        }
        Ok(deliveries.finish())
    }
}

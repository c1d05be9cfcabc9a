//! SendGrid v3 Mail Send adapter.
//!
//! A batch is one `POST /v3/mail/send` carrying one personalization per message.
//! Everything outside a personalization is shared by the whole request, so only
//! messages agreeing on sender, content, template, reply-to, attachments and tags
//! can travel together.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};

use super::mime::{address_json, address_list};
use super::{group_positions, sender, Deliveries, NativeBulk, ProviderAdapter, ProviderCapability};
use crate::batch::MessageChunk;
use crate::config::MailConfig;
use crate::error::Error;
use crate::transport::{Auth, HttpReply, HttpTransport};
use crate::types::{Delivery, Message, Receipt};
use crate::Result;

const DEFAULT_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";
const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug)]
pub struct SendGridAdapter {
    http: HttpTransport,
    endpoint: String,
    from_email: Option<String>,
}

impl SendGridAdapter {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            Error::configuration("Missing required sendgrid configuration: api_key")
        })?;
        Ok(Self {
            http: HttpTransport::new("sendgrid", Auth::Bearer(api_key), config.timeout_secs)?,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            from_email: config.from_email.clone(),
        })
    }

    /// Build one request for `messages`; shared fields come from the first message.
    fn payload(&self, messages: &[&Message]) -> Result<Value> {
        let Some(first) = messages.first() else {
            return Err(Error::runtime("empty SendGrid request"));
        };
        let from = sender(first, self.default_from())?;

        let personalizations = messages
            .iter()
            .map(|m| personalization(m))
            .collect::<Result<Vec<_>>>()?;
        let mut body = Map::new();
        body.insert("personalizations".into(), Value::Array(personalizations));
        body.insert("from".into(), address_json(from, "from")?);

        match &first.template_id {
            Some(template) => {
                body.insert("template_id".into(), json!(template.to_string()));
            }
            None => {
                body.insert(
                    "content".into(),
                    json!([{
                        "type": if first.html { "text/html" } else { "text/plain" },
                        "value": first.body_or_empty(),
                    }]),
                );
            }
        }
        if let Some(reply_to) = &first.reply_to {
            body.insert("reply_to".into(), address_json(reply_to, "reply_to")?);
        }
        if !first.attachments.is_empty() {
            let attachments: Vec<Value> = first
                .attachments
                .iter()
                .map(|a| {
                    json!({
                        "content": BASE64.encode(&a.content),
                        "filename": a.filename,
                        "type": a.mime_type(),
                        "disposition": "attachment",
                    })
                })
                .collect();
            body.insert("attachments".into(), Value::Array(attachments));
        }
        if !first.tags.is_empty() {
            body.insert("categories".into(), json!(first.tags));
        }
        Ok(Value::Object(body))
    }

    async fn post(&self, messages: &[&Message]) -> Result<HttpReply> {
        let payload = self.payload(messages)?;
        self.http.post_json(&self.endpoint, &payload).await
    }
}

fn personalization(m: &Message) -> Result<Value> {
    let mut p = Map::new();
    p.insert("to".into(), address_list(&m.to, "to")?);
    if !m.cc.is_empty() {
        p.insert("cc".into(), address_list(&m.cc, "cc")?);
    }
    if !m.bcc.is_empty() {
        p.insert("bcc".into(), address_list(&m.bcc, "bcc")?);
    }
    if let Some(subject) = &m.subject {
        p.insert("subject".into(), json!(subject));
    }
    if !m.headers.is_empty() {
        p.insert("headers".into(), json!(m.headers));
    }
    if !m.template_data.is_empty() {
        p.insert(
            "dynamic_template_data".into(),
            Value::Object(m.template_data.clone()),
        );
    }
    Ok(Value::Object(p))
}

fn receipt(reply: &HttpReply) -> Receipt {
    Receipt::new(reply.header("x-message-id"))
}

/// Request-level fields a personalization cannot override.
#[derive(PartialEq)]
struct SharedFields<'a> {
    from: Option<&'a str>,
    body: Option<&'a str>,
    html: bool,
    template: Option<String>,
    reply_to: Option<&'a str>,
    attachments: &'a [crate::types::Attachment],
    tags: &'a std::collections::BTreeSet<String>,
}

fn shared_fields(m: &Message) -> SharedFields<'_> {
    SharedFields {
        from: m.from.as_deref(),
        body: if m.is_template() { None } else { m.body.as_deref() },
        html: m.html,
        template: m.template_id.as_ref().map(|t| t.to_string()),
        reply_to: m.reply_to.as_deref(),
        attachments: &m.attachments,
        tags: &m.tags,
    }
}

#[async_trait]
impl ProviderAdapter for SendGridAdapter {
    fn name(&self) -> &str {
        "sendgrid"
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
        let reply = self.post(&[message]).await?;
        Ok(receipt(&reply))
    }

    fn native_bulk(&self) -> Option<&dyn NativeBulk> {
        Some(self)
    }
}

#[async_trait]
impl NativeBulk for SendGridAdapter {
    async fn send_batch(&self, chunk: &MessageChunk) -> Result<Vec<Delivery>> {
        let (groups, _) = group_positions(chunk, |m| Some(shared_fields(m)));
        let mut deliveries = Deliveries::new("sendgrid", chunk.len());
        for group in groups {
            let messages: Vec<&Message> = group
                .positions
                .iter()
                .filter_map(|&p| chunk.get(p))
                .collect();
            tracing::debug!(
                provider = "sendgrid",
                size = messages.len(),
                "posting personalization group"
            );
            let result = self.post(&messages).await.map(|reply| {
                let r = receipt(&reply);
                vec![Ok(r); messages.len()]
            });
            deliveries.record_call(&group.positions, result);
        }
        Ok(deliveries.finish())
    }
}

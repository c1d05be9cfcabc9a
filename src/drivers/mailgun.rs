//! Mailgun messages API adapter (multipart form).
//!
//! Batch sending uses Mailgun's recipient variables: one request lists every
//! recipient in `to` and `recipient-variables` turns it into one message each.
//! Only single-recipient messages without cc/bcc qualify.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value};

use super::mime::bare_address;
use super::{group_positions, sender, Deliveries, NativeBulk, ProviderAdapter, ProviderCapability};
use crate::batch::MessageChunk;
use crate::config::MailConfig;
use crate::error::Error;
use crate::transport::{Auth, HttpReply, HttpTransport};
use crate::types::{Delivery, Message, Receipt};
use crate::Result;

const DEFAULT_BASE: &str = "https://api.mailgun.net/v3";
const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug)]
pub struct MailgunAdapter {
    http: HttpTransport,
    url: String,
    from_email: Option<String>,
}

impl MailgunAdapter {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let (Some(api_key), Some(domain)) = (&config.api_key, &config.domain) else {
            return Err(Error::configuration(
                "Missing required mailgun configuration: api_key, domain",
            ));
        };
        let base = config.endpoint.as_deref().unwrap_or(DEFAULT_BASE);
        let auth = Auth::Basic {
            username: "api".to_string(),
            password: api_key.clone(),
        };
        Ok(Self {
            http: HttpTransport::new("mailgun", auth, config.timeout_secs)?,
            url: format!("{}/{}/messages", base.trim_end_matches('/'), domain),
            from_email: config.from_email.clone(),
        })
    }

    /// Form fields for `message`, addressed to `to`.
    fn fields(&self, message: &Message, to: Vec<String>) -> Result<Vec<(String, String)>> {
        let from = sender(message, self.default_from())?;
        let mut fields = vec![
            ("from".to_string(), from.to_string()),
            ("to".to_string(), to.join(", ")),
        ];
        if !message.cc.is_empty() {
            fields.push(("cc".into(), message.cc.join(", ")));
        }
        if !message.bcc.is_empty() {
            fields.push(("bcc".into(), message.bcc.join(", ")));
        }
        if let Some(subject) = &message.subject {
            fields.push(("subject".into(), subject.clone()));
        }
        match &message.template_id {
            Some(template) => fields.push(("template".into(), template.to_string())),
            None => {
                let key = if message.html { "html" } else { "text" };
                fields.push((key.into(), message.body_or_empty().to_string()));
            }
        }
        if let Some(reply_to) = &message.reply_to {
            fields.push(("h:Reply-To".into(), reply_to.clone()));
        }
        for (name, value) in &message.headers {
            fields.push((format!("h:{}", name), value.clone()));
        }
        for tag in &message.tags {
            fields.push(("o:tag".into(), tag.clone()));
        }
        Ok(fields)
    }

    fn form(&self, fields: Vec<(String, String)>, message: &Message) -> Result<Form> {
        let mut form = Form::new();
        for (k, v) in fields {
            form = form.text(k, v);
        }
        for attachment in &message.attachments {
            let part = Part::bytes(attachment.content.to_vec())
                .file_name(attachment.filename.clone())
                .mime_str(attachment.mime_type())
                .map_err(|e| Error::validation(format!("invalid attachment type: {}", e)))?;
            form = form.part("attachment", part);
        }
        Ok(form)
    }

    async fn post_batch(
        &self,
        first: &Message,
        recipients: Vec<String>,
        variables: Map<String, Value>,
    ) -> Result<Receipt> {
        let mut fields = self.fields(first, recipients)?;
        fields.push((
            "recipient-variables".into(),
            Value::Object(variables).to_string(),
        ));
        let form = self.form(fields, first)?;
        self.post(form).await
    }

    async fn post(&self, form: Form) -> Result<Receipt> {
        let reply = self.http.post_form(&self.url, form).await?;
        Ok(receipt(&reply))
    }
}

fn receipt(reply: &HttpReply) -> Receipt {
    let id = reply
        .json()
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(|s| s.to_string()));
    Receipt::new(id)
}

/// Fields that must agree for recipients to share one recipient-variables request.
#[derive(PartialEq)]
struct SharedFields<'a> {
    from: Option<&'a str>,
    subject: Option<&'a str>,
    body: Option<&'a str>,
    html: bool,
    template: Option<String>,
    reply_to: Option<&'a str>,
    headers: &'a std::collections::BTreeMap<String, String>,
    tags: &'a std::collections::BTreeSet<String>,
    attachments: &'a [crate::types::Attachment],
}

fn shared_fields(m: &Message) -> Option<SharedFields<'_>> {
    if m.to.len() != 1 || !m.cc.is_empty() || !m.bcc.is_empty() {
        return None;
    }
    Some(SharedFields {
        from: m.from.as_deref(),
        subject: m.subject.as_deref(),
        body: m.body.as_deref(),
        html: m.html,
        template: m.template_id.as_ref().map(|t| t.to_string()),
        reply_to: m.reply_to.as_deref(),
        headers: &m.headers,
        tags: &m.tags,
        attachments: &m.attachments,
    })
}

#[async_trait]
impl ProviderAdapter for MailgunAdapter {
    fn name(&self) -> &str {
        "mailgun"
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
        let mut fields = self.fields(message, message.to.clone())?;
        if !message.template_data.is_empty() {
            fields.push((
                "h:X-Mailgun-Variables".into(),
                Value::Object(message.template_data.clone()).to_string(),
            ));
        }
        let form = self.form(fields, message)?;
        self.post(form).await
    }

    fn native_bulk(&self) -> Option<&dyn NativeBulk> {
        Some(self)
    }
}

#[async_trait]
impl NativeBulk for MailgunAdapter {
    async fn send_batch(&self, chunk: &MessageChunk) -> Result<Vec<Delivery>> {
        let (groups, mut singles) = group_positions(chunk, shared_fields);
        let mut deliveries = Deliveries::new("mailgun", chunk.len());

        for group in groups {
            // Mailgun keys recipient-variables by bare address, so each address
            // can appear only once per request.
            let mut seen: Vec<String> = Vec::new();
            let mut recipients = Vec::new();
            let mut variables = Map::new();
            let mut positions = Vec::new();
            for &pos in &group.positions {
                let Some(m) = chunk.get(pos) else { continue };
                match bare_address(&m.to[0], "to[0]") {
                    Ok(addr) if !seen.contains(&addr) => {
                        variables.insert(addr.clone(), Value::Object(m.template_data.clone()));
                        seen.push(addr);
                        recipients.push(m.to[0].clone());
                        positions.push(pos);
                    }
                    _ => singles.push(pos),
                }
            }
            if positions.len() == 1 {
                singles.push(positions[0]);
                continue;
            }

            let Some(first) = chunk.get(positions[0]) else { continue };
            tracing::debug!(
                provider = "mailgun",
                size = positions.len(),
                "posting recipient-variables batch"
            );
            let result = self
                .post_batch(first, recipients, variables)
                .await
                .map(|receipt| vec![Ok(receipt); positions.len()]);
            deliveries.record_call(&positions, result);
        }

        singles.sort_unstable();
        for pos in singles {
            if let Some(m) = chunk.get(pos) {
                deliveries.record(pos, self.send_single(m).await);
            }
        }
        Ok(deliveries.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> MailgunAdapter {
        MailgunAdapter::from_config(
            &MailConfig::mailgun("key-123", "mg.shop.io").with_from_email("noreply@shop.io"),
        )
        .unwrap()
    }

    #[test]
    fn url_includes_domain() {
        assert_eq!(adapter().url, "https://api.mailgun.net/v3/mg.shop.io/messages");
        let eu = MailgunAdapter::from_config(
            &MailConfig::mailgun("k", "mg.shop.io").with_endpoint("https://api.eu.mailgun.net/v3/"),
        )
        .unwrap();
        assert_eq!(eu.url, "https://api.eu.mailgun.net/v3/mg.shop.io/messages");
    }

    #[test]
    fn fields_cover_headers_and_tags() {
        let m = Message::builder()
            .to("a@x.io")
            .to("b@x.io")
            .subject("Hi")
            .text_body("plain")
            .reply_to("r@shop.io")
            .header("X-Campaign", "spring")
            .tag("promo")
            .build();
        let fields = adapter().fields(&m, m.to.clone()).unwrap();
        let get = |k: &str| fields.iter().find(|(n, _)| n == k).map(|(_, v)| v.as_str());
        assert_eq!(get("from"), Some("noreply@shop.io"));
        assert_eq!(get("to"), Some("a@x.io, b@x.io"));
        assert_eq!(get("text"), Some("plain"));
        assert_eq!(get("html"), None);
        assert_eq!(get("h:Reply-To"), Some("r@shop.io"));
        assert_eq!(get("h:X-Campaign"), Some("spring"));
        assert_eq!(get("o:tag"), Some("promo"));
    }

    #[test]
    fn multi_recipient_messages_are_not_batched() {
        let single = Message::builder().to("a@x.io").subject("s").body("b").build();
        let multi = Message::builder().to("a@x.io").to("b@x.io").subject("s").body("b").build();
        let cc = Message::builder().to("a@x.io").cc("c@x.io").subject("s").body("b").build();
        assert!(shared_fields(&single).is_some());
        assert!(shared_fields(&multi).is_none());
        assert!(shared_fields(&cc).is_none());
    }
}

//! Brevo (formerly Sendinblue) transactional email adapter.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};

use super::mime::{address_json, address_list};
use super::{
    common_checks, group_positions, sender, Deliveries, NativeBulk, ProviderAdapter,
    ProviderCapability,
};
use crate::batch::MessageChunk;
use crate::config::MailConfig;
use crate::error::{Error, ErrorContext};
use crate::transport::{Auth, HttpReply, HttpTransport};
use crate::types::{Attachment, Delivery, Message, Receipt, TemplateId};
use crate::Result;

const DEFAULT_ENDPOINT: &str = "https://api.brevo.com/v3/smtp/email";
const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug)]
pub struct BrevoAdapter {
    http: HttpTransport,
    endpoint: String,
    from_email: Option<String>,
}

/// Brevo only knows numeric template ids.
fn numeric_template(id: &TemplateId) -> Result<i64> {
    match id {
        TemplateId::Numeric(n) => Ok(*n),
        TemplateId::Name(s) => s.trim().parse::<i64>().map_err(|_| {
            Error::validation_with_context(
                format!("Brevo template id must be numeric, got '{}'", s),
                ErrorContext::new()
                    .with_field_path("template_id")
                    .with_source("brevo"),
            )
        }),
    }
}

impl BrevoAdapter {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::configuration("Missing required brevo configuration: api_key"))?;
        let auth = Auth::Header {
            name: "api-key",
            value: api_key,
        };
        Ok(Self {
            http: HttpTransport::new("brevo", auth, config.timeout_secs)?,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            from_email: config.from_email.clone(),
        })
    }

    /// Request for one message; batch requests start from the first message of the group.
    fn payload(&self, m: &Message) -> Result<Map<String, Value>> {
        let from = sender(m, self.default_from())?;
        let mut p = Map::new();
        p.insert("sender".into(), address_json(from, "from")?);
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
        match &m.template_id {
            Some(id) => {
                p.insert("templateId".into(), json!(numeric_template(id)?));
                if !m.template_data.is_empty() {
                    p.insert("params".into(), Value::Object(m.template_data.clone()));
                }
            }
            None => {
                let key = if m.html { "htmlContent" } else { "textContent" };
                p.insert(key.into(), json!(m.body_or_empty()));
            }
        }
        if let Some(reply_to) = &m.reply_to {
            p.insert("replyTo".into(), address_json(reply_to, "reply_to")?);
        }
        if !m.headers.is_empty() {
            p.insert("headers".into(), json!(m.headers));
        }
        if !m.attachments.is_empty() {
            let attachments: Vec<Value> = m
                .attachments
                .iter()
                .map(|a| json!({ "name": a.filename, "content": BASE64.encode(&a.content) }))
                .collect();
            p.insert("attachment".into(), Value::Array(attachments));
        }
        if !m.tags.is_empty() {
            p.insert("tags".into(), json!(m.tags));
        }
        Ok(p)
    }

    /// Per-recipient overrides for `messageVersions`.
    fn version(m: &Message) -> Result<Value> {
        let mut v = Map::new();
        v.insert("to".into(), address_list(&m.to, "to")?);
        if !m.cc.is_empty() {
            v.insert("cc".into(), address_list(&m.cc, "cc")?);
        }
        if !m.bcc.is_empty() {
            v.insert("bcc".into(), address_list(&m.bcc, "bcc")?);
        }
        if let Some(subject) = &m.subject {
            v.insert("subject".into(), json!(subject));
        }
        if let Some(reply_to) = &m.reply_to {
            v.insert("replyTo".into(), address_json(reply_to, "reply_to")?);
        }
        if m.is_template() {
            if !m.template_data.is_empty() {
                v.insert("params".into(), Value::Object(m.template_data.clone()));
            }
        } else {
            let key = if m.html { "htmlContent" } else { "textContent" };
            v.insert(key.into(), json!(m.body_or_empty()));
        }
        Ok(Value::Object(v))
    }

    async fn post_versions(&self, messages: &[&Message]) -> Result<Vec<Delivery>> {
        let Some(first) = messages.first() else {
            return Ok(Vec::new());
        };
        let mut body = self.payload(first)?;
        let versions = messages
            .iter()
            .map(|m| Self::version(m))
            .collect::<Result<Vec<_>>>()?;
        body.insert("messageVersions".into(), Value::Array(versions));
        let reply = self.http.post_json(&self.endpoint, &Value::Object(body)).await?;
        let ids: Vec<Option<String>> = reply
            .json()?
            .get("messageIds")
            .and_then(|v| v.as_array())
            .map(|ids| ids.iter().map(|id| id.as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default();
        // Brevo accepts or rejects the request as a whole.
        Ok((0..messages.len())
            .map(|i| Ok(Receipt::new(ids.get(i).cloned().flatten())))
            .collect())
    }
}

fn receipt(reply: &HttpReply) -> Result<Receipt> {
    let id = reply
        .json()?
        .get("messageId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    Ok(Receipt::new(id))
}

/// Request-level fields that every message version shares.
#[derive(PartialEq)]
struct SharedFields<'a> {
    from: Option<&'a str>,
    template: Option<&'a TemplateId>,
    html: bool,
    headers: &'a std::collections::BTreeMap<String, String>,
    tags: &'a std::collections::BTreeSet<String>,
    attachments: &'a [Attachment],
}

fn shared_fields(m: &Message) -> SharedFields<'_> {
    SharedFields {
        from: m.from.as_deref(),
        template: m.template_id.as_ref(),
        html: m.html,
        headers: &m.headers,
        tags: &m.tags,
        attachments: &m.attachments,
    }
}

#[async_trait]
impl ProviderAdapter for BrevoAdapter {
    fn name(&self) -> &str {
        "brevo"
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

    fn check_message(&self, message: &Message) -> Result<()> {
        common_checks(self, message)?;
        if let Some(id) = &message.template_id {
            numeric_template(id)?;
        }
        Ok(())
    }

    async fn send_single(&self, message: &Message) -> Result<Receipt> {
        let payload = Value::Object(self.payload(message)?);
        let reply = self.http.post_json(&self.endpoint, &payload).await?;
        receipt(&reply)
    }

    fn native_bulk(&self) -> Option<&dyn NativeBulk> {
        Some(self)
    }
}

#[async_trait]
impl NativeBulk for BrevoAdapter {
    async fn send_batch(&self, chunk: &MessageChunk) -> Result<Vec<Delivery>> {
        let (groups, _) = group_positions(chunk, |m| Some(shared_fields(m)));
        let mut deliveries = Deliveries::new("brevo", chunk.len());
        for group in groups {
            let messages: Vec<&Message> = group
                .positions
                .iter()
                .filter_map(|&p| chunk.get(p))
                .collect();
            let result = if messages.len() == 1 {
                self.send_single(messages[0]).await.map(|r| vec![Ok(r)])
            } else {
                tracing::debug!(
                    provider = "brevo",
                    size = messages.len(),
                    "posting messageVersions batch"
                );
                self.post_versions(&messages).await
            };
            deliveries.record_call(&group.positions, result);
        }
        Ok(deliveries.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn adapter() -> BrevoAdapter {
        BrevoAdapter::from_config(&MailConfig::brevo("xkeysib-1").with_from_email("news@shop.io"))
            .unwrap()
    }

    #[test]
    fn template_id_must_be_numeric() {
        assert_eq!(numeric_template(&TemplateId::from("42")).unwrap(), 42);
        let err = numeric_template(&TemplateId::from("welcome")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let m = Message::builder().to("a@x.io").template("welcome").build();
        assert!(adapter().check_message(&m).is_err());
        let m = Message::builder().to("a@x.io").template(7i64).build();
        assert!(adapter().check_message(&m).is_ok());
    }

    #[test]
    fn payload_fields() {
        let m = Message::builder()
            .to("a@x.io")
            .bcc("audit@shop.io")
            .subject("Hi")
            .text_body("plain")
            .tag("news")
            .build();
        let p = adapter().payload(&m).unwrap();
        assert_eq!(p["sender"]["email"], "news@shop.io");
        assert_eq!(p["to"][0]["email"], "a@x.io");
        assert_eq!(p["bcc"][0]["email"], "audit@shop.io");
        assert_eq!(p["textContent"], "plain");
        assert!(p.get("htmlContent").is_none());
        assert_eq!(p["tags"][0], "news");
    }

    #[test]
    fn versions_carry_per_message_fields() {
        let m = Message::builder()
            .to("b@x.io")
            .template(3i64)
            .template_var("code", "X1")
            .build();
        let v = BrevoAdapter::version(&m).unwrap();
        assert_eq!(v["to"][0]["email"], "b@x.io");
        assert_eq!(v["params"]["code"], "X1");
        assert!(v.get("htmlContent").is_none());
    }

    #[test]
    fn display_names_are_sent_as_name_fields() {
        let m = Message::builder()
            .from("Shop News <news@shop.io>")
            .to("Jane Doe <jane@example.com>")
            .reply_to("help@shop.io")
            .subject("Hi")
            .body("<p>hi</p>")
            .build();
        let p = adapter().payload(&m).unwrap();
        assert_eq!(p["sender"], json!({ "email": "news@shop.io", "name": "Shop News" }));
        assert_eq!(p["to"][0], json!({ "email": "jane@example.com", "name": "Jane Doe" }));
        assert_eq!(p["replyTo"], json!({ "email": "help@shop.io" }));

        let v = BrevoAdapter::version(&m).unwrap();
        assert_eq!(v["to"][0]["name"], "Jane Doe");
    }
}

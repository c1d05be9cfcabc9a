//! Postmark adapter.
//!
//! `/email/batch` and `/email/batchWithTemplates` accept up to 500 independent
//! messages and answer with one status entry per message, in request order.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};

use super::{
    detail, group_positions, sender, Deliveries, NativeBulk, ProviderAdapter, ProviderCapability,
};
use crate::batch::MessageChunk;
use crate::config::MailConfig;
use crate::error::Error;
use crate::transport::{Auth, HttpTransport};
use crate::types::{Delivery, Message, Receipt, TemplateId};
use crate::Result;

const DEFAULT_BASE: &str = "https://api.postmarkapp.com";
const MAX_BATCH_SIZE: usize = 500;

#[derive(Debug)]
pub struct PostmarkAdapter {
    http: HttpTransport,
    base: String,
    from_email: Option<String>,
    message_stream: Option<String>,
}

impl PostmarkAdapter {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let token = config.server_token.clone().ok_or_else(|| {
            Error::configuration("Missing required postmark configuration: server_token")
        })?;
        let auth = Auth::Header {
            name: "X-Postmark-Server-Token",
            value: token,
        };
        Ok(Self {
            http: HttpTransport::new("postmark", auth, config.timeout_secs)?,
            base: config
                .endpoint
                .as_deref()
                .unwrap_or(DEFAULT_BASE)
                .trim_end_matches('/')
                .to_string(),
            from_email: config.from_email.clone(),
            message_stream: config.message_stream.clone(),
        })
    }

    fn payload(&self, m: &Message) -> Result<Value> {
        let from = sender(m, self.default_from())?;
        let mut p = Map::new();
        p.insert("From".into(), json!(from));
        p.insert("To".into(), json!(m.to.join(", ")));
        if !m.cc.is_empty() {
            p.insert("Cc".into(), json!(m.cc.join(", ")));
        }
        if !m.bcc.is_empty() {
            p.insert("Bcc".into(), json!(m.bcc.join(", ")));
        }
        match &m.template_id {
            Some(TemplateId::Numeric(id)) => {
                p.insert("TemplateId".into(), json!(id));
                p.insert("TemplateModel".into(), Value::Object(m.template_data.clone()));
            }
            Some(TemplateId::Name(alias)) => {
                p.insert("TemplateAlias".into(), json!(alias));
                p.insert("TemplateModel".into(), Value::Object(m.template_data.clone()));
            }
            None => {
                p.insert("Subject".into(), json!(m.subject_or_empty()));
                let key = if m.html { "HtmlBody" } else { "TextBody" };
                p.insert(key.into(), json!(m.body_or_empty()));
            }
        }
        if let Some(reply_to) = &m.reply_to {
            p.insert("ReplyTo".into(), json!(reply_to));
        }
        if !m.headers.is_empty() {
            let headers: Vec<Value> = m
                .headers
                .iter()
                .map(|(k, v)| json!({ "Name": k, "Value": v }))
                .collect();
            p.insert("Headers".into(), Value::Array(headers));
        }
        if !m.attachments.is_empty() {
            let attachments: Vec<Value> = m
                .attachments
                .iter()
                .map(|a| {
                    json!({
                        "Name": a.filename,
                        "Content": BASE64.encode(&a.content),
                        "ContentType": a.mime_type(),
                    })
                })
                .collect();
            p.insert("Attachments".into(), Value::Array(attachments));
        }
        // Postmark takes a single tag per message.
        if let Some(tag) = m.tags.iter().next() {
            p.insert("Tag".into(), json!(tag));
        }
        if let Some(stream) = &self.message_stream {
            p.insert("MessageStream".into(), json!(stream));
        }
        Ok(Value::Object(p))
    }

    fn url(&self, templated: bool, batch: bool) -> String {
        let path = match (templated, batch) {
            (false, false) => "/email",
            (true, false) => "/email/withTemplate",
            (false, true) => "/email/batch",
            (true, true) => "/email/batchWithTemplates",
        };
        format!("{}{}", self.base, path)
    }

    async fn post_batch(&self, messages: &[&Message], templated: bool) -> Result<Vec<Delivery>> {
        let entries = messages
            .iter()
            .map(|m| self.payload(m))
            .collect::<Result<Vec<_>>>()?;
        let body = if templated {
            json!({ "Messages": entries })
        } else {
            Value::Array(entries)
        };
        let reply = self.http.post_json(&self.url(templated, true), &body).await?;
        let value = reply.json()?;
        let statuses = value.as_array().ok_or_else(|| {
            Error::provider_response(
                "postmark",
                Some(reply.status),
                "batch response is not an array",
            )
        })?;
        Ok(statuses.iter().map(entry_delivery).collect())
    }
}

/// Read one entry of a Postmark response; `ErrorCode` 0 means accepted.
fn entry_result(entry: &Value) -> Result<Receipt> {
    let code = entry.get("ErrorCode").and_then(|c| c.as_i64()).unwrap_or(0);
    if code != 0 {
        let message = entry
            .get("Message")
            .and_then(|m| m.as_str())
            .unwrap_or("rejected");
        return Err(Error::provider_response(
            "postmark",
            Some(422),
            format!("ErrorCode {}: {}", code, message),
        ));
    }
    Ok(Receipt::new(
        entry
            .get("MessageID")
            .and_then(|id| id.as_str())
            .map(|s| s.to_string()),
    ))
}

fn entry_delivery(entry: &Value) -> Delivery {
    entry_result(entry).map_err(|e| detail("postmark", &e))
}

#[async_trait]
impl ProviderAdapter for PostmarkAdapter {
    fn name(&self) -> &str {
        "postmark"
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
        let payload = self.payload(message)?;
        let reply = self
            .http
            .post_json(&self.url(message.is_template(), false), &payload)
            .await?;
        entry_result(&reply.json()?)
    }

    fn native_bulk(&self) -> Option<&dyn NativeBulk> {
        Some(self)
    }
}

#[async_trait]
impl NativeBulk for PostmarkAdapter {
    async fn send_batch(&self, chunk: &MessageChunk) -> Result<Vec<Delivery>> {
        // Templated and plain messages go to different endpoints.
        let (groups, _) = group_positions(chunk, |m| Some(m.is_template()));
        let mut deliveries = Deliveries::new("postmark", chunk.len());
        for group in groups {
            let messages: Vec<&Message> = group
                .positions
                .iter()
                .filter_map(|&p| chunk.get(p))
                .collect();
            tracing::debug!(
                provider = "postmark",
                templated = group.key,
                size = messages.len(),
                "posting batch"
            );
            let result = self.post_batch(&messages, group.key).await;
            deliveries.record_call(&group.positions, result);
        }
        Ok(deliveries.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn adapter() -> PostmarkAdapter {
        PostmarkAdapter::from_config(
            &MailConfig::postmark("pm-token")
                .with_from_email("noreply@shop.io")
                .with_message_stream("outbound"),
        )
        .unwrap()
    }

    #[test]
    fn template_ids_map_to_id_or_alias() {
        let a = adapter();
        let numeric = Message::builder().to("a@x.io").template(1234i64).build();
        let alias = Message::builder()
            .to("a@x.io")
            .template("welcome")
            .template_var("name", "Ann")
            .build();
        let p = a.payload(&numeric).unwrap();
        assert_eq!(p["TemplateId"], 1234);
        assert!(p.get("Subject").is_none());
        let p = a.payload(&alias).unwrap();
        assert_eq!(p["TemplateAlias"], "welcome");
        assert_eq!(p["TemplateModel"]["name"], "Ann");
        assert_eq!(p["MessageStream"], "outbound");
    }

    #[test]
    fn endpoints() {
        let a = adapter();
        assert_eq!(a.url(false, true), "https://api.postmarkapp.com/email/batch");
        assert_eq!(
            a.url(true, true),
            "https://api.postmarkapp.com/email/batchWithTemplates"
        );
        assert_eq!(a.url(true, false), "https://api.postmarkapp.com/email/withTemplate");
    }

    #[test]
    fn error_code_becomes_provider_response() {
        let ok = entry_result(&json!({"ErrorCode": 0, "MessageID": "abc"})).unwrap();
        assert_eq!(ok.message_id.as_deref(), Some("abc"));
        let err = entry_result(&json!({"ErrorCode": 300, "Message": "Invalid email request"}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderResponse);
        assert!(err.to_string().contains("Invalid email request"));
        let d = entry_delivery(&json!({"ErrorCode": 406, "Message": "inactive"}));
        assert_eq!(d.unwrap_err().provider.as_deref(), Some("postmark"));
    }
}

//! MIME assembly for providers that take a full RFC 5322 message (SMTP, SES raw).

use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use serde_json::{json, Map, Value};

use crate::error::{Error, ErrorContext};
use crate::types::Message;
use crate::Result;

/// A rendered message plus the Message-ID that was stamped on it.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub email: lettre::Message,
    pub message_id: String,
}

impl RenderedMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.email.formatted()
    }
}

pub(crate) fn mailbox(addr: &str, field: &str) -> Result<Mailbox> {
    addr.parse::<Mailbox>().map_err(|e| {
        Error::validation_with_context(
            format!("invalid address '{}': {}", addr, e),
            ErrorContext::new()
                .with_field_path(field)
                .with_source("mime"),
        )
    })
}

/// `{"email", "name"}` object for JSON APIs that take the display name separately.
pub(crate) fn address_json(addr: &str, field: &str) -> Result<Value> {
    let mailbox = mailbox(addr, field)?;
    let mut obj = Map::new();
    obj.insert("email".into(), json!(mailbox.email.to_string()));
    if let Some(name) = mailbox.name {
        obj.insert("name".into(), json!(name));
    }
    Ok(Value::Object(obj))
}

/// JSON array of [`address_json`] objects.
pub(crate) fn address_list(list: &[String], field: &str) -> Result<Value> {
    list.iter()
        .enumerate()
        .map(|(i, a)| address_json(a, &format!("{}[{}]", field, i)))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

/// The `local@domain` part of `addr`, without display name or brackets.
pub(crate) fn bare_address(addr: &str, field: &str) -> Result<String> {
    Ok(mailbox(addr, field)?.email.to_string())
}

fn build_error(e: impl std::fmt::Display) -> Error {
    Error::validation_with_context(
        format!("could not assemble MIME message: {}", e),
        ErrorContext::new().with_source("mime"),
    )
}

/// Render `message` as a MIME document sent from `from`.
pub fn render(message: &Message, from: &str) -> Result<RenderedMessage> {
    let sender = mailbox(from, "from")?;
    let message_id = format!("<{}@{}>", uuid::Uuid::new_v4(), sender.email.domain());

    let mut builder = lettre::Message::builder()
        .from(sender)
        .subject(message.subject_or_empty())
        .message_id(Some(message_id.clone()));
    for (i, addr) in message.to.iter().enumerate() {
        builder = builder.to(mailbox(addr, &format!("to[{}]", i))?);
    }
    for (i, addr) in message.cc.iter().enumerate() {
        builder = builder.cc(mailbox(addr, &format!("cc[{}]", i))?);
    }
    for (i, addr) in message.bcc.iter().enumerate() {
        builder = builder.bcc(mailbox(addr, &format!("bcc[{}]", i))?);
    }
    if let Some(reply_to) = &message.reply_to {
        builder = builder.reply_to(mailbox(reply_to, "reply_to")?);
    }
    for (name, value) in &message.headers {
        let name = HeaderName::new_from_ascii(name.clone()).map_err(build_error)?;
        builder = builder.raw_header(HeaderValue::new(name, value.clone()));
    }

    let body = message.body_or_empty().to_string();
    let text = if message.html {
        SinglePart::html(body)
    } else {
        SinglePart::plain(body)
    };

    let email = if message.attachments.is_empty() {
        builder.singlepart(text).map_err(build_error)?
    } else {
        let mut parts = MultiPart::mixed().singlepart(text);
        for attachment in &message.attachments {
            let content_type = ContentType::parse(attachment.mime_type()).map_err(build_error)?;
            parts = parts.singlepart(
                MimeAttachment::new(attachment.filename.clone())
                    .body(attachment.content.to_vec(), content_type),
            );
        }
        builder.multipart(parts).map_err(build_error)?
    };

    Ok(RenderedMessage { email, message_id })
}

//! Normalized email message shared by every provider adapter.

use crate::error::{Error, ErrorContext};
use crate::Result;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Template reference: providers use either names/aliases or numeric ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum TemplateId {
    Numeric(i64),
    Name(String),
}

impl TemplateId {
    pub fn as_numeric(&self) -> Option<i64> {
        match self {
            TemplateId::Numeric(n) => Some(*n),
            TemplateId::Name(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateId::Numeric(n) => write!(f, "{}", n),
            TemplateId::Name(s) => f.write_str(s),
        }
    }
}

impl From<&str> for TemplateId {
    fn from(s: &str) -> Self {
        TemplateId::Name(s.to_string())
    }
}

impl From<String> for TemplateId {
    fn from(s: String) -> Self {
        TemplateId::Name(s)
    }
}

impl From<i64> for TemplateId {
    fn from(n: i64) -> Self {
        TemplateId::Numeric(n)
    }
}

/// Opaque file payload passed through to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Bytes,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|e| {
            Error::validation_with_context(
                format!("Failed to read attachment {}", path.display()),
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("attachment"),
            )
        })?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        Ok(Self {
            filename,
            content: Bytes::from(content),
            content_type: guess_media_type(path),
        })
    }

    pub fn mime_type(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}

fn guess_media_type(path: &Path) -> Option<String> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    let mt = match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "zip" => "application/zip",
        _ => return None,
    };
    Some(mt.to_string())
}

/// An email as submitted by the caller.
///
/// Recipients and tags behave as sets: the builder drops duplicates while keeping
/// first-seen order for recipients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Body is HTML when true, plain text otherwise.
    #[serde(default = "default_html")]
    pub html: bool,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    #[serde(default)]
    pub template_data: Map<String, Value>,
    #[serde(skip)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

fn default_html() -> bool {
    true
}

impl Message {
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    pub fn is_template(&self) -> bool {
        self.template_id.is_some()
    }

    /// All envelope recipients: to, cc and bcc.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .map(String::as_str)
    }

    pub fn subject_or_empty(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }

    pub fn body_or_empty(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    /// Field-level checks that do not depend on the provider.
    pub fn validate(&self) -> Result<()> {
        if self.to.is_empty() {
            return Err(Error::validation_with_context(
                "At least one recipient is required",
                ErrorContext::new()
                    .with_field_path("to")
                    .with_source("message_validator"),
            ));
        }

        for (field, list) in [("to", &self.to), ("cc", &self.cc), ("bcc", &self.bcc)] {
            for (i, addr) in list.iter().enumerate() {
                check_address(addr, &format!("{}[{}]", field, i))?;
            }
        }
        if let Some(from) = &self.from {
            check_address(from, "from")?;
        }
        if let Some(reply_to) = &self.reply_to {
            check_address(reply_to, "reply_to")?;
        }

        if !self.is_template() {
            if self.subject.as_deref().map_or(true, |s| s.trim().is_empty()) {
                return Err(Error::validation_with_context(
                    "Either 'subject' or 'template_id' must be provided",
                    ErrorContext::new()
                        .with_field_path("subject")
                        .with_source("message_validator"),
                ));
            }
            if self.body.as_deref().map_or(true, |b| b.is_empty()) {
                return Err(Error::validation_with_context(
                    "Either 'body' or 'template_id' must be provided",
                    ErrorContext::new()
                        .with_field_path("body")
                        .with_source("message_validator"),
                ));
            }
        }

        Ok(())
    }
}

fn check_address(addr: &str, field: &str) -> Result<()> {
    addr.parse::<lettre::message::Mailbox>()
        .map(|_| ())
        .map_err(|e| {
            Error::validation_with_context(
                format!("Invalid email address '{}'", addr),
                ErrorContext::new()
                    .with_field_path(field)
                    .with_details(e.to_string())
                    .with_source("message_validator"),
            )
        })
}

fn push_unique(list: &mut Vec<String>, addr: String) {
    if !list.contains(&addr) {
        list.push(addr);
    }
}

/// Fluent constructor for [`Message`]. Building never fails; validation runs at send time.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    from: Option<String>,
    reply_to: Option<String>,
    subject: Option<String>,
    body: Option<String>,
    plain_text: bool,
    template_id: Option<TemplateId>,
    template_data: Map<String, Value>,
    attachments: Vec<Attachment>,
    headers: BTreeMap<String, String>,
    tags: BTreeSet<String>,
}

impl MessageBuilder {
    pub fn to(mut self, addr: impl Into<String>) -> Self {
        push_unique(&mut self.to, addr.into());
        self
    }

    pub fn to_all<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for a in addrs {
            push_unique(&mut self.to, a.into());
        }
        self
    }

    pub fn cc(mut self, addr: impl Into<String>) -> Self {
        push_unique(&mut self.cc, addr.into());
        self
    }

    pub fn bcc(mut self, addr: impl Into<String>) -> Self {
        push_unique(&mut self.bcc, addr.into());
        self
    }

    pub fn from(mut self, addr: impl Into<String>) -> Self {
        self.from = Some(addr.into());
        self
    }

    pub fn reply_to(mut self, addr: impl Into<String>) -> Self {
        self.reply_to = Some(addr.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// HTML body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.plain_text = false;
        self
    }

    /// Plain-text body.
    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.plain_text = true;
        self
    }

    pub fn template(mut self, id: impl Into<TemplateId>) -> Self {
        self.template_id = Some(id.into());
        self
    }

    pub fn template_data(mut self, data: Map<String, Value>) -> Self {
        self.template_data = data;
        self
    }

    pub fn template_var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.template_data.insert(key.into(), value.into());
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn build(self) -> Message {
        Message {
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            from: self.from,
            reply_to: self.reply_to,
            subject: self.subject,
            body: self.body,
            html: !self.plain_text,
            template_id: self.template_id,
            template_data: self.template_data,
            attachments: self.attachments,
            headers: self.headers,
            tags: self.tags,
        }
    }
}

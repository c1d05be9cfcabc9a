//! Minimal prelude for application code.
//!
//! Goal: reduce import noise without hiding important concepts.

pub use crate::batch::BatchStrategy;
pub use crate::client::{BulkRequest, MailClient, MailClientBuilder, MailSession};
pub use crate::config::{MailConfig, ProviderKind};
pub use crate::error::{Error, ErrorDetail, ErrorKind};
pub use crate::facade::mail::Mail;
pub use crate::types::{Attachment, BulkResult, Message, MessageOutcome, TemplateId};
pub use crate::Result;

//! Core data types: the normalized message and the outcome records.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Provider-neutral email, built with [`MessageBuilder`] |
//! | [`Attachment`] | Opaque `(filename, bytes)` payload with optional MIME type |
//! | [`TemplateId`] | Template name/alias or numeric id |
//! | [`MessageOutcome`] | Success/failure record for one submitted message |
//! | [`BulkResult`] | Aggregated result of a bulk send |

pub mod message;
pub mod outcome;

pub use message::{Attachment, Message, MessageBuilder, TemplateId};
pub use outcome::{BulkResult, Delivery, MessageOutcome, Receipt};

//! Developer-friendly facade layer (optional).
//!
//! The core API is [`crate::MailClient`]. This facade adds a one-call helper for
//! applications that configure everything through `MAIL_*` environment variables.

pub mod mail;
pub mod prelude;

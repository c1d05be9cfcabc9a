//! # mailbridge
//!
//! Unified email delivery across SMTP, SendGrid, Mailgun, Amazon SES, Postmark and
//! Brevo behind one client, with provider-aware bulk sending.
//!
//! ## Overview
//!
//! A [`MailClient`] wraps one provider adapter. Single sends go straight to the
//! adapter; bulk sends are split into chunks sized to the provider's batch limit,
//! dispatched through the provider's native batch API when it has one, and
//! reassembled into a [`BulkResult`] whose outcomes follow submission order.
//! One failing chunk never aborts the rest of the batch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mailbridge::{MailClient, MailConfig, Message};
//!
//! #[tokio::main]
//! async fn main() -> mailbridge::Result<()> {
//!     let client = MailClient::new(
//!         MailConfig::sendgrid("SG.xxxxx").with_from_email("noreply@example.com"),
//!     )
//!     .await?;
//!
//!     let messages: Vec<Message> = (0..1500)
//!         .map(|i| {
//!             Message::builder()
//!                 .to(format!("user{}@example.com", i))
//!                 .subject("Spring sale")
//!                 .body("<p>20% off this week</p>")
//!                 .build()
//!         })
//!         .collect();
//!
//!     let result = client.send_bulk(messages).await?;
//!     println!("{} sent, {} failed", result.successful, result.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | `MailClient`, its builder, bulk request builder and scoped session |
//! | [`batch`] | Partitioning, chunk dispatch and result aggregation |
//! | [`drivers`] | One adapter per provider behind the `ProviderAdapter` trait |
//! | [`config`] | Provider selection and credentials (`MAIL_*` env, YAML, JSON) |
//! | [`types`] | Messages, attachments and outcome records |
//! | [`transport`] | Shared HTTP client for the API-based providers |
//! | [`error`] | Error type and the per-message error taxonomy |
//! | [`facade`] | `Mail::send` helper and a prelude |

pub mod batch;
pub mod client;
pub mod config;
pub mod drivers;
pub mod facade;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use batch::{BatchExecutorConfig, BatchStrategy};
pub use client::{BulkRequest, BulkRequestBuilder, MailClient, MailClientBuilder, MailSession};
pub use config::{MailConfig, ProviderKind};
pub use drivers::{NativeBulk, ProviderAdapter, ProviderCapability, SessionHandle};
pub use types::{
    Attachment, BulkResult, Delivery, Message, MessageBuilder, MessageOutcome, Receipt, TemplateId,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ErrorDetail, ErrorKind, TransportError};

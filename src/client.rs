//! Unified client interface.
//!
//! Keep the public surface small and predictable.
//! Implementation details are split into submodules under `src/client/`.

pub mod builder;
pub mod bulk;
pub mod core;
pub mod session;

pub use builder::MailClientBuilder;
pub use bulk::{BulkRequest, BulkRequestBuilder};
pub use core::MailClient;
pub use session::MailSession;

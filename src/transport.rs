//! HTTP transport shared by the API-based providers.

pub mod http;

pub use http::{Auth, HttpReply, HttpTransport};

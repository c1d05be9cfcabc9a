//! Integration tests with mock HTTP server

pub mod brevo;
pub mod mailgun;
pub mod mock_server;
pub mod postmark;
pub mod sendgrid;

//! Mock HTTP server setup for integration tests

use mailbridge::{MailClient, MailConfig, Message};
use mockito::{Mock, Server, ServerGuard};

/// Test fixture that manages a mock server
pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    /// Build a client for `config`; the endpoint must already point at the mock server.
    pub async fn client(&self, config: MailConfig) -> MailClient {
        MailClient::new(config.with_timeout_secs(5))
            .await
            .expect("Failed to build client")
    }

    /// Create a mock for a successful JSON response
    pub async fn mock_json_response(&mut self, path: &str, status: usize, body: &str) -> Mock {
        self.server
            .mock("POST", path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    /// Create a mock for an error response
    pub async fn mock_error_response(&mut self, path: &str, status: usize, error_body: &str) -> Mock {
        self.server
            .mock("POST", path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(error_body)
            .create_async()
            .await
    }
}

pub fn message(i: usize) -> Message {
    Message::builder()
        .to(format!("user{}@example.com", i))
        .subject("Order shipped")
        .body("<p>Your order is on its way</p>")
        .build()
}

pub fn messages(n: usize) -> Vec<Message> {
    (0..n).map(message).collect()
}

use std::time::Instant;

use crate::batch::aggregate;
use crate::client::core::MailClient;
use crate::drivers::{detail, SessionHandle};
use crate::error::{Error, TransportError};
use crate::types::{BulkResult, Message, MessageOutcome};
use crate::Result;

/// Scoped session over one provider connection.
///
/// The connection is released when the session is closed or dropped, whichever
/// comes first. A clone of [`MailSession::handle`] can close it from another task;
/// sends that start afterwards fail with a connection-closed error.
#[derive(Debug)]
pub struct MailSession<'a> {
    client: &'a MailClient,
    handle: SessionHandle,
}

impl<'a> MailSession<'a> {
    pub(crate) fn new(client: &'a MailClient, handle: SessionHandle) -> Self {
        Self { client, handle }
    }

    pub fn client(&self) -> &MailClient {
        self.client
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub async fn send(&self, message: &Message) -> Result<MessageOutcome> {
        if self.handle.is_closed() {
            let err = Error::from(TransportError::ConnectionClosed);
            return Ok(MessageOutcome::failed(
                0,
                detail(self.client.provider(), &err),
            ));
        }
        self.client.send(message).await
    }

    /// Bulk send over the session. Once the session is closed every message
    /// fails with a connection-closed error and nothing reaches the provider.
    pub async fn send_bulk(&self, messages: Vec<Message>) -> Result<BulkResult> {
        if self.handle.is_closed() {
            let started = Instant::now();
            let err = Error::from(TransportError::ConnectionClosed);
            let shared = detail(self.client.provider(), &err);
            let outcomes = (0..messages.len())
                .map(|i| MessageOutcome::failed(i, shared.clone()))
                .collect();
            tracing::debug!(
                provider = self.client.provider(),
                size = messages.len(),
                "bulk send on closed session"
            );
            return Ok(aggregate(messages.len(), vec![outcomes], started));
        }
        self.client.send_bulk(messages).await
    }

    /// Close the session and wait for the connection to be released.
    pub async fn close(self) {
        self.handle.close();
        self.client.adapter().close_session().await;
        tracing::debug!(provider = self.client.provider(), "session closed");
    }
}

impl Drop for MailSession<'_> {
    fn drop(&mut self) {
        self.handle.close();
    }
}

//! Provider adapters: one implementation of [`ProviderAdapter`] per email service.
//!
//! The client holds an `Arc<dyn ProviderAdapter>` selected from [`ProviderKind`] at
//! construction time. Adapters translate the normalized [`Message`] into their wire
//! format and report a static [`ProviderCapability`].
//!
//! Native bulk sending is a separate capability, [`NativeBulk`], reachable only through
//! [`ProviderAdapter::native_bulk`]; the dispatcher can therefore never call a batch
//! endpoint on an adapter that does not have one.

pub mod brevo;
pub mod mailgun;
pub mod mime;
pub mod postmark;
pub mod sendgrid;
pub mod ses;
pub mod smtp;

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::batch::MessageChunk;
use crate::config::{MailConfig, ProviderKind};
use crate::error::{Error, ErrorContext, ErrorDetail, ErrorKind};
use crate::types::{Delivery, Message, Receipt};
use crate::Result;

pub use brevo::BrevoAdapter;
pub use mailgun::MailgunAdapter;
pub use postmark::PostmarkAdapter;
pub use sendgrid::SendGridAdapter;
pub use ses::SesAdapter;
pub use smtp::{LettreConnector, SmtpAdapter, SmtpConnection, SmtpConnector};

/// Static description of what a provider can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapability {
    /// Largest chunk the provider accepts in one dispatch unit.
    pub max_batch_size: usize,
    pub supports_native_bulk: bool,
    pub supports_templates: bool,
    /// The adapter owns one stateful connection and must not be driven concurrently.
    pub exclusive_connection: bool,
}

/// Core trait for provider-specific delivery.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + fmt::Debug {
    /// Provider identifier used in logs and error details.
    fn name(&self) -> &str;

    fn capability(&self) -> ProviderCapability;

    /// Sender used when a message has no `from`.
    fn default_from(&self) -> Option<&str>;

    /// Deliver one message.
    async fn send_single(&self, message: &Message) -> Result<Receipt>;

    /// Batch endpoint, when the provider has one.
    fn native_bulk(&self) -> Option<&dyn NativeBulk> {
        None
    }

    /// Called once before the chunks of a bulk send are dispatched.
    ///
    /// On `Err` nothing is held and neither release hook is called.
    async fn begin_batch(&self) -> Result<()> {
        Ok(())
    }

    /// Called once after every chunk has completed, including after failures.
    ///
    /// The caller may be dropped while this runs, so implementations should not
    /// rely on reaching the end of the future.
    async fn finish_batch(&self) {}

    /// Called from `Drop` instead of [`ProviderAdapter::finish_batch`] when a bulk
    /// send is cancelled mid-flight. Must not block.
    fn abandon_batch(&self) {}

    /// Acquire provider state for a scoped session.
    async fn open_session(&self) -> Result<SessionHandle> {
        Ok(SessionHandle::detached())
    }

    /// Release whatever [`ProviderAdapter::open_session`] acquired.
    async fn close_session(&self) {}

    /// Pre-send checks; failures become validation outcomes and the message is not sent.
    fn check_message(&self, message: &Message) -> Result<()> {
        common_checks(self, message)
    }
}

/// Provider API able to accept several messages in one network call.
#[async_trait]
pub trait NativeBulk: Send + Sync {
    /// Send a chunk already sized to the provider limit.
    ///
    /// The returned vector is aligned with `chunk.items`. `Err` means the whole chunk
    /// failed before any per-message attribution was possible.
    async fn send_batch(&self, chunk: &MessageChunk) -> Result<Vec<Delivery>>;
}

/// Handle on a scoped session; closing is synchronous and idempotent.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionState>,
}

struct SessionState {
    closed: AtomicBool,
    release: Option<Box<dyn Fn() + Send + Sync>>,
}

impl SessionHandle {
    /// Handle for adapters without session state.
    pub fn detached() -> Self {
        Self {
            inner: Arc::new(SessionState {
                closed: AtomicBool::new(false),
                release: None,
            }),
        }
    }

    /// Handle whose first `close()` runs `release`.
    pub fn with_release<F>(release: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SessionState {
                closed: AtomicBool::new(false),
                release: Some(Box::new(release)),
            }),
        }
    }

    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            if let Some(release) = &self.inner.release {
                release();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Build the adapter for a validated configuration.
pub async fn build_adapter(config: &MailConfig) -> Result<Arc<dyn ProviderAdapter>> {
    config.validate()?;
    let adapter: Arc<dyn ProviderAdapter> = match config.provider {
        ProviderKind::Smtp => Arc::new(SmtpAdapter::from_config(config)?),
        ProviderKind::SendGrid => Arc::new(SendGridAdapter::from_config(config)?),
        ProviderKind::Mailgun => Arc::new(MailgunAdapter::from_config(config)?),
        ProviderKind::Ses => Arc::new(SesAdapter::from_config(config).await?),
        ProviderKind::Postmark => Arc::new(PostmarkAdapter::from_config(config)?),
        ProviderKind::Brevo => Arc::new(BrevoAdapter::from_config(config)?),
    };
    Ok(adapter)
}

/// Checks every adapter applies before sending: message shape, template support
/// and a resolvable sender.
pub fn common_checks<A: ProviderAdapter + ?Sized>(adapter: &A, message: &Message) -> Result<()> {
    message.validate()?;
    if message.is_template() && !adapter.capability().supports_templates {
        return Err(Error::validation_with_context(
            format!("Provider '{}' does not support template emails", adapter.name()),
            ErrorContext::new()
                .with_field_path("template_id")
                .with_source("message_validator"),
        ));
    }
    sender(message, adapter.default_from())?;
    Ok(())
}

/// Resolve the sender of `message`.
pub(crate) fn sender<'a>(message: &'a Message, fallback: Option<&'a str>) -> Result<&'a str> {
    message.from.as_deref().or(fallback).ok_or_else(|| {
        Error::validation_with_context(
            "No sender address: set `from` on the message or `from_email` in the configuration",
            ErrorContext::new()
                .with_field_path("from")
                .with_source("message_validator"),
        )
    })
}

pub(crate) fn detail(provider: &str, err: &Error) -> Arc<ErrorDetail> {
    Arc::new(ErrorDetail::from_error(err, provider))
}

/// Messages of a chunk that can share one provider call.
#[derive(Debug)]
pub(crate) struct Group<K> {
    pub key: K,
    pub positions: Vec<usize>,
}

/// Split a chunk into call groups. `key` returns `None` for messages that must be
/// sent on their own; those positions come back in the second vector.
pub(crate) fn group_positions<'a, K, F>(
    chunk: &'a MessageChunk,
    key: F,
) -> (Vec<Group<K>>, Vec<usize>)
where
    K: PartialEq,
    F: Fn(&'a Message) -> Option<K>,
{
    let mut groups: Vec<Group<K>> = Vec::new();
    let mut singles = Vec::new();
    for (pos, item) in chunk.items.iter().enumerate() {
        match key(&item.data) {
            Some(k) => match groups.iter_mut().find(|g| g.key == k) {
                Some(group) => group.positions.push(pos),
                None => groups.push(Group {
                    key: k,
                    positions: vec![pos],
                }),
            },
            None => singles.push(pos),
        }
    }
    (groups, singles)
}

/// Per-position delivery slots for one chunk.
pub(crate) struct Deliveries {
    provider: &'static str,
    slots: Vec<Option<Delivery>>,
}

impl Deliveries {
    pub fn new(provider: &'static str, len: usize) -> Self {
        Self {
            provider,
            slots: (0..len).map(|_| None).collect(),
        }
    }

    pub fn record(&mut self, position: usize, result: Result<Receipt>) {
        let delivery = result.map_err(|e| detail(self.provider, &e));
        if let Some(slot) = self.slots.get_mut(position) {
            *slot = Some(delivery);
        }
    }

    /// Record one provider call covering `positions`. A call-level error fails every
    /// position with the same detail.
    pub fn record_call(&mut self, positions: &[usize], result: Result<Vec<Delivery>>) {
        match result {
            Ok(deliveries) => {
                let mut deliveries = deliveries.into_iter();
                for &pos in positions {
                    let delivery = deliveries.next().unwrap_or_else(|| {
                        Err(Arc::new(
                            ErrorDetail::new(
                                ErrorKind::ProviderResponse,
                                "provider response has no entry for this message",
                            )
                            .with_provider(self.provider),
                        ))
                    });
                    if let Some(slot) = self.slots.get_mut(pos) {
                        *slot = Some(delivery);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    provider = self.provider,
                    size = positions.len(),
                    error = %e,
                    "batch call failed"
                );
                let shared = detail(self.provider, &e);
                for &pos in positions {
                    if let Some(slot) = self.slots.get_mut(pos) {
                        *slot = Some(Err(shared.clone()));
                    }
                }
            }
        }
    }

    pub fn finish(self) -> Vec<Delivery> {
        let provider = self.provider;
        self.slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(Arc::new(
                        ErrorDetail::new(ErrorKind::Internal, "message was not dispatched")
                            .with_provider(provider),
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::partition;

    fn msg(to: &str, subject: &str) -> Message {
        Message::builder().to(to).subject(subject).body("b").build()
    }

    #[test]
    fn group_positions_by_key() {
        let chunk = partition(
            vec![
                msg("a@x.io", "one"),
                msg("b@x.io", "two"),
                msg("c@x.io", "one"),
                msg("d@x.io", "solo"),
            ],
            10,
        )
        .unwrap()
        .remove(0);

        let (groups, singles) = group_positions(&chunk, |m| {
            let s = m.subject_or_empty();
            (s != "solo").then_some(s)
        });
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "one");
        assert_eq!(groups[0].positions, vec![0, 2]);
        assert_eq!(groups[1].positions, vec![1]);
        assert_eq!(singles, vec![3]);
    }

    #[test]
    fn call_failure_shares_one_detail() {
        let mut d = Deliveries::new("test", 3);
        d.record(0, Ok(Receipt::with_id("x")));
        d.record_call(&[1, 2], Err(Error::validation("boom")));
        let out = d.finish();
        assert!(out[0].is_ok());
        let (a, b) = (out[1].as_ref().unwrap_err(), out[2].as_ref().unwrap_err());
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(a.provider.as_deref(), Some("test"));
    }

    #[test]
    fn short_response_marks_missing_positions() {
        let mut d = Deliveries::new("test", 3);
        d.record_call(&[0, 1, 2], Ok(vec![Ok(Receipt::default())]));
        let out = d.finish();
        assert!(out[0].is_ok());
        assert_eq!(out[1].as_ref().unwrap_err().kind, ErrorKind::ProviderResponse);
        assert_eq!(out[2].as_ref().unwrap_err().kind, ErrorKind::ProviderResponse);
    }

    #[test]
    fn unrecorded_positions_are_internal_failures() {
        let d = Deliveries::new("test", 1);
        let out = d.finish();
        assert_eq!(out[0].as_ref().unwrap_err().kind, ErrorKind::Internal);
    }

    #[test]
    fn factory_rejects_incomplete_configuration() {
        let err = tokio_test::block_on(build_adapter(&MailConfig::new(ProviderKind::SendGrid)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn session_handle_releases_once() {
        use std::sync::atomic::AtomicUsize;
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = SessionHandle::with_release(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let other = handle.clone();
        assert!(!handle.is_closed());
        handle.close();
        other.close();
        assert!(other.is_closed());
        assert!(handle.same_session(&other));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sender_falls_back_to_configured_address() {
        let m = msg("a@x.io", "s");
        assert_eq!(sender(&m, Some("noreply@x.io")).unwrap(), "noreply@x.io");
        assert!(sender(&m, None).is_err());
    }
}

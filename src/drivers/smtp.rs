//! SMTP adapter.
//!
//! SMTP has no batch endpoint, so bulk sends go one message at a time over a single
//! reused connection. The connection is owned by a slot shared between the adapter
//! and any open [`SessionHandle`]; closing the session tears the connection down and
//! makes every later send in the running batch fail with `ConnectionClosed`.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::PoolConfig;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{mime, sender, ProviderAdapter, ProviderCapability, SessionHandle};
use crate::config::MailConfig;
use crate::error::{Error, ErrorKind, TransportError};
use crate::types::{Message, Receipt};
use crate::Result;

const MAX_BATCH_SIZE: usize = 100;

/// One live SMTP connection.
#[async_trait]
pub trait SmtpConnection: Send {
    async fn transmit(&mut self, email: lettre::Message) -> Result<()>;
    /// Politely end the connection. Dropping without calling this is allowed.
    async fn quit(&mut self) {}
}

/// Opens SMTP connections; swapped out in tests.
#[async_trait]
pub trait SmtpConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SmtpConnection>>;
}

/// Map a lettre failure onto the error taxonomy.
fn classify(e: lettre::transport::smtp::Error) -> Error {
    let code = e.status().map(|c| c.to_string());
    match code.as_deref() {
        Some("530") | Some("534") | Some("535") => {
            Error::Transport(TransportError::Authentication(e.to_string()))
        }
        _ if e.is_permanent() => Error::provider_response(
            "smtp",
            code.and_then(|c| c.parse().ok()),
            e.to_string(),
        ),
        _ => Error::Transport(TransportError::Smtp(e)),
    }
}

/// Connector backed by lettre's async transport.
#[derive(Clone)]
pub struct LettreConnector {
    host: String,
    port: u16,
    credentials: Option<Credentials>,
    use_tls: bool,
    use_ssl: bool,
    timeout: Option<Duration>,
}

impl LettreConnector {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| Error::configuration("Missing required smtp configuration: host"))?;
        let credentials = match (&config.username, &config.password) {
            (Some(u), Some(p)) => Some(Credentials::new(u.clone(), p.clone())),
            _ => None,
        };
        Ok(Self {
            host,
            port: config.port.unwrap_or(587),
            credentials,
            use_tls: config.use_tls.unwrap_or(true),
            use_ssl: config.use_ssl.unwrap_or(false),
            timeout: config.timeout_secs.map(Duration::from_secs),
        })
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if self.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host).map_err(classify)?
        } else if self.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host).map_err(classify)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
        };
        let mut builder = builder
            .port(self.port)
            .timeout(self.timeout)
            .pool_config(PoolConfig::new().max_size(1));
        if let Some(credentials) = &self.credentials {
            builder = builder.credentials(credentials.clone());
        }
        Ok(builder.build())
    }
}

impl fmt::Debug for LettreConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LettreConnector")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("use_ssl", &self.use_ssl)
            .finish()
    }
}

struct LettreConnection {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

#[async_trait]
impl SmtpConnection for LettreConnection {
    async fn transmit(&mut self, email: lettre::Message) -> Result<()> {
        self.transport.send(email).await.map_err(classify)?;
        Ok(())
    }
}

#[async_trait]
impl SmtpConnector for LettreConnector {
    async fn connect(&self) -> Result<Box<dyn SmtpConnection>> {
        let transport = self.transport()?;
        let alive = transport.test_connection().await.map_err(classify)?;
        if !alive {
            return Err(Error::Transport(TransportError::Other(format!(
                "SMTP server {}:{} did not answer",
                self.host, self.port
            ))));
        }
        debug!(host = %self.host, port = self.port, "smtp connection established");
        Ok(Box::new(LettreConnection { transport }))
    }
}

/// Connection state shared by the adapter, running batches and the open session.
#[derive(Default)]
struct Slot {
    conn: Option<Box<dyn SmtpConnection>>,
    batches: usize,
    session: Option<SessionHandle>,
    /// The session was closed while a batch was running.
    closed: bool,
}

impl Slot {
    fn keeps_connection(&self) -> bool {
        self.batches > 0 || self.session.is_some()
    }

    async fn drop_connection(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.quit().await;
        }
    }

    /// Leave a batch; the last one out releases the connection unless a session
    /// still holds it.
    async fn finish_batch(&mut self) {
        self.batches = self.batches.saturating_sub(1);
        self.reap().await;
        if self.batches == 0 {
            self.closed = false;
            if self.session.is_none() {
                self.drop_connection().await;
            }
        }
    }

    /// Apply a session close that happened since the last access.
    async fn reap(&mut self) {
        if self.session.as_ref().is_some_and(|h| h.is_closed()) {
            debug!("smtp session closed, releasing connection");
            self.session = None;
            self.drop_connection().await;
            if self.batches > 0 {
                self.closed = true;
            }
        }
    }
}

/// SMTP provider adapter.
pub struct SmtpAdapter {
    connector: Arc<dyn SmtpConnector>,
    from_email: Option<String>,
    slot: Arc<Mutex<Slot>>,
}

impl SmtpAdapter {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let connector = LettreConnector::from_config(config)?;
        let from = config.from_email.clone().or_else(|| config.username.clone());
        Ok(Self::with_connector(Arc::new(connector), from))
    }

    pub fn with_connector(connector: Arc<dyn SmtpConnector>, from_email: Option<String>) -> Self {
        Self {
            connector,
            from_email,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Release the batch on a task of its own so a dropped caller cannot leave
    /// the count raised.
    fn release_batch(&self, rt: &tokio::runtime::Handle) -> tokio::task::JoinHandle<()> {
        let slot = Arc::clone(&self.slot);
        rt.spawn(async move {
            slot.lock().await.finish_batch().await;
        })
    }

    async fn transmit(&self, email: lettre::Message) -> Result<()> {
        let mut slot = self.slot.lock().await;
        slot.reap().await;
        if slot.closed {
            return Err(TransportError::ConnectionClosed.into());
        }
        if slot.conn.is_none() && slot.keeps_connection() {
            slot.conn = Some(self.connector.connect().await?);
        }

        if let Some(conn) = slot.conn.as_mut() {
            let result = conn.transmit(email).await;
            if matches!(&result, Err(e) if e.kind() == ErrorKind::Transport) {
                // Reconnect on the next send rather than reuse a broken link.
                slot.drop_connection().await;
            }
            return result;
        }

        let mut conn = self.connector.connect().await?;
        let result = conn.transmit(email).await;
        conn.quit().await;
        result
    }
}

impl fmt::Debug for SmtpAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpAdapter")
            .field("from_email", &self.from_email)
            .finish()
    }
}

#[async_trait]
impl ProviderAdapter for SmtpAdapter {
    fn name(&self) -> &str {
        "smtp"
    }

    fn capability(&self) -> ProviderCapability {
        ProviderCapability {
            max_batch_size: MAX_BATCH_SIZE,
            supports_native_bulk: false,
            supports_templates: false,
            exclusive_connection: true,
        }
    }

    fn default_from(&self) -> Option<&str> {
        self.from_email.as_deref()
    }

    async fn send_single(&self, message: &Message) -> Result<Receipt> {
        let from = sender(message, self.default_from())?;
        let rendered = mime::render(message, from)?;
        let id = rendered
            .message_id
            .trim_matches(|c| c == '<' || c == '>')
            .to_string();
        self.transmit(rendered.email).await?;
        Ok(Receipt::with_id(id))
    }

    async fn begin_batch(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        slot.reap().await;
        if slot.conn.is_none() && !slot.closed {
            slot.conn = Some(self.connector.connect().await?);
        }
        slot.batches += 1;
        Ok(())
    }

    async fn finish_batch(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                if let Err(e) = self.release_batch(&rt).await {
                    warn!(error = %e, "smtp batch release task failed");
                }
            }
            Err(_) => self.slot.lock().await.finish_batch().await,
        }
    }

    fn abandon_batch(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => drop(self.release_batch(&rt)),
            Err(_) => {
                // No runtime to quit politely on; drop the connection in place.
                if let Ok(mut slot) = self.slot.try_lock() {
                    slot.batches = slot.batches.saturating_sub(1);
                    if slot.batches == 0 {
                        slot.closed = false;
                        if slot.session.is_none() {
                            slot.conn = None;
                        }
                    }
                }
            }
        }
    }

    async fn open_session(&self) -> Result<SessionHandle> {
        let mut slot = self.slot.lock().await;
        slot.reap().await;
        if let Some(handle) = &slot.session {
            return Ok(handle.clone());
        }
        if slot.conn.is_none() {
            slot.conn = Some(self.connector.connect().await?);
        }

        let weak: Weak<Mutex<Slot>> = Arc::downgrade(&self.slot);
        let handle = SessionHandle::with_release(move || {
            let Some(slot) = weak.upgrade() else { return };
            // Outside a runtime the flag alone is enough; the next access reaps.
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                rt.spawn(async move {
                    slot.lock().await.reap().await;
                });
            }
        });
        slot.session = Some(handle.clone());
        Ok(handle)
    }

    async fn close_session(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = &slot.session {
            handle.close();
        }
        slot.reap().await;
    }
}

use crate::error::{Error, TransportError};
use crate::Result;
use reqwest::header::HeaderMap;
use reqwest::{Proxy, RequestBuilder, StatusCode};
use serde::Serialize;
use std::env;
use std::time::Duration;

/// How a provider authenticates API calls.
#[derive(Clone)]
pub enum Auth {
    Bearer(String),
    Basic { username: String, password: String },
    Header { name: &'static str, value: String },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Credentials stay out of logs.
        match self {
            Auth::Bearer(_) => f.write_str("Auth::Bearer(..)"),
            Auth::Basic { username, .. } => write!(f, "Auth::Basic({}, ..)", username),
            Auth::Header { name, .. } => write!(f, "Auth::Header({}, ..)", name),
        }
    }
}

/// Raw provider answer after status classification.
#[derive(Debug)]
pub struct HttpReply {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpReply {
    pub fn json(&self) -> Result<serde_json::Value> {
        if self.body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&self.body)?)
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

/// Shared HTTP plumbing for the API-based providers.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    provider: &'static str,
    auth: Auth,
}

impl HttpTransport {
    pub fn new(provider: &'static str, auth: Auth, timeout_secs: Option<u64>) -> Result<Self> {
        // Minimal production-friendly defaults (env-overridable).
        let timeout_secs = timeout_secs
            .or_else(|| {
                env::var("MAIL_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
            })
            .unwrap_or(30);

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(
                env::var("MAIL_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(16),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Ok(proxy_url) = env::var("MAIL_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            provider,
            auth,
        })
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<HttpReply> {
        let req = self.client.post(url).json(body);
        self.execute(req).await
    }

    pub async fn post_form(&self, url: &str, form: reqwest::multipart::Form) -> Result<HttpReply> {
        let req = self.client.post(url).multipart(form);
        self.execute(req).await
    }

    async fn execute(&self, req: RequestBuilder) -> Result<HttpReply> {
        let req = match &self.auth {
            Auth::Bearer(token) => req.bearer_auth(token),
            Auth::Basic { username, password } => req.basic_auth(username, Some(password)),
            Auth::Header { name, value } => req.header(*name, value),
        };
        let response = req
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;

        classify(self.provider, status, &body)?;
        tracing::trace!(
            provider = self.provider,
            status = status.as_u16(),
            "provider accepted request"
        );
        Ok(HttpReply {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

/// Map an HTTP status to the error taxonomy.
///
/// Credential failures and server-side trouble are transport errors; any other
/// 4xx means the provider looked at the payload and refused it.
pub fn classify(provider: &str, status: StatusCode, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let code = status.as_u16();
    let body = body.trim().to_string();
    match code {
        401 | 403 => Err(Error::Transport(TransportError::Authentication(format!(
            "{} rejected credentials (HTTP {}): {}",
            provider, code, body
        )))),
        408 | 429 => Err(Error::Transport(TransportError::Status { status: code, body })),
        _ if status.is_server_error() => {
            Err(Error::Transport(TransportError::Status { status: code, body }))
        }
        _ => Err(Error::provider_response(
            provider,
            Some(code),
            provider_message(&body),
        )),
    }
}

/// Pull a human readable message out of a provider error body.
fn provider_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    for key in ["message", "Message", "error"] {
        if let Some(s) = value.get(key).and_then(|v| v.as_str()) {
            return s.to_string();
        }
    }
    // SendGrid: {"errors":[{"message":"..."}]}
    if let Some(first) = value
        .get("errors")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
    {
        if let Some(s) = first.get("message").and_then(|v| v.as_str()) {
            return s.to_string();
        }
    }
    body.to_string()
}

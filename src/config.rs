//! Provider selection and credential configuration.
//!
//! A [`MailConfig`] is an explicit value handed to the client builder. Loading it
//! from the process environment, a `.env` file, YAML or JSON is offered here as a
//! convenience; the client itself never reads global state for credentials.
//!
//! Validation happens once, at client construction: a missing required field or an
//! option the selected provider does not understand is an [`Error::Configuration`].

use crate::error::{Error, ErrorContext};
use crate::Result;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Closed set of supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum ProviderKind {
    Smtp,
    SendGrid,
    Mailgun,
    Ses,
    Postmark,
    Brevo,
}

impl ProviderKind {
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Smtp => "smtp",
            ProviderKind::SendGrid => "sendgrid",
            ProviderKind::Mailgun => "mailgun",
            ProviderKind::Ses => "ses",
            ProviderKind::Postmark => "postmark",
            ProviderKind::Brevo => "brevo",
        }
    }

    pub fn all() -> &'static [ProviderKind] {
        &[
            ProviderKind::Smtp,
            ProviderKind::SendGrid,
            ProviderKind::Mailgun,
            ProviderKind::Ses,
            ProviderKind::Postmark,
            ProviderKind::Brevo,
        ]
    }

    /// Options this provider accepts, beyond `provider` itself.
    fn recognized_options(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::Smtp => &[
                "host",
                "port",
                "username",
                "password",
                "use_tls",
                "use_ssl",
                "from_email",
                "timeout_secs",
            ],
            ProviderKind::SendGrid | ProviderKind::Brevo => {
                &["api_key", "from_email", "endpoint", "timeout_secs"]
            }
            ProviderKind::Mailgun => {
                &["api_key", "domain", "from_email", "endpoint", "timeout_secs"]
            }
            ProviderKind::Ses => &[
                "aws_access_key_id",
                "aws_secret_access_key",
                "region_name",
                "from_email",
                "configuration_set_name",
                "endpoint",
            ],
            ProviderKind::Postmark => &[
                "server_token",
                "from_email",
                "message_stream",
                "endpoint",
                "timeout_secs",
            ],
        }
    }

    fn required_options(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::Smtp => &["host", "port", "username", "password"],
            ProviderKind::SendGrid | ProviderKind::Brevo => &["api_key"],
            ProviderKind::Mailgun => &["api_key", "domain"],
            ProviderKind::Ses => &[],
            ProviderKind::Postmark => &["server_token"],
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase();
        ProviderKind::all()
            .iter()
            .copied()
            .find(|k| k.id() == needle)
            .ok_or_else(|| {
                let available: Vec<&str> = ProviderKind::all().iter().map(|k| k.id()).collect();
                Error::configuration_with_context(
                    format!(
                        "Provider '{}' not found. Available providers: {}",
                        s,
                        available.join(", ")
                    ),
                    ErrorContext::new()
                        .with_field_path("provider")
                        .with_source("config"),
                )
            })
    }
}

impl TryFrom<String> for ProviderKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Credentials and options for one provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailConfig {
    pub provider: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub aws_access_key_id: Option<String>,
    #[serde(default)]
    pub aws_secret_access_key: Option<String>,
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default)]
    pub server_token: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub use_tls: Option<bool>,
    #[serde(default)]
    pub use_ssl: Option<bool>,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub configuration_set_name: Option<String>,
    #[serde(default)]
    pub message_stream: Option<String>,
    /// Base URL override for HTTP providers and SES.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl MailConfig {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            api_key: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            region_name: None,
            server_token: None,
            domain: None,
            host: None,
            port: None,
            username: None,
            password: None,
            use_tls: None,
            use_ssl: None,
            from_email: None,
            configuration_set_name: None,
            message_stream: None,
            endpoint: None,
            timeout_secs: None,
        }
    }

    pub fn smtp(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut cfg = Self::new(ProviderKind::Smtp);
        cfg.host = Some(host.into());
        cfg.port = Some(port);
        cfg.username = Some(username.into());
        cfg.password = Some(password.into());
        cfg
    }

    pub fn sendgrid(api_key: impl Into<String>) -> Self {
        Self::new(ProviderKind::SendGrid).with_api_key(api_key)
    }

    pub fn mailgun(api_key: impl Into<String>, domain: impl Into<String>) -> Self {
        let mut cfg = Self::new(ProviderKind::Mailgun).with_api_key(api_key);
        cfg.domain = Some(domain.into());
        cfg
    }

    pub fn ses(region_name: impl Into<String>) -> Self {
        let mut cfg = Self::new(ProviderKind::Ses);
        cfg.region_name = Some(region_name.into());
        cfg
    }

    pub fn postmark(server_token: impl Into<String>) -> Self {
        let mut cfg = Self::new(ProviderKind::Postmark);
        cfg.server_token = Some(server_token.into());
        cfg
    }

    pub fn brevo(api_key: impl Into<String>) -> Self {
        Self::new(ProviderKind::Brevo).with_api_key(api_key)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_from_email(mut self, from: impl Into<String>) -> Self {
        self.from_email = Some(from.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_aws_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.aws_access_key_id = Some(access_key_id.into());
        self.aws_secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_tls(mut self, use_tls: bool, use_ssl: bool) -> Self {
        self.use_tls = Some(use_tls);
        self.use_ssl = Some(use_ssl);
        self
    }

    pub fn with_message_stream(mut self, stream: impl Into<String>) -> Self {
        self.message_stream = Some(stream.into());
        self
    }

    pub fn with_configuration_set(mut self, name: impl Into<String>) -> Self {
        self.configuration_set_name = Some(name.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Names of the options that carry a value.
    fn present_options(&self) -> Vec<&'static str> {
        let flags: [(&'static str, bool); 17] = [
            ("api_key", self.api_key.is_some()),
            ("aws_access_key_id", self.aws_access_key_id.is_some()),
            ("aws_secret_access_key", self.aws_secret_access_key.is_some()),
            ("region_name", self.region_name.is_some()),
            ("server_token", self.server_token.is_some()),
            ("domain", self.domain.is_some()),
            ("host", self.host.is_some()),
            ("port", self.port.is_some()),
            ("username", self.username.is_some()),
            ("password", self.password.is_some()),
            ("use_tls", self.use_tls.is_some()),
            ("use_ssl", self.use_ssl.is_some()),
            ("from_email", self.from_email.is_some()),
            ("configuration_set_name", self.configuration_set_name.is_some()),
            ("message_stream", self.message_stream.is_some()),
            ("endpoint", self.endpoint.is_some()),
            ("timeout_secs", self.timeout_secs.is_some()),
        ];
        flags
            .iter()
            .filter(|(_, set)| *set)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Check required and recognized options for the selected provider.
    pub fn validate(&self) -> Result<()> {
        let provider = self.provider;
        let present = self.present_options();

        let unrecognized: Vec<&str> = present
            .iter()
            .copied()
            .filter(|name| !provider.recognized_options().contains(name))
            .collect();
        if !unrecognized.is_empty() {
            return Err(Error::configuration_with_context(
                format!(
                    "Unrecognized {} configuration: {}",
                    provider,
                    unrecognized.join(", ")
                ),
                ErrorContext::new().with_source("config"),
            ));
        }

        let missing: Vec<&str> = provider
            .required_options()
            .iter()
            .copied()
            .filter(|name| !present.contains(name) || self.is_blank(name))
            .collect();
        if !missing.is_empty() {
            return Err(Error::configuration_with_context(
                format!(
                    "Missing required {} configuration: {}",
                    provider,
                    missing.join(", ")
                ),
                ErrorContext::new().with_source("config"),
            ));
        }

        if provider == ProviderKind::Ses
            && self.aws_access_key_id.is_some() != self.aws_secret_access_key.is_some()
        {
            return Err(Error::configuration_with_context(
                "aws_access_key_id and aws_secret_access_key must be set together",
                ErrorContext::new()
                    .with_field_path("aws_access_key_id")
                    .with_source("config"),
            ));
        }

        if let Some(endpoint) = &self.endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                Error::configuration_with_context(
                    format!("Invalid endpoint URL '{}'", endpoint),
                    ErrorContext::new()
                        .with_field_path("endpoint")
                        .with_details(e.to_string())
                        .with_source("config"),
                )
            })?;
        }

        if self.timeout_secs == Some(0) {
            return Err(Error::configuration_with_context(
                "timeout_secs must be greater than zero",
                ErrorContext::new()
                    .with_field_path("timeout_secs")
                    .with_source("config"),
            ));
        }

        Ok(())
    }

    fn is_blank(&self, name: &str) -> bool {
        let value = match name {
            "api_key" => self.api_key.as_deref(),
            "server_token" => self.server_token.as_deref(),
            "domain" => self.domain.as_deref(),
            "host" => self.host.as_deref(),
            "username" => self.username.as_deref(),
            "password" => self.password.as_deref(),
            _ => return false,
        };
        value.map(|v| v.trim().is_empty()).unwrap_or(true)
    }

    /// Load from the process environment, after reading a `.env` file if one exists.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is normal in production.
        let _ = dotenvy::dotenv();
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Load from `MAIL_*` variables resolved through `lookup`.
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let flag = |key: &str| {
            get(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        };

        let provider: ProviderKind = get("MAIL_MAILER").as_deref().unwrap_or("smtp").parse()?;
        let mut cfg = MailConfig::new(provider);
        cfg.from_email = get("MAIL_FROM_ADDRESS");

        let timeout_secs = match get("MAIL_TIMEOUT_SECS") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                Error::configuration_with_context(
                    format!("MAIL_TIMEOUT_SECS is not a number: '{}'", raw),
                    ErrorContext::new()
                        .with_field_path("MAIL_TIMEOUT_SECS")
                        .with_source("env"),
                )
            })?),
            None => None,
        };

        match provider {
            ProviderKind::Smtp => {
                cfg.host = get("MAIL_HOST");
                cfg.port = match get("MAIL_PORT") {
                    Some(raw) => Some(raw.parse::<u16>().map_err(|_| {
                        Error::configuration_with_context(
                            format!("MAIL_PORT is not a valid port: '{}'", raw),
                            ErrorContext::new()
                                .with_field_path("MAIL_PORT")
                                .with_source("env"),
                        )
                    })?),
                    None => Some(587),
                };
                cfg.username = get("MAIL_USERNAME");
                cfg.password = get("MAIL_PASSWORD");
                cfg.use_tls = Some(flag("MAIL_TLS_ENCRYPTION").unwrap_or(true));
                cfg.use_ssl = Some(flag("MAIL_SSL_ENCRYPTION").unwrap_or(false));
                cfg.timeout_secs = timeout_secs;
            }
            ProviderKind::SendGrid | ProviderKind::Brevo => {
                cfg.api_key = get("MAIL_API_KEY");
                cfg.endpoint = get("MAIL_ENDPOINT");
                cfg.timeout_secs = timeout_secs;
            }
            ProviderKind::Mailgun => {
                cfg.api_key = get("MAIL_API_KEY");
                cfg.domain = get("MAIL_DOMAIN");
                cfg.endpoint = get("MAIL_ENDPOINT");
                cfg.timeout_secs = timeout_secs;
            }
            ProviderKind::Postmark => {
                cfg.server_token = get("MAIL_API_KEY");
                cfg.message_stream = get("MAIL_MESSAGE_STREAM");
                cfg.endpoint = get("MAIL_ENDPOINT");
                cfg.timeout_secs = timeout_secs;
            }
            ProviderKind::Ses => {
                cfg.aws_access_key_id = get("MAIL_AWS_ACCESS_KEY_ID");
                cfg.aws_secret_access_key = get("MAIL_AWS_SECRET_ACCESS_KEY");
                cfg.region_name = get("MAIL_AWS_REGION");
                cfg.configuration_set_name = get("MAIL_CONFIGURATION_SET");
                cfg.endpoint = get("MAIL_ENDPOINT");
            }
        }

        Ok(cfg)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| {
            Error::configuration_with_context(
                "Failed to parse YAML mail configuration",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("config"),
            )
        })
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            Error::configuration_with_context(
                "Failed to parse JSON mail configuration",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("config"),
            )
        })
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("Failed to read {}", path.display()),
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("config"),
            )
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_yaml_str(&raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn provider_kind_parses_case_insensitively() {
        assert_eq!("SendGrid".parse::<ProviderKind>().unwrap(), ProviderKind::SendGrid);
        assert_eq!(" ses ".parse::<ProviderKind>().unwrap(), ProviderKind::Ses);
    }

    #[test]
    fn unknown_provider_lists_available() {
        let err = "sparkpost".parse::<ProviderKind>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Provider 'sparkpost' not found"));
        assert!(msg.contains("smtp, sendgrid, mailgun, ses, postmark, brevo"));
    }

    #[test]
    fn missing_required_fields_are_reported() {
        let cfg = MailConfig::new(ProviderKind::Smtp);
        let err = cfg.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("Missing required smtp configuration: host, port, username, password"));

        let mut cfg = MailConfig::new(ProviderKind::Mailgun).with_api_key("key");
        cfg.domain = Some("  ".into());
        assert!(cfg.validate().unwrap_err().to_string().contains("domain"));
    }

    #[test]
    fn options_foreign_to_the_provider_are_rejected() {
        let mut cfg = MailConfig::sendgrid("SG.key");
        cfg.server_token = Some("pm-token".into());
        let err = cfg.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("Unrecognized sendgrid configuration: server_token"));
    }

    #[test]
    fn ses_requires_key_pair_together() {
        let mut cfg = MailConfig::ses("eu-west-1");
        cfg.aws_access_key_id = Some("AKIA".into());
        assert!(cfg.validate().is_err());

        let cfg = MailConfig::ses("eu-west-1").with_aws_credentials("AKIA", "secret");
        assert!(cfg.validate().is_ok());
        assert!(MailConfig::new(ProviderKind::Ses).validate().is_ok());
    }

    #[test]
    fn endpoint_must_be_a_url() {
        let cfg = MailConfig::brevo("key").with_endpoint("not a url");
        let err = cfg.validate().unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("endpoint")
        );
    }

    #[test]
    fn yaml_rejects_unknown_keys() {
        let ok = MailConfig::from_yaml_str(
            "provider: postmark\nserver_token: abc\nmessage_stream: outbound\n",
        )
        .unwrap();
        assert_eq!(ok.provider, ProviderKind::Postmark);
        assert_eq!(ok.message_stream.as_deref(), Some("outbound"));

        let err = MailConfig::from_yaml_str(
            "provider: postmark\nserver_token: abc\ntrack_opens: true\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn json_rejects_unknown_provider() {
        let err = MailConfig::from_json_str(r#"{"provider": "pigeon"}"#).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn env_smtp_defaults() {
        let cfg = MailConfig::from_env_with(env(&[
            ("MAIL_HOST", "smtp.example.com"),
            ("MAIL_USERNAME", "user"),
            ("MAIL_PASSWORD", "secret"),
        ]))
        .unwrap();
        assert_eq!(cfg.provider, ProviderKind::Smtp);
        assert_eq!(cfg.port, Some(587));
        assert_eq!(cfg.use_tls, Some(true));
        assert_eq!(cfg.use_ssl, Some(false));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_maps_api_key_per_provider() {
        let cfg = MailConfig::from_env_with(env(&[
            ("MAIL_MAILER", "postmark"),
            ("MAIL_API_KEY", "pm-token"),
            ("MAIL_HOST", "ignored.example.com"),
        ]))
        .unwrap();
        assert_eq!(cfg.server_token.as_deref(), Some("pm-token"));
        assert!(cfg.api_key.is_none());
        assert!(cfg.host.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_rejects_bad_port() {
        let err = MailConfig::from_env_with(env(&[("MAIL_PORT", "smtp")])).unwrap_err();
        assert!(err.to_string().contains("MAIL_PORT"));
    }
}

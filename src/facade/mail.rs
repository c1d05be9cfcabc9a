use crate::client::MailClient;
use crate::config::MailConfig;
use crate::types::Message;
use crate::Result;

/// Fire-and-forget sending with the provider configured in the environment.
pub struct Mail;

impl Mail {
    /// Send one HTML email; returns whether the provider accepted it.
    ///
    /// Configuration and delivery errors are logged, not returned.
    pub async fn send(to: &str, subject: &str, body: &str, from: Option<&str>) -> bool {
        Self::dispatch(MailConfig::from_env(), to, subject, body, from).await
    }

    /// Same as [`Mail::send`] with an explicit configuration.
    pub async fn send_with_config(
        config: MailConfig,
        to: &str,
        subject: &str,
        body: &str,
        from: Option<&str>,
    ) -> bool {
        Self::dispatch(Ok(config), to, subject, body, from).await
    }

    async fn dispatch(
        config: Result<MailConfig>,
        to: &str,
        subject: &str,
        body: &str,
        from: Option<&str>,
    ) -> bool {
        let client = match config {
            Ok(config) => MailClient::new(config).await,
            Err(e) => Err(e),
        };
        let client = match client {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(error = %e, "mail client could not be configured");
                return false;
            }
        };
        let mut builder = Message::builder().to(to).subject(subject).body(body);
        if let Some(from) = from {
            builder = builder.from(from);
        }
        match client.send(&builder.build()).await {
            Ok(outcome) if outcome.success => true,
            Ok(outcome) => {
                if let Some(err) = &outcome.error {
                    tracing::error!(error = %err, "mail delivery failed");
                }
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "mail rejected");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[tokio::test]
    async fn unknown_provider_is_reported_as_not_sent() {
        let config = MailConfig::from_env_with(|key| {
            (key == "MAIL_MAILER").then(|| "carrier-pigeon".to_string())
        });
        assert!(config.is_err());
        let sent = Mail::dispatch(config, "user@example.com", "Hi", "<p>Hi</p>", None).await;
        assert!(!sent);
    }

    #[tokio::test]
    async fn incomplete_config_is_reported_as_not_sent() {
        let config = MailConfig::new(ProviderKind::SendGrid);
        let sent =
            Mail::send_with_config(config, "user@example.com", "Hi", "<p>Hi</p>", None).await;
        assert!(!sent);
    }
}

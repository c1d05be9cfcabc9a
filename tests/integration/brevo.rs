//! Brevo adapter against the mock server

use crate::integration::mock_server::{message, messages, MockServerFixture};
use mailbridge::{ErrorKind, MailConfig, Message};
use mockito::Matcher;
use serde_json::json;

const PATH: &str = "/v3/smtp/email";

fn config(fixture: &MockServerFixture) -> MailConfig {
    MailConfig::brevo("xkeysib-test")
        .with_from_email("shop@example.com")
        .with_endpoint(format!("{}{}", fixture.base_url, PATH))
}

#[tokio::test]
async fn single_send_uses_api_key_header() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", PATH)
        .match_header("api-key", "xkeysib-test")
        .match_body(Matcher::PartialJson(json!({
            "sender": { "email": "shop@example.com" },
            "to": [{ "email": "user0@example.com" }],
            "subject": "Order shipped",
            "htmlContent": "<p>Your order is on its way</p>"
        })))
        .with_status(201)
        .with_body(r#"{"messageId":"<brevo-1@smtp-relay.mailin.fr>"}"#)
        .create_async()
        .await;

    let client = fixture.client(config(&fixture)).await;
    let outcome = client.send(&message(0)).await.unwrap();

    assert!(outcome.success);
    assert_eq!(
        outcome.message_id.as_deref(),
        Some("<brevo-1@smtp-relay.mailin.fr>")
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn bulk_sends_message_versions() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", PATH)
        .match_body(Matcher::PartialJson(json!({
            "messageVersions": [
                { "to": [{ "email": "user0@example.com" }] },
                { "to": [{ "email": "user1@example.com" }] },
                { "to": [{ "email": "user2@example.com" }] }
            ]
        })))
        .with_status(201)
        .with_body(r#"{"messageIds":["<v0@brevo>","<v1@brevo>","<v2@brevo>"]}"#)
        .expect(1)
        .create_async()
        .await;

    let client = fixture.client(config(&fixture)).await;
    let result = client.send_bulk(messages(3)).await.unwrap();

    assert_eq!(result.successful, 3);
    assert_eq!(result.outcomes[2].message_id.as_deref(), Some("<v2@brevo>"));
    mock.assert_async().await;
}

#[tokio::test]
async fn non_numeric_template_is_rejected_before_sending() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", PATH)
        .with_status(201)
        .expect(0)
        .create_async()
        .await;

    let client = fixture.client(config(&fixture)).await;
    let batch = vec![Message::builder()
        .to("a@example.com")
        .template("welcome")
        .build()];
    let result = client.send_bulk(batch).await.unwrap();

    assert_eq!(result.failed, 1);
    assert_eq!(
        result.outcomes[0].error.as_ref().unwrap().kind,
        ErrorKind::Validation
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn invalid_request_reports_provider_message() {
    let mut fixture = MockServerFixture::new().await;
    fixture
        .mock_error_response(
            PATH,
            400,
            r#"{"code":"invalid_parameter","message":"sender is not valid"}"#,
        )
        .await;

    let client = fixture.client(config(&fixture)).await;
    let outcome = client.send(&message(0)).await.unwrap();

    let err = outcome.error.unwrap();
    assert_eq!(err.kind, ErrorKind::ProviderResponse);
    assert_eq!(err.status, Some(400));
    assert!(err.message.contains("sender is not valid"));
}

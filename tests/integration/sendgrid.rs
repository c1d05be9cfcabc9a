//! SendGrid adapter against the mock server

use crate::integration::mock_server::{message, messages, MockServerFixture};
use mailbridge::{ErrorKind, MailConfig, Message};
use mockito::Matcher;
use serde_json::json;

fn config(fixture: &MockServerFixture) -> MailConfig {
    MailConfig::sendgrid("SG.test-key")
        .with_from_email("shop@example.com")
        .with_endpoint(format!("{}/v3/mail/send", fixture.base_url))
}

#[tokio::test]
async fn single_send_returns_message_id_header() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/v3/mail/send")
        .match_header("authorization", "Bearer SG.test-key")
        .match_body(Matcher::PartialJson(json!({
            "from": { "email": "shop@example.com" },
            "personalizations": [{ "to": [{ "email": "user0@example.com" }], "subject": "Order shipped" }],
            "content": [{ "type": "text/html", "value": "<p>Your order is on its way</p>" }]
        })))
        .with_status(202)
        .with_header("x-message-id", "sg-123")
        .create_async()
        .await;

    let client = fixture.client(config(&fixture)).await;
    let outcome = client.send(&message(0)).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.message_id.as_deref(), Some("sg-123"));
    mock.assert_async().await;
}

#[tokio::test]
async fn bulk_uses_one_request_per_shared_content() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/v3/mail/send")
        .with_status(202)
        .with_header("x-message-id", "sg-batch")
        .expect(1)
        .create_async()
        .await;

    let client = fixture.client(config(&fixture)).await;
    let result = client.send_bulk(messages(25)).await.unwrap();

    assert_eq!(result.successful, 25);
    assert!(result
        .outcomes
        .iter()
        .all(|o| o.message_id.as_deref() == Some("sg-batch")));
    mock.assert_async().await;
}

#[tokio::test]
async fn templated_bulk_sends_dynamic_data_per_personalization() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/v3/mail/send")
        .match_body(Matcher::PartialJson(json!({
            "template_id": "d-welcome",
            "personalizations": [
                { "to": [{ "email": "a@example.com" }], "dynamic_template_data": { "name": "Ann" } },
                { "to": [{ "email": "b@example.com" }], "dynamic_template_data": { "name": "Bob" } }
            ]
        })))
        .with_status(202)
        .create_async()
        .await;

    let batch: Vec<Message> = [("a@example.com", "Ann"), ("b@example.com", "Bob")]
        .into_iter()
        .map(|(to, name)| {
            Message::builder()
                .to(to)
                .template("d-welcome")
                .template_var("name", name)
                .build()
        })
        .collect();

    let client = fixture.client(config(&fixture)).await;
    let result = client.send_bulk(batch).await.unwrap();

    assert_eq!(result.successful, 2);
    mock.assert_async().await;
}

#[tokio::test]
async fn rejected_request_fails_the_whole_group() {
    let mut fixture = MockServerFixture::new().await;
    fixture
        .mock_error_response(
            "/v3/mail/send",
            400,
            r#"{"errors":[{"message":"The from address does not match a verified Sender Identity"}]}"#,
        )
        .await;

    let client = fixture.client(config(&fixture)).await;
    let result = client.send_bulk(messages(3)).await.unwrap();

    assert_eq!(result.failed, 3);
    let err = result.outcomes[0].error.as_ref().unwrap();
    assert_eq!(err.kind, ErrorKind::ProviderResponse);
    assert_eq!(err.status, Some(400));
    assert!(err.message.contains("verified Sender Identity"));
}

#[tokio::test]
async fn bad_credentials_are_reported_as_transport_failures() {
    let mut fixture = MockServerFixture::new().await;
    fixture
        .mock_error_response("/v3/mail/send", 401, r#"{"errors":[{"message":"unauthorized"}]}"#)
        .await;

    let client = fixture.client(config(&fixture)).await;
    let outcome = client.send(&message(0)).await.unwrap();

    assert!(!outcome.success);
    let err = outcome.error.unwrap();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert!(err.message.contains("authentication"));
}

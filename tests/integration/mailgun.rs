//! Mailgun adapter against the mock server

use crate::integration::mock_server::{message, messages, MockServerFixture};
use mailbridge::{ErrorKind, MailConfig, Message};
use mockito::Matcher;

const PATH: &str = "/v3/mg.example.com/messages";

fn config(fixture: &MockServerFixture) -> MailConfig {
    MailConfig::mailgun("key-test", "mg.example.com")
        .with_from_email("shop@example.com")
        .with_endpoint(format!("{}/v3", fixture.base_url))
}

#[tokio::test]
async fn single_send_posts_form_with_basic_auth() {
    let mut fixture = MockServerFixture::new().await;
    // base64("api:key-test")
    let mock = fixture
        .server
        .mock("POST", PATH)
        .match_header("authorization", "Basic YXBpOmtleS10ZXN0")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("name=\"to\"\r\n\r\nuser0@example.com".into()),
            Matcher::Regex("name=\"html\"".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"id":"<20260101.1@mg.example.com>","message":"Queued. Thank you."}"#)
        .create_async()
        .await;

    let client = fixture.client(config(&fixture)).await;
    let outcome = client.send(&message(0)).await.unwrap();

    assert!(outcome.success);
    assert_eq!(
        outcome.message_id.as_deref(),
        Some("<20260101.1@mg.example.com>")
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn bulk_uses_recipient_variables() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", PATH)
        .match_body(Matcher::Regex("recipient-variables".into()))
        .with_status(200)
        .with_body(r#"{"id":"<batch@mg.example.com>","message":"Queued. Thank you."}"#)
        .expect(1)
        .create_async()
        .await;

    let client = fixture.client(config(&fixture)).await;
    let result = client.send_bulk(messages(10)).await.unwrap();

    assert_eq!(result.successful, 10);
    mock.assert_async().await;
}

#[tokio::test]
async fn messages_with_cc_are_sent_individually() {
    let mut fixture = MockServerFixture::new().await;
    let batch_mock = fixture
        .server
        .mock("POST", PATH)
        .match_body(Matcher::Regex("recipient-variables".into()))
        .with_status(200)
        .with_body(r#"{"id":"<batch@mg.example.com>"}"#)
        .expect(1)
        .create_async()
        .await;
    let single_mock = fixture
        .server
        .mock("POST", PATH)
        .match_body(Matcher::Regex("name=\"cc\"".into()))
        .with_status(200)
        .with_body(r#"{"id":"<single@mg.example.com>"}"#)
        .expect(1)
        .create_async()
        .await;

    let mut batch = messages(3);
    batch.push(
        Message::builder()
            .to("user3@example.com")
            .cc("manager@example.com")
            .subject("Order shipped")
            .body("<p>Your order is on its way</p>")
            .build(),
    );

    let client = fixture.client(config(&fixture)).await;
    let result = client.send_bulk(batch).await.unwrap();

    assert_eq!(result.successful, 4);
    assert_eq!(
        result.outcomes[3].message_id.as_deref(),
        Some("<single@mg.example.com>")
    );
    batch_mock.assert_async().await;
    single_mock.assert_async().await;
}

#[tokio::test]
async fn recipient_variables_are_keyed_by_bare_address() {
    let mut fixture = MockServerFixture::new().await;
    let batch_mock = fixture
        .server
        .mock("POST", PATH)
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""jane@example\.com":\{"#.into()),
            Matcher::Regex(r#""bob@example\.com":\{"#.into()),
            Matcher::Regex("name=\"to\"\r\n\r\nJane Doe <jane@example.com>".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"id":"<batch@mg.example.com>"}"#)
        .expect(1)
        .create_async()
        .await;
    // Same address under another display name cannot share the request.
    let single_mock = fixture
        .server
        .mock("POST", PATH)
        .match_body(Matcher::Regex("name=\"to\"\r\n\r\nJanet".into()))
        .with_status(200)
        .with_body(r#"{"id":"<single@mg.example.com>"}"#)
        .expect(1)
        .create_async()
        .await;

    let recipients = [
        "Jane Doe <jane@example.com>",
        "Bob <bob@example.com>",
        "Janet <jane@example.com>",
    ];
    let batch: Vec<Message> = recipients
        .iter()
        .map(|to| {
            Message::builder()
                .to(*to)
                .subject("Order shipped")
                .body("<p>Your order is on its way</p>")
                .build()
        })
        .collect();

    let client = fixture.client(config(&fixture)).await;
    let result = client.send_bulk(batch).await.unwrap();

    assert_eq!(result.successful, 3);
    assert_eq!(
        result.outcomes[2].message_id.as_deref(),
        Some("<single@mg.example.com>")
    );
    batch_mock.assert_async().await;
    single_mock.assert_async().await;
}

#[tokio::test]
async fn server_errors_fail_the_batch_request() {
    let mut fixture = MockServerFixture::new().await;
    fixture
        .mock_error_response(PATH, 503, r#"{"message":"Service Unavailable"}"#)
        .await;

    let client = fixture.client(config(&fixture)).await;
    let result = client.send_bulk(messages(4)).await.unwrap();

    assert_eq!(result.failed, 4);
    let err = result.outcomes[0].error.as_ref().unwrap();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert_eq!(err.status, Some(503));
}

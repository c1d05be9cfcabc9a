//! Postmark adapter against the mock server

use crate::integration::mock_server::{message, messages, MockServerFixture};
use mailbridge::{ErrorKind, MailConfig, Message};
use mockito::Matcher;
use serde_json::json;

fn config(fixture: &MockServerFixture) -> MailConfig {
    MailConfig::postmark("pm-server-token")
        .with_from_email("shop@example.com")
        .with_endpoint(fixture.base_url.clone())
}

#[tokio::test]
async fn single_send_uses_server_token() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/email")
        .match_header("x-postmark-server-token", "pm-server-token")
        .match_body(Matcher::PartialJson(json!({
            "From": "shop@example.com",
            "To": "user0@example.com",
            "Subject": "Order shipped",
            "HtmlBody": "<p>Your order is on its way</p>"
        })))
        .with_status(200)
        .with_body(r#"{"ErrorCode":0,"Message":"OK","MessageID":"pm-1","To":"user0@example.com"}"#)
        .create_async()
        .await;

    let client = fixture.client(config(&fixture)).await;
    let outcome = client.send(&message(0)).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.message_id.as_deref(), Some("pm-1"));
    mock.assert_async().await;
}

#[tokio::test]
async fn batch_reports_per_message_status() {
    let mut fixture = MockServerFixture::new().await;
    fixture
        .mock_json_response(
            "/email/batch",
            200,
            r#"[
                {"ErrorCode":0,"Message":"OK","MessageID":"pm-a"},
                {"ErrorCode":406,"Message":"You tried to send to a recipient that has been marked as inactive."},
                {"ErrorCode":0,"Message":"OK","MessageID":"pm-c"}
            ]"#,
        )
        .await;

    let client = fixture.client(config(&fixture)).await;
    let result = client.send_bulk(messages(3)).await.unwrap();

    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.outcomes[0].message_id.as_deref(), Some("pm-a"));
    assert_eq!(result.outcomes[2].message_id.as_deref(), Some("pm-c"));
    let err = result.outcomes[1].error.as_ref().unwrap();
    assert_eq!(err.kind, ErrorKind::ProviderResponse);
    assert!(err.message.contains("inactive"));
}

#[tokio::test]
async fn templated_and_plain_messages_use_separate_endpoints() {
    let mut fixture = MockServerFixture::new().await;
    let plain = fixture
        .mock_json_response(
            "/email/batch",
            200,
            r#"[{"ErrorCode":0,"MessageID":"pm-plain"}]"#,
        )
        .await;
    let templated = fixture
        .server
        .mock("POST", "/email/batchWithTemplates")
        .match_body(Matcher::PartialJson(json!({
            "Messages": [{ "TemplateAlias": "receipt", "TemplateModel": { "total": "42.00" } }]
        })))
        .with_status(200)
        .with_body(r#"[{"ErrorCode":0,"MessageID":"pm-tpl"}]"#)
        .create_async()
        .await;

    let batch = vec![
        Message::builder()
            .to("a@example.com")
            .template("receipt")
            .template_var("total", "42.00")
            .build(),
        message(1),
    ];

    let client = fixture.client(config(&fixture)).await;
    let result = client.send_bulk(batch).await.unwrap();

    assert_eq!(result.successful, 2);
    assert_eq!(result.outcomes[0].message_id.as_deref(), Some("pm-tpl"));
    assert_eq!(result.outcomes[1].message_id.as_deref(), Some("pm-plain"));
    plain.assert_async().await;
    templated.assert_async().await;
}

#[tokio::test]
async fn short_batch_response_marks_missing_entries() {
    let mut fixture = MockServerFixture::new().await;
    fixture
        .mock_json_response(
            "/email/batch",
            200,
            r#"[{"ErrorCode":0,"MessageID":"pm-only"}]"#,
        )
        .await;

    let client = fixture.client(config(&fixture)).await;
    let result = client.send_bulk(messages(2)).await.unwrap();

    assert!(result.outcomes[0].success);
    assert!(!result.outcomes[1].success);
    assert_eq!(
        result.outcomes[1].error.as_ref().unwrap().kind,
        ErrorKind::ProviderResponse
    );
}

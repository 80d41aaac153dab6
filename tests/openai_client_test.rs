//! Mock HTTP server tests for `OpenAiClient::complete()`.
//!
//! Uses [`wiremock`] to emulate an OpenAI-compatible chat completion
//! endpoint, covering free-text and JSON-mode requests plus the error paths a
//! stage turns into a dropped envelope.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use querystream::{CompletionClient, CompletionError, CompletionRequest, OpenAiClient, OpenAiConfig, Turn};

fn client(server: &MockServer) -> OpenAiClient {
    let mut config = OpenAiConfig::new("sk-mock-key");
    config.base_url = server.uri();
    OpenAiClient::new(config).unwrap()
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test-001",
        "object": "chat.completion",
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn complete_free_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-mock-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "You are helpful support."},
                {"role": "user", "content": "Query: Refund policy?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Refunds take 5 days.")))
        .expect(1)
        .mount(&server)
        .await;

    let request = CompletionRequest::free_text(vec![
        Turn::system("You are helpful support."),
        Turn::user("Query: Refund policy?"),
    ]);
    let text = client(&server).complete(&request).await.unwrap();
    assert_eq!(text, "Refunds take 5 days.");
}

#[tokio::test]
async fn complete_structured_sets_json_mode() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body(r#"{"category":"billing","priority":"high"}"#)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = CompletionRequest::structured(vec![Turn::user("Classify. Respond in JSON format: x")]);
    let text = client(&server).complete(&request).await.unwrap();
    let value: serde_json::Value = querystream::completion::parse_structured(&text).unwrap();
    assert_eq!(value["priority"], "high");
}

#[tokio::test]
async fn auth_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let request = CompletionRequest::free_text(vec![Turn::user("hi")]);
    let err = client(&server).complete(&request).await.unwrap_err();
    assert!(matches!(err, CompletionError::AuthFailed(ref body) if body == "invalid api key"));
}

#[tokio::test]
async fn rate_limited() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let request = CompletionRequest::free_text(vec![Turn::user("hi")]);
    let err = client(&server).complete(&request).await.unwrap_err();
    assert!(matches!(err, CompletionError::RateLimited(_)));
}

#[tokio::test]
async fn rejected_structured_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string("'messages' must contain the word 'json'"),
        )
        .mount(&server)
        .await;

    let request = CompletionRequest::structured(vec![Turn::user("classify")]);
    let err = client(&server).complete(&request).await.unwrap_err();
    assert!(matches!(err, CompletionError::Service { status: 400, .. }));
}

#[tokio::test]
async fn malformed_response_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let request = CompletionRequest::free_text(vec![Turn::user("hi")]);
    let err = client(&server).complete(&request).await.unwrap_err();
    assert!(matches!(err, CompletionError::InvalidResponse(_)));
}

#[tokio::test]
async fn empty_choices() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-empty",
            "model": "gpt-4o-mini",
            "choices": []
        })))
        .mount(&server)
        .await;

    let request = CompletionRequest::free_text(vec![Turn::user("hi")]);
    let err = client(&server).complete(&request).await.unwrap_err();
    assert!(matches!(err, CompletionError::EmptyChoices));
}

//! HTTP-level tests for the OpenAI-compatible backend.

#![cfg(feature = "openai")]

use lore_core::{Error, GenerationBackend};
use lore_inference::openai::{OpenAIBackend, OpenAIConfig};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> OpenAIConfig {
    OpenAIConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        gen_model: "test-gen".to_string(),
        timeout_seconds: 10,
    }
}

fn chat_response(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-123",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

#[tokio::test]
async fn test_json_generation_sends_bearer_and_response_format() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-gen",
            "response_format": {"type": "json_object"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("{\"ok\": true}")))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAIBackend::new(config(&server)).expect("Failed to create backend");
    let out = backend
        .generate_json_with_system("system", "prompt")
        .await
        .expect("generation should succeed");
    assert_eq!(out, "{\"ok\": true}");
}

#[tokio::test]
async fn test_rate_limit_error_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {"message": "Too many requests", "type": "rate_limit_exceeded", "code": null}
        })))
        .mount(&server)
        .await;

    let backend = OpenAIBackend::new(config(&server)).unwrap();
    let err = backend.generate("prompt").await.unwrap_err();
    match err {
        Error::Inference(msg) => assert!(msg.contains("Rate limit exceeded: Too many requests")),
        other => panic!("expected Inference error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_choices_yield_empty_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "x", "choices": []
        })))
        .mount(&server)
        .await;

    let backend = OpenAIBackend::new(config(&server)).unwrap();
    assert_eq!(backend.generate("prompt").await.unwrap(), "");
}

#[tokio::test]
async fn test_health_check_uses_models_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/models"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAIBackend::new(config(&server)).unwrap();
    assert!(backend.health_check().await.unwrap());
}

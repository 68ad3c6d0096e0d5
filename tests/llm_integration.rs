//! Integration tests for the completion-service client and the LLM task coder.
//!
//! These tests make real API calls to an OpenAI-compatible endpoint.
//! Run with: LITELLM_API_BASE=... LITELLM_API_KEY=... cargo test --test llm_integration -- --ignored

use std::sync::Arc;

use evo_forge::evolving::{LlmTaskCoder, TaskCoder};
use evo_forge::experiment::{CodingTask, Workspace};
use evo_forge::knowledge::KnowledgeBase;
use evo_forge::llm::litellm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
use evo_forge::scenario::Scenario;
use evo_forge::utils::json_extraction::parse_json_object;

fn create_test_client() -> LiteLlmClient {
    LiteLlmClient::from_env()
        .expect("LITELLM_API_BASE environment variable must be set for integration tests")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(
        content.contains('4'),
        "Response should contain '4', got: {}",
        content
    );
}

#[tokio::test]
#[ignore]
async fn test_json_mode_returns_object() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "",
        vec![
            Message::system("Reply with a JSON object only."),
            Message::user("Return {\"answer\": 42} and nothing else."),
        ],
    )
    .with_json_mode()
    .with_max_tokens(50)
    .with_temperature(0.0);

    let response = client
        .generate(request)
        .await
        .expect("Generation should succeed");
    let content = response.first_content().expect("Should have content");

    let object = parse_json_object(content).expect("Response should contain a JSON object");
    assert_eq!(object.get("answer"), Some(&serde_json::json!(42)));
}

#[tokio::test]
#[ignore]
async fn test_llm_task_coder_produces_output_file() {
    let client = create_test_client();
    let coder = LlmTaskCoder::new(
        Arc::new(client),
        Scenario::new("A tiny Python utility library."),
    )
    .expect("coder")
    .with_temperature(0.0);

    let task = CodingTask::new(
        "add",
        "Write a function `add(a, b)` that returns the sum of two numbers.",
    )
    .with_output_file("add.py");
    let queried = KnowledgeBase::default().query([&task]).await;

    let files = TaskCoder::<CodingTask>::implement_one_task(&coder, &task, &queried, &Workspace::new())
        .await
        .expect("Generation should succeed");

    let code = files.get("add.py").expect("add.py should be generated");
    assert!(code.contains("def add"), "Unexpected code: {}", code);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_an_error() {
    let client = LiteLlmClient::new(
        "http://127.0.0.1:9".to_string(),
        Some("invalid-key".to_string()),
        "test-model".to_string(),
    )
    .expect("client");

    let request = GenerationRequest::new("", vec![Message::user("test")]).with_max_tokens(5);

    let err = client.generate(request).await.unwrap_err();
    assert!(err.is_unavailable(), "Connection failure should be fatal: {:?}", err);
}

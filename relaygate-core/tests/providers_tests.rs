//! Cross-provider dispatch through the bundled adapters

use relaygate_core::config::{GatewayConfig, StrategyConfig, StrategyMode, Target};
use relaygate_core::gateway::Gateway;
use relaygate_core::protocol::types::JsonSchemaFormat;
use relaygate_core::protocol::{CanonicalRequest, ChatRequest, ChatResponse, Message, ResponseFormat};
use relaygate_core::providers::{OpenAICompatibleProvider, ParamSpec, ParameterConfig, ProviderRegistry};
use relaygate_core::Function;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn anthropic_target(server: &MockServer) -> Target {
    let mut target = Target::new("anthropic")
        .with_api_key("sk-ant-test")
        .with_custom_host(format!("{}/v1", server.uri()));
    target.max_tokens = Some(256);
    target
}

fn request(model: &str) -> CanonicalRequest {
    CanonicalRequest::chat(&ChatRequest::new(
        model,
        vec![Message::system("Be terse."), Message::user("Hi")],
    ))
    .unwrap()
}

#[tokio::test]
async fn test_anthropic_request_and_response_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(body_partial_json(json!({
            "system": "Be terse.",
            "max_tokens": 256
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_9",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-sonnet-latest",
            "content": [{"type": "text", "text": "Hello."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 6, "output_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = Gateway::builder().build().unwrap();
    let response = gateway
        .handle(&GatewayConfig::single(anthropic_target(&server)), &request("claude-3-5-sonnet-latest"))
        .await;

    assert_eq!(response.status, 200);
    let chat: ChatResponse = serde_json::from_value(response.json_body().unwrap().clone()).unwrap();
    assert_eq!(chat.id, "msg_9");
    assert_eq!(chat.choices[0].message.text_content(), "Hello.");
    assert_eq!(chat.choices[0].finish_reason.as_deref(), Some("stop"));
    assert_eq!(chat.usage.unwrap().total_tokens, 8);
}

#[tokio::test]
async fn test_structured_output_reaches_anthropic_as_tool() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"max_tokens": 300})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_s",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-sonnet-latest",
            "content": [{
                "type": "tool_use",
                "id": "toolu_1",
                "name": "structured_output",
                "input": {"city": "Lisbon"}
            }],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let schema = json!({"type": "object", "properties": {"city": {"type": "string"}}});
    let chat = ChatRequest::new("claude-3-5-sonnet-latest", vec![Message::user("Capital of Portugal?")])
        .with_max_tokens(300)
        .with_response_format(ResponseFormat::JsonSchema {
            json_schema: JsonSchemaFormat {
                name: Some("city".to_string()),
                schema: schema.clone(),
                strict: None,
            },
        });
    let target = Target::new("anthropic")
        .with_api_key("sk-ant-test")
        .with_custom_host(format!("{}/v1", server.uri()));

    let response = Gateway::builder()
        .build()
        .unwrap()
        .handle(&GatewayConfig::single(target), &CanonicalRequest::chat(&chat).unwrap())
        .await;
    assert_eq!(response.status, 200);

    let received = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(sent["tools"][0]["name"], "structured_output");
    assert_eq!(sent["tools"][0]["input_schema"], schema);
    assert!(sent["system"].as_str().unwrap().contains("structured_output"));

    let body = response.json_body().unwrap();
    assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");
    assert_eq!(
        body["choices"][0]["message"]["tool_calls"][0]["function"]["name"],
        "structured_output"
    );
}

#[tokio::test]
async fn test_anthropic_error_uses_dedicated_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "type": "error",
            "error": {"type": "invalid_request_error", "message": "messages: empty"}
        })))
        .mount(&server)
        .await;

    let gateway = Gateway::builder().build().unwrap();
    let response = gateway
        .handle(&GatewayConfig::single(anthropic_target(&server)), &request("claude-3-5-haiku-latest"))
        .await;

    assert_eq!(response.status, 400);
    let body = response.json_body().unwrap();
    assert_eq!(body["error"]["message"], "messages: empty");
    assert_eq!(body["provider"], "anthropic");
}

#[tokio::test]
async fn test_fallback_across_providers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "down"}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_f",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-haiku-latest",
            "content": [{"type": "text", "text": "Backup here."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let primary = Target::new("openai")
        .with_api_key("sk-test")
        .with_custom_host(format!("{}/openai", server.uri()));
    let backup = anthropic_target(&server).with_model("claude-3-5-haiku-latest");
    let config = GatewayConfig::single(primary.clone())
        .with_targets(vec![primary, backup])
        .with_strategy(StrategyConfig::new(StrategyMode::Fallback));

    let response = Gateway::builder().build().unwrap().handle(&config, &request("gpt-4o-mini")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.meta.provider.as_deref(), Some("anthropic"));
    assert_eq!(
        response.json_body().unwrap()["choices"][0]["message"]["content"],
        "Backup here."
    );
}

#[tokio::test]
async fn test_custom_registry_adapter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/compat/embeddings"))
        .and(body_partial_json(json!({
            "model": "local-embed",
            "texts": "hello",
            "encoding_format": "float"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"object": "embedding", "embedding": [0.1, 0.2], "index": 0}],
            "model": "local-embed"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = ProviderRegistry::builder()
        .register(
            OpenAICompatibleProvider::new("local", format!("{}/compat", server.uri())).with_parameter_config(
                Function::Embed,
                ParameterConfig::new()
                    .passthrough("model")
                    .field("input", ParamSpec::new("texts").required())
                    .field("encoding_format", ParamSpec::new("encoding_format").default_value("float")),
            ),
        )
        .build();
    let gateway = Gateway::builder().registry(registry).build().unwrap();
    let request = CanonicalRequest::json(
        Function::Embed,
        "/v1/embeddings",
        json!({"model": "local-embed", "input": "hello"}),
    )
    .unwrap();

    let response = gateway.handle(&GatewayConfig::single(Target::new("local")), &request).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.json_body().unwrap()["data"][0]["embedding"][1], 0.2);
}

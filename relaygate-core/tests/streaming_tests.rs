//! Streaming pipeline tests: live SSE, cache-simulated streams and accumulation

use relaygate_core::config::{CacheMode, GatewayConfig, Target};
use relaygate_core::gateway::Gateway;
use relaygate_core::protocol::response::HEADER_CACHE_STATUS;
use relaygate_core::protocol::{
    CanonicalRequest, ChatRequest, ChatResponse, ChunkStream, GatewayResponse, Message, ResponseBody,
};
use relaygate_core::response::{accumulate_stream, DONE_LINE};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEXT: &str = "The quick brown fox jumps over the lazy dog, then naps in the afternoon sun.";

fn chunk(delta: Value, finish_reason: Value) -> String {
    let chunk = json!({
        "id": "chatcmpl-s",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": "gpt-4o-mini",
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
    });
    format!("data: {}\n\n", chunk)
}

/// An upstream SSE body carrying `TEXT` in uneven pieces
fn upstream_sse() -> String {
    let (a, rest) = TEXT.split_at(9);
    let (b, c) = rest.split_at(40);
    let usage = json!({
        "id": "chatcmpl-s",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": "gpt-4o-mini",
        "choices": [],
        "usage": {"prompt_tokens": 4, "completion_tokens": 17, "total_tokens": 21}
    });
    [
        chunk(json!({"role": "assistant", "content": a}), Value::Null),
        chunk(json!({"content": b}), Value::Null),
        chunk(json!({"content": c}), Value::Null),
        chunk(json!({}), json!("stop")),
        format!("data: {}\n\n", usage),
        "data: [DONE]\n\n".to_string(),
    ]
    .concat()
}

fn buffered_body() -> Value {
    json!({
        "id": "chatcmpl-s",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": TEXT},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 4, "completion_tokens": 17, "total_tokens": 21}
    })
}

fn request(stream: bool) -> CanonicalRequest {
    let chat = ChatRequest::new("gpt-4o-mini", vec![Message::user("Tell me about the fox")]);
    let chat = if stream { chat.with_streaming(true) } else { chat };
    CanonicalRequest::chat(&chat).unwrap()
}

fn target(server: &MockServer) -> Target {
    Target::new("openai")
        .with_api_key("sk-test")
        .with_custom_host(format!("{}/v1", server.uri()))
}

fn into_stream(response: GatewayResponse) -> ChunkStream {
    match response.body {
        ResponseBody::Stream(stream) => stream,
        other => panic!("expected a stream, got {:?}", other),
    }
}

fn text_of(response: &ChatResponse) -> String {
    response.choices[0].message.text_content()
}

#[tokio::test]
async fn test_stream_round_trip_matches_buffered_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(upstream_sse(), "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = Gateway::builder().build().unwrap();
    let config = GatewayConfig::single(target(&server));
    let response = gateway.handle(&config, &request(true)).await;
    assert_eq!(response.status, 200);

    let streamed = accumulate_stream(into_stream(response)).await.unwrap();
    let buffered: ChatResponse = serde_json::from_value(buffered_body()).unwrap();

    assert_eq!(text_of(&streamed), text_of(&buffered));
    assert_eq!(streamed.choices[0].finish_reason.as_deref(), Some("stop"));
    assert_eq!(streamed.usage, buffered.usage);
    assert_eq!(streamed.provider.as_deref(), Some("openai"));
}

#[tokio::test]
async fn test_cache_simulated_stream_matches_live_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(upstream_sse(), "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(buffered_body()))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = Gateway::builder().build().unwrap();
    let live_config = GatewayConfig::single(target(&server));
    let live = accumulate_stream(into_stream(gateway.handle(&live_config, &request(true)).await))
        .await
        .unwrap();

    let cached_config = GatewayConfig::single(target(&server).with_cache(CacheMode::Simple));
    let warm = gateway.handle(&cached_config, &request(false)).await;
    assert_eq!(warm.status, 200);

    let replay = gateway.handle(&cached_config, &request(true)).await;
    assert_eq!(
        replay.headers.get(HEADER_CACHE_STATUS).unwrap().to_str().unwrap(),
        "HIT"
    );
    let text = into_stream(replay).collect_text().await.unwrap();
    assert!(text.ends_with(DONE_LINE));
    let simulated = relaygate_core::response::accumulate_sse(&text);

    assert_eq!(text_of(&simulated), text_of(&live));
    assert_eq!(simulated.choices[0].finish_reason, live.choices[0].finish_reason);
    assert_eq!(simulated.usage, live.usage);
    assert_eq!(simulated.id, live.id);
    assert_eq!(simulated.model, live.model);
}

#[tokio::test]
async fn test_partial_tail_flushed_with_single_done() {
    let server = MockServer::start().await;
    // Three frames; the last has no trailing delimiter when the connection closes
    let body = format!(
        "{}{}{}",
        chunk(json!({"role": "assistant", "content": "a"}), Value::Null),
        chunk(json!({"content": "b"}), Value::Null),
        chunk(json!({"content": "c"}), json!("stop")).trim_end(),
    );
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let gateway = Gateway::builder().build().unwrap();
    let response = gateway
        .handle(&GatewayConfig::single(target(&server)), &request(true))
        .await;
    let text = into_stream(response).collect_text().await.unwrap();

    let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
    assert_eq!(frames.len(), 4);
    assert!(frames[..3].iter().all(|f| f.starts_with("data: {")));
    assert_eq!(frames[3], "data: [DONE]");
    assert_eq!(text.matches("[DONE]").count(), 1);
}

#[tokio::test]
async fn test_streamed_error_status_is_buffered_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "bad key", "type": "invalid_request_error", "code": "invalid_api_key"}
        })))
        .mount(&server)
        .await;

    let gateway = Gateway::builder().build().unwrap();
    let response = gateway
        .handle(&GatewayConfig::single(target(&server)), &request(true))
        .await;

    assert_eq!(response.status, 401);
    let body = response.json_body().unwrap();
    assert_eq!(body["error"]["code"], "invalid_api_key");
    assert_eq!(body["provider"], "openai");
}

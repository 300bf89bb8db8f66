//! Full-router round trips against a mock upstream.

use responses_bridge::auth::{Credentials, StaticAuth};
use responses_bridge::{
    build_router, AppState, BackendClient, GatewayConfig, ModelCatalog, SharedLogger,
};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BACKEND_PATH: &str = "/backend-api/codex/responses";

fn sse_body(events: &[Value]) -> String {
    let mut body: String = events.iter().map(|e| format!("data: {e}\n\n")).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn sse_template(events: &[Value]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(sse_body(events))
}

fn text_events(deltas: &[&str]) -> Vec<Value> {
    let mut events = vec![json!({"type": "response.created", "response": {"id": "resp_1"}})];
    events.extend(
        deltas
            .iter()
            .map(|d| json!({"type": "response.output_text.delta", "delta": d})),
    );
    events.push(json!({
        "type": "response.completed",
        "response": {"id": "resp_1", "status": "completed", "output": []}
    }));
    events
}

async fn mock_backend(events: &[Value]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(BACKEND_PATH))
        .respond_with(sse_template(events))
        .mount(&server)
        .await;
    server
}

/// Serve the router on an ephemeral port and return its base URL.
async fn spawn_gateway(backend: &MockServer) -> String {
    let config = GatewayConfig {
        backend_url: format!("{}{}", backend.uri(), BACKEND_PATH),
        ..GatewayConfig::default()
    };
    let auth = Arc::new(StaticAuth(Credentials {
        access_token: "tok".to_string(),
        account_id: None,
    }));
    let state = Arc::new(AppState {
        backend: BackendClient::new(&config, auth).unwrap(),
        catalog: ModelCatalog::new(config.models.clone()),
        logger: SharedLogger::in_memory(),
        config,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

/// `(event name, data)` pairs of an SSE body; unnamed events get "".
fn parse_sse(body: &str) -> Vec<(String, String)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut name = String::new();
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    name = v.trim().to_string();
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push(v.trim_start().to_string());
                }
            }
            (!data.is_empty()).then(|| (name, data.join("\n")))
        })
        .collect()
}

async fn post(url: String, body: Value) -> reqwest::Response {
    reqwest::Client::new().post(url).json(&body).send().await.unwrap()
}

#[tokio::test]
async fn test_chat_completion_non_streaming() {
    let backend = mock_backend(&text_events(&["Hello", " there"])).await;
    let base = spawn_gateway(&backend).await;

    let resp = post(
        format!("{base}/v1/chat/completions"),
        json!({
            "model": "chatgpt/codex/gpt-5.1",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "chatgpt/codex/gpt-5.1");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello there");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");

    let requests = backend.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["model"], "gpt-5.1");
    assert_eq!(sent["instructions"], "be brief");
    assert_eq!(sent["stream"], true);
    assert_eq!(sent["store"], false);
}

#[tokio::test]
async fn test_chat_completion_streaming_with_tool_call() {
    let mut events = text_events(&["Let me check"]);
    events.insert(
        2,
        json!({
            "type": "response.output_item.done",
            "item": {
                "type": "function_call",
                "id": "fc_1",
                "call_id": "call_1",
                "name": "lookup",
                "arguments": "{\"q\": \"rust\"}",
                "status": "completed"
            }
        }),
    );
    let backend = mock_backend(&events).await;
    let base = spawn_gateway(&backend).await;

    let resp = post(
        format!("{base}/v1/chat/completions"),
        json!({
            "model": "gpt-5.1",
            "stream": true,
            "messages": [{"role": "user", "content": "search"}],
            "tools": [{"type": "function", "function": {"name": "lookup"}}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let events = parse_sse(&resp.text().await.unwrap());
    assert_eq!(events.last().map(|(_, d)| d.as_str()), Some("[DONE]"));

    let chunks: Vec<Value> = events[..events.len() - 1]
        .iter()
        .map(|(_, d)| serde_json::from_str(d).unwrap())
        .collect();
    let text: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(text, "Let me check");

    let call = chunks
        .iter()
        .find_map(|c| c["choices"][0]["delta"]["tool_calls"].get(0).cloned())
        .expect("tool call chunk");
    assert_eq!(call["id"], "call_1");
    assert_eq!(call["index"], 0);
    assert_eq!(call["function"]["name"], "lookup");
    assert_eq!(call["function"]["arguments"], r#"{"q":"rust"}"#);

    let last = chunks.last().unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "tool_calls");
    assert_eq!(last["object"], "chat.completion.chunk");
}

#[tokio::test]
async fn test_chat_rejects_bad_requests() {
    let backend = mock_backend(&text_events(&["x"])).await;
    let base = spawn_gateway(&backend).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "invalid request body");
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let resp = post(
        format!("{base}/v1/chat/completions"),
        json!({"model": "not-a-model", "messages": [{"role": "user", "content": "hi"}]}),
    )
    .await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "unsupported model");
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_messages_streaming_stops_at_sequence() {
    let backend = mock_backend(&text_events(&["Hello ST", "OP world"])).await;
    let base = spawn_gateway(&backend).await;

    let resp = post(
        format!("{base}/v1/messages"),
        json!({
            "model": "sonnet",
            "max_tokens": 100,
            "stream": true,
            "stop_sequences": ["STOP"],
            "messages": [{"role": "user", "content": "greet"}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let events = parse_sse(&resp.text().await.unwrap());

    let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names.first(), Some(&"message_start"));
    assert_eq!(names.last(), Some(&"message_stop"));

    let text: String = events
        .iter()
        .filter(|(n, _)| n == "content_block_delta")
        .map(|(_, d)| serde_json::from_str::<Value>(d).unwrap())
        .filter_map(|v| v["delta"]["text"].as_str().map(str::to_string))
        .collect();
    assert_eq!(text, "Hello ");

    let (_, delta) = events.iter().find(|(n, _)| n == "message_delta").unwrap();
    let delta: Value = serde_json::from_str(delta).unwrap();
    assert_eq!(delta["delta"]["stop_reason"], "stop_sequence");
    assert_eq!(delta["delta"]["stop_sequence"], "STOP");
    assert_eq!(delta["usage"]["output_tokens"], 2);
}

#[tokio::test]
async fn test_messages_non_streaming_max_tokens() {
    let backend = mock_backend(&text_events(&["0123456789"])).await;
    let base = spawn_gateway(&backend).await;

    let resp = post(
        format!("{base}/v1/messages"),
        json!({
            "model": "claude-3-5-sonnet-latest",
            "max_tokens": 2,
            "system": "be terse",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "count"}]}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["model"], "claude-3-5-sonnet-latest");
    assert_eq!(body["content"][0]["text"], "01234567");
    assert_eq!(body["stop_reason"], "max_tokens");
    assert!(body["stop_sequence"].is_null());
    assert_eq!(body["usage"]["output_tokens"], 2);
}

#[tokio::test]
async fn test_messages_validation_error_shape() {
    let backend = mock_backend(&text_events(&["x"])).await;
    let base = spawn_gateway(&backend).await;

    let resp = post(
        format!("{base}/v1/messages"),
        json!({"model": "sonnet", "messages": [{"role": "user", "content": "hi"}]}),
    )
    .await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(body["error"]["message"], "max_tokens is required");
}

#[tokio::test]
async fn test_count_tokens() {
    let backend = mock_backend(&text_events(&["x"])).await;
    let base = spawn_gateway(&backend).await;

    let resp = post(
        format!("{base}/v1/messages/count_tokens"),
        json!({"model": "sonnet", "messages": [{"role": "user", "content": "hello world"}]}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    // "hello world" + "user"
    assert_eq!(body["input_tokens"], 4);
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_responses_passthrough() {
    let backend = mock_backend(&text_events(&["hi"])).await;
    let base = spawn_gateway(&backend).await;

    let resp = post(
        format!("{base}/v1/responses"),
        json!({"model": "gpt-5.1", "input": "hello"}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"id": "resp_1", "status": "completed", "output": []}));

    let resp = post(
        format!("{base}/v1/responses"),
        json!({"model": "gpt-5.1", "input": "hello", "stream": true}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let events = parse_sse(&resp.text().await.unwrap());
    let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec!["response.created", "response.output_text.delta", "response.completed"]
    );
    assert!(events.iter().all(|(_, d)| d != "[DONE]"));
}

#[tokio::test]
async fn test_responses_upstream_failure_maps_to_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(BACKEND_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;
    let base = spawn_gateway(&server).await;

    let resp = post(
        format!("{base}/v1/responses"),
        json!({"model": "gpt-5.1", "input": "hello"}),
    )
    .await;
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "upstream exploded");
}

#[tokio::test]
async fn test_model_listing() {
    let backend = mock_backend(&text_events(&["x"])).await;
    let base = spawn_gateway(&backend).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{base}/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["owned_by"], "chatgpt-backend");
    assert!(body["data"][0]["id"].as_str().unwrap().starts_with("chatgpt/codex/"));

    let body: Value = client
        .get(format!("{base}/v1/models"))
        .header("anthropic-version", "2023-06-01")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"][0]["id"], "sonnet");
    assert_eq!(body["has_more"], false);

    let resp = client.get(format!("{base}/v1/models/sonnet")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(resp.text().await.unwrap(), "404 page not found");

    let resp = client
        .get(format!("{base}/v1/models/not-a-model"))
        .header("x-api-key", "k")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "model not found");
}

#[tokio::test]
async fn test_health_and_debug_logs() {
    let backend = mock_backend(&text_events(&["x"])).await;
    let base = spawn_gateway(&backend).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");

    post(
        format!("{base}/v1/responses"),
        json!({"model": "gpt-5.1", "input": "hello"}),
    )
    .await;
    let logs: Vec<Value> = client
        .get(format!("{base}/debug/logs?limit=50"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!logs.is_empty());
    assert!(logs.iter().any(|e| e["component"] == "server"));
}

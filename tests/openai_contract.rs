//! OpenAI-compatible provider contract tests.
//!
//! These tests run the adapter (and the reasoning loop on top of it)
//! against a wiremock server speaking the chat completions SSE protocol.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tinyagent::agent::{
    AgentEvent, AgentOutput, PromptContext, ReasoningLoop, ResponseAccumulator, StopReason,
};
use tinyagent::config::AgentLoopConfig;
use tinyagent::llm::{
    FinishReason, LlmError, LlmEvent, Message, OpenAiAdapter, OpenAiConfig, ProviderAdapter,
    RequestOptions, ToolDefinition,
};
use tinyagent::skills::SkillManager;
use tinyagent::tools::{CalculateTool, ToolRegistry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(chunks: &[serde_json::Value]) -> String {
    let mut body: String = chunks
        .iter()
        .map(|c| format!("data: {c}\n\n"))
        .collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn text_chunk(text: &str) -> serde_json::Value {
    json!({"choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]})
}

fn finish_chunk(reason: &str) -> serde_json::Value {
    json!({"choices": [{"index": 0, "delta": {}, "finish_reason": reason}]})
}

fn tool_chunk(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> serde_json::Value {
    let mut function = json!({"arguments": args});
    if let Some(name) = name {
        function["name"] = json!(name);
    }
    let mut call = json!({"index": index, "function": function});
    if let Some(id) = id {
        call["id"] = json!(id);
        call["type"] = json!("function");
    }
    json!({"choices": [{"index": 0, "delta": {"tool_calls": [call]}, "finish_reason": null}]})
}

fn adapter(server: &MockServer) -> OpenAiAdapter {
    let config = OpenAiConfig::new("test-key", "qwen-plus").with_base_url(server.uri());
    OpenAiAdapter::new(config).unwrap()
}

fn calculate_definition() -> ToolDefinition {
    ToolDefinition::new("calculate", "math", json!({"type": "object"}))
}

async fn collect(adapter: &OpenAiAdapter, tools: &[ToolDefinition]) -> Vec<LlmEvent> {
    let stream = adapter
        .send(&[Message::user("你好")], &RequestOptions::new(), tools)
        .await
        .unwrap();
    stream.collect().await
}

#[tokio::test]
async fn request_carries_auth_stream_and_tool_manifest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "qwen-plus",
            "stream": true,
            "tool_choice": "auto",
            "messages": [{"role": "user", "content": "你好"}],
            "tools": [{"type": "function", "function": {"name": "calculate"}}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[finish_chunk("stop")])))
        .expect(1)
        .mount(&server)
        .await;

    let events = collect(&adapter(&server), &[calculate_definition()]).await;
    assert_eq!(
        events,
        vec![LlmEvent::StreamEnd {
            finish_reason: FinishReason::Stop
        }]
    );
}

#[tokio::test]
async fn request_without_tools_has_no_tools_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[text_chunk("嗨")])))
        .mount(&server)
        .await;

    collect(&adapter(&server), &[]).await;

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body.get("tools").is_none());
    assert!(body.get("tool_choice").is_none());
    assert!(body.get("max_tokens").is_none());
}

#[tokio::test]
async fn chunked_tool_call_fragments_reassemble() {
    let server = MockServer::start().await;
    let body = sse(&[
        tool_chunk(0, Some("call_a"), Some("calculate"), "{\"expr"),
        tool_chunk(1, Some("call_b"), Some("get_datetime"), ""),
        tool_chunk(0, None, None, "ession\": \"2*"),
        tool_chunk(1, None, None, "{}"),
        tool_chunk(0, None, None, "(3+4)\"}"),
        finish_chunk("tool_calls"),
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let mut acc = ResponseAccumulator::new();
    for event in collect(&adapter(&server), &[calculate_definition()]).await {
        acc.push(event);
    }
    let response = acc.finish(1, 0);
    assert_eq!(response.tool_calls.len(), 2);
    assert_eq!(response.tool_calls[0].call_id, "call_a");
    assert_eq!(
        response.tool_calls[0].arguments,
        json!({"expression": "2*(3+4)"})
    );
    assert_eq!(response.tool_calls[1].name, "get_datetime");
    assert_eq!(response.tool_calls[1].arguments, json!({}));
}

#[tokio::test]
async fn text_deltas_arrive_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(sse(&[text_chunk("你好，"), text_chunk("世界"), finish_chunk("stop")])),
        )
        .mount(&server)
        .await;

    let text: String = collect(&adapter(&server), &[])
        .await
        .into_iter()
        .filter_map(|e| match e {
            LlmEvent::TextDelta { text } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(text, "你好，世界");
}

#[tokio::test]
async fn http_errors_map_to_typed_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "invalid api key"}
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .with_priority(2)
        .mount(&server)
        .await;

    let adapter = adapter(&server);
    let messages = [Message::user("hi")];
    match adapter.send(&messages, &RequestOptions::new(), &[]).await {
        Err(LlmError::Unauthorized { status, message }) => {
            assert_eq!(status, 401);
            assert!(message.contains("invalid api key"));
        }
        Err(other) => panic!("expected auth error, got {other}"),
        Ok(_) => panic!("expected auth error"),
    }
    match adapter.send(&messages, &RequestOptions::new(), &[]).await {
        Err(LlmError::RateLimited(message)) => assert_eq!(message, "slow down"),
        Err(other) => panic!("expected rate limit, got {other}"),
        Ok(_) => panic!("expected rate limit"),
    }
}

fn reasoning_loop(server: &MockServer, max_tool_rounds: u32) -> ReasoningLoop {
    let mut registry = ToolRegistry::new(Duration::from_secs(5));
    registry.register(Arc::new(CalculateTool));
    let skills = Arc::new(Mutex::new(SkillManager::new(Vec::new())));
    ReasoningLoop::new(
        Arc::new(adapter(server)),
        Arc::new(registry),
        PromptContext::new(skills, None),
        AgentLoopConfig {
            max_tool_rounds,
            ..AgentLoopConfig::default()
        },
        RequestOptions::new().with_max_tokens(256),
    )
}

async fn run(agent: &mut ReasoningLoop, text: &str) -> (Vec<AgentOutput>, StopReason) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let summary = agent
        .run_turn(text, &tx, &CancellationToken::new())
        .await
        .unwrap();
    drop(tx);
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.push(item);
    }
    (out, summary.stop)
}

fn spoken(out: &[AgentOutput]) -> String {
    out.iter()
        .filter_map(|o| match o {
            AgentOutput::Token(t) => Some(t.as_str()),
            AgentOutput::Event(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn reasoning_loop_runs_tool_then_answers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            tool_chunk(0, Some("call_1"), Some("calculate"), "{\"expression\": \"6*7\"}"),
            finish_chunk("tool_calls"),
        ])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            text_chunk("答案是"),
            text_chunk("42。"),
            finish_chunk("stop"),
        ])))
        .with_priority(2)
        .mount(&server)
        .await;

    let mut agent = reasoning_loop(&server, 5);
    let (out, stop) = run(&mut agent, "六乘七").await;

    assert_eq!(stop, StopReason::Complete);
    assert_eq!(spoken(&out), "答案是42。");
    assert!(out.iter().any(|o| matches!(
        o,
        AgentOutput::Event(AgentEvent::ToolResult { content, is_error: false, .. }) if content == "6*7 = 42"
    )));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(first["max_tokens"], 256);

    let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    let messages = second["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1], json!({"role": "user", "content": "六乘七"}));
    assert_eq!(messages[2]["content"], serde_json::Value::Null);
    assert_eq!(messages[2]["tool_calls"][0]["id"], "call_1");
    assert_eq!(messages[2]["tool_calls"][0]["type"], "function");
    assert_eq!(
        messages[3],
        json!({"role": "tool", "tool_call_id": "call_1", "name": "calculate", "content": "6*7 = 42"})
    );
}

#[tokio::test]
async fn forced_final_call_has_no_tool_manifest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            tool_chunk(0, None, Some("calculate"), "{\"expression\": \"1+1\"}"),
            finish_chunk("tool_calls"),
        ])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            text_chunk("一加一等于二。"),
            finish_chunk("stop"),
        ])))
        .with_priority(2)
        .mount(&server)
        .await;

    let mut agent = reasoning_loop(&server, 1);
    let (out, stop) = run(&mut agent, "一加一").await;

    assert_eq!(stop, StopReason::ForcedFinal);
    assert_eq!(spoken(&out), "一加一等于二。");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let last: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert!(first.get("tools").is_some());
    assert!(last.get("tools").is_none());

    // Tool exchanges are replayed as prose, followed by the nudge.
    let messages = last["messages"].as_array().unwrap();
    assert!(messages.iter().all(|m| m["role"] != "tool"));
    assert!(messages.iter().all(|m| m.get("tool_calls").is_none()));
    let final_user = messages.last().unwrap()["content"].as_str().unwrap();
    assert!(final_user.contains("不要再调用任何工具"));
}

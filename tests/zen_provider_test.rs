use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use zenchat::config::ProviderConfig;
use zenchat::error::ErrorKind;
use zenchat::providers::{
    ChatMessage, CompletionClient, CompletionRequest, StreamEvent, ZenClient,
};

fn client_for(server: &MockServer) -> ZenClient {
    let config = ProviderConfig {
        api_base: format!("{}/", server.uri()),
        ..Default::default()
    };
    ZenClient::new(&config, 8).unwrap()
}

fn request() -> CompletionRequest {
    CompletionRequest {
        model: "opencode/sonic".to_string(),
        messages: vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("Hello"),
        ],
    }
}

fn sse(events: &[Value]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str(&format!("data: {}\n\n", event));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn delta_chunk(content: &str) -> Value {
    json!({ "choices": [{ "index": 0, "delta": { "content": content }, "finish_reason": null }] })
}

#[tokio::test]
async fn test_complete_sends_bearer_and_parses_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "opencode/sonic", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-1",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "Hi!" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server)
        .complete(&request(), Some("sk-test"))
        .await
        .unwrap();

    assert_eq!(response.content, "Hi!");
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.usage.unwrap().total_tokens, 11);
}

#[tokio::test]
async fn test_complete_without_token_sends_no_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(401))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "free reply" }, "finish_reason": "stop" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server).complete(&request(), None).await.unwrap();
    assert_eq!(response.content, "free reply");
    assert!(response.usage.is_none());
}

#[tokio::test]
async fn test_complete_maps_error_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer limited"))
        .respond_with(ResponseTemplate::new(429).set_body_string("too many requests"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer revoked"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let kinds = [
        ("limited", ErrorKind::RateLimited),
        ("broken", ErrorKind::ServerError),
        ("revoked", ErrorKind::AuthRequired),
    ];
    for (token, expected) in kinds {
        let err = client.complete(&request(), Some(token)).await.unwrap_err();
        assert_eq!(err.kind(), expected, "token {}", token);
    }
}

#[tokio::test]
async fn test_complete_without_choices_is_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let err = client_for(&server).complete(&request(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerError);
}

#[tokio::test]
async fn test_stream_yields_deltas_then_finish() {
    let server = MockServer::start().await;
    let body = sse(&[
        delta_chunk("Hel"),
        delta_chunk("lo"),
        json!({
            "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6 }
        }),
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let mut rx = client_for(&server)
        .complete_stream(&request(), None)
        .await
        .unwrap();

    let mut text = String::new();
    let mut finish = None;
    while let Some(event) = rx.recv().await {
        match event.unwrap() {
            StreamEvent::Delta(delta) => text.push_str(&delta),
            StreamEvent::Finished {
                finish_reason,
                usage,
            } => {
                finish = Some((finish_reason, usage));
                break;
            }
        }
    }

    assert_eq!(text, "Hello");
    let (reason, usage) = finish.expect("finish event");
    assert_eq!(reason.as_deref(), Some("stop"));
    assert_eq!(usage.unwrap().total_tokens, 6);
}

#[tokio::test]
async fn test_stream_skips_malformed_chunks() {
    let server = MockServer::start().await;
    let body = format!(
        "data: {}\n\ndata: {{not json\n\n: keep-alive\n\ndata: {}\n\ndata: [DONE]\n\n",
        delta_chunk("a"),
        delta_chunk("b")
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let mut rx = client_for(&server)
        .complete_stream(&request(), Some("sk-test"))
        .await
        .unwrap();

    let mut deltas = Vec::new();
    while let Some(event) = rx.recv().await {
        match event.unwrap() {
            StreamEvent::Delta(delta) => deltas.push(delta),
            StreamEvent::Finished { .. } => break,
        }
    }
    assert_eq!(deltas, vec!["a", "b"]);
}

#[tokio::test]
async fn test_stream_error_status_is_returned_before_any_delta() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("missing key"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .complete_stream(&request(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthRequired);
}

#[tokio::test]
async fn test_list_models_parses_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "id": "gpt-5",
                    "owned_by": "openai",
                    "capabilities": { "stream": true, "tools": true, "vision": true },
                    "pricing": { "prompt_tokens": "$1.25", "completion_tokens": "$10.00" }
                },
                { "id": "sonic" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let models = client_for(&server).list_models("sk-test").await.unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].id, "gpt-5");
    assert_eq!(models[0].owned_by.as_deref(), Some("openai"));
    assert!(models[0].capabilities.as_ref().unwrap().vision);
    assert_eq!(
        models[0].pricing.as_ref().unwrap().prompt_tokens.as_deref(),
        Some("$1.25")
    );
    assert!(models[1].capabilities.is_none());
}

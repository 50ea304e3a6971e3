//! Translator back ends against a local axum stub standing in for the provider.

use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use std::time::Duration;

use taskgate::llm::{OllamaTranslator, OpenAiTranslator, TranslateError, Translator};

const SYSTEM: &str = "Today's date: 2024-01-05\n\nReply with one command.";

/// Serve `app` on an ephemeral loopback port and return its base URL.
async fn spawn_stub(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

fn openai(base_url: String, timeout: Duration) -> OpenAiTranslator {
    OpenAiTranslator::new(
        Some(base_url),
        Some("stub-model".to_string()),
        Some("test-token".to_string()),
        timeout,
    )
}

fn completion(content: &str) -> Json<Value> {
    Json(json!({"choices": [{"message": {"role": "assistant", "content": content}}]}))
}

#[tokio::test]
async fn openai_reply_is_trimmed_and_request_carries_system_and_task() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|headers: axum::http::HeaderMap, Json(req): Json<Value>| async move {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            if auth != "Bearer test-token"
                || req["messages"][0]["content"] != SYSTEM
                || req["messages"][1]["content"] != "count the fridays"
            {
                return completion("WRONG REQUEST");
            }
            completion("  /app/scripts/count-weekday.sh Friday /data/a.txt /data/b.txt \n")
        }),
    );
    let base = spawn_stub(app).await;
    let t = openai(format!("{}/v1", base), Duration::from_secs(5));
    let c = t.translate(SYSTEM, "count the fridays").await.expect("translate");
    assert_eq!(
        c.as_str(),
        "/app/scripts/count-weekday.sh Friday /data/a.txt /data/b.txt"
    );
}

#[tokio::test]
async fn openai_slow_provider_times_out() {
    let app = Router::new().route(
        "/chat/completions",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            completion("/app/scripts/too-late.sh")
        }),
    );
    let base = spawn_stub(app).await;
    let t = openai(base, Duration::from_millis(300));
    let err = t.translate(SYSTEM, "anything").await.expect_err("timeout");
    assert!(matches!(err, TranslateError::Timeout(_)), "{:?}", err);
}

#[tokio::test]
async fn openai_server_error_is_http_error() {
    let app = Router::new().route(
        "/chat/completions",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model overloaded") }),
    );
    let base = spawn_stub(app).await;
    let err = openai(base, Duration::from_secs(5))
        .translate(SYSTEM, "anything")
        .await
        .expect_err("http error");
    match err {
        TranslateError::Http { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "model overloaded");
        }
        other => panic!("expected Http, got {:?}", other),
    }
}

#[tokio::test]
async fn openai_empty_or_missing_content_is_malformed() {
    let app = Router::new()
        .route("/empty/chat/completions", post(|| async { completion("   ") }))
        .route(
            "/nochoices/chat/completions",
            post(|| async { Json(json!({"choices": []})) }),
        )
        .route(
            "/notjson/chat/completions",
            post(|| async { "this is not json" }),
        );
    let base = spawn_stub(app).await;
    for prefix in ["empty", "nochoices", "notjson"] {
        let err = openai(format!("{}/{}", base, prefix), Duration::from_secs(5))
            .translate(SYSTEM, "anything")
            .await
            .expect_err("malformed");
        assert!(matches!(err, TranslateError::Malformed(_)), "{}: {:?}", prefix, err);
    }
}

#[tokio::test]
async fn unreachable_provider_is_transport_error() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        l.local_addr().expect("local_addr").port()
    };
    let err = openai(format!("http://127.0.0.1:{}", port), Duration::from_secs(5))
        .translate(SYSTEM, "anything")
        .await
        .expect_err("transport");
    assert!(matches!(err, TranslateError::Transport(_)), "{:?}", err);
}

#[tokio::test]
async fn ollama_reply_and_error_field() {
    let app = Router::new()
        .route(
            "/ok/api/chat",
            post(|Json(req): Json<Value>| async move {
                assert_eq!(req["stream"], false);
                Json(json!({"message": {"role": "assistant", "content": "```sh\n/app/scripts/find-lines.sh ERROR /data/a.log /data/errors.txt\n```"}, "done": true}))
            }),
        )
        .route(
            "/err/api/chat",
            post(|| async { Json(json!({"error": "model 'x' not found"})) }),
        );
    let base = spawn_stub(app).await;

    let ok = OllamaTranslator::new(Some(format!("{}/ok", base)), None, Duration::from_secs(5));
    let c = ok.translate(SYSTEM, "find errors").await.expect("translate");
    assert_eq!(
        c.as_str(),
        "/app/scripts/find-lines.sh ERROR /data/a.log /data/errors.txt"
    );

    let err = OllamaTranslator::new(Some(format!("{}/err", base)), None, Duration::from_secs(5))
        .translate(SYSTEM, "find errors")
        .await
        .expect_err("provider error");
    assert!(matches!(err, TranslateError::Malformed(ref m) if m.contains("not found")));
}

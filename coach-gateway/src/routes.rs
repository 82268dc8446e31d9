//! HTTP routes for the coach gateway.
//!
//! # SSE framing
//!
//! `/api/chat/stream` emits one SSE `data:` frame per token: answer text is
//! sent verbatim, thought text is prefixed with `[THOUGHT]`, and a lone
//! `[DONE]` frame marks clean completion. A stream that fails mid-flight
//! ends without the `[DONE]` marker; that absence is the error signal.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::error;

use crate::engine::{ChatRequest, ChatToken, ConversationEngine};
use crate::error::GatewayError;

/// SSE frame prefix for thought tokens.
pub const THOUGHT_PREFIX: &str = "[THOUGHT]";

/// Terminal SSE frame for a cleanly completed stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Shared route state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConversationEngine>,
}

/// Build the gateway router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/chat/reset", post(reset_session))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    text: String,
}

fn validate(request: &ChatRequest) -> Result<(), GatewayError> {
    if request.message.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(
            "message must not be empty".into(),
        ));
    }
    Ok(())
}

/// Buffered exchange: the whole answer in one JSON response.
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, GatewayError> {
    validate(&request)?;
    let text = state.engine.generate(&request).await?;
    Ok(Json(ChatResponse { text }))
}

/// Streamed exchange over SSE.
///
/// Failures before the stream opens surface as a JSON error response;
/// failures after it opens terminate the event stream early.
async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    validate(&request)?;
    let mut tokens = state.engine.generate_stream(&request).await?;

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(32);
    tokio::spawn(async move {
        while let Some(item) = tokens.next().await {
            let frame = match item {
                Ok(ChatToken::Text(text)) => data_frame(&text),
                Ok(ChatToken::Thought(text)) => data_frame(&format!("{THOUGHT_PREFIX}{text}")),
                Err(e) => {
                    // Terminate without the completion marker.
                    error!(error = %e, "Streamed generation failed mid-flight");
                    return;
                }
            };
            if tx.send(Ok(frame)).await.is_err() {
                return;
            }
        }
        let _ = tx.send(Ok(Event::default().data(DONE_MARKER))).await;
    });

    Ok(Sse::new(ReceiverStream::new(rx)))
}

/// Frame token text as an SSE data event.
///
/// Carriage returns are stripped first: axum rejects them inside a data
/// line, and model output may legally contain them.
fn data_frame(text: &str) -> Event {
    if text.contains('\r') {
        Event::default().data(text.replace('\r', ""))
    } else {
        Event::default().data(text)
    }
}

#[derive(Debug, Deserialize)]
struct ResetRequest {
    session_id: String,
}

/// Drop a session's history; resetting an unknown session succeeds.
async fn reset_session(
    State(state): State<AppState>,
    Json(request): Json<ResetRequest>,
) -> impl IntoResponse {
    state.engine.reset_session(&request.session_id).await;
    Json(json!({ "status": "reset", "session_id": request.session_id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::{
        Content, Fragment, FragmentStream, GeminiError, GenerateResult, GenerationClient,
        GenerationOptions, Segment, TokenUsage,
    };
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use coach_common::config::GenerationConfig;
    use futures_util::stream;
    use tower::ServiceExt;

    /// Fixed-script client for route tests.
    struct StubClient {
        reply: &'static str,
        stream_script: fn() -> Vec<Result<Fragment, GeminiError>>,
    }

    impl StubClient {
        fn new(reply: &'static str) -> Self {
            Self {
                reply,
                stream_script: Vec::new,
            }
        }
    }

    #[async_trait]
    impl GenerationClient for StubClient {
        async fn generate(
            &self,
            _model: &str,
            _contents: &[Content],
            _options: &GenerationOptions,
        ) -> Result<GenerateResult, GeminiError> {
            Ok(GenerateResult {
                text: self.reply.to_string(),
                usage: TokenUsage::default(),
            })
        }

        async fn generate_stream(
            &self,
            _model: &str,
            _contents: &[Content],
            _options: &GenerationOptions,
        ) -> Result<FragmentStream, GeminiError> {
            Ok(stream::iter((self.stream_script)()).boxed())
        }
    }

    fn test_router(client: StubClient) -> Router {
        let defaults = GenerationConfig {
            api_key: "test-key".into(),
            model: "gemini-2.5-flash".into(),
            system_prompt: "default prompt".into(),
            timeout_secs: 30,
        };
        let engine = Arc::new(ConversationEngine::new(Arc::new(client), &defaults));
        build_router(AppState { engine })
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let router = test_router(StubClient::new("unused"));
        let response = router
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn chat_returns_the_answer() {
        let router = test_router(StubClient::new("use a manipulator"));
        let response = router
            .oneshot(post_json("/api/chat", json!({ "message": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["text"], "use a manipulator");
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let router = test_router(StubClient::new("unused"));
        let response = router
            .oneshot(post_json("/api/chat", json!({ "message": "   " })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn blank_message_is_rejected_on_the_stream_route() {
        let router = test_router(StubClient::new("unused"));
        let response = router
            .oneshot(post_json("/api/chat/stream", json!({ "message": "" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_frames_tokens_and_ends_with_done() {
        let mut client = StubClient::new("unused");
        client.stream_script = || {
            vec![
                Ok(Fragment::Segments(vec![
                    Segment {
                        text: "planning".into(),
                        thought: true,
                    },
                    Segment {
                        text: "Hello".into(),
                        thought: false,
                    },
                ])),
                Ok(Fragment::Flat(" world".into())),
            ]
        };

        let router = test_router(client);
        let response = router
            .oneshot(post_json("/api/chat/stream", json!({ "message": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let body = body_text(response).await;
        assert!(body.contains("data: [THOUGHT]planning\n"));
        assert!(body.contains("data: Hello\n"));
        assert!(body.contains("data:  world\n"));
        assert!(body.trim_end().ends_with("data: [DONE]"));
    }

    #[tokio::test]
    async fn carriage_returns_in_tokens_do_not_break_framing() {
        let mut client = StubClient::new("unused");
        client.stream_script = || {
            vec![Ok(Fragment::Segments(vec![
                Segment {
                    text: "step one\r\nstep two".into(),
                    thought: true,
                },
                Segment {
                    text: "col a\rcol b".into(),
                    thought: false,
                },
            ]))]
        };

        let router = test_router(client);
        let response = router
            .oneshot(post_json("/api/chat/stream", json!({ "message": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        // Multi-line data is split across data: lines, never truncated.
        assert!(body.contains("data: [THOUGHT]step one\n"));
        assert!(body.contains("data: step two\n"));
        assert!(body.contains("data: col acol b\n"));
        assert!(body.trim_end().ends_with("data: [DONE]"));
    }

    #[tokio::test]
    async fn failed_stream_ends_without_the_done_marker() {
        let mut client = StubClient::new("unused");
        client.stream_script = || {
            vec![
                Ok(Fragment::Flat("partial".into())),
                Err(GeminiError::Stream("connection reset".into())),
            ]
        };

        let router = test_router(client);
        let response = router
            .oneshot(post_json("/api/chat/stream", json!({ "message": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("data: partial\n"));
        assert!(!body.contains(DONE_MARKER));
    }

    #[tokio::test]
    async fn reset_clears_the_session() {
        let router = test_router(StubClient::new("answer"));

        let response = router
            .clone()
            .oneshot(post_json(
                "/api/chat",
                json!({ "message": "hi", "session_id": "s1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(post_json("/api/chat/reset", json!({ "session_id": "s1" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "reset");
        assert_eq!(body["session_id"], "s1");
    }

    #[tokio::test]
    async fn reset_of_unknown_session_succeeds() {
        let router = test_router(StubClient::new("unused"));
        let response = router
            .oneshot(post_json(
                "/api/chat/reset",
                json!({ "session_id": "never-seen" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}

//! Conversation engine: option derivation, buffered and streamed generation,
//! and the history commit discipline.
//!
//! An exchange against a session holds that session's lock for its full
//! duration, remote call included. On success the history grows by exactly
//! one committed exchange; on any failure it is rolled back to its length at
//! the start of the exchange.

use std::sync::Arc;

use coach_common::config::GenerationConfig;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::OwnedMutexGuard;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::error::GatewayError;
use crate::gemini::{
    Content, Fragment, FragmentStream, GenerationClient, GenerationOptions, ThinkingOptions,
    DYNAMIC_THINKING_BUDGET,
};
use crate::session::SessionStore;

/// Extra turn appended when a caller asks the model to explain itself.
pub const EXPLAIN_INSTRUCTION: &str = "Briefly summarize your understanding and \
key constraints in 1-2 bullets, then proceed with recommendations.";

fn default_google_search() -> bool {
    true
}

/// One chat exchange request.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// The user's message. Must be non-blank.
    pub message: String,
    /// Overrides the configured system instruction for this call.
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_output_tokens: Option<i64>,
    /// Opaque conversation key; absent or empty means a stateless exchange.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Web-search grounding, on unless disabled.
    #[serde(default = "default_google_search")]
    pub google_search: bool,
    /// Overrides the configured model for this call.
    #[serde(default)]
    pub model: Option<String>,
    /// Append a fixed summarize-then-recommend instruction turn.
    #[serde(default)]
    pub explain: bool,
    /// Request thought summaries alongside answer text.
    #[serde(default)]
    pub include_thoughts: bool,
    /// Thinking token budget: -1 dynamic, 0 off, positive = cap.
    #[serde(default)]
    pub thinking_budget: Option<i64>,
}

impl ChatRequest {
    /// Session key for this exchange; empty string counts as no session.
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// One unit of streamed output, already classified for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatToken {
    Text(String),
    Thought(String),
}

impl ChatToken {
    pub fn text(&self) -> &str {
        match self {
            ChatToken::Text(text) | ChatToken::Thought(text) => text,
        }
    }

    pub fn is_thought(&self) -> bool {
        matches!(self, ChatToken::Thought(_))
    }
}

/// Streamed exchange output; an `Err` item is terminal.
pub type TokenStream = ReceiverStream<Result<ChatToken, GatewayError>>;

/// Drives chat exchanges over an injected generation client.
pub struct ConversationEngine {
    client: Arc<dyn GenerationClient>,
    sessions: SessionStore,
    default_model: String,
    default_system_prompt: String,
}

impl ConversationEngine {
    pub fn new(client: Arc<dyn GenerationClient>, defaults: &GenerationConfig) -> Self {
        Self {
            client,
            sessions: SessionStore::new(),
            default_model: defaults.model.clone(),
            default_system_prompt: defaults.system_prompt.clone(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run a buffered exchange and return the answer text.
    pub async fn generate(&self, request: &ChatRequest) -> Result<String, GatewayError> {
        let options = self.build_options(request);
        let model = self.model(request).to_string();

        let started = std::time::Instant::now();

        if let Some(session_id) = request.session_id() {
            let mut guard = self.sessions.lock_history(session_id).await;
            let base_len = guard.len();
            guard.extend(Self::request_turns(request));

            match self.client.generate(&model, &guard, &options).await {
                Ok(result) => {
                    info!(
                        session_id = %session_id,
                        model = %model,
                        input_tokens = result.usage.input_tokens,
                        output_tokens = result.usage.output_tokens,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "Generation complete"
                    );
                    guard.push(Content::model(result.text.as_str()));
                    Ok(result.text)
                }
                Err(e) => {
                    guard.truncate(base_len);
                    Err(e.into())
                }
            }
        } else {
            let turns = Self::request_turns(request);
            let result = self.client.generate(&model, &turns, &options).await?;
            info!(
                model = %model,
                input_tokens = result.usage.input_tokens,
                output_tokens = result.usage.output_tokens,
                latency_ms = started.elapsed().as_millis() as u64,
                "Generation complete"
            );
            Ok(result.text)
        }
    }

    /// Open a streamed exchange.
    ///
    /// Fails fast (and rolls back) when the remote stream cannot be opened.
    /// Once open, a pump task owns the session lock until the stream drains,
    /// errors, or the consumer drops the [`TokenStream`]; only a fully
    /// drained stream commits to history.
    pub async fn generate_stream(&self, request: &ChatRequest) -> Result<TokenStream, GatewayError> {
        let options = self.build_options(request);
        let model = self.model(request).to_string();
        let (tx, rx) = mpsc::channel(32);

        if let Some(session_id) = request.session_id() {
            let mut guard = self.sessions.lock_history(session_id).await;
            let base_len = guard.len();
            guard.extend(Self::request_turns(request));

            let fragments = match self.client.generate_stream(&model, &guard, &options).await {
                Ok(fragments) => fragments,
                Err(e) => {
                    guard.truncate(base_len);
                    return Err(e.into());
                }
            };
            debug!(session_id = %session_id, model = %model, "Streaming generation started");
            tokio::spawn(pump_tokens(fragments, tx, Some(Commit { guard, base_len })));
        } else {
            let turns = Self::request_turns(request);
            let fragments = self.client.generate_stream(&model, &turns, &options).await?;
            debug!(model = %model, "Streaming generation started");
            tokio::spawn(pump_tokens(fragments, tx, None));
        }

        Ok(ReceiverStream::new(rx))
    }

    /// Drop a session's history; unknown ids are a no-op.
    pub async fn reset_session(&self, session_id: &str) {
        self.sessions.reset(session_id).await;
        info!(session_id = %session_id, "Session reset");
    }

    fn model<'a>(&'a self, request: &'a ChatRequest) -> &'a str {
        request.model.as_deref().unwrap_or(&self.default_model)
    }

    /// Derive the per-call options from configured defaults plus request
    /// overrides. Reasoning config is attached only when the request asks
    /// for thoughts or names a budget; an absent budget means dynamic.
    fn build_options(&self, request: &ChatRequest) -> GenerationOptions {
        let thinking = if request.include_thoughts || request.thinking_budget.is_some() {
            Some(ThinkingOptions {
                include_thoughts: request.include_thoughts,
                budget: request.thinking_budget.unwrap_or(DYNAMIC_THINKING_BUDGET),
            })
        } else {
            None
        };

        GenerationOptions {
            system_instruction: Some(
                request
                    .system_instruction
                    .clone()
                    .unwrap_or_else(|| self.default_system_prompt.clone()),
            ),
            temperature: request.temperature,
            max_output_tokens: request.max_output_tokens,
            google_search: request.google_search,
            thinking,
        }
    }

    /// The user turns this request contributes: the message, plus the fixed
    /// explain instruction when requested.
    fn request_turns(request: &ChatRequest) -> Vec<Content> {
        let mut turns = vec![Content::user(request.message.as_str())];
        if request.explain {
            turns.push(Content::user(EXPLAIN_INSTRUCTION));
        }
        turns
    }
}

/// A held session lock plus the history length to restore on failure.
struct Commit {
    guard: OwnedMutexGuard<Vec<Content>>,
    base_len: usize,
}

fn rollback(commit: Commit) {
    let Commit {
        mut guard,
        base_len,
    } = commit;
    guard.truncate(base_len);
}

/// Forward fragments as classified tokens, then settle the history.
///
/// Commit happens only after the fragment stream drains cleanly AND every
/// token was delivered; a stream error or a dropped consumer rolls back.
async fn pump_tokens(
    mut fragments: FragmentStream,
    tx: mpsc::Sender<Result<ChatToken, GatewayError>>,
    mut commit: Option<Commit>,
) {
    let mut collected = String::new();

    while let Some(item) = fragments.next().await {
        let fragment = match item {
            Ok(fragment) => fragment,
            Err(e) => {
                if let Some(commit) = commit.take() {
                    rollback(commit);
                }
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };

        for token in tokens_from(fragment) {
            collected.push_str(token.text());
            if tx.send(Ok(token)).await.is_err() {
                // Consumer disconnected mid-stream; already-sent text is
                // best-effort and must not become history.
                if let Some(commit) = commit.take() {
                    rollback(commit);
                }
                return;
            }
        }
    }

    if let Some(Commit { mut guard, .. }) = commit {
        guard.push(Content::model(collected.as_str()));
    }
}

/// Classify a fragment into tokens, preserving segment order.
fn tokens_from(fragment: Fragment) -> Vec<ChatToken> {
    match fragment {
        Fragment::Segments(segments) => segments
            .into_iter()
            .map(|s| {
                if s.thought {
                    ChatToken::Thought(s.text)
                } else {
                    ChatToken::Text(s.text)
                }
            })
            .collect(),
        Fragment::Flat(text) => vec![ChatToken::Text(text)],
    }
}

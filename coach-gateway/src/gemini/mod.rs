//! Remote generation client for the Gemini API.
//!
//! Defines the conversation wire types, the `GenerationClient` trait the
//! engine is injected with, and the fragment protocol for streamed results.

mod client;
mod stream;

pub use client::HttpGeminiClient;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel budget meaning "dynamic/automatic" thinking allocation.
pub const DYNAMIC_THINKING_BUDGET: i64 = -1;

// ============================================================================
// Conversation Types
// ============================================================================

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One text segment of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// One conversation turn. Immutable once appended to a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    /// A user-authored turn with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part { text: text.into() }],
        }
    }

    /// A model-authored turn with a single text part.
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part { text: text.into() }],
        }
    }

    /// Concatenated text of all parts.
    pub fn text(&self) -> String {
        self.parts.iter().map(|p| p.text.as_str()).collect()
    }
}

// ============================================================================
// Generation Options
// ============================================================================

/// Reasoning disclosure settings, attached only when requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkingOptions {
    /// Stream thought summaries alongside answer text.
    pub include_thoughts: bool,
    /// Thinking token budget: -1 dynamic, 0 off, positive = cap.
    pub budget: i64,
}

/// Per-call generation configuration, derived fresh from defaults plus
/// request overrides. Never mutated after construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    pub system_instruction: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<i64>,
    /// Enable the web-search grounding tool.
    pub google_search: bool,
    pub thinking: Option<ThinkingOptions>,
}

// ============================================================================
// Results and Fragments
// ============================================================================

/// Token usage reported by the remote API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

/// A completed buffered generation result.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateResult {
    /// Answer text; empty when the remote result carries none.
    pub text: String,
    pub usage: TokenUsage,
}

/// One text segment of a streamed fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    /// True when this segment is a thought summary rather than answer text.
    pub thought: bool,
}

/// One incremental unit of a streamed generation result.
///
/// `Flat` is a fallback used only when a fragment exposes no structured
/// segments at all; a fragment never produces both variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Segments(Vec<Segment>),
    Flat(String),
}

/// A single-traversal sequence of streamed fragments.
pub type FragmentStream = BoxStream<'static, Result<Fragment, GeminiError>>;

// ============================================================================
// Client Trait
// ============================================================================

/// Error from the remote generation client.
#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("stream error: {0}")]
    Stream(String),
}

/// Opaque remote generation capability.
///
/// Implemented by [`HttpGeminiClient`] in production and by scripted doubles
/// in tests; the engine only sees this trait.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Run one buffered generation over the given conversation.
    async fn generate(
        &self,
        model: &str,
        contents: &[Content],
        options: &GenerationOptions,
    ) -> Result<GenerateResult, GeminiError>;

    /// Open a streamed generation; fragments arrive incrementally.
    async fn generate_stream(
        &self,
        model: &str,
        contents: &[Content],
        options: &GenerationOptions,
    ) -> Result<FragmentStream, GeminiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::Model).unwrap(), "\"model\"");
    }

    #[test]
    fn content_constructors() {
        let turn = Content::user("hello");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.text(), "hello");

        let turn = Content::model("hi there");
        assert_eq!(turn.role, Role::Model);
        assert_eq!(turn.text(), "hi there");
    }

    #[test]
    fn content_wire_shape() {
        let json = serde_json::to_value(Content::user("ping")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["parts"][0]["text"], "ping");
    }

    #[test]
    fn generate_result_defaults_to_empty_usage() {
        let usage = TokenUsage::default();
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.total_tokens, 0);
    }
}

//! HTTP implementation of [`GenerationClient`] against the Gemini REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::stream::fragments_from_response;
use super::{
    Content, FragmentStream, GeminiError, GenerateResult, GenerationClient, GenerationOptions,
    Part, TokenUsage,
};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// How long to wait for a TCP/TLS connection before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Gemini REST client. Holds a pooled `reqwest` client; cheap to clone.
#[derive(Clone)]
pub struct HttpGeminiClient {
    api_key: String,
    http: reqwest::Client,
}

impl HttpGeminiClient {
    /// Build a client with the given credential and overall request timeout.
    ///
    /// The timeout bounds a whole buffered call; for streamed calls it bounds
    /// the full body read, so it should be generous. Fails when the TLS
    /// backend cannot be initialized; a client without its timeouts is not an
    /// acceptable fallback.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            api_key: api_key.into(),
            http,
        })
    }

    fn api_url(&self, model: &str, streaming: bool) -> String {
        if streaming {
            format!(
                "{GEMINI_API_BASE}/{model}:streamGenerateContent?alt=sse&key={}",
                self.api_key
            )
        } else {
            format!("{GEMINI_API_BASE}/{model}:generateContent?key={}", self.api_key)
        }
    }
}

#[async_trait]
impl GenerationClient for HttpGeminiClient {
    async fn generate(
        &self,
        model: &str,
        contents: &[Content],
        options: &GenerationOptions,
    ) -> Result<GenerateResult, GeminiError> {
        let body = build_request_body(contents, options);
        debug!(model = %model, turns = contents.len(), "Gemini generateContent request");

        let response = self
            .http
            .post(self.api_url(model, false))
            .json(&body)
            .send()
            .await
            .map_err(|e| GeminiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GeminiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GeminiError::Parse(e.to_string()))?;

        if let Some(error) = parsed.error {
            return Err(GeminiError::Api {
                status: status.as_u16(),
                message: error.message,
            });
        }

        Ok(GenerateResult {
            text: extract_text(&parsed),
            usage: extract_usage(&parsed),
        })
    }

    async fn generate_stream(
        &self,
        model: &str,
        contents: &[Content],
        options: &GenerationOptions,
    ) -> Result<FragmentStream, GeminiError> {
        let body = build_request_body(contents, options);
        debug!(model = %model, turns = contents.len(), "Gemini streamGenerateContent request");

        let response = self
            .http
            .post(self.api_url(model, true))
            .json(&body)
            .send()
            .await
            .map_err(|e| GeminiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GeminiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(fragments_from_response(response))
    }
}

// ============================================================================
// Wire Types (request)
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(rename = "generationConfig")]
    generation_config: WireGenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<i64>,
    #[serde(rename = "thinkingConfig", skip_serializing_if = "Option::is_none")]
    thinking_config: Option<WireThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct WireThinkingConfig {
    #[serde(rename = "includeThoughts")]
    include_thoughts: bool,
    #[serde(rename = "thinkingBudget")]
    thinking_budget: i64,
}

#[derive(Debug, Serialize)]
struct Tool {
    #[serde(rename = "googleSearch")]
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

fn build_request_body<'a>(
    contents: &'a [Content],
    options: &GenerationOptions,
) -> GenerateContentRequest<'a> {
    GenerateContentRequest {
        contents,
        system_instruction: options.system_instruction.as_ref().map(|text| {
            SystemInstruction {
                parts: vec![Part { text: text.clone() }],
            }
        }),
        generation_config: WireGenerationConfig {
            temperature: options.temperature,
            max_output_tokens: options.max_output_tokens,
            thinking_config: options.thinking.map(|t| WireThinkingConfig {
                include_thoughts: t.include_thoughts,
                thinking_budget: t.budget,
            }),
        },
        tools: options.google_search.then(|| {
            vec![Tool {
                google_search: GoogleSearch {},
            }]
        }),
    }
}

// ============================================================================
// Wire Types (response)
// ============================================================================

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiErrorBody>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    thought: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<i64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<i64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<i64>,
}

/// Answer text of the first candidate: thought parts are excluded, absent
/// text yields an empty string rather than an error.
fn extract_text(response: &GenerateContentResponse) -> String {
    response
        .candidates
        .as_deref()
        .and_then(|c| c.first())
        .and_then(|c| c.content.as_ref())
        .and_then(|c| c.parts.as_deref())
        .map(|parts| {
            parts
                .iter()
                .filter(|p| !p.thought.unwrap_or(false))
                .filter_map(|p| p.text.as_deref())
                .collect()
        })
        .unwrap_or_default()
}

fn extract_usage(response: &GenerateContentResponse) -> TokenUsage {
    response
        .usage_metadata
        .as_ref()
        .map(|u| TokenUsage {
            input_tokens: u.prompt_token_count.unwrap_or(0),
            output_tokens: u.candidates_token_count.unwrap_or(0),
            total_tokens: u.total_token_count.unwrap_or(0),
        })
        .unwrap_or_default()
}

//! Configuration for the coach services.
//!
//! All configuration is sourced from the environment at process start and is
//! constant for the lifetime of the process.
//!
//! # Environment Variable Mapping
//!
//! ## Generation
//! - `GOOGLE_API_KEY` / `GEMINI_API_KEY` → generation.api_key (required)
//! - `GEMINI_MODEL` → generation.model
//! - `SYSTEM_PROMPT` → generation.system_prompt
//! - `GENERATION_TIMEOUT_SECS` → generation.timeout_secs
//!
//! ## Network
//! - `COACH_BIND_ADDRESS` → gateway.host
//! - `COACH_GATEWAY_PORT` → gateway.port
//! - `CORS_ALLOW_ORIGINS` → cors.allow_origins (comma-separated, `*` = any)
//!
//! ## Observability
//! - `LOG_LEVEL` → observability.log_level
//! - `LOG_FORMAT` → observability.log_format (`pretty` | `json`)

use anyhow::{Context, Result};

/// Default model used when no override is supplied.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Default system instruction for the assistant persona.
///
/// Product-owned text: the gateway fronts a robotics training assistant that
/// turns recorded task demonstrations into vision-language-action policies.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a Robotics Training Assistant \
for a platform that converts user-recorded task demonstrations into VLA \
(vision-language-action) policies. Follow this interaction policy for every \
turn: 1) Understanding: Briefly restate the user's goal and constraints in \
1-3 bullet points. 2) Clarify: If any key detail is missing (task, objects, \
environment, robot limits, success criteria, safety), ask 1-3 targeted \
clarification questions and stop. 3) If sufficient info: Provide \
Recommendations with: robot category and example models (manipulator, mobile \
base, mobile manipulator, humanoid), end-effectors, sensors; a concise data \
collection plan (shot list with camera views, number of takes, variations, \
edge cases); evaluation checklist and success metrics; safety considerations; \
optional procurement list. 4) Keep outputs concise, scannable, and \
numbered/bulleted. 5) Do not reveal internal chain-of-thought; think \
privately and output only conclusions and brief rationale. If web grounding \
is enabled, incorporate relevant facts while keeping citations implicit.";

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub generation: GenerationConfig,
    pub cors: CorsConfig,
    pub observability: ObservabilityConfig,
}

/// HTTP server bind configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address. Default: "127.0.0.1" (local only).
    pub host: String,
    /// Listen port.
    pub port: u16,
}

/// Remote generation defaults.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// API credential for the Gemini API. Required.
    pub api_key: String,
    /// Default model identifier.
    pub model: String,
    /// Default system instruction.
    pub system_prompt: String,
    /// Upper bound on a single generation call, in seconds.
    pub timeout_secs: u64,
}

/// CORS configuration (transport concern only).
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins; a single `*` entry means any origin.
    pub allow_origins: Vec<String>,
}

impl CorsConfig {
    /// Whether any origin is allowed.
    pub fn allow_any(&self) -> bool {
        self.allow_origins.iter().any(|o| o == "*")
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Fails when the generation API credential is missing: the process must
    /// not serve traffic without it.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .context("Missing GOOGLE_API_KEY (or GEMINI_API_KEY); refusing to start")?;

        let port = match std::env::var("COACH_GATEWAY_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("Invalid COACH_GATEWAY_PORT: {raw}"))?,
            Err(_) => 8000,
        };

        let timeout_secs = match std::env::var("GENERATION_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("Invalid GENERATION_TIMEOUT_SECS: {raw}"))?,
            Err(_) => 120,
        };

        let allow_origins = std::env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            gateway: GatewayConfig {
                host: std::env::var("COACH_BIND_ADDRESS")
                    .unwrap_or_else(|_| "127.0.0.1".into()),
                port,
            },
            generation: GenerationConfig {
                api_key,
                model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
                system_prompt: std::env::var("SYSTEM_PROMPT")
                    .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.into()),
                timeout_secs,
            },
            cors: CorsConfig { allow_origins },
            observability: ObservabilityConfig {
                log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
                log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".into()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_allow_any() {
        let cors = CorsConfig {
            allow_origins: vec!["*".into()],
        };
        assert!(cors.allow_any());

        let cors = CorsConfig {
            allow_origins: vec!["https://app.example.com".into()],
        };
        assert!(!cors.allow_any());
    }

    #[test]
    fn default_model_is_flash() {
        assert_eq!(DEFAULT_MODEL, "gemini-2.5-flash");
    }

    #[test]
    fn default_system_prompt_is_nonempty() {
        assert!(DEFAULT_SYSTEM_PROMPT.len() > 100);
        assert!(DEFAULT_SYSTEM_PROMPT.contains("Robotics Training Assistant"));
    }
}

//! Coach Gateway - HTTP front end for Gemini chat generation.
//!
//! Exposes buffered and SSE-streaming chat endpoints with optional
//! per-session conversational memory. Sessions live in process memory and
//! serialize concurrent exchanges behind a per-session lock.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod engine;
pub mod error;
pub mod gemini;
pub mod routes;
pub mod session;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use coach_common::config::{Config, CorsConfig};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use engine::{ChatRequest, ChatToken, ConversationEngine, TokenStream};
pub use error::GatewayError;
pub use gemini::{
    Content, Fragment, GeminiError, GenerationClient, GenerationOptions, HttpGeminiClient, Role,
    Segment,
};
pub use routes::{build_router, AppState};
pub use session::SessionStore;

fn cors_layer(cors: &CorsConfig) -> Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if cors.allow_any() {
        return Ok(layer.allow_origin(Any));
    }

    let origins = cors
        .allow_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("Invalid CORS origin: {origin}"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(layer.allow_origin(origins))
}

/// Wire up the engine and serve until the listener fails.
pub async fn start_server(config: &Config) -> Result<()> {
    let client = Arc::new(
        HttpGeminiClient::new(
            config.generation.api_key.clone(),
            Duration::from_secs(config.generation.timeout_secs),
        )
        .context("Failed to build the generation HTTP client")?,
    );
    let engine = Arc::new(ConversationEngine::new(client, &config.generation));
    let router = build_router(AppState { engine }).layer(cors_layer(&config.cors)?);

    let host: IpAddr = config
        .gateway
        .host
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.gateway.host))?;
    let addr = SocketAddr::from((host, config.gateway.port));

    info!(
        addr = %addr,
        model = %config.generation.model,
        "Starting coach gateway"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, router)
        .await
        .context("Server terminated")?;

    Ok(())
}

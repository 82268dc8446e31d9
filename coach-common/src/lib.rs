//! Coach Common - Shared configuration and logging for the coach services.
//!
//! This crate provides:
//! - Environment-sourced configuration types and loading
//! - Logging setup with noisy-dependency filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;

pub use config::{Config, CorsConfig, GatewayConfig, GenerationConfig, ObservabilityConfig};
pub use logging::init_logging;

//! Language model provider layer for Pulsar.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`] — the single `generate(prompt) -> text` capability
//! - [`registry`] — static specs for every supported vendor, looked up by config name
//! - [`http_provider::HttpProvider`] — one HTTP client covering each API flavour
//! - [`http_provider::create_provider`] — builder from typed provider settings

pub mod http_provider;
pub mod registry;
pub mod traits;

// Re-export main types for convenience
pub use http_provider::{create_provider, HttpProvider};
pub use registry::{ApiFlavor, ProviderSpec, PROVIDERS};
pub use traits::{LlmProvider, ProviderError};

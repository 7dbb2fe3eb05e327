//! Detection backend selection.
//!
//! Face encoding and landmark extraction are external integrations;
//! this module maps a configured backend name to concrete providers.
//! The built-in `null` backend sees no faces and exists for pipeline
//! bring-up on machines without a model runtime.

use anyhow::bail;
use presence_core::{EmbeddingProvider, LandmarkProvider, NullProvider};

/// The pair of providers a session needs.
pub struct ProviderSet {
    pub faces: Box<dyn EmbeddingProvider>,
    pub landmarks: Box<dyn LandmarkProvider>,
}

/// Instantiate providers for the configured backend name.
pub fn create(backend: &str) -> anyhow::Result<ProviderSet> {
    match backend {
        "null" | "stub" => {
            tracing::warn!(
                "using the null detection backend: no faces will be detected or matched"
            );
            Ok(ProviderSet {
                faces: Box::new(NullProvider),
                landmarks: Box::new(NullProvider),
            })
        }
        other => bail!("unknown provider backend '{other}' (available: null)"),
    }
}

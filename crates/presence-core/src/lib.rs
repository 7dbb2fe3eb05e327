//! presence-core — Recognition and liveness primitives.
//!
//! Nearest-neighbor identity matching over face embeddings and an
//! edge-triggered blink detector driven by eye-aperture ratios.
//! Face detection/encoding and landmark extraction are external
//! collaborators behind the [`provider`] traits.

pub mod liveness;
pub mod provider;
pub mod types;

pub use liveness::BlinkDetector;
pub use provider::{EmbeddingProvider, FaceObservation, LandmarkProvider, NullProvider};
pub use types::{BoundingBox, Embedding, Identity, MatchResult, Matcher, NearestMatcher};

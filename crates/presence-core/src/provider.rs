//! External collaborator interfaces — face detection/encoding and
//! facial landmark extraction.
//!
//! The pipeline treats both algorithms as opaque: an
//! [`EmbeddingProvider`] turns an image into bounding boxes plus
//! fixed-dimension embeddings, a [`LandmarkProvider`] turns an image
//! into normalized keypoints for at most one face. Frames are passed
//! as raw grayscale buffers so providers stay decoupled from the
//! capture layer.

use crate::types::{BoundingBox, Embedding};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("invalid frame: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
}

/// Check a grayscale buffer against its stated dimensions.
///
/// Backends call this before touching pixel data; a mismatch means the
/// caller handed over a buffer for a different frame geometry.
pub fn validate_frame(data: &[u8], width: u32, height: u32) -> Result<(), ProviderError> {
    let expected = width as usize * height as usize;
    if data.len() < expected {
        return Err(ProviderError::InvalidFrame {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// One detected face: where it is and what it looks like.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Face detection and embedding extraction over a grayscale image.
pub trait EmbeddingProvider: Send {
    /// Detect faces in the image and return one observation per face.
    /// Zero detections is a normal outcome, not an error.
    fn detect(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceObservation>, ProviderError>;
}

/// Facial landmark extraction for liveness.
pub trait LandmarkProvider: Send {
    /// Extract normalized (x, y) keypoints in [0, 1] for at most one
    /// face. `None` means no face was found this frame.
    fn extract(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Vec<(f32, f32)>>, ProviderError>;
}

/// Provider that never sees a face.
///
/// Lets the capture/render pipeline run end to end before a real
/// detection backend is wired in, and keeps tests hermetic.
pub struct NullProvider;

impl EmbeddingProvider for NullProvider {
    fn detect(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceObservation>, ProviderError> {
        validate_frame(data, width, height)?;
        Ok(Vec::new())
    }
}

impl LandmarkProvider for NullProvider {
    fn extract(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Vec<(f32, f32)>>, ProviderError> {
        validate_frame(data, width, height)?;
        Ok(None)
    }
}

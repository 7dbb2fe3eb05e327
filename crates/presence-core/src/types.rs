use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in the coordinate space of the
/// image it was detected on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Rescale the box by a uniform factor.
    ///
    /// Detection runs on a downscaled frame; multiplying by the inverse
    /// of the downscale factor maps the box back to native resolution.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
        }
    }
}

/// Face embedding vector (fixed dimension per provider model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Only meaningful when both embeddings have the same dimension;
    /// callers must check [`dim`](Self::dim) first.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Arithmetic mean of a set of same-dimension embeddings.
    ///
    /// Used at enrollment to average the sample embeddings into one
    /// stored vector. Returns `None` for an empty set or mismatched
    /// dimensions.
    pub fn mean(samples: &[Embedding]) -> Option<Embedding> {
        let first = samples.first()?;
        let dim = first.dim();
        if samples.iter().any(|s| s.dim() != dim) {
            return None;
        }
        let n = samples.len() as f32;
        let mut acc = vec![0.0f32; dim];
        for sample in samples {
            for (a, v) in acc.iter_mut().zip(sample.values.iter()) {
                *a += v;
            }
        }
        for a in acc.iter_mut() {
            *a /= n;
        }
        Some(Embedding::new(acc))
    }
}

/// An enrolled identity: stable id, display name, averaged embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the enrolled roster.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance of the best candidate (f32::INFINITY for an
    /// empty roster).
    pub distance: f32,
    /// The matched identity (if any).
    pub identity: Option<Identity>,
}

impl MatchResult {
    pub fn no_match(distance: f32) -> Self {
        MatchResult {
            matched: false,
            distance,
            identity: None,
        }
    }
}

/// Strategy for comparing a probe embedding against the enrolled roster.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, roster: &[Identity], threshold: f32) -> MatchResult;
}

/// Nearest-neighbor matcher with a rejection threshold.
///
/// Scans the whole roster, keeps the first minimum (stable in roster
/// order on ties), and reports a match only when that minimum is
/// strictly below the threshold. False negatives are preferred over
/// false positives here, so the threshold stays conservative.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn best_match(&self, probe: &Embedding, roster: &[Identity], threshold: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in roster.iter().enumerate() {
            if identity.embedding.dim() != probe.dim() {
                tracing::warn!(
                    id = %identity.id,
                    roster_dim = identity.embedding.dim(),
                    probe_dim = probe.dim(),
                    "skipping roster entry with mismatched embedding dimension"
                );
                continue;
            }
            let dist = probe.euclidean_distance(&identity.embedding);
            // Strict < keeps the first minimum on exact ties.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < threshold => MatchResult {
                matched: true,
                distance: best_dist,
                identity: Some(roster[idx].clone()),
            },
            _ => MatchResult::no_match(best_dist),
        }
    }
}

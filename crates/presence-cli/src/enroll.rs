//! Enrollment — capture single-face samples, average the embeddings,
//! commit the identity.
//!
//! A sample only counts when exactly one face is detected in the
//! frame: zero faces means nobody is posing yet, two or more means
//! the capture is ambiguous. Either way the frame is skipped silently
//! and the loop keeps going, so the retry is implicit.

use crate::config::Config;
use presence_core::{Embedding, EmbeddingProvider, Identity};
use presence_hw::FrameFeed;
use presence_store::{AttendanceStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

const EMPTY_FRAME_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("enrollment interrupted after {collected} of {required} samples")]
    Interrupted { collected: usize, required: usize },
    #[error("embedding samples disagree on dimension")]
    InconsistentSamples,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Capture `config.enroll_samples` single-face sample embeddings.
///
/// Each captured frame is considered at most once (deduplicated by
/// capture sequence number, since the shared slot can serve the same
/// frame repeatedly). Provider errors skip the frame.
pub fn collect_samples(
    feed: &dyn FrameFeed,
    provider: &mut dyn EmbeddingProvider,
    config: &Config,
    stop: &AtomicBool,
) -> Result<Vec<Embedding>, EnrollError> {
    let required = config.enroll_samples;
    let mut samples = Vec::with_capacity(required);
    let mut last_sequence: Option<u32> = None;

    while samples.len() < required {
        if stop.load(Ordering::SeqCst) {
            return Err(EnrollError::Interrupted {
                collected: samples.len(),
                required,
            });
        }

        let Some(frame) = feed.read() else {
            std::thread::sleep(EMPTY_FRAME_BACKOFF);
            continue;
        };
        if last_sequence == Some(frame.sequence) {
            std::thread::sleep(EMPTY_FRAME_BACKOFF);
            continue;
        }
        last_sequence = Some(frame.sequence);

        let small = frame.downscaled(config.scale_factor);
        let mut faces = match provider.detect(&small.data, small.width, small.height) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::debug!(error = %e, "detection failed during enrollment; skipping frame");
                continue;
            }
        };

        if faces.len() != 1 {
            // 0 = nobody posing, 2+ = ambiguous capture. Skip, don't count.
            continue;
        }
        if let Some(obs) = faces.pop() {
            samples.push(obs.embedding);
            tracing::info!(
                collected = samples.len(),
                required,
                "enrollment sample captured"
            );
        }
    }

    Ok(samples)
}

/// Full enrollment: collect samples, average, commit the identity.
///
/// No partial write: a duplicate id surfaces from the store after the
/// capture, with nothing stored.
pub fn enroll(
    id: String,
    name: String,
    feed: &dyn FrameFeed,
    provider: &mut dyn EmbeddingProvider,
    store: &AttendanceStore,
    config: &Config,
    stop: &AtomicBool,
) -> Result<Identity, EnrollError> {
    tracing::info!(id, name, samples = config.enroll_samples, "enrollment started");
    let samples = collect_samples(feed, provider, config, stop)?;
    let embedding = Embedding::mean(&samples).ok_or(EnrollError::InconsistentSamples)?;

    let identity = Identity {
        id,
        name,
        embedding,
    };
    store.add_identity(&identity)?;
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use presence_core::provider::{FaceObservation, ProviderError};
    use presence_core::BoundingBox;
    use presence_hw::Frame;
    use presence_store::SystemClock;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Endless feed of distinct frames.
    struct CountingFeed {
        next: Mutex<u32>,
    }

    impl FrameFeed for CountingFeed {
        fn read(&self) -> Option<Arc<Frame>> {
            let mut seq = self.next.lock().unwrap();
            *seq += 1;
            Some(Arc::new(Frame {
                data: vec![0u8; 100 * 100],
                width: 100,
                height: 100,
                timestamp: std::time::Instant::now(),
                sequence: *seq,
            }))
        }
    }

    /// Plays back a script of face counts, embedding each single face
    /// with the given vector.
    struct ScriptedFaces {
        script: VecDeque<(usize, Vec<f32>)>,
    }

    impl EmbeddingProvider for ScriptedFaces {
        fn detect(
            &mut self,
            _data: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<FaceObservation>, ProviderError> {
            let (count, values) = self.script.pop_front().unwrap_or((0, vec![]));
            Ok((0..count)
                .map(|_| FaceObservation {
                    bbox: BoundingBox {
                        x: 0.0,
                        y: 0.0,
                        width: 5.0,
                        height: 5.0,
                        confidence: 0.9,
                    },
                    embedding: Embedding::new(values.clone()),
                })
                .collect())
        }
    }

    fn config_with_samples(n: usize) -> Config {
        let mut config = test_config();
        config.enroll_samples = n;
        config
    }

    #[test]
    fn test_only_single_face_frames_count() {
        let config = config_with_samples(3);
        let feed = CountingFeed {
            next: Mutex::new(0),
        };
        // 0 faces, 2 faces, then three single-face frames.
        let mut provider = ScriptedFaces {
            script: vec![
                (0, vec![]),
                (2, vec![9.0, 9.0]),
                (1, vec![1.0, 4.0]),
                (1, vec![2.0, 5.0]),
                (1, vec![3.0, 6.0]),
            ]
            .into(),
        };

        let stop = AtomicBool::new(false);
        let samples = collect_samples(&feed, &mut provider, &config, &stop).unwrap();

        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].values, vec![1.0, 4.0]);
        assert_eq!(samples[2].values, vec![3.0, 6.0]);
    }

    #[test]
    fn test_enroll_stores_mean_embedding() {
        let config = config_with_samples(2);
        let feed = CountingFeed {
            next: Mutex::new(0),
        };
        let mut provider = ScriptedFaces {
            script: vec![(1, vec![1.0, 3.0]), (1, vec![3.0, 5.0])].into(),
        };
        let store = AttendanceStore::open_in_memory(100, Arc::new(SystemClock)).unwrap();

        let stop = AtomicBool::new(false);
        let identity = enroll(
            "E1".into(),
            "Ada".into(),
            &feed,
            &mut provider,
            &store,
            &config,
            &stop,
        )
        .unwrap();

        assert_eq!(identity.embedding.values, vec![2.0, 4.0]);
        let roster = store.list_identities().unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].name, "Ada");
        assert_eq!(roster[0].embedding.values, vec![2.0, 4.0]);
    }

    #[test]
    fn test_duplicate_id_leaves_store_unchanged() {
        let config = config_with_samples(1);
        let feed = CountingFeed {
            next: Mutex::new(0),
        };
        let store = AttendanceStore::open_in_memory(100, Arc::new(SystemClock)).unwrap();
        let stop = AtomicBool::new(false);

        let mut provider = ScriptedFaces {
            script: vec![(1, vec![1.0])].into(),
        };
        enroll(
            "E1".into(),
            "Ada".into(),
            &feed,
            &mut provider,
            &store,
            &config,
            &stop,
        )
        .unwrap();

        let mut provider = ScriptedFaces {
            script: vec![(1, vec![2.0])].into(),
        };
        let err = enroll(
            "E1".into(),
            "Imposter".into(),
            &feed,
            &mut provider,
            &store,
            &config,
            &stop,
        )
        .unwrap_err();

        assert!(matches!(err, EnrollError::Store(StoreError::Duplicate(_))));
        let roster = store.list_identities().unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].name, "Ada");
        assert_eq!(roster[0].embedding.values, vec![1.0]);
    }

    #[test]
    fn test_stop_flag_interrupts_capture() {
        let config = config_with_samples(5);
        let feed = CountingFeed {
            next: Mutex::new(0),
        };
        let mut provider = ScriptedFaces {
            script: VecDeque::new(), // never a face
        };

        let stop = AtomicBool::new(true);
        let err = collect_samples(&feed, &mut provider, &config, &stop).unwrap_err();
        assert!(matches!(
            err,
            EnrollError::Interrupted {
                collected: 0,
                required: 5
            }
        ));
    }
}

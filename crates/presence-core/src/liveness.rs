//! Blink liveness detection from facial landmarks.
//!
//! Computes per-eye aperture ratios (EAR) from six landmark points per
//! eye and fires an edge-triggered blink event when the eyes reopen
//! after a qualifying closure. Firing on the reopening edge, not the
//! closing one, keeps a prolonged closure from reporting more than one
//! blink.

use crate::provider::LandmarkProvider;

/// Face-mesh landmark indices for the six left-eye points:
/// [outer corner, upper lid ×2, inner corner, lower lid ×2].
pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
/// Face-mesh landmark indices for the six right-eye points.
pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];

/// Stateful blink detector; one instance per recognition session.
pub struct BlinkDetector {
    ear_threshold: f32,
    consecutive_frames: u32,
    closed_frames: u32,
}

impl BlinkDetector {
    pub fn new(ear_threshold: f32, consecutive_frames: u32) -> Self {
        Self {
            ear_threshold,
            consecutive_frames,
            closed_frames: 0,
        }
    }

    /// Run one liveness step against a full-resolution frame.
    ///
    /// Returns true iff a blink event occurred this call. A frame with
    /// no detectable face leaves the closure counter unchanged, and a
    /// provider error is logged and treated the same way — liveness
    /// must never take the frame loop down.
    pub fn check(
        &mut self,
        provider: &mut dyn LandmarkProvider,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> bool {
        match provider.extract(data, width, height) {
            Ok(Some(landmarks)) => self.observe(&landmarks, width, height),
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(error = %e, "landmark extraction failed; skipping liveness step");
                false
            }
        }
    }

    /// Advance the blink state machine by one frame of landmarks.
    ///
    /// EAR below the threshold counts a closed frame and never fires.
    /// EAR at/above the threshold fires iff the closure counter had
    /// reached the consecutive-frame requirement, then resets it.
    pub fn observe(&mut self, landmarks: &[(f32, f32)], width: u32, height: u32) -> bool {
        let Some(ear) = aperture_ratio(landmarks, width, height) else {
            // Landmarks unusable this frame; state unchanged.
            return false;
        };

        if ear < self.ear_threshold {
            self.closed_frames += 1;
            return false;
        }

        let fired = self.closed_frames >= self.consecutive_frames;
        self.closed_frames = 0;
        fired
    }
}

/// Average eye-aperture ratio across both eyes, in pixel space.
///
/// Per eye: (sum of the two vertical eyelid distances) divided by
/// (2 × the horizontal corner distance). Returns `None` when the
/// landmark list is too short for the eye indices or an eye is
/// degenerate (zero corner distance).
pub fn aperture_ratio(landmarks: &[(f32, f32)], width: u32, height: u32) -> Option<f32> {
    let left = eye_ratio(landmarks, &LEFT_EYE, width, height)?;
    let right = eye_ratio(landmarks, &RIGHT_EYE, width, height)?;
    Some((left + right) / 2.0)
}

fn eye_ratio(landmarks: &[(f32, f32)], indices: &[usize; 6], width: u32, height: u32) -> Option<f32> {
    let mut p = [(0.0f32, 0.0f32); 6];
    for (slot, &idx) in p.iter_mut().zip(indices.iter()) {
        let &(x, y) = landmarks.get(idx)?;
        // Denormalize: EAR is computed in pixel space so the frame's
        // aspect ratio weighs vertical and horizontal distances the
        // same way the capture does.
        *slot = (x * width as f32, y * height as f32);
    }

    let vertical = dist(p[1], p[5]) + dist(p[2], p[4]);
    let horizontal = dist(p[0], p[3]) * 2.0;
    if horizontal <= 0.0 {
        return None;
    }
    Some(vertical / horizontal)
}

fn dist(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 1000;
    const H: u32 = 1000;

    /// Synthetic landmark list where both eyes have a 0.1-normalized
    /// corner distance and eyelid points `dy` above/below the centre
    /// line, giving EAR = 20 * dy at 1000x1000.
    fn landmarks_with_lid_offset(dy: f32) -> Vec<(f32, f32)> {
        let mut lm = vec![(0.0, 0.0); 400];
        for (indices, x0) in [(&LEFT_EYE, 0.3f32), (&RIGHT_EYE, 0.6f32)] {
            lm[indices[0]] = (x0, 0.5);
            lm[indices[3]] = (x0 + 0.1, 0.5);
            lm[indices[1]] = (x0 + 0.03, 0.5 - dy);
            lm[indices[5]] = (x0 + 0.03, 0.5 + dy);
            lm[indices[2]] = (x0 + 0.07, 0.5 - dy);
            lm[indices[4]] = (x0 + 0.07, 0.5 + dy);
        }
        lm
    }

    fn open_eyes() -> Vec<(f32, f32)> {
        landmarks_with_lid_offset(0.02) // EAR = 0.4
    }

    fn closed_eyes() -> Vec<(f32, f32)> {
        landmarks_with_lid_offset(0.005) // EAR = 0.1
    }

    #[test]
    fn test_aperture_ratio_geometry() {
        let ear = aperture_ratio(&open_eyes(), W, H).unwrap();
        assert!((ear - 0.4).abs() < 1e-4, "expected 0.4, got {ear}");
        let ear = aperture_ratio(&closed_eyes(), W, H).unwrap();
        assert!((ear - 0.1).abs() < 1e-4, "expected 0.1, got {ear}");
    }

    #[test]
    fn test_aperture_ratio_short_landmark_list() {
        assert!(aperture_ratio(&[(0.5, 0.5); 10], W, H).is_none());
    }

    #[test]
    fn test_blink_fires_on_reopening_frame_only() {
        let mut detector = BlinkDetector::new(0.26, 1);
        assert!(!detector.observe(&open_eyes(), W, H));
        // Closing frame must not fire — the eye may still be closing.
        assert!(!detector.observe(&closed_eyes(), W, H));
        // Reopening frame fires exactly once.
        assert!(detector.observe(&open_eyes(), W, H));
        assert!(!detector.observe(&open_eyes(), W, H));
    }

    #[test]
    fn test_prolonged_closure_reports_one_blink() {
        let mut detector = BlinkDetector::new(0.26, 1);
        for _ in 0..5 {
            assert!(!detector.observe(&closed_eyes(), W, H));
        }
        assert!(detector.observe(&open_eyes(), W, H));
        assert!(!detector.observe(&open_eyes(), W, H));
    }

    #[test]
    fn test_open_eyes_never_blink() {
        let mut detector = BlinkDetector::new(0.26, 1);
        for _ in 0..10 {
            assert!(!detector.observe(&open_eyes(), W, H));
        }
    }

    #[test]
    fn test_consecutive_frame_requirement() {
        let mut detector = BlinkDetector::new(0.26, 2);
        // One closed frame is not a qualifying closure.
        detector.observe(&closed_eyes(), W, H);
        assert!(!detector.observe(&open_eyes(), W, H));
        // Two closed frames qualify.
        detector.observe(&closed_eyes(), W, H);
        detector.observe(&closed_eyes(), W, H);
        assert!(detector.observe(&open_eyes(), W, H));
    }

    #[test]
    fn test_missing_face_preserves_closure_state() {
        let mut detector = BlinkDetector::new(0.26, 1);
        detector.observe(&closed_eyes(), W, H);
        // Frame with unusable landmarks: no blink, counter untouched.
        assert!(!detector.observe(&[], W, H));
        assert!(detector.observe(&open_eyes(), W, H));
    }

    #[test]
    fn test_check_with_null_provider() {
        use crate::provider::{LandmarkProvider, NullProvider, ProviderError};

        let mut detector = BlinkDetector::new(0.26, 1);
        let mut provider = NullProvider;
        assert!(!detector.check(&mut provider, &[0u8; 4], 2, 2));

        struct FailingProvider;
        impl LandmarkProvider for FailingProvider {
            fn extract(
                &mut self,
                _data: &[u8],
                _width: u32,
                _height: u32,
            ) -> Result<Option<Vec<(f32, f32)>>, ProviderError> {
                Err(ProviderError::Backend("boom".into()))
            }
        }
        let mut failing = FailingProvider;
        // Provider errors are swallowed; the loop keeps running.
        assert!(!detector.check(&mut failing, &[0u8; 4], 2, 2));
    }
}

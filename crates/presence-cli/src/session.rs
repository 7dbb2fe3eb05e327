//! The live recognition session — the per-frame state machine tying
//! capture, matching, liveness, and the attendance commit together.
//!
//! Face detection is the expensive step, so it runs only every
//! `recognition_interval` frames on a downscaled frame; blink
//! detection runs every frame because a blink is a short transient.
//! Between detection cycles the last detection list is reused, so a
//! blink may commit against a match that is up to one interval old —
//! a known staleness window, kept deliberately.

use crate::config::Config;
use crate::notify::SuccessCue;
use crate::render::FrameSink;
use presence_core::{
    BlinkDetector, BoundingBox, EmbeddingProvider, Identity, LandmarkProvider, Matcher,
    NearestMatcher,
};
use presence_hw::{Frame, FrameFeed};
use presence_store::{AttendanceStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Pause before re-polling an empty frame slot.
const EMPTY_FRAME_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Display state of one detected face. Green means the log already has
/// (or just got) an event for this identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    Unknown,
    PendingBlink,
    AlreadyMarked,
    JustMarked,
}

/// One face from the most recent detection cycle, in native frame
/// coordinates. Lives until the next cycle replaces the list.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub badge: Badge,
    pub identity: Option<Identity>,
}

/// Counters reported when the session stops.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionStats {
    pub frames: u64,
    pub detection_cycles: u64,
    pub marks: u64,
}

/// Orchestrates one camera session: Idle until [`run`] is called,
/// Running while the stop flag stays clear, Stopped after.
///
/// The roster is snapshotted at construction; enrollments made while
/// the session runs are picked up on the next session.
pub struct RecognitionSession<'a> {
    config: &'a Config,
    store: &'a AttendanceStore,
    roster: Vec<Identity>,
    faces: Box<dyn EmbeddingProvider>,
    landmarks: Box<dyn LandmarkProvider>,
    blink: BlinkDetector,
    matcher: NearestMatcher,
    cue: Box<dyn SuccessCue>,
    sink: Box<dyn FrameSink>,
}

impl<'a> RecognitionSession<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a AttendanceStore,
        faces: Box<dyn EmbeddingProvider>,
        landmarks: Box<dyn LandmarkProvider>,
        cue: Box<dyn SuccessCue>,
        sink: Box<dyn FrameSink>,
    ) -> Result<Self, SessionError> {
        let roster = store.list_identities()?;
        tracing::info!(enrolled = roster.len(), "roster loaded");
        Ok(Self {
            config,
            store,
            roster,
            faces,
            landmarks,
            blink: BlinkDetector::new(config.ear_threshold, config.consecutive_frames),
            matcher: NearestMatcher,
            cue,
            sink,
        })
    }

    /// Run the frame loop until the stop flag is set.
    ///
    /// An empty frame slot (camera warming up, device gone) skips the
    /// iteration; the loop itself never errors out — all per-frame
    /// faults are logged and absorbed.
    pub fn run(&mut self, feed: &dyn FrameFeed, stop: &AtomicBool) -> SessionStats {
        let mut stats = SessionStats::default();
        let mut current: Vec<Detection> = Vec::new();

        tracing::info!("recognition session running");
        while !stop.load(Ordering::SeqCst) {
            let Some(frame) = feed.read() else {
                std::thread::sleep(EMPTY_FRAME_BACKOFF);
                continue;
            };

            // Liveness runs every frame, independent of the detection
            // cadence.
            let blinked =
                self.blink
                    .check(self.landmarks.as_mut(), &frame.data, frame.width, frame.height);

            if stats.frames % self.config.recognition_interval == 0 {
                self.refresh_detections(&frame, &mut current);
                stats.detection_cycles += 1;
            }

            if blinked {
                stats.marks += self.commit_pending(&mut current);
            }

            self.sink.present(&frame, &current);
            stats.frames += 1;
        }

        tracing::info!(
            frames = stats.frames,
            detection_cycles = stats.detection_cycles,
            marks = stats.marks,
            "recognition session stopped"
        );
        stats
    }

    /// Run one detection cycle, replacing the current detection list.
    ///
    /// Detection happens on a downscaled frame; boxes are mapped back
    /// to native resolution before they join full-resolution liveness
    /// state. On provider failure the previous list is kept — a stale
    /// overlay beats a flickering one.
    fn refresh_detections(&mut self, frame: &Frame, current: &mut Vec<Detection>) {
        let small = frame.downscaled(self.config.scale_factor);
        let observations = match self.faces.detect(&small.data, small.width, small.height) {
            Ok(obs) => obs,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed; keeping previous detections");
                return;
            }
        };

        let inverse_scale = 1.0 / self.config.scale_factor;
        current.clear();
        for obs in observations {
            let bbox = obs.bbox.scaled(inverse_scale);
            let result =
                self.matcher
                    .best_match(&obs.embedding, &self.roster, self.config.match_threshold);

            let detection = match result.identity {
                Some(identity) => {
                    if self.in_cooldown(&identity.id) {
                        Detection {
                            bbox,
                            label: format!("{}: Marked", identity.name),
                            badge: Badge::AlreadyMarked,
                            identity: Some(identity),
                        }
                    } else {
                        Detection {
                            bbox,
                            label: format!("{}: Blink!", identity.name),
                            badge: Badge::PendingBlink,
                            identity: Some(identity),
                        }
                    }
                }
                None => Detection {
                    bbox,
                    label: "Unknown".to_string(),
                    badge: Badge::Unknown,
                    identity: None,
                },
            };
            current.push(detection);
        }
    }

    /// Cooldown probe for display state. A store fault counts as "in
    /// cooldown" so a flaky disk cannot cause premature green-lighting;
    /// the write path re-checks atomically anyway.
    fn in_cooldown(&self, id: &str) -> bool {
        match self.store.is_in_cooldown(id) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(id, error = %e, "cooldown check failed");
                true
            }
        }
    }

    /// A blink happened: commit attendance for every face still
    /// waiting on one. Cooldown rejections stay silent; store faults
    /// are logged and skipped.
    fn commit_pending(&mut self, detections: &mut [Detection]) -> u64 {
        let mut marks = 0;
        for det in detections.iter_mut() {
            if det.badge != Badge::PendingBlink {
                continue;
            }
            let Some(identity) = &det.identity else {
                continue;
            };
            match self.store.mark_attendance(&identity.id) {
                Ok(true) => {
                    det.badge = Badge::JustMarked;
                    det.label = format!("{}: Success!", identity.name);
                    self.cue.success();
                    marks += 1;
                    tracing::info!(id = %identity.id, name = %identity.name, "attendance committed");
                }
                Ok(false) => {
                    // Lost the cooldown race; expected, silent.
                }
                Err(e) => {
                    tracing::warn!(id = %identity.id, error = %e, "attendance mark failed");
                }
            }
        }
        marks
    }
}

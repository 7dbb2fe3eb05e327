use std::path::PathBuf;

/// Session configuration, loaded from environment variables.
///
/// One immutable struct passed into each component at construction;
/// the pipeline has no free-floating tunables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Detection backend name (see `backend::create`).
    pub provider_backend: String,
    /// Euclidean distance below which a probe matches an identity.
    /// Conservative on purpose: a missed match costs a retry, a false
    /// match corrupts the attendance log.
    pub match_threshold: f32,
    /// Eye-aperture ratio below which the eyes count as closed.
    pub ear_threshold: f32,
    /// Closed frames required before a reopening counts as a blink.
    pub consecutive_frames: u32,
    /// Minimum spacing between two accepted events for one identity.
    pub cooldown_seconds: u64,
    /// Face detection runs every Nth frame; liveness runs every frame.
    pub recognition_interval: u64,
    /// Downscale factor for the detection frame.
    pub scale_factor: f32,
    /// Single-face samples required per enrollment.
    pub enroll_samples: usize,
    /// Output display dimensions after the 2:1 center crop.
    pub target_width: u32,
    pub target_height: u32,
    /// Directory for PNG snapshots of the rendered output (optional).
    pub snapshot_dir: Option<PathBuf>,
    /// Write a snapshot every Nth rendered frame.
    pub snapshot_every: u64,
}

impl Config {
    /// Load configuration from `PRESENCE_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presence");

        let db_path = std::env::var("PRESENCE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            camera_device: std::env::var("PRESENCE_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            db_path,
            provider_backend: std::env::var("PRESENCE_PROVIDER")
                .unwrap_or_else(|_| "null".to_string()),
            match_threshold: env_f32("PRESENCE_MATCH_THRESHOLD", 0.55),
            ear_threshold: env_f32("PRESENCE_EAR_THRESHOLD", 0.26),
            consecutive_frames: env_u32("PRESENCE_CONSECUTIVE_FRAMES", 1),
            cooldown_seconds: env_u64("PRESENCE_COOLDOWN_SECONDS", 100),
            // Clamped: the session loop takes frame_count modulo this.
            recognition_interval: env_u64("PRESENCE_RECOGNITION_INTERVAL", 10).max(1),
            scale_factor: env_f32("PRESENCE_SCALE_FACTOR", 0.25),
            enroll_samples: env_usize("PRESENCE_ENROLL_SAMPLES", 20),
            target_width: env_u32("PRESENCE_TARGET_WIDTH", 1500),
            target_height: env_u32("PRESENCE_TARGET_HEIGHT", 750),
            snapshot_dir: std::env::var("PRESENCE_SNAPSHOT_DIR").ok().map(PathBuf::from),
            snapshot_every: env_u64("PRESENCE_SNAPSHOT_EVERY", 30),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}


#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        camera_device: "/dev/video-test".into(),
        db_path: PathBuf::from(":memory:"),
        provider_backend: "null".into(),
        match_threshold: 0.55,
        ear_threshold: 0.26,
        consecutive_frames: 1,
        cooldown_seconds: 100,
        recognition_interval: 10,
        scale_factor: 0.25,
        enroll_samples: 20,
        target_width: 1500,
        target_height: 750,
        snapshot_dir: None,
        snapshot_every: 30,
    }
}

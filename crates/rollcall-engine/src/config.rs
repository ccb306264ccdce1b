//! Engine configuration, loaded from `ROLLCALL_*` environment variables.

use std::path::PathBuf;

use rollcall_core::quality::QualityConfig;
use rollcall_core::window::WindowConfig;

pub struct EngineConfig {
    /// Similarity threshold for a positive match.
    pub match_threshold: f32,
    pub quality: QualityConfig,
    pub window: WindowConfig,
    /// Deadline for WiFi/GPS signal probes, in seconds.
    pub signal_timeout_secs: u64,
    /// Where the host positioning agent publishes its latest GPS fix
    /// as JSON, if the host has one.
    pub gps_fix_path: Option<PathBuf>,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Service secret the template key is derived from.
    pub service_secret: String,
    /// Bound on queued verification requests.
    pub queue_depth: usize,
    /// Engine worker threads draining the request queue.
    pub worker_threads: usize,
}

impl EngineConfig {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let service_secret = std::env::var("ROLLCALL_SECRET").unwrap_or_else(|_| {
            tracing::warn!("ROLLCALL_SECRET not set; using the development secret");
            "rollcall-dev-secret".to_string()
        });

        let mut quality = QualityConfig::default();
        quality.acceptance_floor = env_f32("ROLLCALL_QUALITY_FLOOR", quality.acceptance_floor);

        Self {
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", 0.7),
            quality,
            window: WindowConfig {
                late_threshold_min: env_i64("ROLLCALL_LATE_THRESHOLD_MIN", 10),
            },
            signal_timeout_secs: env_u64("ROLLCALL_SIGNAL_TIMEOUT_SECS", 10),
            gps_fix_path: std::env::var("ROLLCALL_GPS_FIX_PATH").ok().map(PathBuf::from),
            db_path,
            service_secret,
            queue_depth: env_usize("ROLLCALL_QUEUE_DEPTH", 16),
            worker_threads: env_usize("ROLLCALL_WORKER_THREADS", 4),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.7,
            quality: QualityConfig::default(),
            window: WindowConfig::default(),
            signal_timeout_secs: 10,
            gps_fix_path: None,
            db_path: PathBuf::from("attendance.db"),
            service_secret: "rollcall-dev-secret".to_string(),
            queue_depth: 16,
            worker_threads: 4,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
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

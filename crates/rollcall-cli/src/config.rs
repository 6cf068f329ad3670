use rollcall_core::{CapturePolicy, DEFAULT_DISTANCE_THRESHOLD};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding one descriptor file per enrolled student.
    pub descriptor_dir: PathBuf,
    /// Directory where rendered reports are written.
    pub reports_dir: PathBuf,
    /// Maximum Euclidean distance for a positive match (strict).
    pub distance_threshold: f32,
    /// Minimum spacing between frames that go through matching.
    pub process_interval: Duration,
    /// Samples averaged into one enrollment descriptor.
    pub enroll_samples: usize,
    /// Fewest usable samples an enrollment may be committed with.
    pub min_enroll_samples: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        Self {
            db_path: env_path("ROLLCALL_DB_PATH").unwrap_or_else(|| data_dir.join("attendance.db")),
            descriptor_dir: env_path("ROLLCALL_DESCRIPTOR_DIR")
                .unwrap_or_else(|| data_dir.join("descriptors")),
            reports_dir: env_path("ROLLCALL_REPORTS_DIR").unwrap_or_else(|| data_dir.join("reports")),
            distance_threshold: env_f32("ROLLCALL_DISTANCE_THRESHOLD", DEFAULT_DISTANCE_THRESHOLD),
            process_interval: Duration::from_millis(env_u64("ROLLCALL_PROCESS_INTERVAL_MS", 330)),
            enroll_samples: env_usize("ROLLCALL_ENROLL_SAMPLES", 5),
            min_enroll_samples: env_usize("ROLLCALL_MIN_ENROLL_SAMPLES", 1),
        }
    }

    pub fn capture_policy(&self) -> CapturePolicy {
        CapturePolicy {
            samples: self.enroll_samples,
            min_samples: self.min_enroll_samples,
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v: &f32| v.is_finite() && *v > 0.0)
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
mod tests {
    use super::*;

    // Keys are unique to each test so parallel tests don't race on the env.

    #[test]
    fn test_env_f32_parses_and_falls_back() {
        std::env::set_var("ROLLCALL_TEST_THRESHOLD_OK", "0.45");
        std::env::set_var("ROLLCALL_TEST_THRESHOLD_BAD", "close");
        std::env::set_var("ROLLCALL_TEST_THRESHOLD_NEG", "-1");

        assert_eq!(env_f32("ROLLCALL_TEST_THRESHOLD_OK", 0.6), 0.45);
        assert_eq!(env_f32("ROLLCALL_TEST_THRESHOLD_BAD", 0.6), 0.6);
        assert_eq!(env_f32("ROLLCALL_TEST_THRESHOLD_NEG", 0.6), 0.6);
        assert_eq!(env_f32("ROLLCALL_TEST_THRESHOLD_UNSET", 0.6), 0.6);
    }

    #[test]
    fn test_env_path_ignores_empty() {
        std::env::set_var("ROLLCALL_TEST_PATH_EMPTY", "");
        std::env::set_var("ROLLCALL_TEST_PATH_SET", "/srv/rollcall/db.sqlite");

        assert_eq!(env_path("ROLLCALL_TEST_PATH_EMPTY"), None);
        assert_eq!(
            env_path("ROLLCALL_TEST_PATH_SET"),
            Some(PathBuf::from("/srv/rollcall/db.sqlite"))
        );
    }

    #[test]
    fn test_env_integers() {
        std::env::set_var("ROLLCALL_TEST_INTERVAL", "500");
        assert_eq!(env_u64("ROLLCALL_TEST_INTERVAL", 330), 500);
        assert_eq!(env_usize("ROLLCALL_TEST_SAMPLES_UNSET", 5), 5);
    }
}

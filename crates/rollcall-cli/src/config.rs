use chrono::NaiveTime;
use rollcall_core::{parse_time_of_day, TimeWindow, WindowError, DEFAULT_MATCH_THRESHOLD};
use rollcall_store::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("attendance window: {0}")]
    Window(#[from] WindowError),
    #[error("match threshold must be a finite, non-negative number (got {0})")]
    InvalidThreshold(f32),
    #[error("write_attempts must be at least 1")]
    InvalidAttempts,
}

/// Optional overrides read from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub faces_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub match_threshold: Option<f32>,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub write_attempts: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Effective configuration: defaults, then TOML file, then `ROLLCALL_*` environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the per-class reference photo directories.
    pub faces_dir: PathBuf,
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// Maximum (exclusive) descriptor distance accepted as a match.
    pub match_threshold: f32,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    /// Attempts per persistence write, including the first.
    pub write_attempts: u32,
    /// Delay before the first persistence retry.
    pub retry_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let window = TimeWindow::default();
        Self {
            faces_dir: PathBuf::from("known_faces"),
            db_path: default_data_dir(|k| std::env::var(k).ok()).join("attendance.db"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            window_start: window.start(),
            window_end: window.end(),
            write_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl Config {
    /// Load configuration from the optional file (or `ROLLCALL_CONFIG`) and the environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let file_path = config_path
            .map(Path::to_path_buf)
            .or_else(|| env("ROLLCALL_CONFIG").map(PathBuf::from));
        let file = file_path.as_deref().map(FileConfig::read).transpose()?;
        Self::from_sources(file, env)
    }

    pub fn from_sources(
        file: Option<FileConfig>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self {
            db_path: default_data_dir(&env).join("attendance.db"),
            ..Self::default()
        };

        if let Some(file) = file {
            if let Some(v) = file.faces_dir {
                config.faces_dir = v;
            }
            if let Some(v) = file.db_path {
                config.db_path = v;
            }
            if let Some(v) = file.match_threshold {
                config.match_threshold = v;
            }
            if let Some(v) = file.window_start {
                config.window_start = parse_time_of_day(&v)?;
            }
            if let Some(v) = file.window_end {
                config.window_end = parse_time_of_day(&v)?;
            }
            if let Some(v) = file.write_attempts {
                config.write_attempts = v;
            }
            if let Some(v) = file.retry_backoff_ms {
                config.retry_backoff_ms = v;
            }
        }

        if let Some(v) = env("ROLLCALL_FACES_DIR") {
            config.faces_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        config.match_threshold = env_parse(&env, "ROLLCALL_MATCH_THRESHOLD", config.match_threshold);
        if let Some(v) = env("ROLLCALL_WINDOW_START") {
            config.window_start = parse_time_of_day(&v)?;
        }
        if let Some(v) = env("ROLLCALL_WINDOW_END") {
            config.window_end = parse_time_of_day(&v)?;
        }
        config.write_attempts = env_parse(&env, "ROLLCALL_WRITE_ATTEMPTS", config.write_attempts);
        config.retry_backoff_ms = env_parse(&env, "ROLLCALL_RETRY_BACKOFF_MS", config.retry_backoff_ms);

        Ok(config)
    }

    /// Reject settings the capture loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_threshold.is_finite() || self.match_threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(self.match_threshold));
        }
        if self.write_attempts == 0 {
            return Err(ConfigError::InvalidAttempts);
        }
        self.window()?;
        Ok(())
    }

    pub fn window(&self) -> Result<TimeWindow, ConfigError> {
        Ok(TimeWindow::new(self.window_start, self.window_end)?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.write_attempts,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

fn default_data_dir(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_parse<T: std::str::FromStr + Copy>(
    env: impl Fn(&str) -> Option<String>,
    key: &str,
    current: T,
) -> T {
    match env(key) {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable environment override");
            current
        }),
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(None, env_from(&[("HOME", "/home/ana")])).unwrap();
        assert_eq!(config.faces_dir, PathBuf::from("known_faces"));
        assert_eq!(
            config.db_path,
            PathBuf::from("/home/ana/.local/share/rollcall/attendance.db")
        );
        assert_eq!(config.match_threshold, 0.5);
        assert_eq!(config.window_start, t(9, 0));
        assert_eq!(config.window_end, t(12, 30));
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            faces_dir = "/srv/faces"
            match_threshold = 0.45
            window_start = "08:30"
            "#,
        )
        .unwrap();
        let env = env_from(&[
            ("ROLLCALL_MATCH_THRESHOLD", "0.4"),
            ("ROLLCALL_WINDOW_END", "11:15:30"),
            ("XDG_DATA_HOME", "/data"),
        ]);

        let config = Config::from_sources(Some(file), env).unwrap();
        assert_eq!(config.faces_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.db_path, PathBuf::from("/data/rollcall/attendance.db"));
        assert_eq!(config.match_threshold, 0.4);
        assert_eq!(config.window_start, t(8, 30));
        assert_eq!(config.window_end, NaiveTime::from_hms_opt(11, 15, 30).unwrap());
    }

    #[test]
    fn test_unparseable_numeric_env_keeps_value() {
        let env = env_from(&[("ROLLCALL_MATCH_THRESHOLD", "loose"), ("HOME", "/h")]);
        let config = Config::from_sources(None, env).unwrap();
        assert_eq!(config.match_threshold, 0.5);
    }

    #[test]
    fn test_bad_window_time_is_error() {
        let env = env_from(&[("ROLLCALL_WINDOW_START", "nine"), ("HOME", "/h")]);
        let err = Config::from_sources(None, env).unwrap_err();
        assert!(matches!(err, ConfigError::Window(WindowError::InvalidTime(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_window_and_bad_threshold() {
        let mut config = Config::from_sources(None, env_from(&[("HOME", "/h")])).unwrap();
        config.window_start = t(13, 0);
        assert!(matches!(config.validate(), Err(ConfigError::Window(_))));

        let mut config = Config::from_sources(None, env_from(&[("HOME", "/h")])).unwrap();
        config.match_threshold = f32::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThreshold(_))));

        config.match_threshold = 0.5;
        config.write_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAttempts)));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "threshold = 0.4\n").unwrap();
        assert!(matches!(FileConfig::read(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let env = env_from(&[("ROLLCALL_RETRY_BACKOFF_MS", "50"), ("HOME", "/h")]);
        let config = Config::from_sources(None, env).unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(50));
    }
}

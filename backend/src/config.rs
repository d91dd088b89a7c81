use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid classifier config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub upload_dir: PathBuf,
    pub require_auth: bool,
    pub jwt_secret: Option<String>,
    pub use_primary_log_backend: bool,
    pub vision_log_table: String,
    pub database_url: Option<String>,
    pub classifier_config: PathBuf,
    pub log_write_window: Duration,
    pub backend_write_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let port = match get("PORT") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key: "PORT", value })?,
            None => 7000,
        };

        let require_auth = parse_flag("REQUIRE_AUTH", get("REQUIRE_AUTH"))?.unwrap_or(false);
        let jwt_secret = get("JWT_SECRET");
        if require_auth && jwt_secret.is_none() {
            return Err(ConfigError::Missing("JWT_SECRET"));
        }

        // USE_FIREBASE_APP_DB is the name older deployments still set.
        let use_primary_log_backend =
            match parse_flag("USE_PRIMARY_LOG_BACKEND", get("USE_PRIMARY_LOG_BACKEND"))? {
                Some(flag) => flag,
                None => parse_flag("USE_FIREBASE_APP_DB", get("USE_FIREBASE_APP_DB"))?
                    .unwrap_or(false),
            };

        Ok(Self {
            port,
            upload_dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            require_auth,
            jwt_secret,
            use_primary_log_backend,
            vision_log_table: get("VISION_LOG_TABLE").unwrap_or_else(|| "visionlogs".to_string()),
            database_url: get("DATABASE_URL"),
            classifier_config: get("CLASSIFIER_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/classifier.yaml")),
            log_write_window: parse_millis("LOG_WRITE_WINDOW_MS", get("LOG_WRITE_WINDOW_MS"), 250)?,
            backend_write_timeout: parse_millis(
                "BACKEND_WRITE_TIMEOUT_MS",
                get("BACKEND_WRITE_TIMEOUT_MS"),
                5000,
            )?,
        })
    }
}

fn parse_flag(key: &'static str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue { key, value }),
    }
}

fn parse_millis(
    key: &'static str,
    value: Option<String>,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(Duration::from_millis(default_ms)),
    }
}

/// How to find and run the external classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Probed in order; the first one that exists on disk wins.
    pub interpreter_candidates: Vec<PathBuf>,
    pub interpreter_fallback: String,
    pub script_path: PathBuf,
    /// Wall-clock limit for one classification. 0 disables it.
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            interpreter_candidates: vec![
                PathBuf::from(".venv/Scripts/python.exe"),
                PathBuf::from(".venv/bin/python"),
                PathBuf::from("../.venv/Scripts/python.exe"),
                PathBuf::from("../.venv/bin/python"),
            ],
            interpreter_fallback: "python".to_string(),
            script_path: PathBuf::from("python_service/LLM_vision.py"),
            timeout_secs: 120,
        }
    }
}

impl ClassifierConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_yaml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!(
                    "Classifier config {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

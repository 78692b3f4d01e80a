//! Application Configuration
//!
//! Layered loading: struct defaults, then an optional `config/default.toml`,
//! then `APP__`-prefixed environment variables
//! (e.g. `APP__RATE_LIMIT__WINDOW_SECONDS=30`).

use serde::Deserialize;
use std::collections::HashMap;

pub const ANALYZE_PATH: &str = "/api/v1/chat/analyze";
pub const HEALTH_PATH: &str = "/api/v1/health";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rate_limit: RateLimitSettings,
    pub monitoring: MonitoringSettings,
    pub logging: LoggingSettings,
    pub auth: AuthSettings,
    pub tracking: TrackingSettings,
    pub llm: LlmSettings,
    pub vector_search: VectorSearchSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub cors_origins: Vec<String>,
    pub project_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            environment: "development".to_string(),
            cors_origins: vec!["*".to_string()],
            project_name: "MedHive Symptom Analysis".to_string(),
        }
    }
}

/// Rate limiting settings shared by both counter stores
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub strategy: String,
    pub window_seconds: u64,
    pub default_max_requests: u64,
    /// Per-path overrides of `default_max_requests`
    pub path_limits: HashMap<String, u64>,
    /// When set, counters live in Redis instead of process memory
    pub redis_url: Option<String>,
    pub backend_timeout_ms: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let mut path_limits = HashMap::new();
        path_limits.insert(ANALYZE_PATH.to_string(), 20);
        path_limits.insert(HEALTH_PATH.to_string(), 200);

        Self {
            enabled: true,
            strategy: "fixed-window".to_string(),
            window_seconds: 60,
            default_max_requests: 100,
            path_limits,
            redis_url: None,
            backend_timeout_ms: 10_000,
            sweep_interval_secs: 60,
        }
    }
}

impl RateLimitSettings {
    /// Maximum requests per window for `path`
    pub fn max_requests_for(&self, path: &str) -> u64 {
        self.path_limits
            .get(path)
            .copied()
            .unwrap_or(self.default_max_requests)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub model_name: String,
    pub metrics_window_secs: u64,
    pub drift_enabled: bool,
    pub drift_window_size: usize,
    pub drift_threshold: f64,
    pub latency_p95_threshold_secs: f64,
    pub error_rate_threshold: f64,
    /// Labels whose frequencies seed the drift reference at startup
    pub reference_labels: Vec<String>,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            model_name: "symptom_analyzer".to_string(),
            metrics_window_secs: 300,
            drift_enabled: true,
            drift_window_size: 1000,
            drift_threshold: 0.1,
            latency_p95_threshold_secs: 2.0,
            error_rate_threshold: 0.05,
            reference_labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub directory: String,
    pub file_sinks_enabled: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
            file_sinks_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub jwt_expiry_seconds: i64,
    /// Development mode: trust `X-User-ID` instead of a bearer token
    pub disabled: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            jwt_expiry_seconds: 1800,
            disabled: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// REST backend base URL; tracking is disabled when absent
    pub base_url: Option<String>,
    pub api_key: String,
    pub timeout_secs: u64,
    pub model_version: String,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: String::new(),
            timeout_secs: 10,
            model_version: "production".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: String::new(),
            model: "llama2-70b-4096".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorSearchSettings {
    /// Data API endpoint; similar-case search is skipped when absent
    pub endpoint: Option<String>,
    pub token: String,
    pub keyspace: String,
    pub collection: String,
    pub limit: usize,
}

impl Default for VectorSearchSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: String::new(),
            keyspace: "disease_diagnosis".to_string(),
            collection: "disease_vectors".to_string(),
            limit: 5,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .with_list_parse_key("monitoring.reference_labels"),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.window_seconds == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_seconds must be greater than zero".to_string(),
            ));
        }
        if self.rate_limit.strategy != "fixed-window" {
            return Err(ConfigError::Invalid(format!(
                "unsupported rate_limit.strategy '{}'",
                self.rate_limit.strategy
            )));
        }
        if self.monitoring.drift_window_size == 0 {
            return Err(ConfigError::Invalid(
                "monitoring.drift_window_size must be greater than zero".to_string(),
            ));
        }
        if self.monitoring.drift_threshold < 0.0 {
            return Err(ConfigError::Invalid(
                "monitoring.drift_threshold must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_auth_disabled(&self) -> bool {
        self.auth.disabled
    }
}

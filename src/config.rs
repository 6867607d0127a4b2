//! Configuration loading and validation.

use crate::error::{ConfigError, Result};

/// Which LLM provider backs component C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    Mock,
    OpenAi,
}

/// Review pipeline service configuration, loaded once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub sqlite_path: std::path::PathBuf,

    /// Bind address for the HTTP server.
    pub bind_addr: std::net::SocketAddr,

    /// `REVIEW_MAX_CONCURRENT_RUNS`
    pub max_concurrent_runs: i64,

    /// `REVIEW_RATE_LIMIT_PER_MINUTE`
    pub rate_limit_per_minute: i64,

    /// `REVIEW_ENABLE_PIPELINE_CACHE`
    pub enable_pipeline_cache: bool,

    /// `REVIEW_CACHE_TTL_SECONDS`
    pub cache_ttl_seconds: u64,

    /// `REVIEW_FINDINGS_DEFAULT_PAGE_SIZE`
    pub findings_default_page_size: i64,

    /// `REVIEW_FINDINGS_MAX_PAGE_SIZE`
    pub findings_max_page_size: i64,

    /// `LLM_PROVIDER`
    pub llm_provider: LlmProviderKind,

    /// `PROMPT_REV`
    pub prompt_rev: String,

    /// `CHUNK_SCHEMA_VERSION`
    pub chunk_schema_version: String,

    /// Preferred jurisdiction for the GOV_LAW_MISMATCH rule.
    pub preferred_jurisdiction: String,

    /// Number of worker tasks draining the review-run queue.
    pub worker_concurrency: usize,

    /// Max retry attempts for non-LLM pipeline failures.
    pub max_attempts: u32,

    /// OpenAI API key, if configured.
    pub openai_api_key: Option<String>,

    /// OpenAI model name.
    pub openai_model: String,
}

impl Config {
    /// Load configuration from environment variables, applying defaults.
    pub fn load() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("clausewatch"))
            .unwrap_or_else(|| std::path::PathBuf::from("./data"));
        std::fs::create_dir_all(&data_dir)?;

        let sqlite_path = env_path("CLAUSEWATCH_SQLITE_PATH", data_dir.join("clausewatch.db"));

        let bind_addr = std::env::var("CLAUSEWATCH_BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("CLAUSEWATCH_BIND_ADDR is not a valid socket address".into()))?;

        let max_concurrent_runs = env_i64("REVIEW_MAX_CONCURRENT_RUNS", 10)?;
        let rate_limit_per_minute = env_i64("REVIEW_RATE_LIMIT_PER_MINUTE", 20)?;
        let enable_pipeline_cache = env_bool("REVIEW_ENABLE_PIPELINE_CACHE", true)?;
        let cache_ttl_seconds = env_i64("REVIEW_CACHE_TTL_SECONDS", 3600)? as u64;
        let findings_default_page_size = env_i64("REVIEW_FINDINGS_DEFAULT_PAGE_SIZE", 20)?;
        let findings_max_page_size = env_i64("REVIEW_FINDINGS_MAX_PAGE_SIZE", 100)?;

        let llm_provider = match std::env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "mock".to_string())
            .to_lowercase()
            .as_str()
        {
            "openai" => LlmProviderKind::OpenAi,
            "mock" => LlmProviderKind::Mock,
            other => {
                return Err(ConfigError::Invalid(format!("unknown LLM_PROVIDER: {other}")).into());
            }
        };

        let prompt_rev = std::env::var("PROMPT_REV").unwrap_or_else(|_| "v1".to_string());
        let chunk_schema_version =
            std::env::var("CHUNK_SCHEMA_VERSION").unwrap_or_else(|_| "v1".to_string());
        let preferred_jurisdiction =
            std::env::var("REVIEW_PREFERRED_JURISDICTION").unwrap_or_else(|_| "California".to_string());

        let worker_concurrency = env_i64("REVIEW_WORKER_CONCURRENCY", 4)? as usize;
        let max_attempts = env_i64("REVIEW_MAX_ATTEMPTS", 3)? as u32;

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        let openai_model =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        Ok(Self {
            sqlite_path,
            bind_addr,
            max_concurrent_runs,
            rate_limit_per_minute,
            enable_pipeline_cache,
            cache_ttl_seconds,
            findings_default_page_size,
            findings_max_page_size,
            llm_provider,
            prompt_rev,
            chunk_schema_version,
            preferred_jurisdiction,
            worker_concurrency,
            max_attempts,
            openai_api_key,
            openai_model,
        })
    }

    pub fn sqlite_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.sqlite_path.display())
    }
}

fn env_path(key: &str, default: std::path::PathBuf) -> std::path::PathBuf {
    std::env::var(key).map(std::path::PathBuf::from).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> Result<i64> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<i64>()
            .map_err(|_| ConfigError::Invalid(format!("{key} must be an integer")).into()),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid(format!("{key} must be a boolean")).into()),
        },
        Err(_) => Ok(default),
    }
}

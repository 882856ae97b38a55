//! Configuration types and loading
//!
//! YAML file fallback chain (explicit path, `.taskweave.yml`, user config
//! dir) with built-in defaults, then environment overrides for the
//! documented variables. Every duration crosses the config boundary as an
//! integer field and becomes a `Duration` through an accessor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::mcp::McpServerConfig;
use crate::outbound::{BreakerConfig, QueueConfig, RetryPolicy};
use crate::validation::ValidationSettings;
use crate::workflow::WorkflowConfig;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub mcp: McpConfig,
    pub workflow: WorkflowSection,
    pub validation: ValidationSection,
    pub outbound: OutboundSection,
    /// Optional directory of prompt override files.
    #[serde(rename = "prompt-dir")]
    pub prompt_dir: Option<PathBuf>,
}

impl Config {
    /// Load with the fallback chain, then apply env overrides.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file(config_path)?;
        config.apply_env();
        Ok(config)
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("failed to load config from {}", path.display()));
        }

        let local = PathBuf::from(".taskweave.yml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!("failed to load {}: {e}", local.display()),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user = config_dir.join("taskweave").join("taskweave.yml");
            if user.exists() {
                match Self::load_from_file(&user) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!("failed to load {}: {e}", user.display()),
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        tracing::info!("loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply the documented environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var("LLM_API_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Ok(header) = std::env::var("MCP_LLM_AUTH_HEADER") {
            self.llm.auth_header = header;
        }
        if let Some(size) = env_parse::<usize>("VALIDATION_HISTORY_MAX_SIZE") {
            self.validation.history_max_size = size;
        }
        if let Some(window) = env_parse::<usize>("VALIDATION_ANTI_REPETITION_WINDOW") {
            self.validation.anti_repetition_window = window;
        }
        if let Some(count) = env_parse::<u32>("VALIDATION_MAX_FAILURES_BEFORE_BLOCK") {
            self.validation.max_failures_before_block = count;
        }
        if let Some(rate) = env_parse::<f64>("VALIDATION_MIN_SUCCESS_RATE") {
            self.validation.min_success_rate = rate;
        }
        if let Some(ttl) = env_parse::<u64>("VALIDATION_MCP_CACHE_TTL") {
            self.validation.mcp_cache_ttl_ms = ttl;
        }
        if let Some(threshold) = env_parse::<f64>("VALIDATION_SIMILARITY_THRESHOLD") {
            self.validation.similarity_threshold = threshold;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Outbound LLM endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the chat-completions endpoint.
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,
    /// Header the token is sent in.
    #[serde(rename = "auth-header")]
    pub auth_header: String,
    pub referer: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:1234".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "LLM_API_KEY".to_string(),
            auth_header: "Authorization".to_string(),
            referer: None,
            title: None,
            request_timeout_ms: 60_000,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Bearer token: `MCP_LLM_API_KEY` wins, then `LLM_API_KEY`, then the
    /// variable named by `api-key-env`. Absent everywhere means no auth
    /// header is attached.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var("MCP_LLM_API_KEY")
            .or_else(|_| std::env::var("LLM_API_KEY"))
            .or_else(|_| std::env::var(&self.api_key_env))
            .ok()
            .filter(|key| !key.is_empty())
    }
}

/// MCP server set and connection behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Server name to launch configuration.
    pub servers: HashMap<String, McpServerConfig>,
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,
    #[serde(rename = "reconnect-attempts")]
    pub reconnect_attempts: u32,
    #[serde(rename = "reconnect-base-ms")]
    pub reconnect_base_ms: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers: HashMap::new(),
            request_timeout_ms: 30_000,
            reconnect_attempts: 3,
            reconnect_base_ms: 1_000,
        }
    }
}

impl McpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }
}

/// Workflow machine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    #[serde(rename = "handler-timeout-ms")]
    pub handler_timeout_ms: u64,
    #[serde(rename = "pacing-delay-ms")]
    pub pacing_delay_ms: u64,
    #[serde(rename = "blocked-check-limit")]
    pub blocked_check_limit: u32,
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,
    #[serde(rename = "dev-password")]
    pub dev_password: Option<String>,
    #[serde(rename = "session-idle-timeout-secs")]
    pub session_idle_timeout_secs: u64,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 30_000,
            pacing_delay_ms: 3_000,
            blocked_check_limit: 10,
            max_attempts: 1,
            dev_password: None,
            session_idle_timeout_secs: 1_800,
        }
    }
}

impl WorkflowSection {
    pub fn machine_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            handler_timeout: Duration::from_millis(self.handler_timeout_ms),
            pacing_delay: Duration::from_millis(self.pacing_delay_ms),
            blocked_check_limit: self.blocked_check_limit,
            default_max_attempts: self.max_attempts,
            dev_password: self.dev_password.clone(),
        }
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }
}

/// Validation pipeline knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    #[serde(rename = "history-max-size")]
    pub history_max_size: usize,
    #[serde(rename = "anti-repetition-window")]
    pub anti_repetition_window: usize,
    #[serde(rename = "max-failures-before-block")]
    pub max_failures_before_block: u32,
    #[serde(rename = "min-success-rate")]
    pub min_success_rate: f64,
    #[serde(rename = "mcp-cache-ttl-ms")]
    pub mcp_cache_ttl_ms: u64,
    #[serde(rename = "similarity-threshold")]
    pub similarity_threshold: f64,
    /// Enable the optional LLM safety stage.
    #[serde(rename = "llm-stage")]
    pub llm_stage: bool,
    /// Consecutive identical calls before the inspector denies.
    #[serde(rename = "consecutive-limit")]
    pub consecutive_limit: u32,
    /// Total calls of one tool before approval is required.
    #[serde(rename = "total-call-limit")]
    pub total_call_limit: u32,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            history_max_size: 100,
            anti_repetition_window: 100,
            max_failures_before_block: 3,
            min_success_rate: 0.3,
            mcp_cache_ttl_ms: 60_000,
            similarity_threshold: 0.8,
            llm_stage: false,
            consecutive_limit: 3,
            total_call_limit: 10,
        }
    }
}

impl ValidationSection {
    pub fn settings(&self) -> ValidationSettings {
        ValidationSettings {
            anti_repetition_window: self.anti_repetition_window,
            max_failures_before_block: self.max_failures_before_block,
            min_success_rate: self.min_success_rate,
            mcp_cache_ttl: self.mcp_cache_ttl(),
            similarity_threshold: self.similarity_threshold,
        }
    }

    pub fn mcp_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.mcp_cache_ttl_ms)
    }
}

/// Outbound rate limiting per service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundSection {
    #[serde(rename = "llm-max-concurrent")]
    pub llm_max_concurrent: usize,
    #[serde(rename = "llm-min-delay-ms")]
    pub llm_min_delay_ms: u64,
    #[serde(rename = "burst-limit")]
    pub burst_limit: usize,
    #[serde(rename = "burst-window-ms")]
    pub burst_window_ms: u64,
    #[serde(rename = "queue-depth")]
    pub queue_depth: usize,
    #[serde(rename = "queue-timeout-ms")]
    pub queue_timeout_ms: u64,
    #[serde(rename = "max-retries")]
    pub max_retries: u32,
    #[serde(rename = "breaker-failure-threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(rename = "breaker-reset-timeout-secs")]
    pub breaker_reset_timeout_secs: u64,
    #[serde(rename = "breaker-success-threshold")]
    pub breaker_success_threshold: u32,
}

impl Default for OutboundSection {
    fn default() -> Self {
        Self {
            llm_max_concurrent: 1,
            llm_min_delay_ms: 1_000,
            burst_limit: 10,
            burst_window_ms: 10_000,
            queue_depth: 32,
            queue_timeout_ms: 30_000,
            max_retries: 3,
            breaker_failure_threshold: 5,
            breaker_reset_timeout_secs: 60,
            breaker_success_threshold: 2,
        }
    }
}

impl OutboundSection {
    pub fn llm_queue(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.llm_max_concurrent,
            min_delay: Duration::from_millis(self.llm_min_delay_ms),
            burst_limit: self.burst_limit,
            burst_window: Duration::from_millis(self.burst_window_ms),
            max_depth: self.queue_depth,
            queue_timeout: Duration::from_millis(self.queue_timeout_ms),
            burst_errors: false,
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..Default::default()
        }
    }

    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            reset_timeout: Duration::from_secs(self.breaker_reset_timeout_secs),
            success_threshold: self.breaker_success_threshold,
        }
    }
}

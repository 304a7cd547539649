//! Configuration management for Warden
//!
//! Supports environment variables, config files, and runtime overrides.
//! Risk thresholds, retry ceilings and budgets are policy, not law: every
//! one of them can be overridden here.
//!
//! Config file location: ~/.config/warden/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::core::error::{Result, WardenError};

/// Main configuration for Warden
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which model backend to use
    pub provider: ProviderType,
    /// Ollama configuration
    pub ollama: OllamaConfig,
    /// OpenRouter configuration
    pub openrouter: OpenRouterConfig,
    /// Model configuration
    pub models: ModelConfig,
    /// Browser configuration
    pub browser: BrowserConfig,
    /// Task loop configuration
    pub agent: AgentConfig,
    /// Failure recovery configuration
    pub recovery: RecoveryConfig,
    /// Risk classification and confirmation configuration
    pub safety: SafetyConfig,
    /// Context compression configuration
    pub optimizer: OptimizerConfig,
    /// Audit log configuration
    pub audit: AuditConfig,
}

/// Supported model backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[default]
    Ollama,
    OpenRouter,
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(ProviderType::Ollama),
            "openrouter" => Ok(ProviderType::OpenRouter),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Ollama server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Host address (default: localhost)
    pub host: String,
    /// Port number (default: 11434)
    pub port: u16,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// OpenRouter (OpenAI-compatible) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    /// API base URL
    pub base_url: String,
    /// API key; read from OPENROUTER_API_KEY when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model that proposes browser actions
    pub orchestrator: String,
    /// Sampling temperature for action proposals
    pub temperature: f32,
}

/// Browser automation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Session name for agent-browser; each task gets its own suffix
    pub session_name: String,
    /// Whether to run in headed mode (visible browser)
    pub headed: bool,
    /// Timeout for a single browser call in ms
    pub timeout_ms: u64,
}

/// Task loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard limit on loop iterations per task
    /// Default: 25
    pub max_steps: usize,
    /// Hard limit on wall-clock time per task in seconds
    /// Default: 600
    pub max_duration_secs: u64,
    /// Number of recent steps included in the model context
    /// Default: 5
    pub history_window: usize,
    /// Denied proposals tolerated in one step before asking the user
    /// Default: 3
    pub max_alternatives_per_step: u32,
    /// Upper bound on any single snapshot, model or execute call in seconds
    /// Default: 120
    pub call_timeout_secs: u64,
    /// Whether to show debug output
    pub debug: bool,
}

/// Recovery policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Retry-same attempts for transient failures
    pub max_attempts: u32,
    /// First backoff delay in ms
    pub base_delay_ms: u64,
    /// Upper bound on any backoff delay in ms
    pub max_delay_ms: u64,
    /// Growth factor between backoff delays
    pub backoff_multiplier: f64,
    /// Failed alternates tolerated before escalating
    pub alternate_ceiling: u32,
    /// Oracle failures tolerated per step before escalating
    pub oracle_retry_limit: u32,
}

/// Risk classification and confirmation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Seconds to wait for an approver before treating it as a denial
    pub confirmation_timeout_secs: u64,
    /// Whether MEDIUM actions need confirmation
    pub confirm_medium: bool,
    /// Domain fragments where any modification is HIGH risk
    pub sensitive_domains: Vec<String>,
    /// Payment and purchase vocabulary (CRITICAL)
    pub financial_keywords: Vec<String>,
    /// Account removal vocabulary (CRITICAL)
    pub account_deletion_keywords: Vec<String>,
    /// Credential change vocabulary (CRITICAL)
    pub credential_keywords: Vec<String>,
    /// Deletion vocabulary (HIGH)
    pub deletion_keywords: Vec<String>,
    /// Unsubscription vocabulary (HIGH)
    pub unsubscribe_keywords: Vec<String>,
    /// Modification vocabulary (HIGH on sensitive domains)
    pub modification_keywords: Vec<String>,
    /// Personally identifying field vocabulary (MEDIUM on submission)
    pub personal_data_keywords: Vec<String>,
}

/// Context compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Token budget for the context sent to the model
    pub token_budget: usize,
    /// Token budget for the model's answer
    pub response_budget: usize,
}

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Whether to write the audit log
    pub enabled: bool,
    /// JSONL file; defaults to ~/.config/warden/audit.jsonl
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env_parse("OLLAMA_PORT", 11434),
            timeout_secs: 120,
        }
    }
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: env::var("OPENROUTER_API_KEY").ok(),
            timeout_secs: 120,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            orchestrator: env::var("WARDEN_MODEL").unwrap_or_else(|_| "qwen3:8b".to_string()),
            temperature: 0.1,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            session_name: env::var("WARDEN_BROWSER_SESSION")
                .unwrap_or_else(|_| "warden".to_string()),
            headed: env_flag("WARDEN_BROWSER_HEADED", false),
            timeout_ms: 30_000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: env_parse("WARDEN_MAX_STEPS", 25),
            max_duration_secs: env_parse("WARDEN_MAX_DURATION_SECS", 600),
            history_window: 5,
            max_alternatives_per_step: 3,
            call_timeout_secs: 120,
            debug: env_flag("WARDEN_DEBUG", false),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            alternate_ceiling: 2,
            oracle_retry_limit: 3,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: env_parse("WARDEN_CONFIRM_TIMEOUT_SECS", 300),
            confirm_medium: env_flag("WARDEN_CONFIRM_MEDIUM", false),
            sensitive_domains: words(&[
                "bank", "paypal", "stripe", "payment", "admin", "account", "billing",
            ]),
            financial_keywords: words(&[
                "pay",
                "payment",
                "checkout",
                "purchase",
                "buy",
                "place order",
                "transfer",
                "credit card",
                "card number",
                "billing",
            ]),
            account_deletion_keywords: words(&[
                "delete account",
                "close account",
                "deactivate account",
                "delete my account",
                "terminate account",
            ]),
            credential_keywords: words(&[
                "change password",
                "reset password",
                "new password",
                "two-factor",
                "2fa",
                "security question",
                "recovery email",
            ]),
            deletion_keywords: words(&["delete", "remove", "trash", "erase", "destroy", "discard"]),
            unsubscribe_keywords: words(&["unsubscribe", "opt out", "opt-out"]),
            modification_keywords: words(&[
                "edit", "modify", "change", "update", "save", "submit", "confirm", "apply",
            ]),
            personal_data_keywords: words(&[
                "email", "phone", "address", "birth", "ssn", "passport", "surname", "full name",
            ]),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            token_budget: env_parse("WARDEN_TOKEN_BUDGET", 3_000),
            response_budget: 512,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: env_flag("WARDEN_AUDIT", true),
            path: env::var("WARDEN_AUDIT_PATH").ok().map(PathBuf::from),
        }
    }
}

impl AgentConfig {
    /// Maximum task duration as a Duration
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// Per-call timeout as a Duration
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl SafetyConfig {
    /// Confirmation wait as a Duration
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("warden")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load() -> Self {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        match Self::load_from_file() {
            Ok(config) => return config,
            Err(e) if Self::config_file().exists() => {
                warn!(
                    path = %Self::config_file().display(),
                    error = %e,
                    "ignoring unreadable config file"
                );
            }
            Err(_) => {}
        }

        // Fall back to defaults (which respect env vars)
        Self::default()
    }

    /// Load configuration from file only
    pub fn load_from_file() -> Result<Self> {
        let config_path = Self::config_file();

        if !config_path.exists() {
            return Err(WardenError::config("Config file not found"));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|e| WardenError::config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| WardenError::config(format!("Failed to parse config: {}", e)))
    }

    /// Get the full Ollama API URL
    pub fn ollama_url(&self) -> String {
        format!("http://{}:{}", self.ollama.host, self.ollama.port)
    }

    /// Resolved audit log path
    pub fn audit_path(&self) -> PathBuf {
        self.audit
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("audit.jsonl"))
    }

    /// Generate a default config file content for display
    pub fn default_config_toml() -> String {
        toml::to_string_pretty(&Config::default())
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.provider, ProviderType::Ollama);
        assert_eq!(config.recovery.max_attempts, 3);
        assert_eq!(config.recovery.alternate_ceiling, 2);
        assert!(config.safety.sensitive_domains.iter().any(|d| d == "bank"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            provider = "openrouter"

            [recovery]
            max_attempts = 5
            base_delay_ms = 10
            max_delay_ms = 100
            backoff_multiplier = 3.0
            alternate_ceiling = 1
            oracle_retry_limit = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.provider, ProviderType::OpenRouter);
        assert_eq!(config.recovery.max_attempts, 5);
        assert_eq!(config.optimizer.response_budget, 512);
    }

    #[test]
    fn test_single_key_section_keeps_defaults() {
        let config = Config::from_toml("[safety]\nconfirm_medium = true\n").unwrap();
        assert!(config.safety.confirm_medium);
        assert_eq!(
            config.safety.confirmation_timeout_secs,
            SafetyConfig::default().confirmation_timeout_secs
        );
        assert!(config.safety.sensitive_domains.iter().any(|d| d == "bank"));

        let config =
            Config::from_toml("[optimizer]\ntoken_budget = 800\n\n[agent]\nhistory_window = 2\n")
                .unwrap();
        assert_eq!(config.optimizer.token_budget, 800);
        assert_eq!(config.optimizer.response_budget, 512);
        assert_eq!(config.agent.history_window, 2);
        assert_eq!(config.agent.max_alternatives_per_step, 3);
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = Config::default_config_toml();
        assert!(toml_str.contains("orchestrator"));
        assert!(toml_str.contains("sensitive_domains"));
    }

    #[test]
    fn test_config_dir() {
        let dir = Config::config_dir();
        assert!(dir.to_string_lossy().contains("warden"));
    }
}

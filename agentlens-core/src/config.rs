//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/agentlens/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/agentlens/` (~/.config/agentlens/)
//! - Data: `$XDG_DATA_HOME/agentlens/` (~/.local/share/agentlens/)
//! - State/Logs: `$XDG_STATE_HOME/agentlens/` (~/.local/state/agentlens/)

use crate::error::{Error, Result};
use crate::event::TokenUsage;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

// ============================================
// App config (config.toml)
// ============================================

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Provider path overrides
    #[serde(default)]
    pub providers: ProviderOverrides,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pipeline tuning loaded from config.toml.
///
/// These are the serializable knobs; runtime callbacks live in
/// [`PipelineConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    /// Maximum timeline entries kept (oldest evicted first)
    #[serde(default = "default_timeline_cap")]
    pub timeline_cap: usize,

    /// Maximum latency samples kept (oldest evicted first)
    #[serde(default = "default_latency_cap")]
    pub latency_cap: usize,

    /// Burn-rate sliding window in milliseconds
    #[serde(default = "default_burn_window_ms")]
    pub burn_window_ms: u64,

    /// Burn-rate sample interval in milliseconds
    #[serde(default = "default_burn_sample_ms")]
    pub burn_sample_ms: u64,

    /// Cap on unresolved tool-call correlation records per session
    #[serde(default = "default_max_pending_calls")]
    pub max_pending_calls: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            timeline_cap: default_timeline_cap(),
            latency_cap: default_latency_cap(),
            burn_window_ms: default_burn_window_ms(),
            burn_sample_ms: default_burn_sample_ms(),
            max_pending_calls: default_max_pending_calls(),
        }
    }
}

fn default_timeline_cap() -> usize {
    200
}

fn default_latency_cap() -> usize {
    100
}

fn default_burn_window_ms() -> u64 {
    5 * 60 * 1000
}

fn default_burn_sample_ms() -> u64 {
    10 * 1000
}

fn default_max_pending_calls() -> usize {
    256
}

/// Override paths for provider session directories
#[derive(Debug, Deserialize, Default)]
pub struct ProviderOverrides {
    /// Override path for Claude Code data
    pub claude_code_path: Option<PathBuf>,
    /// Override path for Codex data
    pub codex_path: Option<PathBuf>,
    /// Override path for Gemini data
    pub gemini_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/agentlens/config.toml` (~/.config/agentlens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("agentlens").join("config.toml")
    }

    /// Returns the data directory path (for snapshots)
    ///
    /// `$XDG_DATA_HOME/agentlens/` (~/.local/share/agentlens/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("agentlens")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/agentlens/` (~/.local/state/agentlens/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("agentlens")
    }

    /// Returns the snapshot directory path
    ///
    /// `$XDG_DATA_HOME/agentlens/snapshots/`
    pub fn snapshot_dir() -> PathBuf {
        Self::data_dir().join("snapshots")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/agentlens/agentlens.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("agentlens.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

// ============================================
// Runtime pipeline config
// ============================================

/// Pluggable context-size function: maps one usage report to the current
/// context size in tokens.
pub type ContextSizeFn = Arc<dyn Fn(&TokenUsage) -> u64 + Send + Sync>;

/// Injected plan-file reader: returns the file's text, or `None` when the
/// file cannot be read.
pub type PlanFileReader = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Runtime configuration for one pipeline instance.
///
/// Built once at construction time; there is no partial options bag. The
/// serializable knobs come from [`PipelineSettings`]; the two callbacks are
/// injected by the embedding application.
#[derive(Clone)]
pub struct PipelineConfig {
    pub timeline_cap: usize,
    pub latency_cap: usize,
    pub burn_window_ms: u64,
    pub burn_sample_ms: u64,
    pub max_pending_calls: usize,
    /// Override for context-size computation; `None` uses the default
    /// (input + cache-write + cache-read).
    pub compute_context_size: Option<ContextSizeFn>,
    /// Reader for external plan files referenced by file-edit tool calls.
    pub read_plan_file: Option<PlanFileReader>,
}

impl PipelineConfig {
    /// Build a runtime config from serialized settings.
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            timeline_cap: settings.timeline_cap,
            latency_cap: settings.latency_cap,
            burn_window_ms: settings.burn_window_ms,
            burn_sample_ms: settings.burn_sample_ms,
            max_pending_calls: settings.max_pending_calls,
            compute_context_size: None,
            read_plan_file: None,
        }
    }

    /// Compute the current context size for a usage report.
    pub fn context_size(&self, usage: &TokenUsage) -> u64 {
        match &self.compute_context_size {
            Some(f) => f(usage),
            None => usage.input_tokens + usage.cache_write_tokens + usage.cache_read_tokens,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("timeline_cap", &self.timeline_cap)
            .field("latency_cap", &self.latency_cap)
            .field("burn_window_ms", &self.burn_window_ms)
            .field("burn_sample_ms", &self.burn_sample_ms)
            .field("max_pending_calls", &self.max_pending_calls)
            .field("compute_context_size", &self.compute_context_size.is_some())
            .field("read_plan_file", &self.read_plan_file.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.timeline_cap, 200);
        assert_eq!(config.pipeline.latency_cap, 100);
        assert_eq!(config.pipeline.burn_window_ms, 300_000);
        assert_eq!(config.pipeline.burn_sample_ms, 10_000);
        assert_eq!(config.pipeline.max_pending_calls, 256);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[pipeline]
timeline_cap = 50
burn_window_ms = 60000

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.pipeline.timeline_cap, 50);
        assert_eq!(config.pipeline.burn_window_ms, 60_000);
        // Unspecified fields keep their defaults
        assert_eq!(config.pipeline.latency_cap, 100);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_default_context_size() {
        let cfg = PipelineConfig::default();
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 40,
            cache_write_tokens: 10,
            cache_read_tokens: 5,
            cost_usd: None,
        };
        // Output tokens are not part of context size by default
        assert_eq!(cfg.context_size(&usage), 115);
    }

    #[test]
    fn test_context_size_override() {
        let mut cfg = PipelineConfig::default();
        cfg.compute_context_size = Some(Arc::new(|u: &TokenUsage| u.total()));
        let usage = TokenUsage {
            input_tokens: 1,
            output_tokens: 2,
            cache_write_tokens: 3,
            cache_read_tokens: 4,
            cost_usd: None,
        };
        assert_eq!(cfg.context_size(&usage), 10);
    }
}

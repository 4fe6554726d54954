//! Global configuration types for Flowgate.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! watch/output locations, engine tunables, the notifier, logging, and the
//! tier table used by the access gate.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::tier::{Tier, TierPolicy, default_tier_policies};

/// Top-level configuration.
///
/// Loaded from `~/.flowgate/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Directory watched for file arrivals. Defaults to `<data_dir>/inbox`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_root: Option<PathBuf>,

    /// Where `transform` writes derived artifacts. Defaults to `<data_dir>/output`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Directory holding workflow YAML files. Defaults to `<data_dir>/workflows`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<PathBuf>,

    /// Duration used by `delay` actions without an explicit `ms` parameter.
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,

    /// Broadcast capacity of the lifecycle event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Filesystem watcher debounce window.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// File-name suffixes that mark partial writes; such files never fire triggers.
    #[serde(default = "default_ignored_suffixes")]
    pub ignored_suffixes: Vec<String>,

    /// How often the usage reset sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Ordered tier table, lowest tier first.
    #[serde(default = "default_tier_policies")]
    pub tiers: Vec<TierPolicy>,

    /// External commands registered as `transform` tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolConfig>,
}

fn default_delay_ms() -> u64 {
    2_000
}

fn default_event_capacity() -> usize {
    1_024
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_ignored_suffixes() -> Vec<String> {
    [".tmp", ".part", ".crdownload", ".swp", "~"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            watch_root: None,
            output_dir: None,
            workflows_dir: None,
            default_delay_ms: default_delay_ms(),
            event_capacity: default_event_capacity(),
            debounce_ms: default_debounce_ms(),
            ignored_suffixes: default_ignored_suffixes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            notifier: NotifierConfig::default(),
            logging: LoggingConfig::default(),
            tiers: default_tier_policies(),
            tools: Vec::new(),
        }
    }
}

impl GlobalConfig {
    pub fn watch_root(&self, data_dir: &Path) -> PathBuf {
        self.watch_root
            .clone()
            .unwrap_or_else(|| data_dir.join("inbox"))
    }

    pub fn output_dir(&self, data_dir: &Path) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("output"))
    }

    pub fn workflows_dir(&self, data_dir: &Path) -> PathBuf {
        self.workflows_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("workflows"))
    }

    /// Look up the policy for a tier.
    pub fn tier_policy(&self, tier: Tier) -> Option<&TierPolicy> {
        self.tiers.iter().find(|p| p.tier == tier)
    }
}

/// Where `notify` actions are delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Webhook endpoint receiving a JSON POST per notification.
    /// When absent, notifications are only logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// Request timeout for webhook delivery.
    #[serde(default = "default_notifier_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_notifier_timeout_secs() -> u64 {
    10
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notifier_timeout_secs(),
        }
    }
}

/// An external command exposed to `transform` under `name`.
///
/// `{input}` and `{output}` in `args` are replaced with the resource path and
/// the engine-computed artifact path.
///
/// ```toml
/// [[tools]]
/// name = "watermark"
/// command = "magick"
/// args = ["{input}", "-fill", "gray", "-annotate", "0", "DRAFT", "{output}"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tool_timeout_secs() -> u64 {
    60
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
            otel: false,
        }
    }
}

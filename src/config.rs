//! Configuration management for the Breakwater layer.
//!
//! Numeric thresholds are deployment-time choices, so everything here is
//! loadable from YAML with sensible defaults baked in. The defaults cover
//! the standard dependency classes and presets.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::breaker::{BreakerConfig, BreakerRegistry, STANDARD_DEPENDENCIES};
use crate::error::{BreakwaterError, Result};
use crate::ratelimit::PresetCatalog;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakwaterConfig {
    /// Per-dependency circuit breaker settings.
    #[serde(default = "default_breakers")]
    pub breakers: HashMap<String, BreakerSettings>,

    /// Per-preset rate limit overrides, keyed by preset name.
    #[serde(default)]
    pub limits: HashMap<String, LimitSettings>,
}

impl Default for BreakwaterConfig {
    fn default() -> Self {
        Self {
            breakers: default_breakers(),
            limits: HashMap::new(),
        }
    }
}

/// Circuit breaker settings for one dependency class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures before opening.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive half-open successes before closing.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Call timeout in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Open-state reset timeout in milliseconds.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            call_timeout_ms: default_call_timeout_ms(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            success_threshold: settings.success_threshold,
            call_timeout: Duration::from_millis(settings.call_timeout_ms),
            reset_timeout: Duration::from_millis(settings.reset_timeout_ms),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_breakers() -> HashMap<String, BreakerSettings> {
    STANDARD_DEPENDENCIES
        .iter()
        .map(|name| (name.to_string(), BreakerSettings::default()))
        .collect()
}

/// Rate limit settings overriding one preset.
///
/// Overrides replace the preset's numeric config wholesale; the identity
/// strategy and rejection shape stay as the catalog defines them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Maximum requests per identity per window.
    pub max_requests: u64,

    /// Counter key prefix; defaults to the preset's existing prefix.
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// Refund successful requests after the fact.
    #[serde(default)]
    pub skip_successful: bool,

    /// Refund failed requests after the fact.
    #[serde(default)]
    pub skip_failed: bool,
}

impl BreakwaterConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading breakwater configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| BreakwaterError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Build the breaker registry this configuration describes.
    pub fn build_registry(&self) -> BreakerRegistry {
        let configs = self
            .breakers
            .iter()
            .map(|(name, settings)| (name.clone(), BreakerConfig::from(settings)))
            .collect();
        BreakerRegistry::new(configs)
    }

    /// Build the preset catalog: the standard catalog with this
    /// configuration's overrides applied on top.
    pub fn build_presets(&self) -> PresetCatalog {
        let mut catalog = PresetCatalog::standard();

        for (name, settings) in &self.limits {
            match catalog.get_mut(name) {
                Some(preset) => {
                    preset.config.window = Duration::from_millis(settings.window_ms);
                    preset.config.max_requests = settings.max_requests;
                    if let Some(prefix) = &settings.key_prefix {
                        preset.config.key_prefix = prefix.clone();
                    }
                    preset.config.skip_successful = settings.skip_successful;
                    preset.config.skip_failed = settings.skip_failed;
                }
                None => {
                    let config = crate::ratelimit::RateLimitConfig {
                        window: Duration::from_millis(settings.window_ms),
                        max_requests: settings.max_requests,
                        key_prefix: settings
                            .key_prefix
                            .clone()
                            .unwrap_or_else(|| format!("rl:{name}")),
                        skip_successful: settings.skip_successful,
                        skip_failed: settings.skip_failed,
                    };
                    catalog.insert(crate::ratelimit::Preset::new(name.clone(), config));
                }
            }
        }

        catalog
    }
}

//! Configuration file handling

use serde::Deserialize;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Retry budgets
    #[serde(default)]
    pub retry: RetryConfig,

    /// Mirror settings
    #[serde(default)]
    pub mirror: MirrorConfig,
}

/// Timeout settings
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Timeout for a single connect attempt, in milliseconds
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,

    /// Timeout for one write or read step of a request, in milliseconds
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,

    /// Default timeout for an invoke expression, in milliseconds
    #[serde(default = "default_invoke_ms")]
    pub invoke_ms: u64,

    /// Default overall deadline for element lookup, in milliseconds
    #[serde(default = "default_lookup_ms")]
    pub lookup_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_ms(),
            step_ms: default_step_ms(),
            invoke_ms: default_invoke_ms(),
            lookup_ms: default_lookup_ms(),
        }
    }
}

fn default_connect_ms() -> u64 {
    10_000
}
fn default_step_ms() -> u64 {
    10_000
}
fn default_invoke_ms() -> u64 {
    10_000
}
fn default_lookup_ms() -> u64 {
    30_000
}

/// Retry budgets
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Connect attempts before giving up
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Transient request retries before escalating
    #[serde(default = "default_request_attempts")]
    pub request_attempts: u32,

    /// Fixed interval between transient request retries, in milliseconds
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connect_attempts: default_connect_attempts(),
            request_attempts: default_request_attempts(),
            request_interval_ms: default_request_interval_ms(),
        }
    }
}

fn default_connect_attempts() -> u32 {
    10
}
fn default_request_attempts() -> u32 {
    20
}
fn default_request_interval_ms() -> u64 {
    1_000
}

/// Mirror settings
#[derive(Debug, Deserialize, Clone)]
pub struct MirrorConfig {
    /// Initial capacity of the target-id registry
    #[serde(default = "default_capacity")]
    pub initial_capacity: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    1_000
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path)?;
                return toml::from_str(&content)
                    .map_err(|e| super::Error::ConfigParse(e.to_string()));
            }
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = Config::default();
        assert_eq!(c.timeouts.step_ms, 10_000);
        assert_eq!(c.retry.request_attempts, 20);
        assert_eq!(c.retry.request_interval_ms, 1_000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c: Config = toml::from_str("[timeouts]\ninvoke_ms = 5000\n").unwrap();
        assert_eq!(c.timeouts.invoke_ms, 5_000);
        assert_eq!(c.timeouts.connect_ms, 10_000);
        assert_eq!(c.retry.connect_attempts, 10);
    }
}

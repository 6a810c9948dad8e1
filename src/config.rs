use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::client::RetryPolicy;
use crate::error::{GmailError, Result};
use crate::protection::{LabelProtection, ProtectionPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub protection: ProtectionPolicy,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Hard ceiling on threads listed by one scan, even when no limit is requested
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    #[serde(default)]
    pub excluded_domains: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            max_threads: default_max_threads(),
            excluded_domains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_trash_batch_size")]
    pub trash_batch_size: usize,
    #[serde(default = "default_max_concurrent_mutations")]
    pub max_concurrent_mutations: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            trash_batch_size: default_trash_batch_size(),
            max_concurrent_mutations: default_max_concurrent_mutations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Events an observer may have pending before its oldest are dropped
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            observer_buffer: default_observer_buffer(),
        }
    }
}

fn default_page_size() -> u32 {
    100
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_max_threads() -> usize {
    100_000
}

fn default_trash_batch_size() -> usize {
    50
}

fn default_max_concurrent_mutations() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_interval_ms() -> u64 {
    500
}

fn default_max_interval_ms() -> u64 {
    30_000
}

fn default_observer_buffer() -> usize {
    256
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min {
        return Err(GmailError::ConfigError(format!(
            "{} must be at least {}",
            name, min
        )));
    }
    if value > max {
        return Err(GmailError::ConfigError(format!(
            "{} cannot exceed {}",
            name, max
        )));
    }
    Ok(())
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Gmail caps threads.list at 500 per page
        check_range("scan.page_size", self.scan.page_size.into(), 1, 500)?;
        check_range(
            "scan.max_concurrent_fetches",
            self.scan.max_concurrent_fetches as u64,
            1,
            50,
        )?;
        check_range("scan.max_threads", self.scan.max_threads as u64, 1, 1_000_000)?;

        if self.scan.excluded_domains.iter().any(|d| d.trim().is_empty()) {
            return Err(GmailError::ConfigError(
                "scan.excluded_domains cannot contain empty strings".to_string(),
            ));
        }

        check_range(
            "cleanup.max_concurrent_fetches",
            self.cleanup.max_concurrent_fetches as u64,
            1,
            50,
        )?;
        check_range(
            "cleanup.trash_batch_size",
            self.cleanup.trash_batch_size as u64,
            1,
            1000,
        )?;
        check_range(
            "cleanup.max_concurrent_mutations",
            self.cleanup.max_concurrent_mutations as u64,
            1,
            50,
        )?;

        if let LabelProtection::Subset(labels) = &self.protection.label_mode {
            if labels.iter().any(|l| l.trim().is_empty()) {
                return Err(GmailError::ConfigError(
                    "protection.label_mode subset cannot contain empty label ids".to_string(),
                ));
            }
        }

        check_range("retry.max_attempts", self.retry.max_attempts.into(), 1, 10)?;
        if self.retry.initial_interval_ms == 0 {
            return Err(GmailError::ConfigError(
                "retry.initial_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_interval_ms < self.retry.initial_interval_ms {
            return Err(GmailError::ConfigError(
                "retry.max_interval_ms cannot be less than retry.initial_interval_ms".to_string(),
            ));
        }

        check_range(
            "progress.observer_buffer",
            self.progress.observer_buffer as u64,
            1,
            65_536,
        )?;

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}

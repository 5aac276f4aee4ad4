//! Pipeline configuration.
//!
//! TOML file with serde defaults; loaded once at startup and validated.
//! Options not set fall back to the source registry's per-agency values.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::scoring::MatchWeights;
use crate::sources::{self, SourceTag};

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sources: SourcesConfig,
    pub poll: PollConfig,
    pub window: WindowConfig,
    pub cluster: ClusterConfig,
    #[serde(rename = "match")]
    pub matching: MatchConfig,
    pub scoring: ScoringConfig,
    pub retry: RetryConfig,
    pub timeout: TimeoutConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Subset of known source tags to poll
    pub enabled: Vec<SourceTag>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: SourceTag::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Per-source minimum poll interval overrides, seconds
    pub interval: std::collections::BTreeMap<SourceTag, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Clustering window width in hours
    pub hours: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { hours: 24 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Spatial neighborhood radius in kilometers
    pub eps_km: f64,
    /// Maximum intra-cluster time delta in seconds
    pub dt_s: f64,
    /// Maximum intra-cluster magnitude delta
    pub dmag: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            eps_km: 100.0,
            dt_s: 30.0,
            dmag: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Minimum member-to-centroid score to stay in a multi-member cluster
    pub threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self { threshold: 0.6 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: MatchWeights,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Override for per-source max retry attempts
    pub max_attempts: Option<u32>,
    /// First backoff delay in milliseconds
    pub base_ms: Option<u64>,
    /// Backoff ceiling in milliseconds
    pub cap_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Override for per-source total fetch deadline in milliseconds
    pub ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Clustering cadence in worker mode, seconds
    pub cluster_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cluster_interval_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// validation. All configuration errors are fatal at startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first constraint violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scoring.weights.is_normalized() {
            return Err(ConfigError::Invalid(
                "scoring.weights must be non-negative and sum to 1".into(),
            ));
        }
        if self.window.hours == 0 {
            return Err(ConfigError::Invalid("window.hours must be positive".into()));
        }
        if self.cluster.eps_km <= 0.0 {
            return Err(ConfigError::Invalid(
                "cluster.eps_km must be positive".into(),
            ));
        }
        if self.cluster.dt_s <= 0.0 {
            return Err(ConfigError::Invalid("cluster.dt_s must be positive".into()));
        }
        if self.cluster.dmag <= 0.0 {
            return Err(ConfigError::Invalid("cluster.dmag must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.matching.threshold) {
            return Err(ConfigError::Invalid(
                "match.threshold must be within [0, 1]".into(),
            ));
        }
        if let (Some(base), Some(cap)) = (self.retry.base_ms, self.retry.cap_ms) {
            if base > cap {
                return Err(ConfigError::Invalid(
                    "retry.base_ms must not exceed retry.cap_ms".into(),
                ));
            }
        }
        if self.timeout.ms == Some(0) {
            return Err(ConfigError::Invalid("timeout.ms must be positive".into()));
        }
        if self.worker.cluster_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "worker.cluster_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Effective poll interval for one source: the configured override,
    /// floored by the registry's minimum.
    #[must_use]
    pub fn poll_interval_for(&self, tag: SourceTag) -> Duration {
        let floor = sources::spec_for(tag).min_poll_interval;
        match self.poll.interval.get(&tag) {
            Some(secs) => floor.max(Duration::from_secs(*secs)),
            None => floor,
        }
    }

    /// Effective retry attempt budget for one source.
    #[must_use]
    pub fn max_attempts_for(&self, tag: SourceTag) -> u32 {
        self.retry
            .max_attempts
            .unwrap_or(sources::spec_for(tag).max_retries)
    }

    /// Effective total fetch deadline for one source.
    #[must_use]
    pub fn deadline_for(&self, tag: SourceTag) -> Duration {
        match self.timeout.ms {
            Some(ms) => Duration::from_millis(ms),
            None => sources::spec_for(tag).timeout,
        }
    }

    /// Clustering window width.
    #[must_use]
    pub fn window_width(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.window.hours))
    }
}

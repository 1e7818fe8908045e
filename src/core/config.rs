use crate::core::errors::{Result, TetherError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning shared by every coordination strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Name recorded in logs and used as the memoized operation label
    pub label: String,
    /// Quiet period before a cancel-previous attempt starts (zero = latest)
    pub quiet_period: Duration,
    /// Maximum memoized entries per owner (`None` = unbounded)
    pub memo_capacity: Option<usize>,
    /// Number of record creations between reclamation passes over dead owners
    pub reclaim_interval: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            label: "operation".to_string(),
            quiet_period: Duration::ZERO,
            memo_capacity: None,
            reclaim_interval: 64,
        }
    }
}

impl StrategyConfig {
    /// Create a new builder for StrategyConfig
    pub fn builder() -> StrategyConfigBuilder {
        StrategyConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(TetherError::configuration_field("label cannot be empty", "label"));
        }
        if self.memo_capacity == Some(0) {
            return Err(TetherError::configuration_field(
                "memo_capacity must be greater than 0",
                "memo_capacity",
            ));
        }
        if self.reclaim_interval == 0 {
            return Err(TetherError::configuration_field(
                "reclaim_interval must be greater than 0",
                "reclaim_interval",
            ));
        }
        Ok(())
    }

    /// Parse and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Single-slot memoization: the last call wins
    pub fn once() -> Self {
        Self {
            memo_capacity: Some(1),
            ..Default::default()
        }
    }

    /// Cancel-previous coordination that waits out a quiet period
    pub fn debounced(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            ..Default::default()
        }
    }
}

/// Builder for StrategyConfig
pub struct StrategyConfigBuilder {
    config: StrategyConfig,
}

impl StrategyConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: StrategyConfig::default(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = label.into();
        self
    }

    pub fn quiet_period(mut self, quiet_period: Duration) -> Self {
        self.config.quiet_period = quiet_period;
        self
    }

    pub fn memo_capacity(mut self, capacity: Option<usize>) -> Self {
        self.config.memo_capacity = capacity;
        self
    }

    pub fn reclaim_interval(mut self, interval: usize) -> Self {
        self.config.reclaim_interval = interval;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<StrategyConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for StrategyConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Context configuration.

use std::time::Duration;

use crate::core::{PledgeError, Result};
use crate::core::constants::{
    CONSOLIDATOR_STAGE, DEFAULT_CYCLE_INTERVAL, DEFAULT_QUEUE_ANCHOR, PRIMER_STAGE, QUEUE_STAGE,
};

/// Configuration of a [`Pledge`](super::Pledge) context.
#[derive(Debug, Clone)]
pub struct PledgeConfig {
    /// Interval between cycle boundaries used by the cycle driver.
    pub cycle_interval: Duration,

    /// Pipeline name of the consolidator stage.
    pub consolidator_name: String,

    /// Pipeline name of the mode-queue stage.
    pub queue_name: String,

    /// Pipeline name of the queue primer stage.
    pub primer_name: String,

    /// Stage after which the mode queue is inserted; `None` inserts it at
    /// the head, right in front of the transport.
    pub queue_anchor: Option<String>,

    /// Register connections that already exist with pingers created later.
    pub register_existing: bool,
}

impl Default for PledgeConfig {
    fn default() -> Self {
        Self {
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            consolidator_name: CONSOLIDATOR_STAGE.to_string(),
            queue_name: QUEUE_STAGE.to_string(),
            primer_name: PRIMER_STAGE.to_string(),
            queue_anchor: Some(DEFAULT_QUEUE_ANCHOR.to_string()),
            register_existing: true,
        }
    }
}

/// Builder for [`PledgeConfig`].
#[derive(Debug, Default)]
pub struct PledgeBuilder {
    config: PledgeConfig,
}

impl PledgeBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cycle interval.
    pub fn cycle_interval(mut self, interval: Duration) -> Self {
        self.config.cycle_interval = interval;
        self
    }

    /// Set the consolidator stage name.
    pub fn consolidator_name(mut self, name: impl Into<String>) -> Self {
        self.config.consolidator_name = name.into();
        self
    }

    /// Set the mode-queue stage name.
    pub fn queue_name(mut self, name: impl Into<String>) -> Self {
        self.config.queue_name = name.into();
        self
    }

    /// Set the queue primer stage name.
    pub fn primer_name(mut self, name: impl Into<String>) -> Self {
        self.config.primer_name = name.into();
        self
    }

    /// Set (or clear) the stage the mode queue is inserted after.
    pub fn queue_anchor(mut self, anchor: Option<String>) -> Self {
        self.config.queue_anchor = anchor;
        self
    }

    /// Whether pingers pick up connections established before them.
    pub fn register_existing(mut self, enabled: bool) -> Self {
        self.config.register_existing = enabled;
        self
    }

    /// Validate and build the configuration.
    ///
    /// Fails if the cycle interval is zero or if two stages share a name.
    pub fn build(self) -> Result<PledgeConfig> {
        let config = self.config;
        if config.cycle_interval.is_zero() {
            return Err(PledgeError::Config("cycle interval must be non-zero".into()));
        }

        let names = [&config.consolidator_name, &config.queue_name, &config.primer_name];
        if names.iter().any(|name| name.is_empty()) {
            return Err(PledgeError::Config("stage names must not be empty".into()));
        }
        if names[0] == names[1] || names[0] == names[2] || names[1] == names[2] {
            return Err(PledgeError::Config("stage names must be distinct".into()));
        }
        if let Some(anchor) = &config.queue_anchor {
            if names.contains(&anchor) {
                return Err(PledgeError::Config(format!(
                    "queue anchor `{anchor}` names a tickprobe stage"
                )));
            }
        }
        Ok(config)
    }
}

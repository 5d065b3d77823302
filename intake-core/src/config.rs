//! Configuration for the intake pipeline.

use std::path::PathBuf;

use serde::Deserialize;
use tokio::time::Duration;

use crate::error::{IntakeError, Result};

/// Knobs consumed by the settle detector and dispatch loop.
///
/// All durations are plain millisecond fields so the struct
/// deserializes directly from a TOML table or environment layer.
#[derive(Clone, Debug, Deserialize)]
pub struct IntakeConfig {
    /// Directory watched for new files.
    pub watch_dir: PathBuf,
    /// Directory settled files are moved into.
    pub dest_dir: PathBuf,
    /// Pause between file-size readings while waiting for a file to settle.
    #[serde(default = "IntakeConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Size readings taken before a file is given up on as never stabilizing.
    #[serde(default = "IntakeConfig::default_max_settle_attempts")]
    pub max_settle_attempts: u32,
    /// Consecutive equal size readings required to declare a file stable.
    #[serde(default = "IntakeConfig::default_stability_threshold")]
    pub stability_threshold: u32,
    /// Maximum number of candidates settling concurrently.
    #[serde(default = "IntakeConfig::default_max_in_flight")]
    pub max_in_flight: usize,
}

impl IntakeConfig {
    /// Config with default tuning for the given directories.
    pub fn new(watch_dir: PathBuf, dest_dir: PathBuf) -> Self {
        Self {
            watch_dir,
            dest_dir,
            poll_interval_ms: Self::default_poll_interval_ms(),
            max_settle_attempts: Self::default_max_settle_attempts(),
            stability_threshold: Self::default_stability_threshold(),
            max_in_flight: Self::default_max_in_flight(),
        }
    }

    fn default_poll_interval_ms() -> u64 {
        500
    }

    fn default_max_settle_attempts() -> u32 {
        10
    }

    fn default_stability_threshold() -> u32 {
        2
    }

    fn default_max_in_flight() -> usize {
        4
    }

    /// Poll interval with a floor of one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Whether the destination directory sits inside the watched tree.
    ///
    /// Allowed, but the event normalizer then filters destination paths
    /// so the writer's own moves cannot re-trigger the pipeline.
    pub fn destination_inside_watch(&self) -> bool {
        self.dest_dir.starts_with(&self.watch_dir)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.watch_dir == self.dest_dir {
            return Err(IntakeError::InvalidConfig(format!(
                "watch_dir and dest_dir are the same directory: {}",
                self.watch_dir.display()
            )));
        }
        if self.watch_dir.starts_with(&self.dest_dir) {
            return Err(IntakeError::InvalidConfig(format!(
                "watch_dir {} is nested inside dest_dir {}",
                self.watch_dir.display(),
                self.dest_dir.display()
            )));
        }
        if self.stability_threshold == 0 {
            return Err(IntakeError::InvalidConfig(
                "stability_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_settle_attempts < self.stability_threshold {
            return Err(IntakeError::InvalidConfig(format!(
                "max_settle_attempts ({}) cannot be lower than stability_threshold ({})",
                self.max_settle_attempts, self.stability_threshold
            )));
        }
        Ok(())
    }
}

//! Settle detection: size-stability polling with bounded attempts.
//!
//! A file is considered settled once its size has been read unchanged
//! for a configured number of consecutive polls. Partial writes show
//! up as a changing size and keep resetting the streak; a file that
//! never stops growing runs out of attempts and is given up on rather
//! than processed half-written.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::time::{Duration, sleep};
use tracing::{debug, warn};

/// How a settle run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettleStatus {
    /// Size held steady for the threshold number of readings.
    Stable,
    /// The file stopped existing mid-poll.
    Vanished,
    /// Attempts ran out before the size held steady.
    DidNotStabilize,
    /// The candidate was cancelled while polling.
    Cancelled,
}

/// Outcome of a settle run, consumed immediately by the dispatch loop.
#[derive(Clone, Copy, Debug)]
pub struct SettleResult {
    pub status: SettleStatus,
    /// Last size observed, when at least one reading succeeded.
    pub final_size: Option<u64>,
    /// Size readings taken before the run ended.
    pub attempts: u32,
}

impl SettleResult {
    pub fn is_stable(&self) -> bool {
        self.status == SettleStatus::Stable
    }
}

/// Filesystem stat capability the detector polls through.
#[async_trait]
pub trait SizeProbe: Send + Sync {
    /// Size of the file at `path`, or `None` when it no longer exists.
    async fn size_of(&self, path: &Path) -> io::Result<Option<u64>>;
}

/// Production probe backed by `tokio::fs::metadata`.
#[derive(Debug, Default)]
pub struct FsProbe;

#[async_trait]
impl SizeProbe for FsProbe {
    async fn size_of(&self, path: &Path) -> io::Result<Option<u64>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Poll `path` until its size is unchanged for `stability_threshold`
/// consecutive readings, up to `max_attempts` readings in total.
///
/// The cancel flag is checked before every reading so a delete event
/// or shutdown aborts the run promptly instead of riding out the
/// remaining attempts. Two consecutive zero readings count as stable;
/// legitimately empty files settle like any other.
pub async fn wait_until_stable(
    path: &Path,
    poll_interval: Duration,
    max_attempts: u32,
    stability_threshold: u32,
    cancel: &AtomicBool,
    probe: &dyn SizeProbe,
) -> SettleResult {
    let mut last_size: Option<u64> = None;
    let mut streak: u32 = 0;
    let mut attempts: u32 = 0;

    loop {
        if cancel.load(Ordering::Relaxed) {
            return SettleResult {
                status: SettleStatus::Cancelled,
                final_size: last_size,
                attempts,
            };
        }

        let size = match probe.size_of(path).await {
            Ok(Some(size)) => Some(size),
            Ok(None) => {
                return SettleResult {
                    status: SettleStatus::Vanished,
                    final_size: last_size,
                    attempts,
                };
            }
            Err(err) => {
                // Transient stat failure: counts as an attempt and
                // breaks the streak, mirroring a size change.
                warn!(path = %path.display(), error = %err, "size probe failed");
                None
            }
        };
        attempts += 1;

        match size {
            Some(size) if last_size == Some(size) => {
                streak += 1;
            }
            Some(size) => {
                last_size = Some(size);
                streak = 1;
            }
            None => {
                last_size = None;
                streak = 0;
            }
        }

        if streak >= stability_threshold {
            debug!(
                path = %path.display(),
                size = last_size,
                attempts,
                "file settled"
            );
            return SettleResult {
                status: SettleStatus::Stable,
                final_size: last_size,
                attempts,
            };
        }

        if attempts >= max_attempts {
            return SettleResult {
                status: SettleStatus::DidNotStabilize,
                final_size: last_size,
                attempts,
            };
        }

        sleep(poll_interval).await;
    }
}

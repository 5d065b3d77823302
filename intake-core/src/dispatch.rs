//! Dispatch loop: settle each candidate, then hand it off exactly once.
//!
//! Candidates are consumed from the normalizer and settled on a
//! bounded pool of workers; each candidate's lifecycle is isolated, so
//! a failing hook invocation is logged and dropped without disturbing
//! the loop. A shutdown signal cancels every in-flight candidate and
//! waits for the workers to wind down.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::IntakeConfig;
use crate::error::Result;
use crate::events::{Candidate, InFlightSet};
use crate::place::{PlaceOutcome, place};
use crate::settle::{FsProbe, SettleStatus, SizeProbe, wait_until_stable};

/// What the processing hook did with a settled file.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Handoff finished; the destination is recorded when one exists.
    Completed { destination: Option<PathBuf> },
    /// The file reached the destination but the source could not be
    /// removed; it now exists in both places and needs follow-up.
    Partial {
        destination: PathBuf,
        cause: std::io::Error,
    },
}

/// Processing step invoked exactly once per settled, non-cancelled
/// candidate. Replace the default [`DestinationMover`] to upload,
/// validate, or transform instead of moving.
#[async_trait]
pub trait ProcessHook: Send + Sync {
    async fn process(&self, path: &Path) -> Result<ProcessOutcome>;
}

/// Default hook: move the settled file into the destination directory
/// with collision-safe renaming. Placements are serialized internally
/// so two workers never claim the same collision suffix.
#[derive(Debug)]
pub struct DestinationMover {
    dest_dir: PathBuf,
    lock: Mutex<()>,
}

impl DestinationMover {
    pub fn new(dest_dir: PathBuf) -> Self {
        Self {
            dest_dir,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl ProcessHook for DestinationMover {
    async fn process(&self, path: &Path) -> Result<ProcessOutcome> {
        let _guard = self.lock.lock().await;
        match place(path, &self.dest_dir).await? {
            PlaceOutcome::Moved(destination) => Ok(ProcessOutcome::Completed {
                destination: Some(destination),
            }),
            PlaceOutcome::Partial { destination, cause } => {
                Ok(ProcessOutcome::Partial { destination, cause })
            }
        }
    }
}

/// Orchestrates settle runs and hook invocations for a candidate
/// stream until the stream ends or a shutdown is signalled.
pub struct Dispatcher {
    config: IntakeConfig,
    hook: Arc<dyn ProcessHook>,
    probe: Arc<dyn SizeProbe>,
    in_flight: Arc<InFlightSet>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(config: IntakeConfig, hook: Arc<dyn ProcessHook>, in_flight: Arc<InFlightSet>) -> Self {
        Self {
            config,
            hook,
            probe: Arc::new(FsProbe),
            in_flight,
        }
    }

    /// Replace the filesystem probe. Test seam.
    pub fn with_probe(mut self, probe: Arc<dyn SizeProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Run until the candidate stream ends or `shutdown` fires.
    ///
    /// End-of-stream drains in-flight workers; a shutdown signal
    /// cancels them first so settle polls abort promptly.
    pub async fn run(
        self,
        mut candidates: mpsc::Receiver<Candidate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut stopping = false;

        loop {
            let permit = tokio::select! {
                _ = shutdown.changed() => {
                    stopping = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    permit
                }
            };

            let candidate = tokio::select! {
                _ = shutdown.changed() => {
                    stopping = true;
                    break;
                }
                maybe = candidates.recv() => {
                    let Some(candidate) = maybe else { break };
                    candidate
                }
            };

            let worker = CandidateWorker {
                config: self.config.clone(),
                hook: Arc::clone(&self.hook),
                probe: Arc::clone(&self.probe),
            };
            workers.spawn(async move {
                worker.handle(candidate).await;
                drop(permit);
            });
        }

        if stopping {
            // Candidates still queued behind the pool never reached a
            // worker; record each one before releasing its lease.
            candidates.close();
            while let Ok(candidate) = candidates.try_recv() {
                info!(path = %candidate.path().display(), "candidate abandoned");
            }
            let abandoned = self.in_flight.len();
            if abandoned > 0 {
                info!(abandoned, "shutdown requested, cancelling in-flight candidates");
            }
            self.in_flight.cancel_all();
        }

        while workers.join_next().await.is_some() {}
        debug!("dispatch loop stopped");
    }
}

struct CandidateWorker {
    config: IntakeConfig,
    hook: Arc<dyn ProcessHook>,
    probe: Arc<dyn SizeProbe>,
}

impl CandidateWorker {
    /// Full lifecycle of one candidate: settle, then process at most
    /// once. The candidate's lease is released when it drops at the
    /// end of this call, whatever the outcome.
    async fn handle(&self, candidate: Candidate) {
        let path = candidate.path().to_path_buf();
        let result = wait_until_stable(
            &path,
            self.config.poll_interval(),
            self.config.max_settle_attempts,
            self.config.stability_threshold,
            candidate.cancel_flag(),
            self.probe.as_ref(),
        )
        .await;

        match result.status {
            SettleStatus::Stable => {
                // A delete can land between the final poll and here.
                if candidate.is_cancelled() {
                    info!(path = %path.display(), "candidate abandoned");
                    return;
                }
                info!(
                    path = %path.display(),
                    size = result.final_size,
                    attempts = result.attempts,
                    "file settled"
                );
                match self.hook.process(&path).await {
                    Ok(ProcessOutcome::Completed { destination }) => match destination {
                        Some(destination) => info!(
                            path = %path.display(),
                            destination = %destination.display(),
                            "processed"
                        ),
                        None => info!(path = %path.display(), "processed"),
                    },
                    Ok(ProcessOutcome::Partial { destination, cause }) => {
                        warn!(
                            path = %path.display(),
                            destination = %destination.display(),
                            %cause,
                            "partial move: file copied but source not removed"
                        );
                    }
                    Err(err) => {
                        error!(
                            path = %path.display(),
                            error = %err,
                            "processing failed"
                        );
                    }
                }
            }
            SettleStatus::Vanished => {
                info!(
                    path = %path.display(),
                    attempts = result.attempts,
                    "file vanished before settling"
                );
            }
            SettleStatus::DidNotStabilize => {
                warn!(
                    path = %path.display(),
                    attempts = result.attempts,
                    last_size = result.final_size,
                    "file did not stabilize, giving up"
                );
            }
            SettleStatus::Cancelled => {
                info!(path = %path.display(), "candidate abandoned");
            }
        }
    }
}

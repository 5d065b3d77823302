//! Raw-event normalization.
//!
//! Reduces the at-least-once, possibly duplicated notification stream
//! into a deduplicated stream of [`Candidate`]s: at most one candidate
//! per path is in flight at a time, a delete observed mid-flight flips
//! the candidate's cancel flag, and events under the destination
//! directory are filtered out so the writer's own moves never feed
//! back into the pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

/// What happened to a path, as reported by the notification source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawEventKind {
    Created,
    Modified,
    Moved,
    Deleted,
}

/// A single notification from the source. Transient, never persisted.
#[derive(Clone, Debug)]
pub struct RawEvent {
    pub kind: RawEventKind,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl RawEvent {
    /// Event stamped with the current time.
    pub fn now(kind: RawEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Message forwarded from the notification source to the normalizer.
#[derive(Clone, Debug)]
pub enum WatchMessage {
    /// A raw filesystem notification.
    Event(RawEvent),
    /// The source itself failed; the pipeline shuts down after this.
    Fatal(String),
}

/// Paths currently owned by an unresolved candidate.
///
/// Claiming a path registers a cancel flag; the flag is flipped when a
/// delete arrives for the path while it is still in flight. Entries
/// are removed by the candidate's lease when the dispatch loop is done
/// with it.
#[derive(Debug, Default)]
pub struct InFlightSet {
    inner: Mutex<HashMap<PathBuf, Arc<AtomicBool>>>,
}

impl InFlightSet {
    /// Claim `path`, returning its cancel flag, or `None` when a
    /// candidate for the path is already in flight.
    pub fn try_claim(&self, path: &Path) -> Option<Arc<AtomicBool>> {
        let mut inner = self.inner.lock().expect("in-flight set poisoned");
        if inner.contains_key(path) {
            return None;
        }
        let flag = Arc::new(AtomicBool::new(false));
        inner.insert(path.to_path_buf(), Arc::clone(&flag));
        Some(flag)
    }

    /// Flip the cancel flag for `path` if it is in flight.
    pub fn cancel(&self, path: &Path) -> bool {
        let inner = self.inner.lock().expect("in-flight set poisoned");
        match inner.get(path) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Flip every in-flight cancel flag. Used on shutdown.
    pub fn cancel_all(&self) {
        let inner = self.inner.lock().expect("in-flight set poisoned");
        for flag in inner.values() {
            flag.store(true, Ordering::Relaxed);
        }
    }

    /// Number of paths currently in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("in-flight set poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, path: &Path) {
        self.inner
            .lock()
            .expect("in-flight set poisoned")
            .remove(path);
    }
}

/// Returns the claimed path to the in-flight set when dropped.
#[derive(Debug)]
struct InFlightLease {
    set: Arc<InFlightSet>,
    path: PathBuf,
}

impl Drop for InFlightLease {
    fn drop(&mut self) {
        self.set.release(&self.path);
    }
}

/// A deduplicated unit of work: one file pending settle and dispatch.
///
/// The candidate owns its path's in-flight lease; dropping the
/// candidate (after processing, abandonment, or an error) releases
/// the path so a later event can start a fresh candidate.
#[derive(Debug)]
pub struct Candidate {
    path: PathBuf,
    first_seen: DateTime<Utc>,
    cancel: Arc<AtomicBool>,
    _lease: InFlightLease,
}

impl Candidate {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    /// True once a delete (or shutdown) has cancelled this candidate.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Flag polled by the settle detector between size readings.
    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }
}

/// Turns raw watch messages into a candidate stream.
#[derive(Debug)]
pub struct Normalizer {
    in_flight: Arc<InFlightSet>,
    dest_dir: PathBuf,
}

impl Normalizer {
    pub fn new(dest_dir: PathBuf) -> Self {
        Self {
            in_flight: Arc::new(InFlightSet::default()),
            dest_dir,
        }
    }

    /// Shared handle to the in-flight set, for the dispatch loop.
    pub fn in_flight(&self) -> Arc<InFlightSet> {
        Arc::clone(&self.in_flight)
    }

    /// Consume watch messages until the source ends or fails fatally.
    ///
    /// Dropping `tx` on return ends the candidate stream, which the
    /// dispatch loop observes as end-of-stream.
    pub async fn run(self, mut rx: mpsc::Receiver<WatchMessage>, tx: mpsc::Sender<Candidate>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                WatchMessage::Event(event) => {
                    if event.path.starts_with(&self.dest_dir) {
                        trace!(path = %event.path.display(), "ignoring event under destination dir");
                        continue;
                    }
                    match event.kind {
                        RawEventKind::Created | RawEventKind::Modified | RawEventKind::Moved => {
                            let Some(cancel) = self.in_flight.try_claim(&event.path) else {
                                trace!(
                                    path = %event.path.display(),
                                    "duplicate event for in-flight path suppressed"
                                );
                                continue;
                            };
                            let candidate = Candidate {
                                first_seen: event.timestamp,
                                cancel,
                                _lease: InFlightLease {
                                    set: Arc::clone(&self.in_flight),
                                    path: event.path.clone(),
                                },
                                path: event.path,
                            };
                            info!(path = %candidate.path.display(), "candidate discovered");
                            if tx.send(candidate).await.is_err() {
                                debug!("candidate receiver dropped; stopping normalizer");
                                return;
                            }
                        }
                        RawEventKind::Deleted => {
                            if self.in_flight.cancel(&event.path) {
                                debug!(
                                    path = %event.path.display(),
                                    "in-flight candidate cancelled by delete"
                                );
                            }
                        }
                    }
                }
                WatchMessage::Fatal(cause) => {
                    error!(%cause, "notification source failed; ending candidate stream");
                    return;
                }
            }
        }
    }
}

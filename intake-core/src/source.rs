//! Bridge from `notify` to the pipeline's raw-event stream.
//!
//! Owns the platform watcher for the watched directory and converts
//! its notifications into [`RawEvent`]s. Renames are split into a
//! delete of the old path and a create of the new one so the
//! normalizer can cancel and re-claim without rename-specific logic.
//! Backend errors are forwarded as a fatal message; the pipeline
//! treats them as a reason to stop.

use std::fmt;
use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::mpsc;

use crate::error::{IntakeError, Result};
use crate::events::{RawEvent, RawEventKind, WatchMessage};

/// Live watch on a single directory. Dropping the source stops the
/// underlying notify stream.
pub struct EventSource {
    _watcher: RecommendedWatcher,
    watch_dir: PathBuf,
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("watch_dir", &self.watch_dir)
            .finish()
    }
}

impl EventSource {
    /// Start watching `watch_dir` (non-recursive), forwarding raw
    /// events into `tx`.
    pub fn start(watch_dir: &Path, tx: mpsc::Sender<WatchMessage>) -> Result<Self> {
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for raw in convert_event(event) {
                        if tx.blocking_send(WatchMessage::Event(raw)).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    let _ = tx.blocking_send(WatchMessage::Fatal(err.to_string()));
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|err| IntakeError::Watch(format!("failed to create watcher: {err}")))?;

        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .map_err(|err| {
                IntakeError::Watch(format!("failed to watch {}: {err}", watch_dir.display()))
            })?;

        Ok(Self {
            _watcher: watcher,
            watch_dir: watch_dir.to_path_buf(),
        })
    }
}

/// Map a notify event onto zero or more raw events.
fn convert_event(event: Event) -> Vec<RawEvent> {
    let mut paths = event.paths.into_iter();
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => file_event(RawEventKind::Created, paths.next()),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::new();
            if let Some(old) = paths.next() {
                out.push(RawEvent::now(RawEventKind::Deleted, old));
            }
            out.extend(file_event(RawEventKind::Created, paths.next()));
            out
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => match paths.next() {
            Some(old) => vec![RawEvent::now(RawEventKind::Deleted, old)],
            None => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            file_event(RawEventKind::Created, paths.next())
        }
        // Single-sided rename report; the path is whatever notify saw.
        EventKind::Modify(ModifyKind::Name(_)) => file_event(RawEventKind::Moved, paths.next()),
        EventKind::Modify(_) => file_event(RawEventKind::Modified, paths.next()),
        EventKind::Remove(_) => match paths.next() {
            Some(path) => vec![RawEvent::now(RawEventKind::Deleted, path)],
            None => Vec::new(),
        },
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Wrap `path` in a raw event unless it points at a directory.
fn file_event(kind: RawEventKind, path: Option<PathBuf>) -> Vec<RawEvent> {
    let Some(path) = path else {
        return Vec::new();
    };
    if std::fs::metadata(&path).is_ok_and(|meta| meta.is_dir()) {
        return Vec::new();
    }
    vec![RawEvent::now(kind, path)]
}

#[cfg(test)]
mod tests {
    use super::*;

    use notify::event::{DataChange, MetadataKind, RemoveKind};
    use tempfile::tempdir;
    use tokio::time::{Duration, timeout};

    fn kinds(events: &[RawEvent]) -> Vec<RawEventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn create_and_modify_map_to_candidate_kinds() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();

        let created =
            convert_event(Event::new(EventKind::Create(CreateKind::File)).add_path(file.clone()));
        assert_eq!(kinds(&created), [RawEventKind::Created]);

        let modified = convert_event(
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(file.clone()),
        );
        assert_eq!(kinds(&modified), [RawEventKind::Modified]);
        assert_eq!(modified[0].path, file);
    }

    #[test]
    fn rename_both_splits_into_delete_and_create() {
        let dir = tempdir().unwrap();
        let new = dir.path().join("new.txt");
        std::fs::write(&new, "x").unwrap();

        let events = convert_event(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(dir.path().join("old.txt"))
                .add_path(new.clone()),
        );
        assert_eq!(kinds(&events), [RawEventKind::Deleted, RawEventKind::Created]);
        assert_eq!(events[1].path, new);
    }

    #[test]
    fn directory_creation_is_ignored() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();

        let folder =
            convert_event(Event::new(EventKind::Create(CreateKind::Folder)).add_path(sub.clone()));
        assert!(folder.is_empty());

        // Some backends report folder creation as Create(Any); the
        // stat guard catches those.
        let any = convert_event(Event::new(EventKind::Create(CreateKind::Any)).add_path(sub));
        assert!(any.is_empty());
    }

    #[test]
    fn access_and_metadata_noise_is_dropped_or_modified() {
        let events = convert_event(Event::new(EventKind::Any));
        assert!(events.is_empty());

        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();
        let meta = convert_event(
            Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))).add_path(file),
        );
        assert_eq!(kinds(&meta), [RawEventKind::Modified]);
    }

    #[test]
    fn removal_maps_to_deleted_without_a_stat() {
        let events = convert_event(
            Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/gone.txt")),
        );
        assert_eq!(kinds(&events), [RawEventKind::Deleted]);
    }

    #[test]
    fn start_fails_for_missing_directory() {
        let (tx, _rx) = mpsc::channel(8);
        let err = EventSource::start(Path::new("/nonexistent/intake-watch"), tx).unwrap_err();
        assert!(matches!(err, IntakeError::Watch(_)));
    }

    #[tokio::test]
    async fn delivers_an_event_for_a_new_file() {
        let dir = tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let _source = EventSource::start(dir.path(), tx).unwrap();

        std::fs::write(dir.path().join("incoming.txt"), "payload").unwrap();

        let msg = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("source channel closed");
        match msg {
            WatchMessage::Event(event) => {
                assert_eq!(event.path.file_name().unwrap(), "incoming.txt");
            }
            WatchMessage::Fatal(cause) => panic!("unexpected fatal error: {cause}"),
        }
    }
}

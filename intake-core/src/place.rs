//! Destination writer: collision-safe placement of settled files.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{IntakeError, Result};

/// Collision suffixes tried before giving up. In practice the search
/// ends at the first gap; the cap only turns a pathological directory
/// into a reported error instead of an unbounded scan.
const MAX_COLLISION_SUFFIX: u32 = 9999;

/// How a settled file ended up at its destination.
#[derive(Debug)]
pub enum PlaceOutcome {
    /// The file now lives only at the destination path.
    Moved(PathBuf),
    /// Cross-volume fallback copied the file but could not remove the
    /// source; the file exists in both locations and needs follow-up.
    Partial {
        destination: PathBuf,
        cause: io::Error,
    },
}

/// Move `source` into `dest_dir`, resolving name collisions with a
/// numeric suffix (`a.txt`, `a-1.txt`, `a-2.txt`, ...).
///
/// Uses an atomic rename when source and destination share a volume
/// and falls back to copy-then-remove otherwise. Callers targeting the
/// same destination directory must serialize calls; two concurrent
/// placements may otherwise claim the same suffix.
pub async fn place(source: &Path, dest_dir: &Path) -> Result<PlaceOutcome> {
    tokio::fs::create_dir_all(dest_dir).await?;
    let destination = next_free_name(source, dest_dir, MAX_COLLISION_SUFFIX).await?;

    match tokio::fs::rename(source, &destination).await {
        Ok(()) => Ok(PlaceOutcome::Moved(destination)),
        Err(rename_err) => {
            debug!(
                source = %source.display(),
                error = %rename_err,
                "rename failed, falling back to copy"
            );
            if let Err(copy_err) = tokio::fs::copy(source, &destination).await {
                // A dead copy must not squat on the collision name.
                let _ = tokio::fs::remove_file(&destination).await;
                return Err(copy_err.into());
            }
            match tokio::fs::remove_file(source).await {
                Ok(()) => Ok(PlaceOutcome::Moved(destination)),
                Err(cause) => Ok(PlaceOutcome::Partial { destination, cause }),
            }
        }
    }
}

/// First unused destination name for `source` inside `dest_dir`.
async fn next_free_name(source: &Path, dest_dir: &Path, cap: u32) -> Result<PathBuf> {
    let name = source.file_name().ok_or_else(|| {
        IntakeError::Internal(format!("source has no file name: {}", source.display()))
    })?;

    let plain = dest_dir.join(name);
    if !tokio::fs::try_exists(&plain).await? {
        return Ok(plain);
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = source.extension().map(|e| e.to_string_lossy().into_owned());

    for i in 1..=cap {
        let suffixed = match &ext {
            Some(ext) => format!("{stem}-{i}.{ext}"),
            None => format!("{stem}-{i}"),
        };
        let candidate = dest_dir.join(suffixed);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }

    Err(IntakeError::CollisionExhausted {
        dir: dest_dir.to_path_buf(),
        name: name.to_string_lossy().into_owned(),
    })
}

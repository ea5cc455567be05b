//! Output retention: deletes old artifacts and abandoned partial files.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Delete regular files in `dir` last modified at least `max_age` ago.
/// Returns how many were removed. A missing directory counts as empty.
pub async fn sweep(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!("Failed to stat {}: {}", entry.path().display(), e);
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match fs::remove_file(entry.path()).await {
            Ok(()) => {
                debug!("Removed expired artifact {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }

    Ok(removed)
}

/// Sweep `dir` every `interval` until `shutdown` flips to true.
pub async fn run_cleanup_loop(
    dir: PathBuf,
    max_age: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        "Output sweeper watching {} (retention {:?}, every {:?})",
        dir.display(),
        max_age,
        interval
    );
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match sweep(&dir, max_age).await {
                    Ok(0) => {}
                    Ok(n) => info!("Removed {} expired artifacts from {}", n, dir.display()),
                    Err(e) => warn!("Output sweep failed: {}", e),
                }
            }
        }
    }
}

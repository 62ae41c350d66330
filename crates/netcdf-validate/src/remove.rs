//! Corrupted-file removal with retry.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, warn};

/// Remove a file, retrying on transient filesystem errors.
///
/// Network filesystems can fail an unlink transiently, or report the entry
/// as still present until metadata syncs. Each attempt unlinks, sleeps
/// `delay` to let the filesystem settle, then re-checks that the path is
/// gone. A path that never existed counts as success.
///
/// Returns `false` only if the path still exists after the final attempt.
/// The file's content is destroyed on success; callers must not pass a path
/// still needed by an in-flight validation.
pub async fn remove_with_retry(path: &Path, max_attempts: u32, delay: Duration) -> bool {
    if !path.exists() {
        return true;
    }

    for attempt in 1..=max_attempts {
        match std::fs::remove_file(path) {
            Ok(()) => {
                tokio::time::sleep(delay).await;
                if !path.exists() {
                    debug!(file = %path.display(), attempt, "removed file");
                    return true;
                }
            }
            Err(err) => {
                warn!(
                    file = %path.display(),
                    attempt,
                    max_attempts,
                    error = %err,
                    "failed to remove file"
                );
                if attempt < max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    if path.exists() {
        error!(file = %path.display(), attempts = max_attempts, "could not remove file");
        false
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_path_trivially_succeeds() {
        let dir = TempDir::new().unwrap();
        let removed =
            remove_with_retry(&dir.path().join("absent.nc"), 3, Duration::from_millis(1)).await;
        assert!(removed);
    }

    #[tokio::test]
    async fn test_existing_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doomed.nc");
        std::fs::write(&path, b"bytes").unwrap();

        let removed = remove_with_retry(&path, 3, Duration::from_millis(1)).await;
        assert!(removed);
        assert!(!path.exists());
    }
}

//! File stability detection for buffered network-filesystem writes.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

/// Wait for a file to stop changing size.
///
/// Network filesystems may report a download as complete before write
/// buffers have flushed; validating at that point reads a half-written file
/// and misdiagnoses it as corrupt. This samples the file size every
/// `check_interval` and declares stability as soon as two consecutive
/// samples agree, returning `true` immediately at that point.
///
/// Returns `false` if the file does not exist, if a stat fails, or if
/// `max_checks` samples are exhausted without two consecutive equal
/// readings.
pub async fn wait_for_stability(path: &Path, check_interval: Duration, max_checks: u32) -> bool {
    if !path.exists() {
        warn!(file = %path.display(), "cannot wait for stability: file does not exist");
        return false;
    }

    let mut previous_size: Option<u64> = None;

    for check in 1..=max_checks {
        let current_size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(err) => {
                warn!(file = %path.display(), error = %err, "stat failed while waiting for stability");
                return false;
            }
        };

        if previous_size == Some(current_size) {
            debug!(file = %path.display(), checks = check, size = current_size, "file is stable");
            return true;
        }

        previous_size = Some(current_size);
        tokio::time::sleep(check_interval).await;
    }

    warn!(
        file = %path.display(),
        checks = max_checks,
        "file may still be changing after maximum stability checks"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_unstable() {
        let dir = TempDir::new().unwrap();
        let stable =
            wait_for_stability(&dir.path().join("absent.nc"), Duration::from_millis(1), 3).await;
        assert!(!stable);
    }

    #[tokio::test]
    async fn test_static_file_stabilizes_early() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("static.nc");
        std::fs::write(&path, b"settled bytes").unwrap();

        let start = std::time::Instant::now();
        let stable = wait_for_stability(&path, Duration::from_millis(5), 10).await;
        assert!(stable);
        // Two samples suffice; nowhere near all 10 intervals should elapse.
        assert!(start.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_growing_file_eventually_settles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("growing.nc");
        std::fs::write(&path, b"start").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let mut file = std::fs::OpenOptions::new()
                    .append(true)
                    .open(&writer_path)
                    .unwrap();
                file.write_all(b"more").unwrap();
            }
        });

        let stable = wait_for_stability(&path, Duration::from_millis(25), 50).await;
        writer.await.unwrap();
        assert!(stable);
    }
}

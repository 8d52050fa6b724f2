//! Timeout-bounded advisory file locks and owner-only file helpers.
//!
//! Shared by every writer that appends to or replaces an audit-path file:
//! ledger days, snapshot partitions and the policy store.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive lock on an open file, released on drop.
#[derive(Debug)]
pub struct FileLock<'a> {
    file: &'a File,
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

/// Polls for an exclusive lock on `file` until `timeout` elapses.
///
/// # Errors
///
/// Returns an error of kind [`io::ErrorKind::TimedOut`] if the lock stays
/// contended, or the underlying error for any other failure.
pub fn lock_exclusive(file: &File, timeout: Duration) -> io::Result<FileLock<'_>> {
    let deadline = Instant::now() + timeout;
    let contended = fs2::lock_contended_error();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(FileLock { file }),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.raw_os_error() == contended.raw_os_error() =>
            {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "advisory lock still held by another writer",
                    ));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Restricts `path` to its owner (0600). No-op off Unix.
///
/// # Errors
///
/// Propagates the permission change failure.
pub fn secure_permissions(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Atomically replaces `path` with `contents`, owner-only.
///
/// Writes a sibling temp file, restricts it, syncs it and renames it
/// over the target.
///
/// # Errors
///
/// Propagates any filesystem failure; the target is untouched on error.
pub fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        secure_permissions(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_times_out_while_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("held.lock");
        let holder = File::create(&path).unwrap();
        let contender = OpenOptions::new().write(true).open(&path).unwrap();

        let _guard = lock_exclusive(&holder, Duration::from_millis(50)).unwrap();
        let err = lock_exclusive(&contender, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cycle.lock");
        let a = File::create(&path).unwrap();
        let b = OpenOptions::new().write(true).open(&path).unwrap();

        drop(lock_exclusive(&a, Duration::from_millis(50)).unwrap());
        assert!(lock_exclusive(&b, Duration::from_millis(50)).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_private_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret.json");
        write_private(&path, b"{}").unwrap();
        write_private(&path, b"{\"v\":2}").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read(&path).unwrap(), b"{\"v\":2}");
    }
}

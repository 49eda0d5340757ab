//! Filesystem helpers: atomic writes, cross-device directory moves, sizes.

use std::path::Path;

use anyhow::Context;

use crate::subprocess::Tool;

/// Write `data` to `path` atomically via a temp file + rename, mode 0600.
pub fn atomic_write(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;

    let tmp = dir.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    std::fs::write(&tmp, data).with_context(|| format!("writing {}", tmp.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("setting permissions on {}", tmp.display()))?;
    }

    std::fs::rename(&tmp, path).with_context(|| {
        let _ = std::fs::remove_file(&tmp);
        format!("renaming {} to {}", tmp.display(), path.display())
    })
}

/// Atomically write a value as pretty-printed JSON with a trailing newline.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut data = serde_json::to_vec_pretty(value).context("serializing JSON")?;
    data.push(b'\n');
    atomic_write(path, &data)
}

/// Move a directory, falling back to copy + delete across filesystems.
///
/// `rename` is the fast path; EXDEV falls back to `cp -a` + remove on
/// unix, `robocopy /E /MOVE` on windows (which reports success with exit
/// codes up to 7).
pub fn move_dir(src: &Path, dest: &Path) -> anyhow::Result<()> {
    match std::fs::rename(src, dest) {
        Ok(()) => return Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {}
        Err(e) => {
            return Err(anyhow::Error::new(e)).with_context(|| {
                format!("moving {} to {}", src.display(), dest.display())
            });
        }
    }

    if cfg!(windows) {
        let src_s = src.to_string_lossy();
        let dest_s = dest.to_string_lossy();
        let out = Tool::new("robocopy")
            .args(&[&src_s, &dest_s, "/E", "/MOVE", "/R:1", "/W:1"])
            .run()?;
        if out.exit_code > 7 {
            anyhow::bail!("robocopy failed (exit {}): {}", out.exit_code, out.combined());
        }
        return Ok(());
    }

    let src_s = src.to_string_lossy();
    let dest_s = dest.to_string_lossy();
    Tool::new("cp")
        .args(&["-a", &src_s, &dest_s])
        .run_ok()
        .context("copying directory across filesystems")?;
    std::fs::remove_dir_all(src)
        .with_context(|| format!("removing source {} after copy", src.display()))?;
    Ok(())
}

/// An exclusive interprocess file lock, released on drop.
///
/// flock coordinates processes only: the same process can re-acquire the
/// same lock without blocking, so in-process callers must add their own
/// mutex on top.
pub struct FileLock {
    _file: std::fs::File,
}

impl FileLock {
    /// Acquire the lock, blocking until it is available.
    #[cfg(unix)]
    pub fn acquire(path: &Path) -> anyhow::Result<FileLock> {
        let file = Self::open(path)?;
        let rc = unsafe { libc::flock(std::os::fd::AsRawFd::as_raw_fd(&file), libc::LOCK_EX) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("locking {}", path.display()));
        }
        Ok(FileLock { _file: file })
    }

    /// Try to acquire the lock without blocking. Ok(None) means another
    /// process holds it.
    #[cfg(unix)]
    pub fn try_acquire(path: &Path) -> anyhow::Result<Option<FileLock>> {
        let file = Self::open(path)?;
        let rc = unsafe {
            libc::flock(
                std::os::fd::AsRawFd::as_raw_fd(&file),
                libc::LOCK_EX | libc::LOCK_NB,
            )
        };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Ok(None);
            }
            return Err(err).with_context(|| format!("locking {}", path.display()));
        }
        Ok(Some(FileLock { _file: file }))
    }

    #[cfg(not(unix))]
    pub fn acquire(path: &Path) -> anyhow::Result<FileLock> {
        Ok(FileLock {
            _file: Self::open(path)?,
        })
    }

    #[cfg(not(unix))]
    pub fn try_acquire(path: &Path) -> anyhow::Result<Option<FileLock>> {
        Ok(Some(FileLock {
            _file: Self::open(path)?,
        }))
    }

    fn open(path: &Path) -> anyhow::Result<std::fs::File> {
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening lock file {}", path.display()))
    }
}

/// Total size in bytes of all files under `path`. Unreadable entries are
/// skipped.
pub fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    let entries = match std::fs::read_dir(path) {
        Ok(e) => e,
        Err(_) => return 0,
    };
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            total += dir_size(&entry.path());
        } else {
            total += meta.len();
        }
    }
    total
}

/// Human-readable size string.
pub fn format_bytes(b: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if b >= GB {
        format!("{:.1} GB", b as f64 / GB as f64)
    } else if b >= MB {
        format!("{:.1} MB", b as f64 / MB as f64)
    } else if b >= KB {
        format!("{:.1} KB", b as f64 / KB as f64)
    } else {
        format!("{b} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        atomic_write(&path, b"{}\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}\n");
    }

    #[test]
    fn atomic_write_replaces_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "old").unwrap();
        atomic_write(&path, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_sets_mode() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.json");
        atomic_write(&path, b"{}").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn atomic_write_json_appends_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("v.json");
        atomic_write_json(&path, &serde_json::json!({"a": 1})).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn move_dir_same_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("nested/file.txt"), "payload").unwrap();

        move_dir(&src, &dest).unwrap();

        assert!(!src.exists());
        assert_eq!(
            std::fs::read_to_string(dest.join("nested/file.txt")).unwrap(),
            "payload"
        );
    }

    #[test]
    fn file_lock_acquire_and_release() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join("start.lock");
        let lock = FileLock::acquire(&lock_path).unwrap();
        drop(lock);
        // Reacquirable after drop.
        assert!(FileLock::try_acquire(&lock_path).unwrap().is_some());
    }

    #[test]
    fn dir_size_sums_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a"), vec![0u8; 100]).unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/b"), vec![0u8; 50]).unwrap();
        assert_eq!(dir_size(tmp.path()), 150);
    }

    #[test]
    fn format_bytes_ranges() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}

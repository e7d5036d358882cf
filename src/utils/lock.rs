#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use fs2::FileExt;

/// Exclusive run lock; released when dropped.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("path", &self.path)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl LockGuard {
    /// One reconciliation per destination storage endpoint at a time.
    pub fn for_destination(endpoint_host: &str) -> Result<Self> {
        Self::try_acquire_in(&lock_dir(), &format!("volmigrate-{endpoint_host}"))
    }

    pub fn try_acquire_in(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("{}.lock", sanitize_name(name)));
        ensure_dir(dir)?;
        let file = open_lockfile(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                bail!(
                    "another reconciliation holds lock {}; run one migration batch at a time",
                    path.display()
                )
            }
            Err(e) => Err(e).with_context(|| format!("flock {}", path.display())),
        }
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(dir)
            .with_context(|| format!("create lock dir {}", dir.display()))
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir).with_context(|| format!("create lock dir {}", dir.display()))
    }
}

fn open_lockfile(path: &Path) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        opts.mode(0o644);
    }
    opts.open(path)
        .with_context(|| format!("open lockfile {}", path.display()))
}

fn lock_dir() -> PathBuf {
    let var_lock = PathBuf::from("/var/lock");
    if is_writable_dir(&var_lock) {
        var_lock
    } else {
        std::env::temp_dir()
    }
}

fn is_writable_dir(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let probe = dir.join(".volmigrate_lock_probe");
    match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
    {
        Ok(_) => {
            let _ = fs::remove_file(probe);
            true
        }
        Err(_) => false,
    }
}

fn sanitize_name(s: &str) -> String {
    let filtered: String = s
        .chars()
        .map(|c| if c == '.' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    if filtered.is_empty() {
        "lock_".to_string()
    } else {
        format!("lock_{filtered}")
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn acquire_release_reacquire() {
        let tmp = TempDir::new().unwrap();
        let g1 = LockGuard::try_acquire_in(tmp.path(), "dst_cinder").expect("first acquire");
        drop(g1);
        let _g2 = LockGuard::try_acquire_in(tmp.path(), "dst_cinder").expect("after drop");
    }

    #[test]
    fn second_run_against_same_destination_is_refused() {
        let tmp = TempDir::new().unwrap();
        let _g1 = LockGuard::try_acquire_in(tmp.path(), "volmigrate-dst").unwrap();
        let err = LockGuard::try_acquire_in(tmp.path(), "volmigrate-dst")
            .unwrap_err()
            .to_string();
        assert!(err.contains("another reconciliation"), "err was: {err}");
    }

    #[test]
    fn missing_lock_dir_is_created() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("nested/locks");
        let _g = LockGuard::try_acquire_in(&sub, "x").unwrap();
        assert!(sub.is_dir());
    }

    #[test]
    fn sanitize_keeps_hostnames_readable() {
        assert_eq!(sanitize_name("volmigrate-10.0.0.5"), "lock_volmigrate-10_0_0_5");
        assert_eq!(sanitize_name("a/b"), "lock_ab");
        assert_eq!(sanitize_name("//"), "lock_");
    }
}

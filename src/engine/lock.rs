use crate::engine::paths::AppPaths;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Held for the duration of one run; released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    pub path: PathBuf,
}

#[derive(Debug)]
pub enum LockAttempt {
    Acquired(RunLock),
    Busy(PathBuf),
}

pub fn lock_path(paths: &AppPaths) -> PathBuf {
    paths.state_dir.join("run.lock")
}

pub fn try_acquire(paths: &AppPaths) -> Result<LockAttempt> {
    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
    let path = lock_path(paths);
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    if file.try_lock_exclusive().is_err() {
        return Ok(LockAttempt::Busy(path));
    }
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(LockAttempt::Acquired(RunLock { file, path }))
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn paths(root: &std::path::Path) -> AppPaths {
        AppPaths {
            home: root.to_path_buf(),
            logs_dir: root.join("logs"),
            state_dir: root.join("state"),
        }
    }

    #[test]
    fn second_acquire_is_busy_until_release() {
        let tmp = tempdir().expect("tempdir");
        let paths = paths(tmp.path());

        let first = try_acquire(&paths).expect("first");
        assert!(matches!(first, LockAttempt::Acquired(_)));
        assert!(matches!(try_acquire(&paths).expect("second"), LockAttempt::Busy(_)));

        drop(first);
        assert!(matches!(try_acquire(&paths).expect("third"), LockAttempt::Acquired(_)));
    }
}

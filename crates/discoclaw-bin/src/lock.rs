//! Single-instance PID lock directory (spec.md §9): a directory create is
//! atomic on every target filesystem we care about, so it doubles as a
//! mutex between process instances without needing `flock`.
//!
//! No precedent for this in the reference corpus — this bootstrap step is
//! authored from scratch (see DESIGN.md).

use std::io;
use std::path::{Path, PathBuf};

pub struct PidLock {
    dir: PathBuf,
}

impl PidLock {
    /// Create `dir` exclusively and drop our pid into it. If `dir` already
    /// exists, check whether the pid inside is still alive; a lock left by a
    /// process that's gone is cleaned up and retried once.
    pub fn acquire(dir: PathBuf) -> io::Result<Self> {
        match std::fs::create_dir(&dir) {
            Ok(()) => {
                write_pid_file(&dir)?;
                Ok(Self { dir })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if pid_file_is_live(&dir) {
                    Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("pid lock at {} is held by a running process", dir.display()),
                    ))
                } else {
                    std::fs::remove_dir_all(&dir)?;
                    std::fs::create_dir(&dir)?;
                    write_pid_file(&dir)?;
                    Ok(Self { dir })
                }
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn write_pid_file(dir: &Path) -> io::Result<()> {
    std::fs::write(dir.join("pid"), std::process::id().to_string())
}

fn pid_file_is_live(dir: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(dir.join("pid")) else {
        return false;
    };
    let Ok(pid) = content.trim().parse::<i32>() else {
        return false;
    };
    // Sending signal 0 checks for existence without affecting the process.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_drop_removes_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_dir = tmp.path().join("discoclaw.pid.lock");
        {
            let _lock = PidLock::acquire(lock_dir.clone()).unwrap();
            assert!(lock_dir.is_dir());
        }
        assert!(!lock_dir.exists());
    }

    #[test]
    fn stale_lock_from_a_dead_pid_is_reclaimed() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_dir = tmp.path().join("discoclaw.pid.lock");
        std::fs::create_dir(&lock_dir).unwrap();
        // A pid essentially guaranteed not to be running.
        std::fs::write(lock_dir.join("pid"), "999999").unwrap();

        let lock = PidLock::acquire(lock_dir.clone());
        assert!(lock.is_ok());
    }

    #[test]
    fn live_lock_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_dir = tmp.path().join("discoclaw.pid.lock");
        std::fs::create_dir(&lock_dir).unwrap();
        std::fs::write(lock_dir.join("pid"), std::process::id().to_string()).unwrap();

        let lock = PidLock::acquire(lock_dir);
        assert!(lock.is_err());
    }
}

use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::Result;

/// Shell-sticky session locks: one file per shell PID under the state dir.
///
/// The lock persists across process exits — subsequent CLI invocations from
/// the same shell implicitly continue the session. It is cleared only by an
/// explicit end or by stale-shell detection (the PID is no longer alive).
pub struct StickyLocks {
    dir: PathBuf,
}

impl StickyLocks {
    pub fn new(state_dir: &str) -> Result<Self> {
        let dir = PathBuf::from(state_dir).join("shell_locks");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn lock_path(&self, shell_pid: u32) -> PathBuf {
        self.dir.join(format!("{shell_pid}.lock"))
    }

    /// Record that `shell_pid`'s shell is bound to `session_id`.
    pub fn bind(&self, shell_pid: u32, session_id: i64) -> Result<()> {
        std::fs::write(self.lock_path(shell_pid), session_id.to_string())?;
        info!(shell_pid, session_id, "shell lock bound");
        Ok(())
    }

    /// Session bound to this shell, if the lock exists and the shell is
    /// still alive. A stale lock is removed on sight.
    pub fn lookup(&self, shell_pid: u32) -> Option<i64> {
        let path = self.lock_path(shell_pid);
        let content = std::fs::read_to_string(&path).ok()?;

        if !shell_alive(shell_pid) {
            debug!(shell_pid, "stale shell lock cleared");
            let _ = std::fs::remove_file(&path);
            return None;
        }
        content.trim().parse().ok()
    }

    /// Explicit end: remove the lock regardless of shell liveness.
    pub fn end(&self, shell_pid: u32) -> Result<()> {
        let path = self.lock_path(shell_pid);
        if path.exists() {
            std::fs::remove_file(path)?;
            info!(shell_pid, "shell lock ended");
        }
        Ok(())
    }

    /// Drop every lock whose shell has exited.
    pub fn sweep_stale(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)?.flatten() {
            let name = entry.file_name();
            let Some(pid) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".lock"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            if !shell_alive(pid) {
                let _ = std::fs::remove_file(entry.path());
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Liveness probe via procfs. On platforms without /proc the lock is kept
/// (conservative: never steal a live shell's session).
fn shell_alive(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        std::path::Path::new(&format!("/proc/{pid}")).exists()
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locks() -> (StickyLocks, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let locks = StickyLocks::new(dir.path().to_str().unwrap()).unwrap();
        (locks, dir)
    }

    #[test]
    fn bind_and_lookup_roundtrip() {
        let (locks, _dir) = locks();
        let own_pid = std::process::id();
        locks.bind(own_pid, 42).unwrap();
        assert_eq!(locks.lookup(own_pid), Some(42));
    }

    #[test]
    fn end_removes_the_lock() {
        let (locks, _dir) = locks();
        let own_pid = std::process::id();
        locks.bind(own_pid, 42).unwrap();
        locks.end(own_pid).unwrap();
        assert_eq!(locks.lookup(own_pid), None);
    }

    #[test]
    fn missing_lock_is_none() {
        let (locks, _dir) = locks();
        assert_eq!(locks.lookup(4_000_000), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stale_pid_lock_is_cleared_on_lookup() {
        let (locks, _dir) = locks();
        // Above the default pid_max (4194304), so never a live process.
        let dead_pid = 4_194_999;
        locks.bind(dead_pid, 7).unwrap();
        assert_eq!(locks.lookup(dead_pid), None);
        // Cleared on first sight, so the file is gone too.
        assert_eq!(locks.sweep_stale().unwrap(), 0);
    }
}

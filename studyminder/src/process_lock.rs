//! Process-level locks for coordinating studyminder-daemon and studyminder-admin.
//!
//! Lock strategy:
//! - One lock per batch job (`generation`, `delivery`, `metrics`), scoped to
//!   the database path.
//! - The daemon holds every job lock for its lifetime.
//! - An admin command holds only the lock of the job it runs, so it refuses
//!   to start while the daemon (or another admin run) owns that job.
//! - Locks are advisory OS file locks (flock), held until the guard drops.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

/// A batch job that must run in a single process at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobLock {
    Generation,
    Delivery,
    Metrics,
}

impl JobLock {
    #[allow(dead_code)]
    pub const ALL: [JobLock; 3] = [JobLock::Generation, JobLock::Delivery, JobLock::Metrics];

    fn filename(&self) -> &'static str {
        match self {
            JobLock::Generation => "studyminder-generation.lock",
            JobLock::Delivery => "studyminder-delivery.lock",
            JobLock::Metrics => "studyminder-metrics.lock",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            JobLock::Generation => "reminder generation",
            JobLock::Delivery => "notification delivery",
            JobLock::Metrics => "metrics recomputation",
        }
    }
}

/// Guard held by studyminder-daemon.
#[allow(dead_code)]
pub struct DaemonGuard {
    _locks: Vec<ProcessLock>,
}

/// Guard held by an admin command for one job.
#[allow(dead_code)]
pub struct JobGuard {
    _lock: ProcessLock,
}

/// Acquire every job lock for the daemon.
///
/// Fails if another daemon is running or an admin command is mid-run.
#[allow(dead_code)]
pub fn acquire_daemon_guard(db_path: &Path) -> Result<DaemonGuard> {
    let mut locks = Vec::with_capacity(JobLock::ALL.len());
    for job in JobLock::ALL {
        let lock = acquire_lock(job.filename(), db_path).with_context(|| {
            format!(
                "failed to start studyminder-daemon: {} is already running for this database",
                job.label()
            )
        })?;
        locks.push(lock);
    }
    Ok(DaemonGuard { _locks: locks })
}

/// Acquire the lock for a single job run.
#[allow(dead_code)]
pub fn acquire_job_guard(job: JobLock, db_path: &Path) -> Result<JobGuard> {
    let lock = acquire_lock(job.filename(), db_path).with_context(|| {
        format!(
            "refusing to run {}: the daemon or another command owns it",
            job.label()
        )
    })?;
    Ok(JobGuard { _lock: lock })
}

struct ProcessLock {
    file: File,
    path: PathBuf,
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = unlock_file(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

fn acquire_lock(filename: &str, db_path: &Path) -> Result<ProcessLock> {
    match try_acquire_lock(filename, db_path)? {
        Some(lock) => Ok(lock),
        None => anyhow::bail!("lock is already held: {}", filename),
    }
}

fn try_acquire_lock(filename: &str, db_path: &Path) -> Result<Option<ProcessLock>> {
    let dir = lock_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create runtime lock directory: {}", dir.display()))?;

    let path = dir.join(scoped_lock_filename(filename, db_path));
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file: {}", path.display()))?;

    match lock_file_nonblocking(&file) {
        Ok(()) => {
            // Owner info for debugging.
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();

            Ok(Some(ProcessLock { file, path }))
        }
        Err(e) if is_lock_busy(&e) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to lock file: {}", path.display())),
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("studyminder");
    dir
}

fn scoped_lock_filename(base_filename: &str, db_path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    db_path.to_string_lossy().hash(&mut hasher);
    let digest = hasher.finish();
    format!("{base_filename}.{digest:016x}")
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("studyminder process locks currently require Unix (macOS/Linux)");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lock_is_exclusive_per_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_a = dir.path().join("a.db");
        let db_b = dir.path().join("b.db");

        let guard = acquire_job_guard(JobLock::Generation, &db_a).unwrap();
        assert!(acquire_job_guard(JobLock::Generation, &db_a).is_err());
        assert!(acquire_daemon_guard(&db_a).is_err());
        // Other jobs and other databases are independent.
        let _delivery = acquire_job_guard(JobLock::Delivery, &db_a).unwrap();
        let _other_db = acquire_job_guard(JobLock::Generation, &db_b).unwrap();

        drop(guard);
        assert!(acquire_job_guard(JobLock::Generation, &db_a).is_ok());
    }

    #[test]
    fn test_daemon_guard_blocks_admin_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("daemon.db");

        let _daemon = acquire_daemon_guard(&db).unwrap();
        for job in JobLock::ALL {
            assert!(acquire_job_guard(job, &db).is_err());
        }
    }
}

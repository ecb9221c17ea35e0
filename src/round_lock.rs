//! Round ownership lock shared between processes.
//!
//! The lock file holds a single `pid:round:start_ms` record naming the
//! process that currently owns progress logging. Writers overwrite
//! unconditionally, so the last writer owns the round. Each write goes to a
//! temporary sibling that is synced and renamed over the target while an
//! advisory lock on a `.guard` sidecar is held, so readers never observe a
//! half-written record.

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fs2::FileExt;
use tracing::debug;

use crate::error::{RerunError, Result};

/// Default location of the round lock, relative to the working directory.
pub const DEFAULT_LOCK_PATH: &str = "target/reporter-round.lock";

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Sidecar suffix for the advisory guard.
const GUARD_SUFFIX: &str = ".guard";

/// Who owns the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOwnership {
    /// Owning OS process id.
    pub process_id: u32,
    /// Round claimed by the owner; 0 for the session itself.
    pub round: u32,
    /// Round start, in milliseconds since the Unix epoch.
    pub start_ms: i64,
}

impl RoundOwnership {
    /// Ownership record for `process_id` starting `round` now.
    #[must_use]
    pub fn claim(process_id: u32, round: u32) -> Self {
        Self {
            process_id,
            round,
            start_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Whether `process_id` is the owner.
    #[must_use]
    pub fn is_owned_by(&self, process_id: u32) -> bool {
        self.process_id == process_id
    }
}

impl fmt::Display for RoundOwnership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.process_id, self.round, self.start_ms)
    }
}

impl FromStr for RoundOwnership {
    type Err = RerunError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || RerunError::MalformedLock {
            content: s.to_string(),
        };

        let mut parts = s.trim().split(':');
        let mut next = || parts.next().map(str::trim).ok_or_else(malformed);

        let process_id = next()?.parse().map_err(|_| malformed())?;
        let round = next()?.parse().map_err(|_| malformed())?;
        let start_ms = next()?.parse().map_err(|_| malformed())?;

        if parts.next().is_some() {
            return Err(malformed());
        }

        Ok(Self {
            process_id,
            round,
            start_ms,
        })
    }
}

/// File-backed round ownership lock.
#[derive(Debug, Clone)]
pub struct RoundLockFile {
    path: PathBuf,
}

impl Default for RoundLockFile {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_PATH)
    }
}

impl RoundLockFile {
    /// Lock file at `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the lock record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the temporary file used for atomic writes.
    #[must_use]
    pub fn tmp_path(&self) -> PathBuf {
        self.sibling(TMP_SUFFIX)
    }

    /// Path of the advisory guard sidecar.
    #[must_use]
    pub fn guard_path(&self) -> PathBuf {
        self.sibling(GUARD_SUFFIX)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn acquire_guard(&self) -> Result<File> {
        let guard = File::create(self.guard_path())?;
        FileExt::lock_exclusive(&guard).map_err(|e| {
            RerunError::round_lock(&self.path, format!("Failed to acquire guard: {e}"))
        })?;
        Ok(guard)
    }

    /// Overwrite the lock with `ownership`.
    pub fn write(&self, ownership: &RoundOwnership) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let _guard = self.acquire_guard()?;

        let tmp_path = self.tmp_path();
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(ownership.to_string().as_bytes())?;
        tmp_file.sync_all()?;

        fs::rename(&tmp_path, &self.path)?;

        debug!("Wrote round lock {} -> {}", self.path.display(), ownership);
        Ok(())
    }

    /// Read the lock, reporting a malformed record as an error.
    pub fn try_read(&self) -> Result<Option<RoundOwnership>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RerunError::round_lock(&self.path, e.to_string())),
        };
        contents.parse().map(Some)
    }

    /// Current owner, if the lock exists and parses.
    #[must_use]
    pub fn read(&self) -> Option<RoundOwnership> {
        match self.try_read() {
            Ok(ownership) => ownership,
            Err(e) => {
                debug!("Failed to read round lock file: {}", e);
                None
            }
        }
    }

    /// Delete the lock and its guard sidecar. Succeeds when they are already gone.
    pub fn remove(&self) -> Result<()> {
        remove_if_present(&self.path)?;
        remove_if_present(&self.guard_path())
    }

    /// Whether a lock record exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RerunError::round_lock(path, e.to_string())),
    }
}

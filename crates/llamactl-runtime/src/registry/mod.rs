//! Durable registry of spawned engine processes.
//!
//! The registry exists so that a restarted manager can tell which engines
//! it launched in a previous life. It is bookkeeping only: it never kills,
//! restarts or re-attaches to a process.
//!
//! Format: a JSON object keyed by resource key, rewritten atomically on
//! every change. Several managers may share one file: each change re-reads
//! it under an exclusive lock on `<file>.lock` and merges into what is there.
//!
//! ```json
//! { "0,1": { "key": "0,1", "pid": 4242, "model_id": "qwen", ... } }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use llamactl_core::ResourceKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::process::pid_exists;

/// Registry persistence error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to write registry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to lock registry {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode registry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One spawned engine, as recorded at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub key: ResourceKey,
    pub pid: u32,
    pub model_id: String,
    pub model_name: String,
    pub model_path: PathBuf,
    pub port: u16,
    /// Full command line, executable first.
    pub command: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

type Records = BTreeMap<ResourceKey, ProcessRecord>;

/// File-backed `{resource key → process record}` map.
#[derive(Debug)]
pub struct ProcessRegistry {
    path: PathBuf,
    records: Mutex<Records>,
}

impl ProcessRegistry {
    /// Load the registry at `path`.
    ///
    /// A missing file is an empty registry. An unreadable or corrupt file is
    /// logged and also treated as empty; it is overwritten on the next change.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = read_records(&path);
        debug!(path = %path.display(), entries = records.len(), "Opened process registry");
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current file contents; the in-memory copy is only a fallback.
    fn refreshed(&self) -> MutexGuard<'_, Records> {
        let mut records = self.lock();
        *records = read_records(&self.path);
        records
    }

    /// Read-modify-write under the cross-process file lock.
    ///
    /// Other managers may share the file, so the on-disk state is re-read
    /// before `change` runs. The file is rewritten only when `change`
    /// returns `true`.
    fn update<T>(
        &self,
        change: impl FnOnce(&mut Records) -> (bool, T),
    ) -> Result<T, RegistryError> {
        let mut records = self.lock();
        let _file_lock = FileLock::acquire(&self.path)?;
        *records = read_records(&self.path);
        let (dirty, value) = change(&mut *records);
        if dirty {
            write_atomic(&self.path, &records)?;
        }
        Ok(value)
    }

    /// Insert or replace the record for `record.key`.
    pub fn register(&self, record: ProcessRecord) -> Result<(), RegistryError> {
        debug!(key = %record.key, pid = record.pid, "Registering process");
        self.update(|records| {
            records.insert(record.key.clone(), record);
            (true, ())
        })
    }

    /// Remove the record for `key`. Returns whether one existed.
    pub fn unregister(&self, key: &ResourceKey) -> Result<bool, RegistryError> {
        let removed = self.update(|records| {
            let removed = records.remove(key).is_some();
            (removed, removed)
        })?;
        if removed {
            debug!(%key, "Unregistered process");
        }
        Ok(removed)
    }

    pub fn get(&self, key: &ResourceKey) -> Option<ProcessRecord> {
        self.refreshed().get(key).cloned()
    }

    pub fn records(&self) -> Vec<ProcessRecord> {
        self.refreshed().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.refreshed().len()
    }

    pub fn is_empty(&self) -> bool {
        self.refreshed().is_empty()
    }

    /// Probe every recorded pid; drop entries whose process is gone.
    ///
    /// Returns `key → alive` for every entry that was present.
    pub fn verify_all(&self) -> Result<BTreeMap<ResourceKey, bool>, RegistryError> {
        self.update(|records| {
            let liveness: BTreeMap<ResourceKey, bool> = records
                .iter()
                .map(|(key, record)| (key.clone(), pid_exists(record.pid)))
                .collect();

            let before = records.len();
            records.retain(|key, _| liveness.get(key).copied().unwrap_or(false));
            let removed = before - records.len();
            if removed > 0 {
                info!(removed, "Removed dead entries from process registry");
            }
            (removed > 0, liveness)
        })
    }
}

fn read_records(path: &Path) -> Records {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str::<Records>(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Corrupt process registry, starting empty");
            Records::new()
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Records::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read process registry, starting empty");
            Records::new()
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

/// Exclusive advisory lock on `<file>.lock`, released on drop.
struct FileLock {
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<fs::File>,
}

impl FileLock {
    #[cfg(unix)]
    fn acquire(path: &Path) -> Result<Self, RegistryError> {
        use nix::fcntl::{Flock, FlockArg};

        let lock_path = sibling(path, ".lock");
        let lock_err = |source| RegistryError::Lock {
            path: lock_path.clone(),
            source,
        };
        ensure_parent(path).map_err(lock_err)?;
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(lock_err)?;
        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| lock_err(io::Error::from(errno)))?;
        Ok(Self { _lock: lock })
    }

    // Only the in-process mutex applies here.
    #[cfg(not(unix))]
    fn acquire(_path: &Path) -> Result<Self, RegistryError> {
        Ok(Self {})
    }
}

/// Write to `<file>.tmp` then rename over the target.
fn write_atomic(path: &Path, records: &Records) -> Result<(), RegistryError> {
    let write_err = |source| RegistryError::Write {
        path: path.to_path_buf(),
        source,
    };

    ensure_parent(path).map_err(write_err)?;

    let content = serde_json::to_string_pretty(records)?;
    let temp = sibling(path, ".tmp");

    fs::write(&temp, content).map_err(write_err)?;
    fs::rename(&temp, path).map_err(write_err)
}

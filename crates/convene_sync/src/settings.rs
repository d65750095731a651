//! Durable engine settings.
//!
//! The engine remembers three things between runs: when the last full sync
//! finished, which users the event subscription covers, and which users'
//! events were last fetched (the incremental-query watermark key). All
//! user sets hold normalized record identities.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{SyncError, SyncResult};

/// Access to the engine's persisted settings.
///
/// Setters are infallible by contract; implementations that persist must
/// keep the in-memory value authoritative and surface write problems
/// through logging.
pub trait SettingsStore: Send + Sync {
    /// When the last full sync completed, if ever.
    fn last_full_sync(&self) -> Option<SystemTime>;
    /// Records a completed full sync.
    fn set_last_full_sync(&self, at: SystemTime);

    /// Normalized identities the event subscription currently covers.
    fn subscribed_users(&self) -> BTreeSet<String>;
    /// Replaces the covered-user set.
    fn set_subscribed_users(&self, users: BTreeSet<String>);

    /// Normalized identities whose events were last fetched.
    fn fetched_users(&self) -> BTreeSet<String>;
    /// Replaces the fetched-user set.
    fn set_fetched_users(&self, users: BTreeSet<String>);
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct SettingsData {
    last_full_sync: Option<SystemTime>,
    subscribed_users: BTreeSet<String>,
    fetched_users: BTreeSet<String>,
}

/// In-memory settings, used in tests and by embedders with their own
/// persistence.
#[derive(Debug, Default)]
pub struct MemorySettings {
    data: Mutex<SettingsData>,
}

impl MemorySettings {
    /// Creates empty settings.
    pub fn new() -> Self {
        MemorySettings::default()
    }
}

impl SettingsStore for MemorySettings {
    fn last_full_sync(&self) -> Option<SystemTime> {
        self.data.lock().last_full_sync
    }

    fn set_last_full_sync(&self, at: SystemTime) {
        self.data.lock().last_full_sync = Some(at);
    }

    fn subscribed_users(&self) -> BTreeSet<String> {
        self.data.lock().subscribed_users.clone()
    }

    fn set_subscribed_users(&self, users: BTreeSet<String>) {
        self.data.lock().subscribed_users = users;
    }

    fn fetched_users(&self) -> BTreeSet<String> {
        self.data.lock().fetched_users.clone()
    }

    fn set_fetched_users(&self, users: BTreeSet<String>) {
        self.data.lock().fetched_users = users;
    }
}

/// CBOR-encoded settings in a single file, held under an exclusive
/// advisory lock for the lifetime of the handle.
pub struct FileSettings {
    file: Mutex<File>,
    data: Mutex<SettingsData>,
    path: PathBuf,
}

impl FileSettings {
    /// Opens or creates the settings file at `path` and takes its lock.
    ///
    /// Fails when another handle (in this or another process) already holds
    /// the lock, or when the file exists but cannot be decoded.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(SyncError::io)?;
        file.try_lock_exclusive().map_err(|_| SyncError::Io {
            message: format!("settings file {} is locked by another handle", path.display()),
        })?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw).map_err(SyncError::io)?;
        let data = if raw.is_empty() {
            SettingsData::default()
        } else {
            ciborium::de::from_reader(raw.as_slice()).map_err(|e| SyncError::Io {
                message: format!("settings file {} is corrupt: {e}", path.display()),
            })?
        };

        Ok(FileSettings {
            file: Mutex::new(file),
            data: Mutex::new(data),
            path,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &SettingsData) {
        let mut encoded = Vec::new();
        if let Err(e) = ciborium::ser::into_writer(data, &mut encoded) {
            error!(path = %self.path.display(), error = %e, "failed to encode settings");
            return;
        }
        let mut file = self.file.lock();
        let written = file
            .set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|_| file.write_all(&encoded))
            .and_then(|_| file.sync_data());
        if let Err(e) = written {
            error!(path = %self.path.display(), error = %e, "failed to persist settings");
        }
    }

    fn update(&self, apply: impl FnOnce(&mut SettingsData)) {
        let mut data = self.data.lock();
        apply(&mut data);
        self.persist(&data);
    }
}

impl SettingsStore for FileSettings {
    fn last_full_sync(&self) -> Option<SystemTime> {
        self.data.lock().last_full_sync
    }

    fn set_last_full_sync(&self, at: SystemTime) {
        self.update(|data| data.last_full_sync = Some(at));
    }

    fn subscribed_users(&self) -> BTreeSet<String> {
        self.data.lock().subscribed_users.clone()
    }

    fn set_subscribed_users(&self, users: BTreeSet<String>) {
        self.update(|data| data.subscribed_users = users);
    }

    fn fetched_users(&self) -> BTreeSet<String> {
        self.data.lock().fetched_users.clone()
    }

    fn set_fetched_users(&self, users: BTreeSet<String>) {
        self.update(|data| data.fetched_users = users);
    }
}

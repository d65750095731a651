//! Option and status bitmasks.

use bitflags::bitflags;

bitflags! {
    /// Options controlling how much a synchronization run fetches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncOptions: u8 {
        /// Fetch all records for known users, not only changed ones.
        const FETCH_ALL = 1 << 0;
        /// Collect every sync reference regardless of its synchronized flag.
        const REFRESH_ALL = 1 << 1;
    }
}

impl SyncOptions {
    /// A full sync: fetch everything and refresh everything.
    pub const FULL_SYNC: SyncOptions = SyncOptions::FETCH_ALL.union(SyncOptions::REFRESH_ALL);

    /// Whether both full-sync options are set.
    pub fn is_full_sync(&self) -> bool {
        self.contains(Self::FULL_SYNC)
    }

    /// Diagnostic label used for operation-group naming.
    pub fn label(&self) -> &'static str {
        if self.is_full_sync() {
            "full"
        } else if self.contains(Self::FETCH_ALL) {
            "fetch-all"
        } else if self.contains(Self::REFRESH_ALL) {
            "refresh-all"
        } else {
            "incremental"
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Cloud lifecycle state carried by every syncable entity.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CloudSyncStatus: u8 {
        /// Soft-deleted locally; kept until every scope confirms deletion.
        const MARKED_FOR_DELETION = 1 << 0;
        /// Relationship fields are still being resolved against the remote.
        const SYNCHRONIZING_RELATIONSHIPS = 1 << 1;
    }
}

impl CloudSyncStatus {
    /// The normal, fully reconciled state.
    pub const NORMAL: CloudSyncStatus = CloudSyncStatus::empty();

    /// Whether the entity is soft-deleted.
    pub fn is_marked_for_deletion(&self) -> bool {
        self.contains(Self::MARKED_FOR_DELETION)
    }
}

impl Default for CloudSyncStatus {
    fn default() -> Self {
        Self::NORMAL
    }
}

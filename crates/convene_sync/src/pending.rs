//! Pending work tracked by a record sync pipeline.
//!
//! One value of [`PendingChanges`] holds everything a pipeline still owes
//! the remote: queries to run, record ids to fetch, records to save, ids to
//! delete, plus the id-to-entity map used to resolve merges. The pipeline
//! wraps it in a single mutex and only atomic, high-level operations are
//! exposed here.
//!
//! Ids are compared through [`identities_match`], never through raw
//! equality: the remote reports two owner spellings for the default zone
//! and a raw comparison would duplicate work or miss removals.

use std::collections::VecDeque;

use convene_records::{identities_match, RecordId, RecordQuery, RemoteRecord};
use convene_store::LocalId;

/// One batch handed to a remote modify call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ModifyBatch {
    /// Records to save.
    pub save: Vec<RemoteRecord>,
    /// Identities to delete.
    pub delete: Vec<RecordId>,
}

impl ModifyBatch {
    /// True when the batch carries no work.
    pub fn is_empty(&self) -> bool {
        self.save.is_empty() && self.delete.is_empty()
    }
}

/// Rollback state covering the four record collections.
///
/// Queries are excluded on purpose: a failed round must restore exactly
/// the fetch, save, delete and id-map collections, while query consumption
/// is driven by the pipeline's state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSnapshot {
    fetch: Vec<RecordId>,
    save: Vec<(RecordId, RemoteRecord)>,
    delete: Vec<RecordId>,
    local_ids: Vec<(RecordId, LocalId)>,
}

/// Outstanding remote work for one sync pipeline.
#[derive(Debug, Default)]
pub struct PendingChanges {
    queries: VecDeque<RecordQuery>,
    fetch: Vec<RecordId>,
    save: Vec<(RecordId, RemoteRecord)>,
    delete: Vec<RecordId>,
    local_ids: Vec<(RecordId, LocalId)>,
}

fn position_of(ids: &[RecordId], id: &RecordId) -> Option<usize> {
    ids.iter().position(|known| identities_match(known, id))
}

impl PendingChanges {
    /// Creates an empty set of pending changes.
    pub fn new() -> Self {
        PendingChanges::default()
    }

    /// Appends a query to run.
    pub fn push_query(&mut self, query: RecordQuery) {
        self.queries.push_back(query);
    }

    /// Takes the next query to run, oldest first.
    pub fn next_query(&mut self) -> Option<RecordQuery> {
        self.queries.pop_front()
    }

    /// Number of queries not yet started.
    pub fn queued_queries(&self) -> usize {
        self.queries.len()
    }

    /// Queues `id` for fetching. Duplicate identities collapse.
    pub fn add_fetch(&mut self, id: RecordId) {
        if position_of(&self.fetch, &id).is_none() {
            self.fetch.push(id);
        }
    }

    /// Queues `record` for saving, replacing any entry with the same
    /// identity.
    pub fn add_save(&mut self, record: RemoteRecord) {
        let id = record.id.clone();
        match self
            .save
            .iter_mut()
            .find(|(known, _)| identities_match(known, &id))
        {
            Some(entry) => entry.1 = record,
            None => self.save.push((id, record)),
        }
    }

    /// Queues `id` for deletion. Duplicate identities collapse.
    pub fn add_delete(&mut self, id: RecordId) {
        if position_of(&self.delete, &id).is_none() {
            self.delete.push(id);
        }
    }

    /// Maps a record identity to the local entity it belongs to.
    pub fn map_local(&mut self, id: RecordId, local: LocalId) {
        match self
            .local_ids
            .iter_mut()
            .find(|(known, _)| identities_match(known, &id))
        {
            Some(entry) => entry.1 = local,
            None => self.local_ids.push((id, local)),
        }
    }

    /// Local entity for a record identity, if known.
    pub fn local_for(&self, id: &RecordId) -> Option<LocalId> {
        self.local_ids
            .iter()
            .find(|(known, _)| identities_match(known, id))
            .map(|(_, local)| *local)
    }

    /// Queued save payload for a record identity, if any.
    pub fn saved_record(&self, id: &RecordId) -> Option<&RemoteRecord> {
        self.save
            .iter()
            .find(|(known, _)| identities_match(known, id))
            .map(|(_, record)| record)
    }

    /// Whether the identity is queued for deletion.
    pub fn is_pending_delete(&self, id: &RecordId) -> bool {
        position_of(&self.delete, id).is_some()
    }

    /// Up to `limit` ids from the fetch queue. The queue keeps them until
    /// the round's results are processed.
    pub fn fetch_batch(&self, limit: usize) -> Vec<RecordId> {
        self.fetch.iter().take(limit).cloned().collect()
    }

    /// Up to `limit` records of modify work, split proportionally between
    /// saves and deletes. Each non-empty side receives at least one slot,
    /// so a `limit` of 1 can yield a batch of 2. Entries stay queued until
    /// the round's results are processed.
    pub fn modify_batch(&self, limit: usize) -> ModifyBatch {
        let limit = limit.max(1);
        let save_len = self.save.len();
        let delete_len = self.delete.len();

        let (save_n, delete_n) = match (save_len, delete_len) {
            (0, d) => (0, d.min(limit)),
            (s, 0) => (s.min(limit), 0),
            (s, d) if s + d <= limit => (s, d),
            (s, d) => {
                let save_share = (limit * s / (s + d)).max(1);
                let delete_share = limit.saturating_sub(save_share).max(1);
                (save_share.min(s), delete_share.min(d))
            }
        };

        ModifyBatch {
            save: self
                .save
                .iter()
                .take(save_n)
                .map(|(_, record)| record.clone())
                .collect(),
            delete: self.delete.iter().take(delete_n).cloned().collect(),
        }
    }

    /// Applies a merge decision for one record: drops it from the fetch
    /// queue, and either replaces its save entry with `updated` (when the
    /// local copy still needs pushing) or drops the save entry.
    pub fn record_merged(&mut self, id: &RecordId, needs_push: bool, updated: Option<RemoteRecord>) {
        if let Some(at) = position_of(&self.fetch, id) {
            self.fetch.remove(at);
        }
        if needs_push {
            if let Some(record) = updated {
                self.add_save(record);
            }
        } else {
            self.save.retain(|(known, _)| !identities_match(known, id));
        }
    }

    /// Removes every trace of an identity: fetch, save, delete and the
    /// id map.
    pub fn purge(&mut self, id: &RecordId) {
        self.fetch.retain(|known| !identities_match(known, id));
        self.save.retain(|(known, _)| !identities_match(known, id));
        self.delete.retain(|known| !identities_match(known, id));
        self.local_ids
            .retain(|(known, _)| !identities_match(known, id));
    }

    /// Merges everything from `other`, collapsing duplicate identities.
    pub fn extend_from(&mut self, other: &PendingChanges) {
        for query in &other.queries {
            self.queries.push_back(query.clone());
        }
        for id in &other.fetch {
            self.add_fetch(id.clone());
        }
        for (_, record) in &other.save {
            self.add_save(record.clone());
        }
        for id in &other.delete {
            self.add_delete(id.clone());
        }
        for (id, local) in &other.local_ids {
            self.map_local(id.clone(), *local);
        }
    }

    /// True while any queries, fetches, saves or deletes remain.
    pub fn has_work(&self) -> bool {
        !self.queries.is_empty()
            || !self.fetch.is_empty()
            || !self.save.is_empty()
            || !self.delete.is_empty()
    }

    /// Number of queued fetch ids.
    pub fn fetch_count(&self) -> usize {
        self.fetch.len()
    }

    /// Number of queued save records.
    pub fn save_count(&self) -> usize {
        self.save.len()
    }

    /// Number of queued deletions.
    pub fn delete_count(&self) -> usize {
        self.delete.len()
    }

    /// Captures the rollback state of the four record collections.
    pub fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            fetch: self.fetch.clone(),
            save: self.save.clone(),
            delete: self.delete.clone(),
            local_ids: self.local_ids.clone(),
        }
    }

    /// Restores a previously captured snapshot.
    pub fn restore(&mut self, snapshot: PendingSnapshot) {
        self.fetch = snapshot.fetch;
        self.save = snapshot.save;
        self.delete = snapshot.delete;
        self.local_ids = snapshot.local_ids;
    }
}

//! Store fixtures for sync scenarios.
//!
//! Builds local stores in the shapes the engine's tests keep needing: a
//! linked user, friends with public references, events with or without
//! references, settled references carrying server metadata.

use std::sync::Arc;
use std::time::SystemTime;

use convene_records::{CloudSyncStatus, RecordId, RemoteRecord, Scope};
use convene_store::{LocalId, LocalStore, SharedEvent, StoreError, SyncReference, User};

/// A store pre-wired with the entities a sync scenario needs.
pub struct StoreFixture {
    /// The store under test.
    pub store: Arc<LocalStore>,
}

impl StoreFixture {
    /// Creates an empty fixture.
    pub fn new() -> Self {
        Self {
            store: Arc::new(LocalStore::new()),
        }
    }

    /// Adds a user holding unsynchronized references in both scopes for
    /// `record_name`, the shape the account-linking step leaves behind.
    pub fn add_linked_user(&self, record_name: &str) -> LocalId {
        let record_id = RecordId::in_default_zone(record_name);
        self.store
            .with_transaction(|txn| {
                let user = txn.add_user(User::new());
                txn.set_reference(SyncReference::new(user, Scope::Private, record_id.clone()))?;
                txn.set_reference(SyncReference::new(user, Scope::Public, record_id.clone()))?;
                Ok::<_, StoreError>(user)
            })
            .expect("linked-user fixture")
    }

    /// Adds a friend of `user`: another local user with a public reference
    /// to `record_name`, entered in `user`'s friend list.
    pub fn add_friend(&self, user: LocalId, record_name: &str) -> LocalId {
        let record_id = RecordId::in_default_zone(record_name);
        self.store
            .with_transaction(|txn| {
                let friend = txn.add_user(User::new());
                txn.set_reference(SyncReference::new(friend, Scope::Public, record_id.clone()))?;
                txn.require_user_mut(user)?.friends.push(friend);
                Ok::<_, StoreError>(friend)
            })
            .expect("friend fixture")
    }

    /// Adds an event owned by `owner` with a public reference to
    /// `record_name`.
    pub fn add_event(&self, owner: LocalId, record_name: &str) -> LocalId {
        self.add_event_at(owner, record_name, SystemTime::now())
    }

    /// Adds an event with an explicit local creation time, for scenarios
    /// built around the incremental query cutoff.
    pub fn add_event_at(
        &self,
        owner: LocalId,
        record_name: &str,
        created_locally_at: SystemTime,
    ) -> LocalId {
        let record_id = RecordId::in_default_zone(record_name);
        self.store
            .with_transaction(|txn| {
                let mut event = SharedEvent::new(owner, "fixture-device");
                event.created_locally_at = created_locally_at;
                let event = txn.add_event(event);
                txn.set_reference(SyncReference::new(event, Scope::Public, record_id.clone()))?;
                Ok::<_, StoreError>(event)
            })
            .expect("event fixture")
    }

    /// Adds an event owned by `owner` without any reference, the shape of
    /// a freshly created local entity the engine has not seen yet.
    pub fn add_local_event(&self, owner: LocalId) -> LocalId {
        self.store
            .with_transaction(|txn| {
                Ok::<_, StoreError>(txn.add_event(SharedEvent::new(owner, "fixture-device")))
            })
            .expect("local-event fixture")
    }

    /// Stores `record`'s server metadata on the (entity, scope) reference
    /// and marks it synchronized, the way a completed sync round would.
    pub fn settle_reference(&self, entity: LocalId, scope: Scope, record: &RemoteRecord) {
        self.store
            .with_transaction(|txn| {
                let reference = txn
                    .reference_mut(entity, scope)
                    .ok_or(StoreError::EntityMissing { id: entity })?;
                reference
                    .store_record(record)
                    .map_err(|_| StoreError::EntityMissing { id: entity })?;
                reference.synchronized = true;
                Ok::<_, StoreError>(())
            })
            .expect("settle-reference fixture")
    }

    /// Soft-deletes an entity by setting its deletion mark.
    pub fn mark_deleted(&self, entity: LocalId) {
        self.store
            .with_transaction(|txn| {
                if let Some(user) = txn.user_mut(entity) {
                    user.cloud_status.insert(CloudSyncStatus::MARKED_FOR_DELETION);
                } else if let Some(event) = txn.event_mut(entity) {
                    event.cloud_status.insert(CloudSyncStatus::MARKED_FOR_DELETION);
                }
                Ok::<_, StoreError>(())
            })
            .expect("mark-deleted fixture")
    }
}

impl Default for StoreFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convene_records::EVENT_RECORD_TYPE;

    #[test]
    fn linked_user_holds_both_references() {
        let fx = StoreFixture::new();
        let user = fx.add_linked_user("user-1");

        fx.store.read(|txn| {
            assert!(txn.user(user).is_some());
            for scope in Scope::ALL {
                let reference = txn.reference(user, scope).expect("reference");
                assert_eq!(reference.record_id, RecordId::in_default_zone("user-1"));
                assert!(!reference.synchronized);
            }
        });
    }

    #[test]
    fn friends_are_listed_on_the_user() {
        let fx = StoreFixture::new();
        let user = fx.add_linked_user("user-1");
        let friend = fx.add_friend(user, "friend-1");

        fx.store.read(|txn| {
            assert!(txn.user(user).expect("user").has_friend(friend));
            assert!(txn.reference(friend, Scope::Public).is_some());
            assert!(txn.reference(friend, Scope::Private).is_none());
        });
    }

    #[test]
    fn settling_stores_the_server_tag() {
        let fx = StoreFixture::new();
        let user = fx.add_linked_user("user-1");
        let event = fx.add_event(user, "event-1");

        let mut record =
            RemoteRecord::new(EVENT_RECORD_TYPE, RecordId::in_default_zone("event-1"));
        record.change_tag = Some("tag-7".into());
        fx.settle_reference(event, Scope::Public, &record);

        fx.store.read(|txn| {
            let reference = txn.reference(event, Scope::Public).expect("reference");
            assert!(reference.synchronized);
            assert_eq!(reference.change_tag(), Some("tag-7".to_string()));
        });
    }

    #[test]
    fn deletion_mark_lands_on_either_kind() {
        let fx = StoreFixture::new();
        let user = fx.add_linked_user("user-1");
        let event = fx.add_local_event(user);

        fx.mark_deleted(event);
        fx.mark_deleted(user);

        fx.store.read(|txn| {
            assert!(txn
                .user(user)
                .expect("user")
                .cloud_status
                .is_marked_for_deletion());
            assert!(txn
                .event(event)
                .expect("event")
                .cloud_status
                .is_marked_for_deletion());
        });
    }
}

//! Sync capabilities of user entities.
//!
//! Users live in both scopes: the private scope carries first and last
//! name plus the friends list, the public scope carries only the
//! discoverable alias. Friend references resolve against the public scope;
//! friends the store has never seen become stub users fetched by a later
//! sync, and while stubs exist the owning user is flagged as still
//! synchronizing relationships.

use convene_records::{
    identities_match, user_fields, CloudSyncStatus, FieldValue, RecordId, RemoteRecord, Scope,
    USER_RECORD_TYPE,
};
use convene_store::{EntityKind, LocalId, StoreTxn, SyncReference, User};
use tracing::trace;

use crate::entity::{set_or_clear_text, MergeContext, SyncableEntityKind};
use crate::error::SyncResult;

/// [`SyncableEntityKind`] implementation for user records.
pub struct UserKind;

const PRIVATE_FIELDS: &[&str] = &[
    user_fields::FIRST_NAME,
    user_fields::LAST_NAME,
    user_fields::FRIENDS,
];
const PUBLIC_FIELDS: &[&str] = &[user_fields::ALIAS];

impl SyncableEntityKind for UserKind {
    fn entity_kind(&self) -> EntityKind {
        EntityKind::User
    }

    fn record_type(&self) -> &'static str {
        USER_RECORD_TYPE
    }

    fn merge_rank(&self) -> u8 {
        0
    }

    fn tracked_fields(&self, scope: Scope) -> &'static [&'static str] {
        match scope {
            Scope::Private => PRIVATE_FIELDS,
            Scope::Public => PUBLIC_FIELDS,
        }
    }

    fn update_record(
        &self,
        txn: &StoreTxn,
        entity: LocalId,
        record: &mut RemoteRecord,
        scope: Scope,
    ) -> SyncResult<()> {
        let user = txn.require_user(entity)?;
        match scope {
            Scope::Public => {
                set_or_clear_text(record, user_fields::ALIAS, user.alias.as_deref());
            }
            Scope::Private => {
                set_or_clear_text(record, user_fields::FIRST_NAME, user.first_name.as_deref());
                set_or_clear_text(record, user_fields::LAST_NAME, user.last_name.as_deref());
                // Friends serialize as their public record ids. Friends
                // without a public reference cannot be represented yet and
                // are left out until one exists.
                let mut friend_ids: Vec<RecordId> = Vec::new();
                for friend in &user.friends {
                    if let Some(reference) = txn.reference(*friend, Scope::Public) {
                        friend_ids.push(reference.record_id.clone());
                    } else {
                        trace!(%friend, "friend has no public record yet, skipping");
                    }
                }
                if friend_ids.is_empty() {
                    record.remove(user_fields::FRIENDS);
                } else {
                    record.set(user_fields::FRIENDS, FieldValue::ReferenceList(friend_ids));
                }
            }
        }
        Ok(())
    }

    fn apply_record(
        &self,
        txn: &mut StoreTxn,
        entity: LocalId,
        record: &RemoteRecord,
        scope: Scope,
        _ctx: &MergeContext,
    ) -> SyncResult<()> {
        match scope {
            Scope::Public => {
                let user = txn.require_user_mut(entity)?;
                user.alias = record.text(user_fields::ALIAS).map(str::to_string);
            }
            Scope::Private => {
                {
                    let user = txn.require_user_mut(entity)?;
                    user.first_name = record.text(user_fields::FIRST_NAME).map(str::to_string);
                    user.last_name = record.text(user_fields::LAST_NAME).map(str::to_string);
                }

                let friend_records: Vec<RecordId> = record
                    .reference_list(user_fields::FRIENDS)
                    .map(<[RecordId]>::to_vec)
                    .unwrap_or_default();
                let mut friends: Vec<LocalId> = Vec::with_capacity(friend_records.len());
                let mut created_stub = false;
                for friend_record in friend_records {
                    let friend = match txn.entity_for_record(&friend_record, Scope::Public) {
                        Some(existing) => existing,
                        None => {
                            let stub = txn.add_user(User::new());
                            txn.set_reference(SyncReference::new(
                                stub,
                                Scope::Public,
                                friend_record.clone(),
                            ))?;
                            trace!(record = %friend_record, "created stub user for unknown friend");
                            created_stub = true;
                            stub
                        }
                    };
                    if !friends.contains(&friend) {
                        friends.push(friend);
                    }
                }

                let user = txn.require_user_mut(entity)?;
                user.friends = friends;
                if created_stub {
                    user.cloud_status
                        .insert(CloudSyncStatus::SYNCHRONIZING_RELATIONSHIPS);
                } else {
                    user.cloud_status
                        .remove(CloudSyncStatus::SYNCHRONIZING_RELATIONSHIPS);
                }
            }
        }
        Ok(())
    }

    fn resolve_missing(
        &self,
        txn: &mut StoreTxn,
        record: &RemoteRecord,
        scope: Scope,
        ctx: &MergeContext,
    ) -> SyncResult<LocalId> {
        if let Some(existing) = txn.entity_for_record(&record.id, scope) {
            return Ok(existing);
        }
        match scope {
            // Private user records can only ever belong to the signed-in
            // user.
            Scope::Private => {
                if let Some(linked) = ctx.linked_local_user {
                    if txn.contains_entity(linked) {
                        return Ok(linked);
                    }
                }
                if let Some(existing) = txn.entity_for_record(&record.id, Scope::Public) {
                    return Ok(existing);
                }
            }
            Scope::Public => {
                let is_current_user = ctx
                    .current_user_id
                    .as_ref()
                    .map(|current| identities_match(current, &record.id))
                    .unwrap_or(false);
                if is_current_user {
                    if let Some(linked) = ctx.linked_local_user {
                        if txn.contains_entity(linked) {
                            return Ok(linked);
                        }
                    }
                }
            }
        }
        // A user record nobody claims introduces a new user.
        Ok(txn.add_user(User::new()))
    }

    fn is_writable(
        &self,
        _txn: &StoreTxn,
        entity: LocalId,
        _scope: Scope,
        ctx: &MergeContext,
    ) -> bool {
        // Only the signed-in user's own records are pushed; other users'
        // data is fetch-only.
        ctx.linked_local_user == Some(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use convene_store::{LocalStore, StoreError};

    fn store_with_user(alias: Option<&str>) -> (LocalStore, LocalId) {
        let store = LocalStore::new();
        let id = store
            .with_transaction(|txn| {
                let mut user = User::new();
                user.alias = alias.map(str::to_string);
                user.first_name = Some("Ada".into());
                user.last_name = Some("Lovelace".into());
                Ok::<_, StoreError>(txn.add_user(user))
            })
            .unwrap();
        (store, id)
    }

    #[test]
    fn public_record_carries_only_the_alias() {
        let (store, id) = store_with_user(Some("ada"));
        let mut record = RemoteRecord::new(USER_RECORD_TYPE, RecordId::in_default_zone("u1"));

        store.read(|txn| UserKind.update_record(txn, id, &mut record, Scope::Public).unwrap());

        assert_eq!(record.text(user_fields::ALIAS), Some("ada"));
        assert_eq!(record.text(user_fields::FIRST_NAME), None);
    }

    #[test]
    fn private_record_round_trips_names() {
        let (store, id) = store_with_user(None);
        let mut record = RemoteRecord::new(USER_RECORD_TYPE, RecordId::in_default_zone("u1"));
        store.read(|txn| UserKind.update_record(txn, id, &mut record, Scope::Private).unwrap());
        assert_eq!(record.text(user_fields::FIRST_NAME), Some("Ada"));
        assert_eq!(record.text(user_fields::LAST_NAME), Some("Lovelace"));

        let mut incoming = record.clone();
        incoming.set(user_fields::FIRST_NAME, FieldValue::Text("Grace".into()));
        store
            .with_transaction(|txn| {
                UserKind.apply_record(txn, id, &incoming, Scope::Private, &MergeContext::default())
            })
            .unwrap();
        store.read(|txn| {
            assert_eq!(txn.user(id).unwrap().first_name.as_deref(), Some("Grace"));
        });
    }

    #[test]
    fn applying_unknown_friends_creates_stubs_and_flags_the_user() {
        let (store, id) = store_with_user(None);
        let mut record = RemoteRecord::new(USER_RECORD_TYPE, RecordId::in_default_zone("u1"));
        record.set(
            user_fields::FRIENDS,
            FieldValue::ReferenceList(vec![
                RecordId::in_default_zone("friend-1"),
                RecordId::in_default_zone("friend-2"),
            ]),
        );

        store
            .with_transaction(|txn| {
                UserKind.apply_record(txn, id, &record, Scope::Private, &MergeContext::default())
            })
            .unwrap();

        store.read(|txn| {
            let user = txn.user(id).unwrap();
            assert_eq!(user.friends.len(), 2);
            assert!(user
                .cloud_status
                .contains(CloudSyncStatus::SYNCHRONIZING_RELATIONSHIPS));
            assert_eq!(txn.users().count(), 3, "two stub users created");
            for friend in &user.friends {
                assert!(
                    txn.reference(*friend, Scope::Public).is_some(),
                    "stubs get a public reference for the later fetch"
                );
            }
        });
    }

    #[test]
    fn applying_known_friends_clears_the_relationship_flag() {
        let (store, id) = store_with_user(None);
        let friend_record = RecordId::in_default_zone("friend-1");
        let friend = store
            .with_transaction(|txn| {
                let friend = txn.add_user(User::new());
                txn.set_reference(SyncReference::new(
                    friend,
                    Scope::Public,
                    friend_record.clone(),
                ))?;
                let me = txn.require_user_mut(id)?;
                me.cloud_status
                    .insert(CloudSyncStatus::SYNCHRONIZING_RELATIONSHIPS);
                Ok::<_, StoreError>(friend)
            })
            .unwrap();

        let mut record = RemoteRecord::new(USER_RECORD_TYPE, RecordId::in_default_zone("u1"));
        record.set(
            user_fields::FRIENDS,
            FieldValue::ReferenceList(vec![friend_record]),
        );
        store
            .with_transaction(|txn| {
                UserKind.apply_record(txn, id, &record, Scope::Private, &MergeContext::default())
            })
            .unwrap();

        store.read(|txn| {
            let user = txn.user(id).unwrap();
            assert_eq!(user.friends, vec![friend]);
            assert!(!user
                .cloud_status
                .contains(CloudSyncStatus::SYNCHRONIZING_RELATIONSHIPS));
        });
    }

    #[test]
    fn update_record_skips_friends_without_public_references() {
        let (store, id) = store_with_user(None);
        store
            .with_transaction(|txn| {
                let friend = txn.add_user(User::new());
                let me = txn.require_user_mut(id)?;
                me.friends.push(friend);
                Ok::<_, StoreError>(())
            })
            .unwrap();

        let mut record = RemoteRecord::new(USER_RECORD_TYPE, RecordId::in_default_zone("u1"));
        store.read(|txn| UserKind.update_record(txn, id, &mut record, Scope::Private).unwrap());
        assert_eq!(record.reference_list(user_fields::FRIENDS), None);
    }

    #[test]
    fn resolve_prefers_linked_user_for_private_records() {
        let (store, id) = store_with_user(None);
        let ctx = MergeContext {
            current_user_id: Some(RecordId::in_default_zone("me")),
            linked_local_user: Some(id),
        };
        let record = RemoteRecord::new(USER_RECORD_TYPE, RecordId::in_default_zone("me"));

        let resolved = store
            .with_transaction(|txn| UserKind.resolve_missing(txn, &record, Scope::Private, &ctx))
            .unwrap();
        assert_eq!(resolved, id);
    }

    #[test]
    fn resolve_creates_users_for_unclaimed_public_records() {
        let (store, id) = store_with_user(None);
        let ctx = MergeContext {
            current_user_id: Some(RecordId::in_default_zone("me")),
            linked_local_user: Some(id),
        };
        let record = RemoteRecord::new(USER_RECORD_TYPE, RecordId::in_default_zone("someone-else"));

        let resolved = store
            .with_transaction(|txn| {
                let resolved = UserKind.resolve_missing(txn, &record, Scope::Public, &ctx)?;
                Ok::<_, SyncError>(resolved)
            })
            .unwrap();
        assert_ne!(resolved, id, "a new user must be created");
    }
}

//! The in-memory transactional store.

use std::collections::HashMap;

use convene_records::{identities_match, RecordId, Scope};
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::entity::{EntityKind, LocalId, SharedEvent, User};
use crate::error::{StoreError, StoreResult};
use crate::reference::SyncReference;

#[derive(Debug, Clone, Default)]
struct StoreState {
    users: HashMap<LocalId, User>,
    events: HashMap<LocalId, SharedEvent>,
    references: HashMap<(LocalId, Scope), SyncReference>,
}

/// The local source of truth for syncable entities.
///
/// Writes go through closure-scoped transactions: the closure works on a
/// copy of the committed state, which replaces the committed state only
/// when the closure returns `Ok`. One write transaction runs at a time;
/// overlapping or nested transactions are not supported.
pub struct LocalStore {
    committed: RwLock<StoreState>,
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            committed: RwLock::new(StoreState::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Runs a transaction. The working state commits on `Ok` and is
    /// discarded on `Err`.
    pub fn with_transaction<T, E>(
        &self,
        work: impl FnOnce(&mut StoreTxn) -> Result<T, E>,
    ) -> Result<T, E> {
        let _guard = self.write_lock.lock();
        let mut txn = StoreTxn {
            state: self.committed.read().clone(),
        };
        match work(&mut txn) {
            Ok(value) => {
                *self.committed.write() = txn.state;
                trace!("store transaction committed");
                Ok(value)
            }
            Err(err) => {
                trace!("store transaction rolled back");
                Err(err)
            }
        }
    }

    /// Runs a read-only closure over a snapshot of the committed state.
    pub fn read<T>(&self, read: impl FnOnce(&StoreTxn) -> T) -> T {
        let snapshot = StoreTxn {
            state: self.committed.read().clone(),
        };
        read(&snapshot)
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A transaction's working view of the store.
pub struct StoreTxn {
    state: StoreState,
}

impl StoreTxn {
    // --- users ---

    /// Inserts a user, returning its identity.
    pub fn add_user(&mut self, user: User) -> LocalId {
        let id = user.id;
        self.state.users.insert(id, user);
        id
    }

    /// The user under the given identity.
    pub fn user(&self, id: LocalId) -> Option<&User> {
        self.state.users.get(&id)
    }

    /// Mutable access to a user.
    pub fn user_mut(&mut self, id: LocalId) -> Option<&mut User> {
        self.state.users.get_mut(&id)
    }

    /// The user under the given identity, or an entity-missing error.
    pub fn require_user(&self, id: LocalId) -> StoreResult<&User> {
        self.user(id).ok_or(StoreError::EntityMissing { id })
    }

    /// Mutable access to a user, or an entity-missing error.
    pub fn require_user_mut(&mut self, id: LocalId) -> StoreResult<&mut User> {
        self.state
            .users
            .get_mut(&id)
            .ok_or(StoreError::EntityMissing { id })
    }

    /// All users, in no particular order.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.state.users.values()
    }

    /// Removes a user, its sync references, and its entry in other users'
    /// friend lists.
    pub fn remove_user(&mut self, id: LocalId) -> Option<User> {
        let user = self.state.users.remove(&id)?;
        for scope in Scope::ALL {
            self.state.references.remove(&(id, scope));
        }
        for other in self.state.users.values_mut() {
            other.friends.retain(|friend| *friend != id);
        }
        Some(user)
    }

    // --- events ---

    /// Inserts an event, returning its identity.
    pub fn add_event(&mut self, event: SharedEvent) -> LocalId {
        let id = event.id;
        self.state.events.insert(id, event);
        id
    }

    /// The event under the given identity.
    pub fn event(&self, id: LocalId) -> Option<&SharedEvent> {
        self.state.events.get(&id)
    }

    /// Mutable access to an event.
    pub fn event_mut(&mut self, id: LocalId) -> Option<&mut SharedEvent> {
        self.state.events.get_mut(&id)
    }

    /// The event under the given identity, or an entity-missing error.
    pub fn require_event(&self, id: LocalId) -> StoreResult<&SharedEvent> {
        self.event(id).ok_or(StoreError::EntityMissing { id })
    }

    /// Mutable access to an event, or an entity-missing error.
    pub fn require_event_mut(&mut self, id: LocalId) -> StoreResult<&mut SharedEvent> {
        self.state
            .events
            .get_mut(&id)
            .ok_or(StoreError::EntityMissing { id })
    }

    /// All events, in no particular order.
    pub fn events(&self) -> impl Iterator<Item = &SharedEvent> {
        self.state.events.values()
    }

    /// Removes an event and its sync references.
    pub fn remove_event(&mut self, id: LocalId) -> Option<SharedEvent> {
        let event = self.state.events.remove(&id)?;
        for scope in Scope::ALL {
            self.state.references.remove(&(id, scope));
        }
        Some(event)
    }

    // --- entities across kinds ---

    /// The kind of the entity under the given identity.
    pub fn entity_kind(&self, id: LocalId) -> Option<EntityKind> {
        if self.state.users.contains_key(&id) {
            Some(EntityKind::User)
        } else if self.state.events.contains_key(&id) {
            Some(EntityKind::SharedEvent)
        } else {
            None
        }
    }

    /// Whether any entity exists under the given identity.
    pub fn contains_entity(&self, id: LocalId) -> bool {
        self.entity_kind(id).is_some()
    }

    // --- sync references ---

    /// Inserts or replaces the reference for its (entity, scope) pair.
    /// The entity must exist.
    pub fn set_reference(&mut self, reference: SyncReference) -> StoreResult<()> {
        if !self.contains_entity(reference.entity) {
            return Err(StoreError::EntityMissing {
                id: reference.entity,
            });
        }
        self.state
            .references
            .insert((reference.entity, reference.scope), reference);
        Ok(())
    }

    /// The reference of an entity in a scope.
    pub fn reference(&self, entity: LocalId, scope: Scope) -> Option<&SyncReference> {
        self.state.references.get(&(entity, scope))
    }

    /// Mutable access to the reference of an entity in a scope.
    pub fn reference_mut(&mut self, entity: LocalId, scope: Scope) -> Option<&mut SyncReference> {
        self.state.references.get_mut(&(entity, scope))
    }

    /// Removes the reference of an entity in a scope.
    pub fn remove_reference(&mut self, entity: LocalId, scope: Scope) -> Option<SyncReference> {
        self.state.references.remove(&(entity, scope))
    }

    /// References of one entity across scopes (zero, one, or two).
    pub fn references_for(&self, entity: LocalId) -> impl Iterator<Item = &SyncReference> {
        Scope::ALL
            .iter()
            .filter_map(move |scope| self.state.references.get(&(entity, *scope)))
    }

    /// Whether the entity still has a reference in any scope.
    pub fn has_any_reference(&self, entity: LocalId) -> bool {
        self.references_for(entity).next().is_some()
    }

    /// All references within one scope.
    pub fn references_in_scope(&self, scope: Scope) -> impl Iterator<Item = &SyncReference> {
        self.state
            .references
            .iter()
            .filter(move |((_, s), _)| *s == scope)
            .map(|(_, reference)| reference)
    }

    /// Finds the reference holding the given record identity in a scope.
    ///
    /// This is a linear scan comparing normalized identities, the
    /// documented workaround for the unstable default-zone owner spelling.
    pub fn find_by_record(&self, record_id: &RecordId, scope: Scope) -> Option<&SyncReference> {
        self.state
            .references
            .values()
            .find(|reference| {
                reference.scope == scope && identities_match(&reference.record_id, record_id)
            })
    }

    /// The local entity holding the given record identity in a scope.
    pub fn entity_for_record(&self, record_id: &RecordId, scope: Scope) -> Option<LocalId> {
        self.find_by_record(record_id, scope)
            .map(|reference| reference.entity)
    }
}

//! Syncable entity model.

use std::fmt;
use std::time::SystemTime;

use convene_records::CloudSyncStatus;
use uuid::Uuid;

/// Stable identity of a local entity, usable as a map key across
/// transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(Uuid);

impl LocalId {
    /// Allocates a fresh identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The raw uuid.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of entity kinds this store can mirror to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A person using the application.
    User,
    /// An event shared between users.
    SharedEvent,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::User => "user",
            EntityKind::SharedEvent => "shared event",
        };
        f.write_str(label)
    }
}

/// A person. Has an optional public alias and private name details, plus
/// the list of friends as local entity identities.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Local identity.
    pub id: LocalId,
    /// Public display alias.
    pub alias: Option<String>,
    /// Private first name.
    pub first_name: Option<String>,
    /// Private last name.
    pub last_name: Option<String>,
    /// Friends, as local user identities.
    pub friends: Vec<LocalId>,
    /// Cloud lifecycle state.
    pub cloud_status: CloudSyncStatus,
    /// Local creation time; used to pick the most recent unlinked user
    /// when linking the current account.
    pub created_at: SystemTime,
}

impl User {
    /// Creates an empty user.
    pub fn new() -> Self {
        Self {
            id: LocalId::new(),
            alias: None,
            first_name: None,
            last_name: None,
            friends: Vec::new(),
            cloud_status: CloudSyncStatus::NORMAL,
            created_at: SystemTime::now(),
        }
    }

    /// Whether the given user is already a friend.
    pub fn has_friend(&self, id: LocalId) -> bool {
        self.friends.contains(&id)
    }
}

impl Default for User {
    fn default() -> Self {
        Self::new()
    }
}

/// An event shared between users. Owned by exactly one user and mirrored
/// only to the public scope.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedEvent {
    /// Local identity.
    pub id: LocalId,
    /// Stable identifier assigned at creation, shared across devices.
    pub unique_identifier: Uuid,
    /// Creation time on the originating device.
    pub created_locally_at: SystemTime,
    /// Name of the originating device.
    pub created_by_device: String,
    /// Owning user.
    pub owner: LocalId,
    /// Cloud lifecycle state.
    pub cloud_status: CloudSyncStatus,
}

impl SharedEvent {
    /// Creates an event owned by the given user, created on this device.
    pub fn new(owner: LocalId, created_by_device: impl Into<String>) -> Self {
        Self {
            id: LocalId::new(),
            unique_identifier: Uuid::new_v4(),
            created_locally_at: SystemTime::now(),
            created_by_device: created_by_device.into(),
            owner,
            cloud_status: CloudSyncStatus::NORMAL,
        }
    }
}

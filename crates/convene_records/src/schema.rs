//! Record schema shared between the engine and the remote store.

/// Record type of user records.
pub const USER_RECORD_TYPE: &str = "User";

/// Record type of shared-event records.
pub const EVENT_RECORD_TYPE: &str = "SharedEvent";

/// Field names on user records.
pub mod user_fields {
    /// Public display alias.
    pub const ALIAS: &str = "userAlias";
    /// Private first name.
    pub const FIRST_NAME: &str = "userFirstName";
    /// Private last name.
    pub const LAST_NAME: &str = "userLastName";
    /// Private list of references to friends' public user records.
    pub const FRIENDS: &str = "friends";
}

/// Field names on shared-event records. Events exist only in the public
/// scope.
pub mod event_fields {
    /// Creation time on the originating device.
    pub const CREATED_LOCALLY_AT: &str = "createdLocallyAt";
    /// Name of the originating device.
    pub const CREATED_BY_DEVICE: &str = "createdByDevice";
    /// Stable identifier assigned at creation.
    pub const UNIQUE_IDENTIFIER: &str = "uniqueIdentifier";
}

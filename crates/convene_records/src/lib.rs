//! # Convene Records
//!
//! Remote record model and service types for the Convene sync engine.
//!
//! This crate provides:
//! - Scoped record identities with the normalized ("indexable") representation
//! - `RemoteRecord` with field values, change tags and modification metadata
//! - The system-fields CBOR codec used by sync references
//! - The remote-service error taxonomy (`ServiceError`)
//! - Query, subscription, notification and account-status types
//! - `SyncOptions` and `CloudSyncStatus` bitmasks
//!
//! This is a pure model crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod flags;
mod identity;
mod record;
mod schema;
mod service;
mod system_fields;

pub use error::{RecordError, RecordResult, ServiceError, ServiceResult};
pub use flags::{CloudSyncStatus, SyncOptions};
pub use identity::{
    identities_match, normalized_identity, RecordId, ZoneId, DEFAULT_ZONE_NAME, DEFAULT_ZONE_OWNER,
    DEFAULT_ZONE_OWNER_ALTERNATE,
};
pub use record::{FieldValue, RemoteRecord, Scope};
pub use schema::{event_fields, user_fields, EVENT_RECORD_TYPE, USER_RECORD_TYPE};
pub use service::{
    AccountStatus, FetchOutcome, ModifyOutcome, NotificationReason, PermissionStatus, QueryCursor,
    QueryFilter, QueryOutcome, QueryPage, RecordQuery, RemoteNotification, RemoteUserInfo,
    SavePolicy, Subscription,
};
pub use system_fields::SystemFields;

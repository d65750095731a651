//! # Convene Sync
//!
//! Workflow operations, record-sync pipeline and manager for the Convene
//! sync engine.
//!
//! This crate provides:
//! - Cancellable, linkable workflow tasks with a shared run context
//! - A priority work queue driving task graphs on tokio
//! - The record-sync pipeline (queries, fetches, batched modifies,
//!   conflict resolution, batch-size backoff)
//! - Entity merge specializations for users and shared events
//! - Composed operation graphs behind each manager entry point
//! - [`SyncManager`] with retry-after backpressure across runs
//!
//! ## Architecture
//!
//! Every entry point builds a graph of [`WorkflowTask`]s joined by links.
//! A link carries the edge policy: a failed predecessor cancels its
//! dependents, and a transform hands data across the edge once both ends
//! are healthy. The graph always ends in a cleanup stage that captures
//! backoff hints and a completion stage that reports the run's result
//! exactly once.
//!
//! ## Key Invariants
//!
//! - The private scope syncs before the public scope
//! - Every task finishes exactly once, on success, failure or cancellation
//! - A retry-after hint from the remote gates all future runs until it
//!   elapses
//! - Record identities are compared in normalized form at every boundary

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compose;
mod config;
mod context;
mod entity;
mod error;
mod link;
mod manager;
mod ops;
mod pending;
mod pipeline;
mod progress;
mod queue;
mod rate_limit;
mod service;
mod settings;
mod task;

pub use compose::{
    DiscoveryComposition, EntitySyncComposition, NotificationComposition, SetupComposition,
    UserSyncComposition,
};
pub use config::{SyncConfig, DEFAULT_MAX_BATCH, DEFAULT_SUBSCRIPTION_ID};
pub use context::WorkflowContext;
pub use entity::{
    ensure_reference, EntityRegistry, MergeContext, MergeDisposition, SyncableEntityKind,
};
pub use error::{SyncError, SyncResult};
pub use link::{link, link_handles, link_transform, link_with, WorkflowLink};
pub use manager::SyncManager;
pub use ops::{
    AccountStatusOperation, CleanupOperation, CollectChangesOperation, CompletionOperation,
    FetchUserIdOperation, FetchUserInfosOperation, InfoSource, LinkUserOperation,
    PermissionStatusOperation, PrepareEventQueriesOperation, RequestPermissionOperation,
    RouteNotificationOperation, SyncCompletion, UpdateSubscriptionOperation,
    UpdateUserInfosOperation, UsersWithFriendsOperation,
};
pub use pending::{ModifyBatch, PendingChanges, PendingSnapshot};
pub use pipeline::RecordSyncOperation;
pub use progress::Progress;
pub use queue::{collect_dependencies, QueueLimits, QueuePriority, WorkQueue};
pub use rate_limit::RateLimiter;
pub use service::{MockRemote, RemoteService};
pub use settings::{FileSettings, MemorySettings, SettingsStore};
pub use task::{TaskHandle, TaskMeta, WorkflowTask};

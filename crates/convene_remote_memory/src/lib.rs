//! # Convene Remote Memory
//!
//! In-memory implementation of the remote record service, for integration
//! tests and development against the Convene sync engine.
//!
//! This crate provides:
//! - Per-scope record tables with change tags and the fail-on-change save
//!   conflict matrix
//! - Query evaluation with owner and creation-cutoff filters, page limits
//!   and cursor continuation
//! - Subscriptions, a discoverable-user directory and the permission flow
//! - Account administration (`sign_in`, seeded records, status overrides)
//! - One-shot fault injection per entry point and an ordered call journal
//!
//! # Failure shapes
//!
//! The server answers the way the real service does: per-record problems
//! (stale change tag, unknown item) come back as partial-failure
//! sub-errors next to the operations that succeeded, while request-level
//! conditions (over-limit batches, missing account, injected faults) fail
//! the whole call. A sync pipeline pointed at this server therefore
//! exercises its real conflict, purge and batch-halving paths.
//!
//! # Example
//!
//! ```
//! use convene_records::{RecordId, RemoteRecord, SavePolicy, Scope};
//! use convene_remote_memory::MemoryRemote;
//!
//! let remote = MemoryRemote::new();
//! remote.sign_in("user-1");
//!
//! let record = RemoteRecord::new("SharedEvent", RecordId::in_default_zone("e1"));
//! let outcome = remote.modify_records(Scope::Public, vec![record], vec![], SavePolicy::default());
//! assert!(outcome.error.is_none());
//! assert!(outcome.saved[0].change_tag.is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod directory;
mod faults;
mod query;
mod server;
mod tables;

pub use config::{RemoteConfig, DEFAULT_BATCH_LIMIT, DEFAULT_MAX_PAGE};
pub use faults::RemoteCall;
pub use server::MemoryRemote;

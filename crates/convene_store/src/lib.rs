//! # Convene Store
//!
//! Local transactional entity store for the Convene sync engine.
//!
//! This crate provides:
//! - The syncable entity model (`User`, `SharedEvent`)
//! - Sync references joining local entities to remote records per scope
//! - A single-writer in-memory store with closure-scoped transactions
//! - Robust (normalized) reference lookup by remote record identity
//!
//! ## Key Invariants
//!
//! - At most one sync reference per (entity, scope) pair
//! - Transactions are all-or-nothing: the working state replaces the
//!   committed state only when the closure returns `Ok`
//! - One write transaction at a time; readers see committed state

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod reference;
mod store;

pub use entity::{EntityKind, LocalId, SharedEvent, User};
pub use error::{StoreError, StoreResult};
pub use reference::SyncReference;
pub use store::{LocalStore, StoreTxn};

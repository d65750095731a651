//! # Convene Testkit
//!
//! Test utilities for the Convene sync engine.
//!
//! This crate provides:
//! - Store fixtures that build linked users, friends and events
//! - Property-based generators for identities, records and options
//! - Cross-platform test vectors for identity normalization
//!
//! ## Usage
//!
//! ```rust,ignore
//! use convene_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     let fixture = StoreFixture::new();
//!     let user = fixture.add_linked_user("alice");
//!     // ... drive the engine against fixture.store
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::vectors::*;
}

pub use fixtures::*;
pub use generators::*;
pub use vectors::*;

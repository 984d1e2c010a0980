//! # csync testkit
//!
//! Test utilities for csync.
//!
//! This crate provides:
//! - Replica pair fixtures backed by memory or temporary directories
//! - Property-based generators for trees and edit sequences
//! - Convergence and report assertions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use csync_testkit::prelude::*;
//!
//! #[test]
//! fn new_file_reaches_the_remote() {
//!     let pair = MemoryPair::new();
//!     pair.local.put_file("a.txt", "hello", 1_000);
//!     assert_success(&pair.sync());
//!     assert_converged(&pair.local, &pair.remote);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod assertions;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use assertions::*;
pub use fixtures::*;
pub use generators::*;

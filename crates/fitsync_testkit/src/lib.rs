//! # FitSync Testkit
//!
//! Test utilities for FitSync.
//!
//! This crate provides:
//! - An in-memory fake of the workout REST API with fault injection
//! - Test fixtures and a fully wired store stack
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fitsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_stack() {
//!     let stack = TestStack::new();
//!     stack.seed("w1", "Legs", 1);
//!     stack.load().await;
//!     // ... store operations
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fake_server;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fake_server::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fake_server::*;
pub use fixtures::*;
pub use generators::*;

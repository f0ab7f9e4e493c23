//! Shared test utilities for assetcat integration tests.
//!
//! This module provides:
//! - `TestHarness` for running loaders against temp config files and an
//!   in-memory store
//! - Builders for source files and local catalogs

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;

//! Common test utilities for chunk-dl integration tests

#[allow(dead_code)]
pub mod fixtures;

pub use fixtures::*;

//! Shared test utilities for courier integration tests.
//!
//! This module provides:
//! - `TestHarness` with local source/destination directories and an
//!   in-memory database
//! - `FaultyFactory` for injecting provider failures into a run
//! - `FlakyStore` for failing run bookkeeping
//! - Builders for jobs and archive fixtures

pub mod builders;
pub mod faults;
pub mod harness;
pub mod store;

pub use builders::*;
pub use faults::{FaultyFactory, Faults};
pub use harness::{fast_config, set_age, TestHarness};
pub use store::FlakyStore;

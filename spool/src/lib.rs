//! Staging primitives for data pipelines.
//!
//! - [`concurrency::read_ahead`] overlaps a slow source with a slow consumer through a bounded
//!   queue filled by a background producer.
//! - [`concurrency::shared_use`] and [`resource`] let many callers share a resource whose first
//!   use materializes it.
//! - [`workdir`] hands out temporary working directories and reclaims the ones left behind by
//!   processes that crashed.

pub mod concurrency;
pub mod error;
pub mod failpoints;
mod macros;
pub mod metrics;
pub mod resource;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod workdir;

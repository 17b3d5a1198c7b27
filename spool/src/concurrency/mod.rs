//! Concurrency primitives for staging data ahead of its consumers.
//!
//! # Coordination Patterns
//!
//! ## Read-ahead
//!
//! The [`read_ahead`] module decouples a lazily evaluated source from its consumer with a
//! dedicated producer thread and a bounded queue. The producer blocks when the queue is full,
//! the consumer blocks (or yields, for async consumers) when it is empty, and production errors
//! surface to the consumer after the items produced before them.
//!
//! ## Shared use
//!
//! The [`shared_use`] module guards a resource whose first use materializes it: the first
//! caller does the work while others wait, and a failed first use hands the job to one waiter.
//!
//! ## Shutdown
//!
//! The [`shutdown`] module provides the broadcast signal that stops read-ahead producers and
//! the working directory loops.

pub mod read_ahead;
pub mod shared_use;
pub mod shutdown;

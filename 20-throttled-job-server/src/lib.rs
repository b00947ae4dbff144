//! Bounded, backpressure-aware job processing over a shared key-value store.
//!
//! Three pieces make up the core:
//!
//! - [`repo`] keeps items in a thread-safe in-memory map. Readers share a lock,
//!   writers take it exclusively.
//! - [`ratelimit`] gates every inbound request through one global token bucket
//!   with continuous refill.
//! - [`pool`] runs a fixed number of Tokio workers draining a bounded FIFO queue.
//!   Submission never blocks; a full queue is reported back as `false`.
//!
//! [`job`] defines the unit of work the pool executes, [`server`] is the thin
//! axum boundary that ties everything to HTTP, and [`cli`] holds the runtime
//! configuration.
//!
//! Cancellation is cooperative. The pool owns one [`CancellationToken`] and hands
//! each job a child of it, so `stop()` reaches every in-flight job at once.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod cli;
pub mod job;
pub mod pool;
pub mod ratelimit;
pub mod repo;
pub mod server;

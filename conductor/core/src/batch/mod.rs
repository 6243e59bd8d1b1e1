//! Bounded-Concurrency Batch Scheduler
//!
//! Runs N independent requests with at most C in flight and returns results
//! in input order, whatever order they complete in.
//!
//! ```text
//!   inputs ──tag(index)──▶ acquire permit ──▶ run ──▶ (index, result)
//!                              │ FIFO                    │
//!                        parked callers           sort by index ──▶ results
//! ```

mod permit;
mod scheduler;

pub use permit::{Permit, PermitPool};
pub use scheduler::BatchScheduler;

//! # sqlserver-pool
//!
//! A bounded async connection pool. The pool is generic over a [`Manager`]
//! that opens, validates and classifies connections, so it carries no
//! protocol knowledge of its own; `sqlserver-client` provides the TDS
//! manager. Capacity is enforced with a FIFO waiter queue, idle connections
//! are validated before hand-off and reaped on a timer, and a retry wrapper
//! re-runs idempotent operations on a fresh connection after transient
//! failures.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod manager;
pub mod pool;
pub mod retry;

pub use config::PoolConfig;
pub use error::PoolError;
pub use manager::{ErrorDisposition, Manager};
pub use pool::{Lease, Pool, PoolStatus};
pub use retry::{run_retrying, RetryPolicy};

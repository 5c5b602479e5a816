//! Run a long-lived job on exactly one process at a time.
//!
//! Processes competing for the same job share a lease stored under one key
//! in a store with atomic compare-and-set (Redis, or an in-memory store
//! within a single process). The value stored under the key is the lease
//! expiry, and it is the only proof of ownership.
//!
//! - **Acquire**: set the key if it is unset or its expiry has passed.
//! - **Renew**: replace the expiry only if it still equals the one we last
//!   stored.
//! - **Lose**: the first refused renewal aborts the workload. The process then
//!   goes back to waiting for the lease.
//!
//! Grants last two thirds of the configured lease duration, and holders renew
//! every third. Exclusion is best effort: it is bounded by the lease duration
//! and by clock drift between processes.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use unique_task::{Coordinator, CoordinatorConfig, RedisLeaseStore};
//!
//! async fn hello() -> anyhow::Result<()> {
//!     loop {
//!         println!("Hello from the unique task!");
//!         tokio::time::sleep(Duration::from_secs(1)).await;
//!     }
//! }
//!
//! # async fn example() -> unique_task::Result<()> {
//! let store = Arc::new(RedisLeaseStore::connect("redis://127.0.0.1/").await?);
//! let config = CoordinatorConfig::new("hello_world")
//!     .with_lease_duration(Duration::from_secs(1))
//!     .with_error_handler(|err| eprintln!("recovered from: {err}"));
//!
//! let handle = Coordinator::new(config, store)?.run(hello);
//! # handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod lock;
#[cfg(feature = "redis")]
pub mod redis_store;
mod renewal;
pub mod store;
pub mod supervisor;
pub mod time;
pub mod workload;

pub mod test_utils;

pub use config::{CoordinatorConfig, RestartPolicy};
pub use error::{Error, Result};
pub use gateway::LeaseGateway;
pub use handler::{ErrorHandler, ErrorHandlers};
pub use lock::{HeldLease, LockState};
#[cfg(feature = "redis")]
pub use redis_store::RedisLeaseStore;
pub use store::{InMemoryLeaseStore, LeaseStore, LockReply};
pub use supervisor::{Coordinator, CoordinatorHandle};
pub use time::{Clock, LeaseTimer, SystemClock, Timestamp, DEFAULT_LEASE_DURATION};
pub use workload::{Workload, WorkloadFuture};

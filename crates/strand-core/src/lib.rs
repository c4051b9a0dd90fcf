//! strand-core
//!
//! A bounded worker pool and composable tasks built on Tokio.
//!
//! - **domain**: ids, task states, error taxonomy
//! - **config**: `PoolConfig` (defaults, env overrides, validation)
//! - **queue**: the job queue port and its in-memory FIFO implementation
//! - **pool**: `WorkerPool` (submit, shutdown, status)
//! - **task**: `ComposableTask` (map, consume, combine, recover, and_then, wait)

pub mod config;
pub mod domain;
pub mod pool;
pub mod queue;
pub mod task;

pub use config::{ConfigError, PoolConfig};
pub use domain::{BoxError, PoolError, Side, TaskError, TaskId, TaskState};
pub use pool::{PoolStatus, WorkerPool};
pub use task::ComposableTask;

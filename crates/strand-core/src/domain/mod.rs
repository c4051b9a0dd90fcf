//! Domain model: ids, task states, error taxonomy.

pub mod errors;
pub mod ids;
pub mod state;

pub use self::errors::{BoxError, PoolError, Side, TaskError};
pub use self::ids::{Id, IdMarker, TaskId};
pub use self::state::TaskState;

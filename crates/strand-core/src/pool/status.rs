use serde::{Deserialize, Serialize};

use crate::queue::QueueCounts;

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Pool name from `PoolConfig`.
    pub name: String,

    /// Number of worker slots.
    pub workers: usize,

    /// Shutdown has been requested.
    pub closed: bool,

    /// Queue counters, flattened into the same JSON object.
    #[serde(flatten)]
    pub counts: QueueCounts,
}

impl PoolStatus {
    /// Nothing queued and nothing running.
    pub fn is_idle(&self) -> bool {
        self.counts.queued == 0 && self.counts.running == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_flattened_in_json() {
        let status = PoolStatus {
            name: "p".to_string(),
            workers: 2,
            closed: false,
            counts: QueueCounts {
                queued: 1,
                running: 2,
                completed: 3,
                failed: 4,
            },
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["queued"], 1);
        assert_eq!(v["failed"], 4);
        assert_eq!(v["workers"], 2);
        assert!(!status.is_idle());
    }
}

//! Stream id supply.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide source of stream ids.
pub trait IdSupplier: Send + Sync {
    /// Allocate a new initial (odd) stream id in the scope of `routed_id`.
    fn supply_initial_id(&self, routed_id: u64) -> u64;

    /// Derive the reply id paired with an initial id.
    fn supply_reply_id(&self, initial_id: u64) -> u64;
}

/// Monotonically increasing odd initial ids; the reply id is `initial ^ 1`.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::starting_at(3)
    }

    /// Start at a given id, rounded up to the next odd id.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first | 0x01),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSupplier for SequentialIds {
    fn supply_initial_id(&self, _routed_id: u64) -> u64 {
        self.next.fetch_add(2, Ordering::Relaxed)
    }

    fn supply_reply_id(&self, initial_id: u64) -> u64 {
        initial_id ^ 0x01
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::is_initial;
    use std::sync::Arc;

    #[test]
    fn test_initial_ids_are_odd_and_increasing() {
        let ids = SequentialIds::new();
        let a = ids.supply_initial_id(1);
        let b = ids.supply_initial_id(2);

        assert!(is_initial(a));
        assert!(is_initial(b));
        assert!(b > a);
    }

    #[test]
    fn test_reply_id_pairs_with_initial() {
        let ids = SequentialIds::starting_at(10);
        let initial = ids.supply_initial_id(1);
        assert_eq!(initial, 11);

        let reply = ids.supply_reply_id(initial);
        assert_eq!(reply, 10);
        assert!(!is_initial(reply));
        assert_eq!(reply ^ 1, initial);
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = Arc::new(SequentialIds::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || {
                    (0..100).map(|_| ids.supply_initial_id(7)).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
    }
}

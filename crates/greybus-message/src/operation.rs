use std::sync::atomic::{AtomicU16, Ordering};

/// Hands out operation ids for outbound requests.
///
/// Ids cycle through `1..=u16::MAX`; 0 is reserved for one-shot requests and
/// is never returned. Safe to share between any number of producer threads.
#[derive(Debug)]
pub struct OperationIdAllocator {
    next: AtomicU16,
}

impl OperationIdAllocator {
    /// First id handed out, and the id the counter wraps back to.
    pub const FIRST: u16 = 1;

    pub const fn new() -> Self {
        Self {
            next: AtomicU16::new(Self::FIRST),
        }
    }

    /// Start the counter at an explicit id. A start of 0 is bumped to [`Self::FIRST`].
    pub fn starting_at(id: u16) -> Self {
        Self {
            next: AtomicU16::new(id.max(Self::FIRST)),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> u16 {
        let prev = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(if id == u16::MAX { Self::FIRST } else { id + 1 })
            });
        match prev {
            Ok(id) | Err(id) => id,
        }
    }
}

impl Default for OperationIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn starts_at_one() {
        let ids = OperationIdAllocator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn wraps_past_max_without_emitting_zero() {
        let ids = OperationIdAllocator::starting_at(u16::MAX - 1);
        assert_eq!(ids.next_id(), u16::MAX - 1);
        assert_eq!(ids.next_id(), u16::MAX);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn full_cycle_repeats_only_after_65535_ids() {
        let ids = OperationIdAllocator::new();
        let mut seen = HashSet::new();
        for _ in 0..u16::MAX {
            let id = ids.next_id();
            assert_ne!(id, 0);
            assert!(seen.insert(id), "id {id} repeated inside one cycle");
        }
        assert_eq!(seen.len(), u16::MAX as usize);
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn zero_start_is_bumped() {
        let ids = OperationIdAllocator::starting_at(0);
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        let ids = Arc::new(OperationIdAllocator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 4000);
    }
}

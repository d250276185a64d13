use std::sync::Mutex;

use crate::util::lock_unpoisoned;

pub const DEFAULT_THROTTLED_RETRY_COST: usize = 5;
pub const DEFAULT_THROTTLED_RETRIES: usize = 100;

/// Sizing of the retry capacity pool shared by all calls on a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryCapacityPolicy {
    retry_cost: usize,
    max_retries: usize,
}

impl RetryCapacityPolicy {
    pub const fn standard() -> Self {
        Self {
            retry_cost: DEFAULT_THROTTLED_RETRY_COST,
            max_retries: DEFAULT_THROTTLED_RETRIES,
        }
    }

    pub const fn retry_cost(mut self, retry_cost: usize) -> Self {
        self.retry_cost = if retry_cost == 0 { 1 } else { retry_cost };
        self
    }

    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub const fn configured_retry_cost(self) -> usize {
        self.retry_cost
    }

    pub const fn total_capacity(self) -> usize {
        self.retry_cost.saturating_mul(self.max_retries)
    }
}

impl Default for RetryCapacityPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Token pool admitting retries of non-throttling failures.
///
/// `None` capacity means accounting is disabled and every acquire succeeds.
#[derive(Debug)]
pub struct RetryCapacity {
    max_capacity: Option<usize>,
    available: Mutex<usize>,
}

impl RetryCapacity {
    pub fn new(max_capacity: usize) -> Self {
        Self {
            max_capacity: Some(max_capacity),
            available: Mutex::new(max_capacity),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            max_capacity: None,
            available: Mutex::new(0),
        }
    }

    pub(crate) fn from_policy(enabled: bool, policy: RetryCapacityPolicy) -> Self {
        if enabled {
            Self::new(policy.total_capacity())
        } else {
            Self::unlimited()
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_capacity.is_none()
    }

    /// Takes `cost` tokens if that many are available. Never blocks.
    pub fn acquire(&self, cost: usize) -> bool {
        if self.max_capacity.is_none() {
            return true;
        }
        let mut available = lock_unpoisoned(&self.available);
        if *available < cost {
            return false;
        }
        *available -= cost;
        true
    }

    pub fn release(&self) {
        self.release_cost(1);
    }

    /// Returns `cost` tokens to the pool, never exceeding the maximum.
    pub fn release_cost(&self, cost: usize) {
        let Some(max_capacity) = self.max_capacity else {
            return;
        };
        let mut available = lock_unpoisoned(&self.available);
        *available = available.saturating_add(cost).min(max_capacity);
    }

    pub fn available_capacity(&self) -> Option<usize> {
        self.max_capacity?;
        Some(*lock_unpoisoned(&self.available))
    }

    pub fn consumed_capacity(&self) -> Option<usize> {
        let max_capacity = self.max_capacity?;
        Some(max_capacity - *lock_unpoisoned(&self.available))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::{RetryCapacity, RetryCapacityPolicy};

    #[test]
    fn default_policy_allows_one_hundred_retries_of_cost_five() {
        let policy = RetryCapacityPolicy::standard();
        assert_eq!(policy.configured_retry_cost(), 5);
        assert_eq!(policy.total_capacity(), 500);
    }

    #[test]
    fn acquire_fails_without_enough_tokens() {
        let capacity = RetryCapacity::new(7);
        assert!(capacity.acquire(5));
        assert!(!capacity.acquire(5));
        assert_eq!(capacity.available_capacity(), Some(2));
        capacity.release_cost(5);
        assert_eq!(capacity.available_capacity(), Some(7));
    }

    #[test]
    fn release_is_capped_at_maximum() {
        let capacity = RetryCapacity::new(10);
        capacity.release();
        capacity.release_cost(50);
        assert_eq!(capacity.available_capacity(), Some(10));
        assert_eq!(capacity.consumed_capacity(), Some(0));
    }

    #[test]
    fn unlimited_pool_always_admits() {
        let capacity = RetryCapacity::from_policy(false, RetryCapacityPolicy::standard());
        assert!(capacity.is_unlimited());
        for _ in 0..1_000 {
            assert!(capacity.acquire(5));
        }
        assert_eq!(capacity.available_capacity(), None);
    }

    #[test]
    fn concurrent_acquire_never_overdraws() {
        let capacity = Arc::new(RetryCapacity::new(50));
        let handles = (0..8)
            .map(|_| {
                let capacity = Arc::clone(&capacity);
                thread::spawn(move || (0..20).filter(|_| capacity.acquire(5)).count())
            })
            .collect::<Vec<_>>();
        let granted: usize = handles
            .into_iter()
            .map(|handle| handle.join().expect("worker should not panic"))
            .sum();
        assert_eq!(granted, 10);
        assert_eq!(capacity.available_capacity(), Some(0));
    }
}

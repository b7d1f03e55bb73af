//! Memory and per-tick work budgets for streaming

use std::time::{Duration, Instant};

use crate::core::types::bytes_to_mb;

/// Memory budget for resident chunk data
///
/// Usage is recomputed from the resident set rather than tracked
/// incrementally, so it cannot drift from what is actually held.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemoryBudget {
    /// Maximum memory allowed (bytes)
    budget_bytes: usize,
    /// Currently used memory (bytes)
    used_bytes: usize,
}

impl MemoryBudget {
    pub fn new(budget_mb: f32) -> Self {
        Self {
            budget_bytes: (budget_mb.max(0.0) as f64 * 1024.0 * 1024.0) as usize,
            used_bytes: 0,
        }
    }

    pub fn set_used(&mut self, bytes: usize) {
        self.used_bytes = bytes;
    }

    pub fn remove(&mut self, bytes: usize) {
        self.used_bytes = self.used_bytes.saturating_sub(bytes);
    }

    pub fn used(&self) -> usize {
        self.used_bytes
    }

    pub fn used_mb(&self) -> f32 {
        bytes_to_mb(self.used_bytes)
    }

    pub fn budget(&self) -> usize {
        self.budget_bytes
    }

    pub fn is_over(&self) -> bool {
        self.used_bytes > self.budget_bytes
    }
}

/// Limits how much load work one tick may do.
///
/// A tick may complete at most `max_items` loads and stops starting new ones
/// once the elapsed time plus the running per-item estimate would pass
/// `max_time`. The first item of a tick always runs so streaming never
/// stalls on a slow machine.
#[derive(Clone, Debug)]
pub struct FrameBudget {
    max_items: usize,
    max_time: Duration,
    item_estimate: Duration,
    started: Instant,
    items: usize,
}

impl FrameBudget {
    pub fn new(max_items: usize, max_time_ms: f32) -> Self {
        Self {
            max_items,
            max_time: Duration::from_secs_f32(max_time_ms.max(0.0) / 1000.0),
            item_estimate: Duration::ZERO,
            started: Instant::now(),
            items: 0,
        }
    }

    /// Begin a new tick
    pub fn reset(&mut self) {
        self.started = Instant::now();
        self.items = 0;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record one finished item and fold its cost into the estimate
    pub fn complete_item(&mut self, cost: Duration) {
        self.items += 1;
        self.item_estimate = if self.item_estimate.is_zero() {
            cost
        } else {
            (self.item_estimate * 3 + cost) / 4
        };
    }

    /// Whether another item fits into this tick
    pub fn can_start_next(&self) -> bool {
        if self.items >= self.max_items {
            return false;
        }
        if self.items == 0 {
            return true;
        }
        self.elapsed() + self.item_estimate <= self.max_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_budget() {
        let mut budget = MemoryBudget::new(1.0);
        assert_eq!(budget.budget(), 1024 * 1024);
        budget.set_used(512 * 1024);
        assert!((budget.used_mb() - 0.5).abs() < 1e-6);
        assert!(!budget.is_over());

        // Exactly at the budget is still within it
        budget.set_used(1024 * 1024);
        assert!(!budget.is_over());

        budget.set_used(1112 * 1024);
        assert!(budget.is_over());
        budget.remove(100 * 1024);
        assert!(!budget.is_over());

        budget.remove(usize::MAX);
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn test_memory_budget_zero() {
        let mut budget = MemoryBudget::new(0.0);
        assert_eq!(budget.budget(), 0);
        assert!(!budget.is_over());
        budget.set_used(1);
        assert!(budget.is_over());
    }

    #[test]
    fn test_frame_budget_item_cap() {
        let mut budget = FrameBudget::new(2, 10_000.0);
        budget.reset();
        assert!(budget.can_start_next());
        budget.complete_item(Duration::from_micros(10));
        assert!(budget.can_start_next());
        budget.complete_item(Duration::from_micros(10));
        assert!(!budget.can_start_next());

        budget.reset();
        assert!(budget.can_start_next());
    }

    #[test]
    fn test_frame_budget_time_cap() {
        let mut budget = FrameBudget::new(100, 1.0);
        budget.reset();
        // First item always runs, even when it blows the budget
        assert!(budget.can_start_next());
        budget.complete_item(Duration::from_millis(50));
        assert!(!budget.can_start_next());
    }
}

//! Per-query fuel accounting.
//!
//! Fuel counts work units (flakes touched) across a single query. The
//! counter is monotonically non-decreasing and shared by every stage of the
//! query via `Arc`; it trips [`QuadStreamError::ExceededCost`] the moment
//! consumption crosses the budget. Fuel is never shared between queries.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::QuadStreamError;

/// Monotone work counter with a budget.
#[derive(Debug)]
pub struct Fuel {
    max: u64,
    used: AtomicU64,
}

impl Fuel {
    /// A budgeted counter. `max = 0` means unlimited.
    pub fn new(max: u64) -> Fuel {
        Fuel { max, used: AtomicU64::new(0) }
    }

    pub fn unlimited() -> Fuel {
        Fuel::new(0)
    }

    /// Consume `n` units. Fails with `db/exceeded-cost` when the budget is
    /// crossed; the counter still records the consumption, so `used` never
    /// decreases.
    pub fn burn(&self, n: u64) -> Result<(), QuadStreamError> {
        let total = self.used.fetch_add(n, Ordering::Relaxed) + n;
        if self.max > 0 && total > self.max {
            return Err(QuadStreamError::ExceededCost { max_fuel: self.max });
        }
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burn_within_budget() {
        let fuel = Fuel::new(10);
        assert!(fuel.burn(4).is_ok());
        assert!(fuel.burn(6).is_ok());
        assert_eq!(fuel.used(), 10);
    }

    #[test]
    fn test_burn_over_budget() {
        let fuel = Fuel::new(10);
        assert!(fuel.burn(10).is_ok());
        let err = fuel.burn(1).unwrap_err();
        assert_eq!(err.error_tag(), "db/exceeded-cost");
        // Consumption is still recorded.
        assert_eq!(fuel.used(), 11);
    }

    #[test]
    fn test_unlimited_never_trips() {
        let fuel = Fuel::unlimited();
        assert!(fuel.burn(u64::MAX / 2).is_ok());
    }
}

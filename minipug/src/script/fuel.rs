use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::{Error, ErrorKind};

/// Helper for tracking fuel consumption
#[derive(Debug)]
pub struct FuelTracker {
    initial: u64,
    remaining: AtomicI64,
}

impl FuelTracker {
    /// Creates a new fuel tracker.
    ///
    /// The fuel tracker is always wrapped in an `Arc` so that the same budget
    /// can be handed to every engine taking part in a render.
    pub fn new(fuel: u64) -> Arc<FuelTracker> {
        Arc::new(FuelTracker {
            initial: fuel,
            remaining: AtomicI64::new(fuel.min(i64::MAX as u64) as i64),
        })
    }

    /// Tracks one evaluated node.  If it runs out of fuel an error is returned.
    pub fn track(&self) -> Result<(), Error> {
        let old_fuel = self.remaining.fetch_sub(1, Ordering::Relaxed);
        if old_fuel <= 0 {
            return Err(Error::new(
                ErrorKind::OutOfFuel,
                format!("evaluation budget of {} exhausted", self.initial),
            ));
        }
        Ok(())
    }

    /// Returns the amount of fuel left.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed).max(0) as u64
    }

    /// Returns the amount of fuel consumed.
    pub fn consumed(&self) -> u64 {
        self.initial.saturating_sub(self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget() {
        let fuel = FuelTracker::new(2);
        assert!(fuel.track().is_ok());
        assert!(fuel.track().is_ok());
        assert_eq!(fuel.remaining(), 0);
        assert_eq!(fuel.consumed(), 2);
        assert_eq!(fuel.track().unwrap_err().kind(), ErrorKind::OutOfFuel);
    }
}

//! Pluggable suspension points for the scheduler driver.
//!
//! The driver suspends in three places: the batching-window wait, the
//! not-currently-driver retry, and the wait for its own completion flag.
//! All three go through this capability so callers multiplexed on a host
//! cooperative scheduler can substitute their own yield behavior; the
//! default is plain blocking waits.

use std::time::Duration;

pub trait YieldPoint: Send + Sync {
    /// Wait out (part of) the batching window.
    fn pause(&self, duration: Duration);

    /// Give other callers a chance to make progress before retrying.
    fn yield_now(&self);
}

/// Blocking waits on the current thread. Correct with no cooperative
/// scheduler present.
#[derive(Debug, Default)]
pub struct BlockingYield;

impl YieldPoint for BlockingYield {
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

/// Zero-length sleeps, for callers cooperatively scheduled on one thread
/// where a long blocking sleep would stall every sibling task.
#[derive(Debug, Default)]
pub struct CooperativeYield;

impl YieldPoint for CooperativeYield {
    fn pause(&self, duration: Duration) {
        // Sleep in sub-millisecond slices so siblings keep running.
        std::thread::sleep(duration.min(Duration::from_micros(500)));
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

//! Scheduler driver: safe sharing of one transfer group by many callers.
//!
//! The engine is not reentrant, so exactly one caller at a time is elected
//! "driver" and pumps it on behalf of everyone. Non-driver callers only
//! ever enqueue their transfer and cooperatively wait for their own
//! completion flag. Submissions arriving within a short batching window
//! coalesce into a single drive pass, which matters when many cooperative
//! tasks submit work in the same scheduling tick.

pub mod yield_point;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::MuxConfig;
use crate::error::{Error, Result};
use crate::group::TransferGroup;
use crate::transfer::{Transfer, TransferOutcome};
use yield_point::{BlockingYield, YieldPoint};

/// Batching window before driver election. A heuristic latency/throughput
/// tradeoff, not a correctness requirement; tune via `MuxConfig`.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(2);

struct DriverState {
    queue: VecDeque<(Transfer, Arc<AtomicBool>)>,
    active: usize,
    driving: bool,
    batch_deadline: Option<Instant>,
}

struct DriverShared {
    group: TransferGroup,
    state: Mutex<DriverState>,
    yield_point: Box<dyn YieldPoint>,
    batch_window: Duration,
}

/// Per-concurrency-domain coordinator. One instance per thread via
/// `current()`; cooperative tasks on that thread share the instance.
/// Cloning yields another handle to the same driver.
#[derive(Clone)]
pub struct SchedulerDriver {
    shared: Arc<DriverShared>,
}

thread_local! {
    static CURRENT: RefCell<Option<SchedulerDriver>> = RefCell::new(None);
}

impl SchedulerDriver {
    /// The calling thread's driver, created lazily over a curl-backed group
    /// on first use. Instances are never shared across threads implicitly.
    pub fn current() -> Result<SchedulerDriver> {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(driver) = &*slot {
                return Ok(driver.clone());
            }
            let driver = SchedulerDriver::new(TransferGroup::new()?);
            *slot = Some(driver.clone());
            Ok(driver)
        })
    }

    pub fn new(group: TransferGroup) -> Self {
        Self::with_options(group, Box::new(BlockingYield), DEFAULT_BATCH_WINDOW)
    }

    pub fn with_options(
        group: TransferGroup,
        yield_point: Box<dyn YieldPoint>,
        batch_window: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(DriverShared {
                group,
                state: Mutex::new(DriverState {
                    queue: VecDeque::new(),
                    active: 0,
                    driving: false,
                    batch_deadline: None,
                }),
                yield_point,
                batch_window,
            }),
        }
    }

    /// Curl-backed driver configured from `MuxConfig`.
    pub fn from_config(cfg: &MuxConfig) -> Result<Self> {
        let group = TransferGroup::from_config(cfg)?;
        Ok(Self::with_options(
            group,
            Box::new(BlockingYield),
            Duration::from_millis(cfg.batch_window_ms),
        ))
    }

    /// The group this driver feeds.
    pub fn group(&self) -> &TransferGroup {
        &self.shared.group
    }

    /// Run `transfer` to completion on the shared group.
    ///
    /// The call enqueues the transfer, waits out the batching window so
    /// near-simultaneous submitters join the same pass, then either drives
    /// the engine (if no one else is) or yields until its own completion
    /// flag is set. A panic in any caller's completion callback is isolated
    /// from the shared drive loop; this caller's own recorded callback
    /// panic is surfaced as `Error::Callback` once its transfer is done.
    pub fn perform(&self, transfer: &Transfer) -> Result<()> {
        let done = Arc::new(AtomicBool::new(false));
        {
            // Chained after any caller-registered observers: mark done and
            // release this submission's slot in the active count.
            let done = Arc::clone(&done);
            let shared = Arc::clone(&self.shared);
            transfer.on_complete(move |_| {
                done.store(true, Ordering::Release);
                let mut st = shared.state.lock().unwrap();
                st.active = st.active.saturating_sub(1);
            });
        }

        let deadline = {
            let mut st = self.shared.state.lock().unwrap();
            st.active += 1;
            st.queue.push_back((transfer.clone(), Arc::clone(&done)));
            *st
                .batch_deadline
                .get_or_insert_with(|| Instant::now() + self.shared.batch_window)
        };
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            if remaining.is_zero() {
                break;
            }
            self.shared.yield_point.pause(remaining);
        }

        self.drive_until_done(transfer, &done)
    }

    fn drive_until_done(&self, transfer: &Transfer, done: &Arc<AtomicBool>) -> Result<()> {
        while !done.load(Ordering::Acquire) {
            let became_driver = {
                let mut st = self.shared.state.lock().unwrap();
                if st.driving {
                    false
                } else {
                    st.driving = true;
                    true
                }
            };
            if !became_driver {
                self.shared.yield_point.yield_now();
                continue;
            }

            let _guard = DrivingGuard {
                shared: &self.shared,
            };
            self.drain_queue();
            match self.shared.group.run_until_idle(|_| self.drain_queue()) {
                Ok(()) => {}
                // Isolated at the chaining boundary: a panicking callback
                // must not strand other callers' pending transfers.
                Err(Error::Callback(msg)) => {
                    tracing::warn!("callback panic isolated in shared drive loop: {}", msg);
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(msg) = transfer.take_callback_error() {
            return Err(Error::Callback(msg));
        }
        match transfer.outcome() {
            Some(TransferOutcome::Failure { code, message }) if !transfer.has_failure_callback() => {
                Err(Error::Engine { code, message })
            }
            _ => Ok(()),
        }
    }

    /// Move every queued transfer into the group. Runs before driving and
    /// from the idle tick, so work submitted mid-drive is picked up.
    fn drain_queue(&self) {
        loop {
            let entry = self.shared.state.lock().unwrap().queue.pop_front();
            let (transfer, _done) = match entry {
                Some(e) => e,
                None => break,
            };
            if let Err(e) = self.shared.group.add(&transfer) {
                tracing::warn!("queued transfer could not be attached: {}", e);
                // Completing fires the chained observer, which flips the
                // submitter's done flag and releases its active slot.
                let _ = transfer.complete(TransferOutcome::Failure {
                    code: 0,
                    message: e.to_string(),
                });
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_driving(&self) -> bool {
        self.shared.state.lock().unwrap().driving
    }

    #[cfg(test)]
    pub(crate) fn batch_deadline_set(&self) -> bool {
        self.shared.state.lock().unwrap().batch_deadline.is_some()
    }
}

struct DrivingGuard<'a> {
    shared: &'a DriverShared,
}

impl Drop for DrivingGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock().unwrap();
        st.driving = false;
        // The batching window resets once no submission is queued or active.
        if st.active == 0 && st.queue.is_empty() {
            st.batch_deadline = None;
        }
    }
}

#[cfg(test)]
mod tests;

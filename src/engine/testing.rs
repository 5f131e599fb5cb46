//! Deterministic in-process engine for unit tests.
//!
//! Completes a scripted number of transfers per drive pass, oldest first,
//! and records instrumentation (peak registered transfers, concurrent drive
//! entries) used by the invariant tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Completions, TransferEngine};
use crate::error::Result;
use crate::transfer::{Transfer, TransferId, TransferOutcome};

#[derive(Default)]
pub(crate) struct StubStats {
    /// Highest number of simultaneously registered transfers.
    pub(crate) peak_active: AtomicUsize,
    /// Total transfers ever registered.
    pub(crate) adds: AtomicUsize,
    /// Total drive passes.
    pub(crate) drives: AtomicUsize,
    concurrent: AtomicUsize,
    /// Highest number of overlapping drive() entries observed. Must stay 1
    /// when a single group or driver owns the engine.
    pub(crate) max_concurrent_drives: AtomicUsize,
}

type OutcomeFn = Box<dyn FnMut(&Transfer) -> TransferOutcome + Send>;
type BodyFn = Box<dyn FnMut(&Transfer) -> Vec<u8> + Send>;

pub(crate) struct StubEngine {
    active: VecDeque<Transfer>,
    /// Completions per pass, cycled. `[0, 2]` means every other pass is idle.
    script: Vec<usize>,
    pass: usize,
    outcome_for: OutcomeFn,
    body_for: Option<BodyFn>,
    drive_delay: Option<Duration>,
    stats: Arc<StubStats>,
}

impl StubEngine {
    pub(crate) fn new() -> Self {
        Self::with_script(vec![1])
    }

    pub(crate) fn with_script(script: Vec<usize>) -> Self {
        assert!(!script.is_empty(), "script must name at least one pass");
        Self {
            active: VecDeque::new(),
            script,
            pass: 0,
            outcome_for: Box::new(|_| TransferOutcome::Success { response_code: 200 }),
            body_for: None,
            drive_delay: None,
            stats: Arc::new(StubStats::default()),
        }
    }

    /// Outcome to report for each completing transfer.
    pub(crate) fn outcomes<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Transfer) -> TransferOutcome + Send + 'static,
    {
        self.outcome_for = Box::new(f);
        self
    }

    /// Body bytes fed to the transfer's body slot just before completion.
    pub(crate) fn bodies<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Transfer) -> Vec<u8> + Send + 'static,
    {
        self.body_for = Some(Box::new(f));
        self
    }

    /// Hold each drive pass open for `delay` so overlapping drivers would
    /// be observable in `max_concurrent_drives`.
    pub(crate) fn drive_delay(mut self, delay: Duration) -> Self {
        self.drive_delay = Some(delay);
        self
    }

    pub(crate) fn stats(&self) -> Arc<StubStats> {
        Arc::clone(&self.stats)
    }
}

impl TransferEngine for StubEngine {
    fn add(&mut self, transfer: &Transfer) -> Result<()> {
        self.active.push_back(transfer.clone());
        self.stats.adds.fetch_add(1, Ordering::SeqCst);
        let now = self.active.len();
        self.stats.peak_active.fetch_max(now, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&mut self, id: TransferId) {
        self.active.retain(|t| t.id() != id);
    }

    fn drive(&mut self) -> Result<Completions> {
        let entered = self.stats.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_concurrent_drives.fetch_max(entered, Ordering::SeqCst);
        self.stats.drives.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.drive_delay {
            std::thread::sleep(delay);
        }

        let quota = self.script[self.pass % self.script.len()];
        self.pass += 1;

        let mut completions = Vec::new();
        for _ in 0..quota {
            let transfer = match self.active.pop_front() {
                Some(t) => t,
                None => break,
            };
            if let Some(body_for) = self.body_for.as_mut() {
                let body = body_for(&transfer);
                let callbacks = transfer.callbacks_handle();
                let mut cbs = callbacks.lock().unwrap();
                if let Some(on_body) = cbs.on_body.as_mut() {
                    on_body(&body);
                }
            }
            let outcome = (self.outcome_for)(&transfer);
            completions.push((transfer.id(), outcome));
        }

        self.stats.concurrent.fetch_sub(1, Ordering::SeqCst);
        Ok(completions)
    }
}

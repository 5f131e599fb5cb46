//! Transfer group: a set of concurrently active transfers backed by one
//! engine instance.
//!
//! The group enforces unique membership (a transfer is attached to at most
//! one group at a time) and drives the engine one iteration per loop turn.
//! The concurrency bound stored here is advisory; admission under the bound
//! is the dispatcher's job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::MuxConfig;
use crate::engine::curl::CurlEngine;
use crate::engine::TransferEngine;
use crate::error::{Error, Result};
use crate::transfer::{Transfer, TransferId};

pub(crate) struct GroupShared {
    engine: Mutex<Box<dyn TransferEngine>>,
    members: Mutex<HashMap<TransferId, Transfer>>,
    /// Maximum concurrent transfers for dispatchers feeding this group.
    /// 0 means unbounded.
    max_connects: AtomicUsize,
}

impl Drop for GroupShared {
    fn drop(&mut self) {
        // Closing a group forcibly detaches whatever is still attached.
        for (_, transfer) in self.members.lock().unwrap().drain() {
            transfer.release_attach();
        }
    }
}

/// Bounded set of concurrently driven transfers sharing one engine.
/// Cloning yields another handle to the same group.
#[derive(Clone)]
pub struct TransferGroup {
    shared: Arc<GroupShared>,
}

impl TransferGroup {
    /// Group backed by the curl multi engine, with no concurrency bound set.
    pub fn new() -> Result<Self> {
        Ok(Self::with_engine(Box::new(CurlEngine::new()?)))
    }

    /// Group over an explicit engine implementation.
    pub fn with_engine(engine: Box<dyn TransferEngine>) -> Self {
        Self {
            shared: Arc::new(GroupShared {
                engine: Mutex::new(engine),
                members: Mutex::new(HashMap::new()),
                max_connects: AtomicUsize::new(0),
            }),
        }
    }

    /// Curl-backed group configured from `MuxConfig` (concurrency bound and
    /// pipelining preference).
    pub fn from_config(cfg: &MuxConfig) -> Result<Self> {
        let group = Self::new()?;
        group.set_max_connects(cfg.max_connects);
        group.set_pipelining(cfg.pipelining);
        Ok(group)
    }

    /// Attach a transfer. Fails with `AlreadyAttached` when the transfer
    /// already belongs to any group, including this one.
    pub fn add(&self, transfer: &Transfer) -> Result<()> {
        transfer.claim_attach(&self.shared)?;
        if let Err(e) = self.shared.engine.lock().unwrap().add(transfer) {
            transfer.release_attach();
            return Err(e);
        }
        self.shared
            .members
            .lock()
            .unwrap()
            .insert(transfer.id(), transfer.clone());
        Ok(())
    }

    /// Detach a transfer without waiting for completion; its callbacks do
    /// not fire. Fails with `NotAttached` when it is not a member here.
    pub fn remove(&self, transfer: &Transfer) -> Result<()> {
        if !transfer.attached_to(&self.shared) {
            return Err(Error::NotAttached);
        }
        self.shared.engine.lock().unwrap().remove(transfer.id());
        self.shared.members.lock().unwrap().remove(&transfer.id());
        transfer.release_attach();
        Ok(())
    }

    /// Detach every attached transfer immediately, silently. Idempotent.
    pub fn cancel_all(&self) {
        let drained: Vec<Transfer> = {
            let mut members = self.shared.members.lock().unwrap();
            members.drain().map(|(_, t)| t).collect()
        };
        let mut engine = self.shared.engine.lock().unwrap();
        for transfer in drained {
            engine.remove(transfer.id());
            transfer.release_attach();
        }
    }

    /// True iff no transfers are attached.
    pub fn is_idle(&self) -> bool {
        self.shared.members.lock().unwrap().is_empty()
    }

    pub fn attached_count(&self) -> usize {
        self.shared.members.lock().unwrap().len()
    }

    pub fn max_connects(&self) -> usize {
        self.shared.max_connects.load(Ordering::Relaxed)
    }

    pub fn set_max_connects(&self, n: usize) {
        self.shared.max_connects.store(n, Ordering::Relaxed);
    }

    /// Forward the advisory pipelining preference to the engine.
    pub fn set_pipelining(&self, enabled: bool) {
        self.shared.engine.lock().unwrap().set_pipelining(enabled);
    }

    /// Drive the engine one iteration at a time until no transfers remain
    /// attached.
    ///
    /// Completion callbacks fire in engine-reported order, from this
    /// context. After any iteration that produced zero completions,
    /// `on_idle_tick` runs and may attach more transfers (this is how the
    /// dispatcher refills freed capacity). A panic inside a completion
    /// callback surfaces as `Error::Callback` only after the iteration's
    /// bookkeeping has committed, so the group is left consistent.
    pub fn run_until_idle<F>(&self, mut on_idle_tick: F) -> Result<()>
    where
        F: FnMut(&TransferGroup),
    {
        loop {
            if self.is_idle() {
                return Ok(());
            }
            let completions = self.shared.engine.lock().unwrap().drive()?;
            if completions.is_empty() {
                on_idle_tick(self);
                continue;
            }
            let mut first_panic: Option<String> = None;
            for (id, outcome) in completions {
                let transfer = match self.shared.members.lock().unwrap().remove(&id) {
                    // Removed mid-drive (cancelled); nothing to complete.
                    None => continue,
                    Some(t) => t,
                };
                if let Some(msg) = transfer.complete(outcome) {
                    first_panic.get_or_insert(msg);
                }
            }
            if let Some(msg) = first_panic {
                return Err(Error::Callback(msg));
            }
        }
    }
}

impl std::fmt::Debug for TransferGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferGroup")
            .field("attached", &self.attached_count())
            .field("max_connects", &self.max_connects())
            .finish()
    }
}

//! Transfer entity: one logical request/response exchange.
//!
//! A `Transfer` owns its request configuration, callback slots, and last
//! outcome. It is a cheap cloneable handle; caller code, a group's
//! membership set, and a scheduler driver's queue may all hold the same
//! logical transfer. A transfer is attached to at most one group at any
//! instant and is detached automatically when it completes.

pub mod callbacks;
pub mod request;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::group::{GroupShared, TransferGroup};
use callbacks::{
    BodyCallback, CallbackSet, HeaderCallback, OutcomeCallback, ProgressCallback,
};
use request::{Method, RequestSpec};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one transfer, stable across group attachments and reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(u64);

/// Final outcome of a transfer as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Success { response_code: u32 },
    Failure { code: u32, message: String },
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success { .. })
    }

    /// HTTP response code for successful exchanges.
    pub fn response_code(&self) -> Option<u32> {
        match self {
            TransferOutcome::Success { response_code } => Some(*response_code),
            TransferOutcome::Failure { .. } => None,
        }
    }
}

struct TransferInner {
    id: TransferId,
    request: Mutex<RequestSpec>,
    callbacks: Arc<Mutex<CallbackSet>>,
    /// Weak back-reference to the group currently holding this transfer.
    attachment: Mutex<Option<Weak<GroupShared>>>,
    /// Group assigned with `set_group`, reused by `run`.
    group_slot: Mutex<Option<TransferGroup>>,
    outcome: Mutex<Option<TransferOutcome>>,
    callback_error: Mutex<Option<String>>,
}

/// One logical request/response exchange. Created detached; see module docs.
#[derive(Clone)]
pub struct Transfer {
    inner: Arc<TransferInner>,
}

impl Default for Transfer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transfer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransferInner {
                id: TransferId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
                request: Mutex::new(RequestSpec::default()),
                callbacks: Arc::new(Mutex::new(CallbackSet::default())),
                attachment: Mutex::new(None),
                group_slot: Mutex::new(None),
                outcome: Mutex::new(None),
                callback_error: Mutex::new(None),
            }),
        }
    }

    pub fn with_url(url: &str) -> Self {
        let t = Self::new();
        t.set_url(url);
        t
    }

    pub fn id(&self) -> TransferId {
        self.inner.id
    }

    /// Replace the whole request configuration. No I/O occurs until the
    /// transfer is attached to a group and driven.
    pub fn configure(&self, spec: RequestSpec) {
        *self.inner.request.lock().unwrap() = spec;
    }

    pub fn url(&self) -> String {
        self.inner.request.lock().unwrap().url.clone()
    }

    pub fn set_url(&self, url: &str) {
        self.inner.request.lock().unwrap().url = url.to_string();
    }

    pub fn set_method(&self, method: Method) {
        self.inner.request.lock().unwrap().method = method;
    }

    pub fn set_body(&self, body: Vec<u8>) {
        self.inner.request.lock().unwrap().body = Some(body);
    }

    pub fn add_header(&self, name: &str, value: &str) {
        self.inner
            .request
            .lock()
            .unwrap()
            .headers
            .push((name.to_string(), value.to_string()));
    }

    /// Total-transfer timeout hint, passed through to the engine unmodified.
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.request.lock().unwrap().timeout = Some(timeout);
    }

    pub(crate) fn request_snapshot(&self) -> RequestSpec {
        self.inner.request.lock().unwrap().clone()
    }

    pub(crate) fn callbacks_handle(&self) -> Arc<Mutex<CallbackSet>> {
        Arc::clone(&self.inner.callbacks)
    }

    // Callback slot setters. Each returns the previously registered
    // callback so callers can chain to it.

    pub fn on_body<F>(&self, f: F) -> Option<BodyCallback>
    where
        F: FnMut(&[u8]) -> usize + Send + 'static,
    {
        self.inner
            .callbacks
            .lock()
            .unwrap()
            .on_body
            .replace(Box::new(f))
    }

    pub fn on_header<F>(&self, f: F) -> Option<HeaderCallback>
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.inner
            .callbacks
            .lock()
            .unwrap()
            .on_header
            .replace(Box::new(f))
    }

    pub fn on_progress<F>(&self, f: F) -> Option<ProgressCallback>
    where
        F: FnMut(f64, f64, f64, f64) -> bool + Send + 'static,
    {
        self.inner
            .callbacks
            .lock()
            .unwrap()
            .on_progress
            .replace(Box::new(f))
    }

    /// Fired at completion when the outcome is a success with a non-3xx code.
    pub fn on_success<F>(&self, f: F) -> Option<OutcomeCallback>
    where
        F: Fn(&Transfer) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .lock()
            .unwrap()
            .on_success
            .replace(Arc::new(f))
    }

    /// Fired at completion when the engine reports a failure outcome.
    /// Registering this suppresses the `run`/`perform` error for that case.
    pub fn on_failure<F>(&self, f: F) -> Option<OutcomeCallback>
    where
        F: Fn(&Transfer) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .lock()
            .unwrap()
            .on_failure
            .replace(Arc::new(f))
    }

    /// Fired at completion when the final response code is 3xx.
    pub fn on_redirect<F>(&self, f: F) -> Option<OutcomeCallback>
    where
        F: Fn(&Transfer) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .lock()
            .unwrap()
            .on_redirect
            .replace(Arc::new(f))
    }

    /// Append a completion observer. Observers are invoked in registration
    /// order after the outcome slots, each independently panic-isolated.
    /// Returns the observer that was previously last in the list.
    pub fn on_complete<F>(&self, f: F) -> Option<OutcomeCallback>
    where
        F: Fn(&Transfer) + Send + Sync + 'static,
    {
        let mut cbs = self.inner.callbacks.lock().unwrap();
        let prev = cbs.observers.last().cloned();
        cbs.observers.push(Arc::new(f));
        prev
    }

    pub fn has_failure_callback(&self) -> bool {
        self.inner.callbacks.lock().unwrap().on_failure.is_some()
    }

    /// Last outcome, set when the transfer completed under a group.
    pub fn outcome(&self) -> Option<TransferOutcome> {
        self.inner.outcome.lock().unwrap().clone()
    }

    /// Message of the last callback panic recorded for this transfer, if any.
    pub fn callback_error(&self) -> Option<String> {
        self.inner.callback_error.lock().unwrap().clone()
    }

    pub(crate) fn take_callback_error(&self) -> Option<String> {
        self.inner.callback_error.lock().unwrap().take()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attachment.lock().unwrap().is_some()
    }

    /// Assign the group `run` will reuse instead of creating a private one.
    pub fn set_group(&self, group: TransferGroup) {
        *self.inner.group_slot.lock().unwrap() = Some(group);
    }

    pub fn group(&self) -> Option<TransferGroup> {
        self.inner.group_slot.lock().unwrap().clone()
    }

    /// Clear request configuration, callbacks, and recorded results so the
    /// handle can be reused for an unrelated exchange. Fails while attached.
    pub fn reset(&self) -> Result<()> {
        if self.is_attached() {
            return Err(Error::AlreadyAttached);
        }
        *self.inner.request.lock().unwrap() = RequestSpec::default();
        self.inner.callbacks.lock().unwrap().clear();
        *self.inner.outcome.lock().unwrap() = None;
        *self.inner.callback_error.lock().unwrap() = None;
        Ok(())
    }

    /// Drive this transfer to completion on its assigned group, or on a
    /// private curl-backed group created for the call.
    ///
    /// Callbacks fire synchronously from this context. When the engine
    /// reports a failure outcome and no failure callback is registered, the
    /// failure is returned as `Error::Engine`; with a failure callback
    /// registered the callback alone observes it. A callback panic is
    /// surfaced as `Error::Callback` after bookkeeping has committed.
    pub fn run(&self) -> Result<()> {
        let group = match self.group() {
            Some(g) => g,
            None => {
                let g = TransferGroup::new()?;
                self.set_group(g.clone());
                g
            }
        };
        group.add(self)?;
        if let Err(e) = group.run_until_idle(|_| {}) {
            if self.is_attached() {
                let _ = group.remove(self);
            }
            return Err(e);
        }
        if let Some(msg) = self.take_callback_error() {
            return Err(Error::Callback(msg));
        }
        match self.outcome() {
            Some(TransferOutcome::Failure { code, message }) if !self.has_failure_callback() => {
                Err(Error::Engine { code, message })
            }
            _ => Ok(()),
        }
    }

    // Membership bookkeeping, called by the group under its own locking
    // discipline.

    /// Atomically claim this transfer for `group`; the transfer must be
    /// detached. On failure nothing changes.
    pub(crate) fn claim_attach(&self, group: &Arc<GroupShared>) -> Result<()> {
        let mut att = self.inner.attachment.lock().unwrap();
        if att.is_some() {
            return Err(Error::AlreadyAttached);
        }
        *att = Some(Arc::downgrade(group));
        Ok(())
    }

    pub(crate) fn attached_to(&self, group: &Arc<GroupShared>) -> bool {
        match &*self.inner.attachment.lock().unwrap() {
            Some(w) => Weak::as_ptr(w) == Arc::as_ptr(group),
            None => false,
        }
    }

    pub(crate) fn release_attach(&self) {
        *self.inner.attachment.lock().unwrap() = None;
    }

    /// Commit a completion: record the outcome, detach, then fire the
    /// matching outcome slot and the completion observers in order. Panics
    /// from user callbacks are caught here and recorded on the transfer so
    /// group and dispatcher bookkeeping can never be left inconsistent.
    /// Returns the first panic message from this invocation, if any.
    pub(crate) fn complete(&self, outcome: TransferOutcome) -> Option<String> {
        let (slot, observers) = {
            let cbs = self.inner.callbacks.lock().unwrap();
            let slot = match &outcome {
                TransferOutcome::Success { response_code }
                    if (300..400).contains(response_code) =>
                {
                    cbs.on_redirect.clone()
                }
                TransferOutcome::Success { .. } => cbs.on_success.clone(),
                TransferOutcome::Failure { .. } => cbs.on_failure.clone(),
            };
            (slot, cbs.observers.clone())
        };
        *self.inner.outcome.lock().unwrap() = Some(outcome);
        self.release_attach();
        let mut first_panic = None;
        if let Some(cb) = slot {
            if let Some(msg) = self.invoke_isolated(&cb) {
                first_panic.get_or_insert(msg);
            }
        }
        for observer in &observers {
            if let Some(msg) = self.invoke_isolated(observer) {
                first_panic.get_or_insert(msg);
            }
        }
        first_panic
    }

    fn invoke_isolated(&self, cb: &OutcomeCallback) -> Option<String> {
        match catch_unwind(AssertUnwindSafe(|| cb(self))) {
            Ok(()) => None,
            Err(payload) => {
                let msg = panic_message(payload);
                tracing::warn!(transfer = self.inner.id.0, "completion callback panicked: {}", msg);
                *self.inner.callback_error.lock().unwrap() = Some(msg.clone());
                Some(msg)
            }
        }
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.inner.id)
            .field("url", &self.inner.request.lock().unwrap().url)
            .field("attached", &self.is_attached())
            .finish()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

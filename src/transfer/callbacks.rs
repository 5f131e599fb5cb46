//! Named callback slots for a transfer.
//!
//! Data-path slots (body/header/progress) are invoked by the engine while a
//! transfer is in flight; outcome slots (success/failure/redirect) and the
//! ordered completion observers are invoked by the group at completion.

use std::sync::Arc;

use super::Transfer;

/// Receives a body chunk; returns the number of bytes consumed. Returning a
/// count different from the chunk length aborts the transfer.
pub type BodyCallback = Box<dyn FnMut(&[u8]) -> usize + Send>;

/// Receives one raw header line; returning false aborts the transfer.
pub type HeaderCallback = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Receives (dl_total, dl_now, ul_total, ul_now); returning false aborts.
pub type ProgressCallback = Box<dyn FnMut(f64, f64, f64, f64) -> bool + Send>;

/// Outcome-slot callback and completion observer. Shared so the same
/// observer can be re-fired when a transfer is reused.
pub type OutcomeCallback = Arc<dyn Fn(&Transfer) + Send + Sync>;

/// The mutable set of callback slots owned by one transfer.
///
/// Single slots hold at most one callback and setters return the previous
/// one; completion observers form an ordered list invoked in registration
/// order, each independently panic-isolated.
#[derive(Default)]
pub struct CallbackSet {
    pub(crate) on_body: Option<BodyCallback>,
    pub(crate) on_header: Option<HeaderCallback>,
    pub(crate) on_progress: Option<ProgressCallback>,
    pub(crate) on_success: Option<OutcomeCallback>,
    pub(crate) on_failure: Option<OutcomeCallback>,
    pub(crate) on_redirect: Option<OutcomeCallback>,
    pub(crate) observers: Vec<OutcomeCallback>,
}

impl CallbackSet {
    pub(crate) fn clear(&mut self) {
        *self = CallbackSet::default();
    }
}

impl std::fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet")
            .field("on_body", &self.on_body.is_some())
            .field("on_header", &self.on_header.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("on_redirect", &self.on_redirect.is_some())
            .field("observers", &self.observers.len())
            .finish()
    }
}

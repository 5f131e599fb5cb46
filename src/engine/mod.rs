//! Transfer engine seam.
//!
//! The engine is the external, non-reentrant collaborator that performs the
//! actual byte-level exchange for registered transfers. The scheduling core
//! only ever adds, removes, and drives it one iteration at a time; exactly
//! one thread drives a given engine at any instant.

pub mod curl;
#[cfg(test)]
pub(crate) mod testing;

use crate::error::Result;
use crate::transfer::{Transfer, TransferId, TransferOutcome};

/// Transfers that finished during one drive iteration, in engine-reported
/// completion order. Completion callbacks fire in this order.
pub type Completions = Vec<(TransferId, TransferOutcome)>;

/// Contract consumed from the transfer engine.
pub trait TransferEngine: Send {
    /// Register a transfer. The engine snapshots the request configuration
    /// and keeps a handle to the transfer's callback set for data delivery.
    fn add(&mut self, transfer: &Transfer) -> Result<()>;

    /// Unregister a transfer without completing it; no callbacks fire.
    /// Unknown ids are ignored so cancellation stays idempotent.
    fn remove(&mut self, id: TransferId);

    /// Perform one iteration and report the transfers that finished during
    /// it. An iteration with nothing to do returns an empty list.
    fn drive(&mut self) -> Result<Completions>;

    /// Advisory pipelining preference; engines may ignore it.
    fn set_pipelining(&mut self, _enabled: bool) {}
}

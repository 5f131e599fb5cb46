//! Crate error taxonomy: engine outcomes, membership violations, per-job
//! dispatch errors, and callback panics caught at chaining boundaries.

use std::fmt;

/// Error returned by the multiplexing core.
///
/// Membership violations are surfaced synchronously to the caller that
/// violated them; engine outcomes are surfaced from `run`/`perform` only
/// when no failure callback is registered on the transfer.
#[derive(Debug)]
pub enum Error {
    /// The transfer engine reported a non-success outcome for a transfer.
    Engine { code: u32, message: String },
    /// The transfer is already attached to a group (this one or another).
    AlreadyAttached,
    /// The transfer is not attached to the group it was removed from.
    NotAttached,
    /// A job descriptor could not be materialized into a transfer.
    Job(String),
    /// A user callback panicked; bookkeeping committed before this surfaced.
    Callback(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Engine { code, message } => write!(f, "engine error {}: {}", code, message),
            Error::AlreadyAttached => write!(f, "transfer is already attached to a group"),
            Error::NotAttached => write!(f, "transfer is not attached to this group"),
            Error::Job(msg) => write!(f, "job: {}", msg),
            Error::Callback(msg) => write!(f, "callback panicked: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

//! One-shot convenience verbs.
//!
//! Each call configures a transfer and drives it to completion with `run`.
//! A per-thread cached transfer is reused between calls to keep the
//! engine's connection cache warm; while a caller-supplied configure
//! closure is on the stack a fresh handle is used instead, so nested calls
//! never share the cached handle.

use std::cell::{Cell, RefCell};

use crate::error::{Error, Result};
use crate::transfer::request::{append_query, form_encode, Method};
use crate::transfer::Transfer;

thread_local! {
    static CACHED: RefCell<Option<Transfer>> = RefCell::new(None);
    static CONFIGURING: Cell<bool> = Cell::new(false);
}

/// Issue one request with the given verb, returning the completed transfer.
/// The configure closure runs after url/method/body are set and before any
/// I/O, so it can install callbacks or adjust the request.
pub fn http<F>(method: Method, url: &str, body: Option<Vec<u8>>, configure: F) -> Result<Transfer>
where
    F: FnOnce(&Transfer),
{
    let transfer = acquire_handle()?;
    transfer.set_url(url);
    transfer.set_method(method);
    if let Some(body) = body {
        transfer.set_body(body);
    }
    {
        let _guard = ConfigureGuard::enter();
        configure(&transfer);
    }
    transfer.run()?;
    Ok(transfer)
}

pub fn get<F>(url: &str, params: &[(&str, &str)], configure: F) -> Result<Transfer>
where
    F: FnOnce(&Transfer),
{
    http(Method::Get, &merge_query(url, params)?, None, configure)
}

pub fn head<F>(url: &str, params: &[(&str, &str)], configure: F) -> Result<Transfer>
where
    F: FnOnce(&Transfer),
{
    http(Method::Head, &merge_query(url, params)?, None, configure)
}

pub fn post<F>(url: &str, params: &[(&str, &str)], configure: F) -> Result<Transfer>
where
    F: FnOnce(&Transfer),
{
    http(Method::Post, url, Some(form_encode(params).into_bytes()), configure)
}

pub fn put<F>(url: &str, params: &[(&str, &str)], configure: F) -> Result<Transfer>
where
    F: FnOnce(&Transfer),
{
    http(Method::Put, url, Some(form_encode(params).into_bytes()), configure)
}

pub fn patch<F>(url: &str, params: &[(&str, &str)], configure: F) -> Result<Transfer>
where
    F: FnOnce(&Transfer),
{
    http(Method::Patch, url, Some(form_encode(params).into_bytes()), configure)
}

pub fn delete<F>(url: &str, configure: F) -> Result<Transfer>
where
    F: FnOnce(&Transfer),
{
    http(Method::Delete, url, None, configure)
}

/// Drop the calling thread's cached transfer so the next call starts from
/// a fresh handle.
pub fn reset_thread_handle() {
    CACHED.with(|slot| *slot.borrow_mut() = None);
}

fn merge_query(url: &str, params: &[(&str, &str)]) -> Result<String> {
    append_query(url, params).map_err(|e| Error::Job(format!("bad url {}: {}", url, e)))
}

fn acquire_handle() -> Result<Transfer> {
    if CONFIGURING.with(|c| c.get()) {
        return Ok(Transfer::new());
    }
    CACHED.with(|slot| {
        let mut slot = slot.borrow_mut();
        match &*slot {
            Some(t) => {
                t.reset()?;
                Ok(t.clone())
            }
            None => {
                let t = Transfer::new();
                *slot = Some(t.clone());
                Ok(t)
            }
        }
    })
}

struct ConfigureGuard;

impl ConfigureGuard {
    fn enter() -> Self {
        CONFIGURING.with(|c| c.set(true));
        ConfigureGuard
    }
}

impl Drop for ConfigureGuard {
    fn drop(&mut self) {
        CONFIGURING.with(|c| c.set(false));
    }
}

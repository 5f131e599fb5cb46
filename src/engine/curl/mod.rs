//! Curl-backed transfer engine: one `multi::Multi` driving Easy2 handles.
//!
//! Connection reuse, TLS, DNS, and timeouts live in libcurl; this adapter
//! maps the engine contract onto the perform/messages/wait loop.

mod sink;

use std::collections::HashMap;
use std::time::Duration;

use curl::easy::{Easy2, List};
use curl::multi::{Easy2Handle, Multi};

use super::{Completions, TransferEngine};
use crate::error::{Error, Result};
use crate::transfer::request::{Method, RequestSpec};
use crate::transfer::{Transfer, TransferId, TransferOutcome};
use sink::TransferSink;

/// Bounded wait when a pass completed nothing, so the drive loop does not
/// spin while libcurl has sockets in flight.
const IDLE_WAIT: Duration = Duration::from_millis(100);

pub struct CurlEngine {
    multi: Multi,
    active: HashMap<TransferId, Easy2Handle<TransferSink>>,
}

// The engine owns a `curl::multi::Multi` and its `Easy2` handles, which hold
// raw pointers and are therefore not auto-`Send`. The design guarantees exactly
// one thread drives a given engine at any instant (no shared access), so moving
// the engine between threads is sound. This satisfies the `TransferEngine: Send`
// contract the spec requires.
unsafe impl Send for CurlEngine {}

impl CurlEngine {
    pub fn new() -> Result<Self> {
        Ok(Self {
            multi: Multi::new(),
            active: HashMap::new(),
        })
    }
}

impl TransferEngine for CurlEngine {
    fn add(&mut self, transfer: &Transfer) -> Result<()> {
        let spec = transfer.request_snapshot();
        let upload = match spec.method {
            Method::Put => Some(spec.body.clone().unwrap_or_default()),
            _ => None,
        };
        let mut easy = Easy2::new(TransferSink::new(transfer.callbacks_handle(), upload));
        configure(&mut easy, &spec)?;
        let handle = self
            .multi
            .add2(easy)
            .map_err(|e| multi_err("add", &e))?;
        self.active.insert(transfer.id(), handle);
        Ok(())
    }

    fn remove(&mut self, id: TransferId) {
        if let Some(handle) = self.active.remove(&id) {
            let _ = self.multi.remove2(handle);
        }
    }

    fn drive(&mut self) -> Result<Completions> {
        let running = self
            .multi
            .perform()
            .map_err(|e| multi_err("perform", &e))?;

        let mut finished: Vec<(TransferId, Option<curl::Error>)> = Vec::new();
        {
            let active = &self.active;
            self.multi.messages(|msg| {
                for (id, handle) in active.iter() {
                    if let Some(res) = msg.result_for2(handle) {
                        finished.push((*id, res.err()));
                        break;
                    }
                }
            });
        }

        let mut completions = Vec::with_capacity(finished.len());
        for (id, err) in finished {
            let handle = match self.active.remove(&id) {
                Some(h) => h,
                None => continue,
            };
            let mut easy = self
                .multi
                .remove2(handle)
                .map_err(|e| multi_err("remove", &e))?;
            let outcome = match err {
                Some(e) => TransferOutcome::Failure {
                    code: e.code() as u32,
                    message: e.to_string(),
                },
                None => TransferOutcome::Success {
                    response_code: easy.response_code().unwrap_or(0),
                },
            };
            completions.push((id, outcome));
        }

        if completions.is_empty() && running > 0 {
            self.multi
                .wait(&mut [], IDLE_WAIT)
                .map_err(|e| multi_err("wait", &e))?;
        }
        Ok(completions)
    }

    fn set_pipelining(&mut self, enabled: bool) {
        if let Err(e) = self.multi.pipelining(false, enabled) {
            tracing::debug!("curl multi pipelining: {}", e);
        }
    }
}

fn configure(easy: &mut Easy2<TransferSink>, spec: &RequestSpec) -> Result<()> {
    easy.url(&spec.url).map_err(|e| easy_err("url", &e))?;
    easy.follow_location(spec.follow_location)
        .map_err(|e| easy_err("followlocation", &e))?;
    easy.max_redirections(spec.max_redirects)
        .map_err(|e| easy_err("maxredirs", &e))?;
    if let Some(t) = spec.timeout {
        easy.timeout(t).map_err(|e| easy_err("timeout", &e))?;
    }
    if let Some(t) = spec.connect_timeout {
        easy.connect_timeout(t)
            .map_err(|e| easy_err("connecttimeout", &e))?;
    }
    match spec.method {
        Method::Get => {
            easy.get(true).map_err(|e| easy_err("httpget", &e))?;
        }
        Method::Post => {
            easy.post(true).map_err(|e| easy_err("post", &e))?;
            easy.post_fields_copy(spec.body.as_deref().unwrap_or(&[]))
                .map_err(|e| easy_err("postfields", &e))?;
        }
        Method::Put => {
            easy.upload(true).map_err(|e| easy_err("upload", &e))?;
            if let Some(body) = &spec.body {
                easy.in_filesize(body.len() as u64)
                    .map_err(|e| easy_err("infilesize", &e))?;
            }
        }
        Method::Head => {
            easy.nobody(true).map_err(|e| easy_err("nobody", &e))?;
        }
        Method::Delete => {
            easy.custom_request("DELETE")
                .map_err(|e| easy_err("customrequest", &e))?;
        }
        Method::Patch => {
            easy.custom_request("PATCH")
                .map_err(|e| easy_err("customrequest", &e))?;
            easy.post_fields_copy(spec.body.as_deref().unwrap_or(&[]))
                .map_err(|e| easy_err("postfields", &e))?;
        }
        Method::Options => {
            easy.custom_request("OPTIONS")
                .map_err(|e| easy_err("customrequest", &e))?;
        }
    }
    if !spec.headers.is_empty() {
        let mut list = List::new();
        for (k, v) in &spec.headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))
                .map_err(|e| easy_err("header", &e))?;
        }
        easy.http_headers(list)
            .map_err(|e| easy_err("httpheader", &e))?;
    }
    // curl suppresses progress callbacks unless explicitly enabled
    easy.progress(true).map_err(|e| easy_err("noprogress", &e))?;
    Ok(())
}

fn multi_err(op: &str, e: &curl::MultiError) -> Error {
    Error::Engine {
        code: e.code() as u32,
        message: format!("curl multi {}: {}", op, e),
    }
}

fn easy_err(op: &str, e: &curl::Error) -> Error {
    Error::Engine {
        code: e.code() as u32,
        message: format!("curl {}: {}", op, e),
    }
}

//! Easy2 handler bridging curl's data callbacks to a transfer's slots.

use std::sync::{Arc, Mutex};

use crate::transfer::callbacks::CallbackSet;

/// Body bytes served to curl's read callback for upload verbs.
pub(super) struct UploadBody {
    data: Vec<u8>,
    pos: usize,
}

/// Handler state for one in-flight transfer. Delegates each curl data
/// callback to the matching slot on the transfer, with the same defaults
/// curl itself would apply when a slot is empty.
pub(super) struct TransferSink {
    callbacks: Arc<Mutex<CallbackSet>>,
    upload: Option<UploadBody>,
}

impl TransferSink {
    pub(super) fn new(callbacks: Arc<Mutex<CallbackSet>>, upload: Option<Vec<u8>>) -> Self {
        Self {
            callbacks,
            upload: upload.map(|data| UploadBody { data, pos: 0 }),
        }
    }
}

impl curl::easy::Handler for TransferSink {
    fn write(&mut self, data: &[u8]) -> Result<usize, curl::easy::WriteError> {
        let mut cbs = self.callbacks.lock().unwrap();
        match cbs.on_body.as_mut() {
            Some(f) => Ok(f(data)),
            None => Ok(data.len()),
        }
    }

    fn header(&mut self, data: &[u8]) -> bool {
        let mut cbs = self.callbacks.lock().unwrap();
        match cbs.on_header.as_mut() {
            Some(f) => f(data),
            None => true,
        }
    }

    fn progress(&mut self, dltotal: f64, dlnow: f64, ultotal: f64, ulnow: f64) -> bool {
        let mut cbs = self.callbacks.lock().unwrap();
        match cbs.on_progress.as_mut() {
            Some(f) => f(dltotal, dlnow, ultotal, ulnow),
            None => true,
        }
    }

    fn read(&mut self, into: &mut [u8]) -> Result<usize, curl::easy::ReadError> {
        match self.upload.as_mut() {
            Some(body) => {
                let n = into.len().min(body.data.len() - body.pos);
                into[..n].copy_from_slice(&body.data[body.pos..body.pos + n]);
                body.pos += n;
                Ok(n)
            }
            None => Ok(0),
        }
    }
}

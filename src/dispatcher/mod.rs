//! Bounded job dispatcher.
//!
//! Executes an ordered list of job descriptors against one group under a
//! strict concurrency ceiling, recycling completed transfers through a free
//! list so a large batch reuses a small set of handles. Capacity is only
//! ever freed by a completion, so refilling from the free list can never
//! exceed the ceiling.

pub mod job;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::MuxConfig;
use crate::error::{Error, Result};
use crate::group::TransferGroup;
use crate::transfer::callbacks::OutcomeCallback;
use crate::transfer::{Transfer, TransferOutcome};

pub use job::{jobs_from_json, jobs_from_json_file, Job, JobSpec};

/// Execute `jobs` on a private curl-backed group bounded to `max_connects`
/// concurrent transfers (0 = unbounded), calling `on_each_complete` for
/// every finished transfer.
pub fn execute<F>(jobs: Vec<Job>, max_connects: usize, on_each_complete: F) -> Result<()>
where
    F: Fn(&Transfer) + Send + Sync + 'static,
{
    let group = TransferGroup::new()?;
    group.set_max_connects(max_connects);
    execute_on(&group, jobs, on_each_complete)
}

/// Execute `jobs` on an existing group, calling `on_each_complete` for
/// every finished transfer (engine completion order, not submission order).
///
/// The ceiling is the group's `max_connects`; 0 admits the whole list at
/// once. Jobs are admitted FIFO. A malformed job completes immediately with
/// a failure outcome through its transfer's own callbacks and never aborts
/// the rest of the batch; only engine-level errors are batch-fatal.
pub fn execute_on<F>(group: &TransferGroup, jobs: Vec<Job>, on_each_complete: F) -> Result<()>
where
    F: Fn(&Transfer) + Send + Sync + 'static,
{
    let ceiling = group.max_connects();
    let mut pending: VecDeque<Job> = jobs.into();
    let free: Arc<Mutex<Vec<Transfer>>> = Arc::new(Mutex::new(Vec::new()));
    let on_each: OutcomeCallback = Arc::new(on_each_complete);

    // Prime: materialize up to the ceiling from the front of the list.
    let prime = if ceiling == 0 {
        pending.len()
    } else {
        ceiling.min(pending.len())
    };
    for _ in 0..prime {
        if let Some(job) = pending.pop_front() {
            admit(group, job, None, &free, &on_each);
        }
    }

    while !pending.is_empty() || !group.is_idle() {
        let drive = group.run_until_idle(|g| {
            while let Some(job) = pending.pop_front() {
                match free.lock().unwrap().pop() {
                    Some(transfer) => admit(g, job, Some(transfer), &free, &on_each),
                    None => {
                        pending.push_front(job);
                        break;
                    }
                }
            }
        });
        match drive {
            Ok(()) => {}
            // One failing callback must not strand the remaining jobs.
            Err(Error::Callback(msg)) => {
                tracing::warn!("completion callback panicked mid-batch: {}", msg);
            }
            Err(e) => return Err(e),
        }
        // Consume handles freed by the final completions of that pass.
        while let Some(job) = pending.pop_front() {
            match free.lock().unwrap().pop() {
                Some(transfer) => admit(group, job, Some(transfer), &free, &on_each),
                None => {
                    pending.push_front(job);
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Homogeneous GET batch over a URL list, bounded to the configured
/// default number of connections.
pub fn get<F>(urls: &[&str], on_each_complete: F) -> Result<()>
where
    F: Fn(&Transfer) + Send + Sync + 'static,
{
    let jobs = urls.iter().map(|u| Job::get(u)).collect();
    execute(jobs, MuxConfig::default().max_connects, on_each_complete)
}

/// Materialize one job (reusing a freed transfer when given) and attach it.
/// Dispatch failures complete the transfer with a failure outcome so the
/// job is still reported through its own callbacks and the handle recycled.
fn admit(
    group: &TransferGroup,
    job: Job,
    reuse: Option<Transfer>,
    free: &Arc<Mutex<Vec<Transfer>>>,
    on_each: &OutcomeCallback,
) {
    let transfer = match reuse {
        Some(t) => {
            let _ = t.reset();
            t
        }
        None => Transfer::new(),
    };
    let valid = job.validate();
    let Job { spec, configure } = job;
    transfer.configure(spec);
    if let Some(hook) = configure {
        hook(&transfer);
    }

    let free = Arc::clone(free);
    let user = Arc::clone(on_each);
    transfer.on_complete(move |t: &Transfer| {
        free.lock().unwrap().push(t.clone());
        user(t);
    });

    let admitted = valid.and_then(|()| group.add(&transfer));
    if let Err(e) = admitted {
        tracing::warn!("job for {} failed to dispatch: {}", transfer.url(), e);
        let _ = transfer.complete(TransferOutcome::Failure {
            code: 0,
            message: e.to_string(),
        });
    }
}

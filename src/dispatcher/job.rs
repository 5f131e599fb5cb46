//! Declarative job descriptors consumed by the dispatcher.
//!
//! A `Job` is immutable once admitted and materialized into a transfer
//! exactly once. `JobSpec` is the serde form, so recorded request batches
//! can be loaded from JSON.

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::transfer::request::{Method, RequestSpec};
use crate::transfer::Transfer;

/// Per-job configure hook, run after the transfer is configured and before
/// attachment; jobs use it to install their own callback overrides.
pub type ConfigureFn = Box<dyn Fn(&Transfer) + Send>;

/// One unit of work for the dispatcher.
pub struct Job {
    pub spec: RequestSpec,
    pub configure: Option<ConfigureFn>,
}

impl Job {
    pub fn new(spec: RequestSpec) -> Self {
        Self {
            spec,
            configure: None,
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new(RequestSpec::get(url))
    }

    /// Attach a configure hook invoked on the materialized transfer.
    pub fn with_configure<F>(mut self, f: F) -> Self
    where
        F: Fn(&Transfer) + Send + 'static,
    {
        self.configure = Some(Box::new(f));
        self
    }

    /// Check the descriptor before attachment. Body-bearing verbs must have
    /// their payload fully bound; the URL must parse.
    pub(super) fn validate(&self) -> Result<()> {
        if self.spec.method.has_body() && self.spec.body.is_none() {
            return Err(Error::Job(format!(
                "{} job for {} has no body bound",
                self.spec.method.as_str(),
                self.spec.url
            )));
        }
        url::Url::parse(&self.spec.url)
            .map_err(|e| Error::Job(format!("bad url {}: {}", self.spec.url, e)))?;
        Ok(())
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("url", &self.spec.url)
            .field("method", &self.spec.method)
            .field("configure", &self.configure.is_some())
            .finish()
    }
}

/// Serde form of one job record.
#[derive(Debug, Deserialize)]
pub struct JobSpec {
    pub url: String,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub headers: Vec<JobHeader>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct JobHeader {
    pub name: String,
    pub value: String,
}

impl From<JobSpec> for Job {
    fn from(spec: JobSpec) -> Self {
        Job::new(RequestSpec {
            url: spec.url,
            method: spec.method,
            headers: spec
                .headers
                .into_iter()
                .map(|h| (h.name, h.value))
                .collect(),
            body: spec.body.map(String::into_bytes),
            timeout: spec.timeout_secs.map(Duration::from_secs),
            ..RequestSpec::default()
        })
    }
}

/// Parse a JSON array of job records.
pub fn jobs_from_json(data: &str) -> anyhow::Result<Vec<Job>> {
    let specs: Vec<JobSpec> = serde_json::from_str(data).context("parsing job list")?;
    Ok(specs.into_iter().map(Job::from).collect())
}

/// Load a JSON job list from disk.
pub fn jobs_from_json_file(path: &std::path::Path) -> anyhow::Result<Vec<Job>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading job list {}", path.display()))?;
    jobs_from_json(&data)
}

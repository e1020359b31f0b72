//! Outstanding-job registry and inbound routing.
//!
//! Jobs with an identifier are keyed by it; identifier-less (global) jobs
//! get a synthesized key and are additionally tracked in a FIFO bucket. An
//! inbound message is matched by identifier first, then handed to the oldest
//! live global job whose request command can legally receive it.

use crate::error::ClientError;
use crate::job::{AppendOutcome, JobTicket};
use fcp_protocol::ServerMessage;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Result of routing one inbound message.
pub(crate) enum RouteOutcome {
    /// Appended to a live job.
    Delivered { terminal: bool },
    /// A job matched but had already settled; the message was dropped.
    Stale { key: String },
    /// No job can receive this message; handed back to the caller.
    Unroutable(ServerMessage),
}

#[derive(Debug)]
pub(crate) struct JobRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    jobs: HashMap<String, Arc<JobTicket>>,
    globals: VecDeque<Arc<JobTicket>>,
    next_global: u64,
}

impl JobRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                jobs: HashMap::new(),
                globals: VecDeque::new(),
                next_global: 0,
            }),
        }
    }

    /// Reserves a registry key for a job with no identifier.
    pub(crate) fn next_global_key(&self) -> String {
        let mut inner = self.inner.lock();
        let n = inner.next_global;
        inner.next_global += 1;
        format!("__global-{n}")
    }

    /// Whether a live (non-settled) job occupies this key.
    pub(crate) fn is_live(&self, key: &str) -> bool {
        self.inner
            .lock()
            .jobs
            .get(key)
            .map(|job| !job.status().is_terminal())
            .unwrap_or(false)
    }

    /// Registers a job. Fails when a live job already holds the key; a
    /// settled leftover (e.g. a timed-out job whose late reply never came)
    /// is evicted instead.
    pub(crate) fn insert(&self, job: Arc<JobTicket>) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        match inner.jobs.get(job.key()).map(|j| j.status().is_terminal()) {
            Some(false) => {
                return Err(ClientError::DuplicateIdentifier(job.key().to_string()));
            }
            Some(true) => {
                let key = job.key().to_string();
                remove_locked(&mut inner, &key);
            }
            None => {}
        }
        if job.is_global() {
            inner.globals.push_back(job.clone());
        }
        inner.jobs.insert(job.key().to_string(), job);
        Ok(())
    }

    /// Removes a job by key.
    pub(crate) fn remove(&self, key: &str) {
        remove_locked(&mut self.inner.lock(), key);
    }

    /// Routes one inbound message and appends it under the registry lock.
    pub(crate) fn dispatch(&self, message: ServerMessage) -> RouteOutcome {
        let mut inner = self.inner.lock();

        // Settled global jobs linger when their reply never arrives (e.g.
        // after a wait timeout); drop them before scanning the bucket.
        let settled: Vec<String> = inner
            .globals
            .iter()
            .filter(|job| job.status().is_terminal())
            .map(|job| job.key().to_string())
            .collect();
        for key in settled {
            remove_locked(&mut inner, &key);
        }

        // Rule 1: a non-empty Identifier field naming a registered job.
        let identifier = message
            .message
            .identifier()
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        if let Some(id) = identifier {
            if let Some(job) = inner.jobs.get(&id).cloned() {
                return settle(&mut inner, &job, message);
            }
        }

        // Rule 2: oldest global job whose command accepts this class.
        let target = inner
            .globals
            .iter()
            .find(|job| message.kind.globally_routable_for(job.request().header()))
            .cloned();
        if let Some(job) = target {
            return settle(&mut inner, &job, message);
        }

        RouteOutcome::Unroutable(message)
    }

    /// Removes and returns every registered job, for session teardown.
    pub(crate) fn drain(&self) -> Vec<Arc<JobTicket>> {
        let mut inner = self.inner.lock();
        inner.globals.clear();
        inner.jobs.drain().map(|(_, job)| job).collect()
    }
}

fn remove_locked(inner: &mut RegistryInner, key: &str) {
    inner.jobs.remove(key);
    inner.globals.retain(|job| job.key() != key);
}

fn settle(inner: &mut RegistryInner, job: &Arc<JobTicket>, message: ServerMessage) -> RouteOutcome {
    let key = job.key().to_string();
    match job.append(message) {
        AppendOutcome::Accumulated => RouteOutcome::Delivered { terminal: false },
        AppendOutcome::Finished => {
            remove_locked(inner, &key);
            RouteOutcome::Delivered { terminal: true }
        }
        AppendOutcome::Dropped => {
            remove_locked(inner, &key);
            RouteOutcome::Stale { key }
        }
    }
}

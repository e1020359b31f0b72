//! Job tickets and caller-facing handles.
//!
//! Every submitted request is tracked by a ticket that accumulates the
//! node's messages until one of them is terminal for the request's command.
//! The caller keeps a [`JobHandle`] and waits on a one-shot completion
//! signal; the registry owns the ticket while the job is in flight.

use fcp_protocol::{Message, ServerMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Lifecycle state of an outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Accepted, not yet written to the wire.
    Queued,
    /// Written; responses may arrive.
    InFlight,
    /// Concluded by a terminal non-error message.
    Completed,
    /// Concluded by a terminal error message, or aborted before sending.
    Failed,
    /// The caller's wait deadline elapsed.
    TimedOut,
    /// Cancelled by the caller or by session teardown.
    Cancelled,
}

impl JobStatus {
    /// Terminal states are sticky; no further transitions happen.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::InFlight)
    }
}

/// What `append` did with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AppendOutcome {
    /// Non-terminal message accumulated; the job stays live.
    Accumulated,
    /// Terminal message delivered; the ticket should leave the registry.
    Finished,
    /// The job was already in a terminal state; the message was dropped.
    Dropped,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    responses: Vec<ServerMessage>,
    done: Option<oneshot::Sender<()>>,
    abort_reason: Option<String>,
}

/// Registry-owned state of one outstanding request.
#[derive(Debug)]
pub(crate) struct JobTicket {
    key: String,
    identifier: String,
    request: Message,
    /// Reserved: when set, terminal-looking messages do not conclude the
    /// job. Always false today.
    persistent: bool,
    state: Mutex<JobState>,
}

impl JobTicket {
    /// Creates a ticket in state `Queued` and the handle that observes it.
    pub(crate) fn create(
        key: String,
        identifier: String,
        request: Message,
        persistent: bool,
    ) -> (Arc<Self>, JobHandle) {
        let (done_tx, done_rx) = oneshot::channel();
        let ticket = Arc::new(Self {
            key,
            identifier,
            request,
            persistent,
            state: Mutex::new(JobState {
                status: JobStatus::Queued,
                responses: Vec::new(),
                done: Some(done_tx),
                abort_reason: None,
            }),
        });
        let handle = JobHandle {
            ticket: ticket.clone(),
            done: done_rx,
        };
        (ticket, handle)
    }

    /// Registry key: the identifier, or a synthesized token for global jobs.
    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn request(&self) -> &Message {
        &self.request
    }

    /// Global jobs have no identifier and are routed through the FIFO
    /// bucket.
    pub(crate) fn is_global(&self) -> bool {
        self.identifier.is_empty()
    }

    pub(crate) fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    /// Called by the writer once the request bytes are on the wire.
    pub(crate) fn mark_in_flight(&self) {
        let mut state = self.state.lock();
        if state.status == JobStatus::Queued {
            state.status = JobStatus::InFlight;
        }
    }

    /// Appends an inbound message; on a terminal classification, settles the
    /// job and raises the completion signal. Called only by the reader,
    /// under the registry lock.
    pub(crate) fn append(&self, message: ServerMessage) -> AppendOutcome {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return AppendOutcome::Dropped;
        }
        let terminal = !self.persistent && message.kind.terminal_for(self.request.header());
        let failed = message.kind.is_error();
        state.responses.push(message);
        if !terminal {
            return AppendOutcome::Accumulated;
        }
        state.status = if failed {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        if let Some(done) = state.done.take() {
            let _ = done.send(());
        }
        AppendOutcome::Finished
    }

    /// Forces a terminal state (`Failed` or `Cancelled`) and signals any
    /// waiter. No-op if the job already settled.
    pub(crate) fn abort(&self, status: JobStatus, reason: &str) {
        debug_assert!(status.is_terminal());
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return;
        }
        state.status = status;
        state.abort_reason = Some(reason.to_string());
        if let Some(done) = state.done.take() {
            let _ = done.send(());
        }
    }

    fn time_out(&self) {
        let mut state = self.state.lock();
        if !state.status.is_terminal() {
            state.status = JobStatus::TimedOut;
            state.done = None;
        }
    }

    fn responses(&self) -> Vec<ServerMessage> {
        self.state.lock().responses.clone()
    }

    fn last_response(&self) -> Option<ServerMessage> {
        self.state.lock().responses.last().cloned()
    }

    fn abort_reason(&self) -> Option<String> {
        self.state.lock().abort_reason.clone()
    }
}

/// Caller side of an outstanding request.
///
/// Dropping the handle does not cancel the job; the node keeps working and
/// late messages are dropped by the registry.
#[derive(Debug)]
pub struct JobHandle {
    ticket: Arc<JobTicket>,
    done: oneshot::Receiver<()>,
}

impl JobHandle {
    /// The identifier this job was submitted under; empty for global
    /// commands.
    pub fn identifier(&self) -> &str {
        self.ticket.identifier()
    }

    pub fn status(&self) -> JobStatus {
        self.ticket.status()
    }

    /// Blocks until the job settles or the timeout elapses.
    ///
    /// A timeout moves the job to `TimedOut`; the node is not told to stop,
    /// and anything it still sends for this job is discarded. Re-waiting
    /// after the job settled returns immediately.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> JobStatus {
        if self.status().is_terminal() {
            return self.status();
        }
        match timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, &mut self.done).await.is_err() {
                    self.ticket.time_out();
                }
            }
            None => {
                let _ = (&mut self.done).await;
            }
        }
        // a dropped signal without a settled status means the session died
        // before the writer ever saw this job
        if !self.status().is_terminal() {
            self.ticket
                .abort(JobStatus::Cancelled, "completion signal lost");
        }
        self.status()
    }

    /// The messages accumulated so far, in wire-arrival order.
    pub fn responses(&self) -> Vec<ServerMessage> {
        self.ticket.responses()
    }

    /// The most recent message; for single-reply commands this is the
    /// terminal one.
    pub fn last_response(&self) -> Option<ServerMessage> {
        self.ticket.last_response()
    }

    /// The reason the job was aborted, when it did not settle through a
    /// terminal message.
    pub fn abort_reason(&self) -> Option<String> {
        self.ticket.abort_reason()
    }

    /// Cancels the job locally and wakes any waiter.
    pub fn cancel(&self) {
        self.ticket.abort(JobStatus::Cancelled, "cancelled by caller");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcp_protocol::Message;

    fn server_message(header: &str, fields: &[(&str, &str)]) -> ServerMessage {
        let mut m = Message::new(header);
        for (k, v) in fields {
            m.set_field(*k, *v);
        }
        ServerMessage::classify(m).unwrap()
    }

    fn put_job() -> (Arc<JobTicket>, JobHandle) {
        JobTicket::create(
            "job7".to_string(),
            "job7".to_string(),
            Message::new("ClientPut").with_field("Identifier", "job7"),
            false,
        )
    }

    #[test]
    fn test_new_job_is_queued() {
        let (ticket, handle) = put_job();
        assert_eq!(handle.status(), JobStatus::Queued);
        assert!(!handle.status().is_terminal());
        ticket.mark_in_flight();
        assert_eq!(handle.status(), JobStatus::InFlight);
    }

    #[test]
    fn test_progress_accumulates_without_completing() {
        let (ticket, handle) = put_job();
        ticket.mark_in_flight();
        let outcome = ticket.append(server_message("SimpleProgress", &[("Identifier", "job7")]));
        assert_eq!(outcome, AppendOutcome::Accumulated);
        assert_eq!(handle.status(), JobStatus::InFlight);
        assert_eq!(handle.responses().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_success_completes_and_signals() {
        let (ticket, mut handle) = put_job();
        ticket.mark_in_flight();
        ticket.append(server_message("URIGenerated", &[("Identifier", "job7")]));
        let outcome = ticket.append(server_message("PutSuccessful", &[("Identifier", "job7")]));
        assert_eq!(outcome, AppendOutcome::Finished);
        assert_eq!(handle.wait(None).await, JobStatus::Completed);
        // re-wait is idempotent
        assert_eq!(handle.wait(Some(Duration::from_millis(1))).await, JobStatus::Completed);
        let responses = handle.responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1].message.header(), "PutSuccessful");
    }

    #[tokio::test]
    async fn test_terminal_error_fails() {
        let (ticket, mut handle) = put_job();
        ticket.mark_in_flight();
        ticket.append(server_message("PutFailed", &[("Identifier", "job7"), ("Code", "9")]));
        assert_eq!(handle.wait(None).await, JobStatus::Failed);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let (ticket, handle) = put_job();
        ticket.mark_in_flight();
        ticket.append(server_message("PutSuccessful", &[("Identifier", "job7")]));
        let outcome = ticket.append(server_message("SimpleProgress", &[("Identifier", "job7")]));
        assert_eq!(outcome, AppendOutcome::Dropped);
        assert_eq!(handle.status(), JobStatus::Completed);
        assert_eq!(handle.responses().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_timeout_marks_timed_out() {
        let (ticket, mut handle) = put_job();
        ticket.mark_in_flight();
        assert_eq!(
            handle.wait(Some(Duration::from_millis(20))).await,
            JobStatus::TimedOut
        );
        // late message is dropped, status unchanged
        let outcome = ticket.append(server_message("PutSuccessful", &[("Identifier", "job7")]));
        assert_eq!(outcome, AppendOutcome::Dropped);
        assert_eq!(handle.wait(None).await, JobStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let (_ticket, mut handle) = put_job();
        handle.cancel();
        assert_eq!(handle.wait(None).await, JobStatus::Cancelled);
        assert_eq!(handle.abort_reason().as_deref(), Some("cancelled by caller"));
    }

    #[tokio::test]
    async fn test_wait_blocks_until_reader_settles_job() {
        let (ticket, mut handle) = put_job();
        ticket.mark_in_flight();
        let reader = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ticket.append(server_message("PutSuccessful", &[("Identifier", "job7")]));
        });
        assert_eq!(handle.wait(None).await, JobStatus::Completed);
        reader.await.unwrap();
    }

    #[test]
    fn test_persistent_ticket_ignores_terminal() {
        let (ticket, handle) = JobTicket::create(
            "u1".to_string(),
            "u1".to_string(),
            Message::new("ClientPut").with_field("Identifier", "u1"),
            true,
        );
        ticket.mark_in_flight();
        let outcome = ticket.append(server_message("PutSuccessful", &[("Identifier", "u1")]));
        assert_eq!(outcome, AppendOutcome::Accumulated);
        assert_eq!(handle.status(), JobStatus::InFlight);
    }

    #[test]
    fn test_abort_does_not_override_terminal() {
        let (ticket, handle) = put_job();
        ticket.append(server_message("PutSuccessful", &[("Identifier", "job7")]));
        ticket.abort(JobStatus::Cancelled, "too late");
        assert_eq!(handle.status(), JobStatus::Completed);
        assert!(handle.abort_reason().is_none());
    }
}

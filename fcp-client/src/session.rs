//! Node session: socket ownership, writer/reader loops, handshake.
//!
//! A session owns one TCP connection to a node. The writer task drains a
//! bounded request queue, registering each job just before its bytes hit the
//! wire; the reader task decodes server messages and routes them through the
//! registry. Session-fatal conditions (transport failure, malformed frame,
//! unknown header) cancel every outstanding job and park the session dead.

use crate::config::{unique_id, SessionConfig};
use crate::error::ClientError;
use crate::job::{JobHandle, JobStatus, JobTicket};
use crate::registry::{JobRegistry, RouteOutcome};
use fcp_protocol::{Decoder, Encoder, Message, ServerHeader, ServerMessage, PROTOCOL_VERSION};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Socket read buffer size (8 KiB).
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Capacity of the notification broadcast channel.
const NOTIFICATION_CAPACITY: usize = 64;

enum WriteOp {
    /// Register-then-send: a tracked job.
    Job(Arc<JobTicket>),
    /// Fire-and-forget: no reply is expected, nothing is registered. The
    /// ack fires once the bytes are on the wire.
    Fire {
        message: Message,
        ack: oneshot::Sender<Result<(), ClientError>>,
    },
}

#[derive(Debug)]
struct SessionShared {
    registry: JobRegistry,
    alive: AtomicBool,
    failure: Mutex<Option<String>>,
    notifications: broadcast::Sender<ServerMessage>,
    shutdown: watch::Sender<bool>,
    next_auto: AtomicU64,
}

impl SessionShared {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Tears the session down exactly once: records the cause, stops both
    /// loops, and settles every outstanding job.
    fn teardown(&self, status: JobStatus, reason: &str, fatal: bool) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        if fatal {
            tracing::error!(reason, "session failed");
            *self.failure.lock() = Some(reason.to_string());
        } else {
            tracing::debug!(reason, "session closed");
        }
        let _ = self.shutdown.send(true);
        let jobs = self.registry.drain();
        if !jobs.is_empty() {
            tracing::debug!(jobs = jobs.len(), "aborting outstanding jobs");
        }
        for job in jobs {
            job.abort(status, reason);
        }
    }
}

/// An established FCP session.
#[derive(Debug)]
pub struct FcpSession {
    config: SessionConfig,
    name: String,
    node_hello: Message,
    shared: Arc<SessionShared>,
    queue: mpsc::Sender<WriteOp>,
}

impl FcpSession {
    /// Connects, spawns the writer and reader tasks, and performs the
    /// `ClientHello` handshake through the normal job path.
    pub async fn connect(config: SessionConfig) -> Result<Self, ClientError> {
        let name = config.effective_name();
        tracing::debug!(name = %name, host = %config.host, port = config.port, "connecting to node");

        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let shared = Arc::new(SessionShared {
            registry: JobRegistry::new(),
            alive: AtomicBool::new(true),
            failure: Mutex::new(None),
            notifications,
            shutdown,
            next_auto: AtomicU64::new(0),
        });

        let (queue, requests) = mpsc::channel(config.request_queue_depth);
        tokio::spawn(write_loop(
            requests,
            write_half,
            shared.clone(),
            shutdown_rx.clone(),
        ));
        tokio::spawn(read_loop(read_half, shared.clone(), shutdown_rx));

        let hello = Message::new("ClientHello")
            .with_field("Name", &name)
            .with_field("ExpectedVersion", PROTOCOL_VERSION);
        let node_hello = match handshake(&shared, &queue, hello, &config).await {
            Ok(message) => message,
            Err(err) => {
                shared.teardown(JobStatus::Cancelled, "handshake failed", true);
                return Err(err);
            }
        };
        tracing::info!(
            node = node_hello.field("Node").unwrap_or("?"),
            version = node_hello.field("FCPVersion").unwrap_or("?"),
            "connected"
        );

        Ok(Self {
            config,
            name,
            node_hello,
            shared,
            queue,
        })
    }

    /// Submits a request and returns a handle to its job.
    ///
    /// A message with a non-empty `Identifier` is keyed by it and rejected
    /// while another job holds the same identifier; an identifier-less
    /// message goes through the global FIFO bucket. Submission blocks only
    /// when the request queue is full.
    pub async fn submit(&self, message: Message) -> Result<JobHandle, ClientError> {
        self.submit_job(message, false).await
    }

    /// [`submit`](Self::submit) with an explicit persistent flag (reserved;
    /// pass false).
    pub async fn submit_job(
        &self,
        message: Message,
        persistent: bool,
    ) -> Result<JobHandle, ClientError> {
        submit_on(&self.shared, &self.queue, message, persistent).await
    }

    /// Transmits a message that expects no reply (`WatchGlobal`,
    /// `Disconnect`, …) and returns once it is on the wire. Nothing is
    /// registered; any response the node sends anyway is handled as
    /// unroutable.
    pub async fn send(&self, message: Message) -> Result<(), ClientError> {
        if !self.shared.is_alive() {
            return Err(down_error(&self.shared));
        }
        tracing::debug!(command = message.header(), "sending fire-and-forget");
        let (ack, acked) = oneshot::channel();
        self.queue
            .send(WriteOp::Fire { message, ack })
            .await
            .map_err(|_| down_error(&self.shared))?;
        match acked.await {
            Ok(result) => result,
            Err(_) => Err(down_error(&self.shared)),
        }
    }

    /// The `NodeHello` cached at connect time.
    pub fn node_hello(&self) -> &Message {
        &self.node_hello
    }

    /// The node-assigned connection identifier, when the node sent one.
    pub fn connection_identifier(&self) -> &str {
        self.node_hello.field("ConnectionIdentifier").unwrap_or("")
    }

    /// The client name in effect on the wire.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// False once the session has failed or been shut down.
    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// The fatal cause, once the session has died.
    pub fn failure(&self) -> Option<String> {
        self.shared.failure.lock().clone()
    }

    /// Subscribes to unsolicited node messages (persistent-request
    /// notifications and unroutable traffic such as the `WatchGlobal`
    /// stream). Without any subscriber these are dropped with a warning.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<ServerMessage> {
        self.shared.notifications.subscribe()
    }

    /// Generates a fresh request identifier, unique within this process.
    pub fn next_unique_identifier(&self) -> String {
        let n = self.shared.next_auto.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", unique_id())
    }

    /// Shuts the session down: stops both loops, closes the socket and
    /// cancels every outstanding job.
    pub fn shutdown(&self) {
        self.shared
            .teardown(JobStatus::Cancelled, "session shut down", false);
    }
}

impl Drop for FcpSession {
    fn drop(&mut self) {
        self.shared
            .teardown(JobStatus::Cancelled, "session dropped", false);
    }
}

fn down_error(shared: &SessionShared) -> ClientError {
    match shared.failure.lock().clone() {
        Some(reason) => ClientError::SessionDown(reason),
        None => ClientError::ConnectionClosed,
    }
}

async fn submit_on(
    shared: &Arc<SessionShared>,
    queue: &mpsc::Sender<WriteOp>,
    message: Message,
    persistent: bool,
) -> Result<JobHandle, ClientError> {
    if !shared.is_alive() {
        return Err(down_error(shared));
    }
    let identifier = message.identifier().unwrap_or("").to_string();
    let key = if identifier.is_empty() {
        shared.registry.next_global_key()
    } else {
        if shared.registry.is_live(&identifier) {
            return Err(ClientError::DuplicateIdentifier(identifier));
        }
        identifier.clone()
    };
    tracing::debug!(command = message.header(), key = %key, "submitting job");
    let (ticket, handle) = JobTicket::create(key, identifier, message, persistent);
    queue
        .send(WriteOp::Job(ticket))
        .await
        .map_err(|_| down_error(shared))?;
    Ok(handle)
}

async fn handshake(
    shared: &Arc<SessionShared>,
    queue: &mpsc::Sender<WriteOp>,
    hello: Message,
    config: &SessionConfig,
) -> Result<Message, ClientError> {
    let mut job = submit_on(shared, queue, hello, false).await?;
    match job.wait(Some(config.hello_timeout())).await {
        JobStatus::Completed => match job.last_response() {
            Some(sm) if sm.kind == ServerHeader::NodeHello => Ok(sm.message),
            Some(sm) if sm.kind == ServerHeader::CloseConnectionDuplicateName => {
                Err(ClientError::NodeError {
                    header: sm.kind.wire_name().to_string(),
                    code: None,
                    description: "duplicate client name".to_string(),
                })
            }
            Some(sm) => Err(ClientError::BadResponseShape(format!(
                "handshake answered by {}",
                sm.kind.wire_name()
            ))),
            None => Err(ClientError::BadResponseShape(
                "empty handshake response".to_string(),
            )),
        },
        JobStatus::Failed => Err(job
            .last_response()
            .as_ref()
            .map(ClientError::from_node_message)
            .unwrap_or(ClientError::ConnectionClosed)),
        JobStatus::TimedOut => Err(ClientError::Timeout),
        _ => Err(ClientError::Cancelled),
    }
}

async fn write_loop(
    mut requests: mpsc::Receiver<WriteOp>,
    mut writer: OwnedWriteHalf,
    shared: Arc<SessionShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let op = tokio::select! {
            _ = shutdown.changed() => break,
            op = requests.recv() => match op {
                Some(op) => op,
                None => break,
            },
        };
        match op {
            WriteOp::Job(job) => {
                if let Err(err) = shared.registry.insert(job.clone()) {
                    // a second submit with the same identifier raced past
                    // the synchronous check
                    job.abort(JobStatus::Failed, &err.to_string());
                    continue;
                }
                job.mark_in_flight();
                let wire = match Encoder::encode(job.request()) {
                    Ok(wire) => wire,
                    Err(err) => {
                        shared.registry.remove(job.key());
                        job.abort(JobStatus::Failed, &err.to_string());
                        continue;
                    }
                };
                tracing::trace!(
                    command = job.request().header(),
                    bytes = wire.len(),
                    "writing request"
                );
                if let Err(err) = write_all(&mut writer, &wire).await {
                    let reason = format!("write failed: {err}");
                    job.abort(JobStatus::Failed, &reason);
                    shared.teardown(JobStatus::Cancelled, &reason, true);
                    break;
                }
            }
            WriteOp::Fire { message, ack } => match Encoder::encode(&message) {
                Ok(wire) => {
                    if let Err(err) = write_all(&mut writer, &wire).await {
                        let reason = format!("write failed: {err}");
                        shared.teardown(JobStatus::Cancelled, &reason, true);
                        break;
                    }
                    let _ = ack.send(Ok(()));
                }
                Err(err) => {
                    let _ = ack.send(Err(err.into()));
                }
            },
        }
    }
    // settle anything still queued so no waiter is left hanging
    requests.close();
    while let Ok(op) = requests.try_recv() {
        match op {
            WriteOp::Job(job) => job.abort(JobStatus::Cancelled, "session shut down"),
            WriteOp::Fire { ack, .. } => {
                let _ = ack.send(Err(down_error(&shared)));
            }
        }
    }
    tracing::debug!("writer loop stopped");
}

async fn write_all(writer: &mut OwnedWriteHalf, wire: &[u8]) -> std::io::Result<()> {
    writer.write_all(wire).await?;
    writer.flush().await
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    shared: Arc<SessionShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    'session: loop {
        loop {
            match decoder.decode() {
                Ok(Some(message)) => {
                    if !handle_message(&shared, message) {
                        break 'session;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    shared.teardown(
                        JobStatus::Cancelled,
                        &format!("malformed frame: {err}"),
                        true,
                    );
                    break 'session;
                }
            }
        }
        let n = tokio::select! {
            _ = shutdown.changed() => break 'session,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    shared.teardown(JobStatus::Cancelled, "connection closed by node", true);
                    break 'session;
                }
                Ok(n) => n,
                Err(err) => {
                    shared.teardown(JobStatus::Cancelled, &format!("read failed: {err}"), true);
                    break 'session;
                }
            },
        };
        decoder.extend(&buf[..n]);
    }
    tracing::debug!("reader loop stopped");
}

/// Classifies and routes one inbound message. Returns false when the
/// session must die.
fn handle_message(shared: &SessionShared, message: Message) -> bool {
    tracing::trace!(header = message.header(), "node message");
    let server_message = match ServerMessage::classify(message) {
        Ok(sm) => sm,
        Err(err) => {
            shared.teardown(JobStatus::Cancelled, &err.to_string(), true);
            return false;
        }
    };
    let kind = server_message.kind;
    if kind.is_notification() {
        if shared.notifications.send(server_message).is_err() {
            tracing::warn!(header = kind.wire_name(), "dropping notification: no subscriber");
        }
        return true;
    }
    match shared.registry.dispatch(server_message) {
        RouteOutcome::Delivered { terminal } => {
            if terminal {
                tracing::trace!(header = kind.wire_name(), "job settled");
            }
        }
        RouteOutcome::Stale { key } => {
            tracing::warn!(
                header = kind.wire_name(),
                key = %key,
                "dropping message for finished job"
            );
        }
        RouteOutcome::Unroutable(sm) => {
            if shared.notifications.receiver_count() > 0 {
                let _ = shared.notifications.send(sm);
            } else {
                tracing::warn!(header = kind.wire_name(), "dropping unroutable message");
            }
        }
    }
    true
}

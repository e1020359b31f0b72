//! High-level node API: one method per FCP command.
//!
//! Each method builds the request message, submits it through the session,
//! and projects the accumulated response to the shape the command promises.
//! One-shot commands wait up to the configured global-commands timeout;
//! long-running inserts and fetches return the live [`JobHandle`] instead.

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::job::{JobHandle, JobStatus};
use crate::session::FcpSession;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use fcp_protocol::{Message, ServerHeader, ServerMessage};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Block size for streaming `FileHash` computation.
const FILE_HASH_BLOCK_SIZE: usize = 1024;

/// Optional fields for `ListPeers`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListPeersOptions {
    pub with_metadata: bool,
    pub with_volatile: bool,
}

impl ListPeersOptions {
    fn apply(&self, message: &mut Message) {
        if self.with_metadata {
            message.set_field("WithMetadata", "true");
        }
        if self.with_volatile {
            message.set_field("WithVolatile", "true");
        }
    }
}

/// Optional fields for `ModifyPeer`. Unset fields are left untouched on the
/// node.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModifyPeerOptions {
    pub allow_local_addresses: Option<bool>,
    pub is_disabled: Option<bool>,
    pub is_listen_only: Option<bool>,
}

impl ModifyPeerOptions {
    fn apply(&self, message: &mut Message) {
        if let Some(v) = self.allow_local_addresses {
            message.set_field("AllowLocalAddresses", bool_str(v));
        }
        if let Some(v) = self.is_disabled {
            message.set_field("IsDisabled", bool_str(v));
        }
        if let Some(v) = self.is_listen_only {
            message.set_field("IsListenOnly", bool_str(v));
        }
    }
}

/// Optional fields for `GetNode`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetNodeOptions {
    pub with_private: bool,
    pub with_volatile: bool,
}

impl GetNodeOptions {
    fn apply(&self, message: &mut Message) {
        if self.with_private {
            message.set_field("WithPrivate", "true");
        }
        if self.with_volatile {
            message.set_field("WithVolatile", "true");
        }
    }
}

/// Selector fields for `GetConfig`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetConfigOptions {
    pub with_current: bool,
    pub with_default: bool,
    pub with_sort_order: bool,
    pub with_expert_flag: bool,
    pub with_force_write_flag: bool,
    pub with_short_description: bool,
    pub with_long_description: bool,
}

impl GetConfigOptions {
    fn apply(&self, message: &mut Message) {
        let selectors = [
            ("WithCurrent", self.with_current),
            ("WithDefault", self.with_default),
            ("WithSortOrder", self.with_sort_order),
            ("WithExpertFlag", self.with_expert_flag),
            ("WithForceWriteFlag", self.with_force_write_flag),
            ("WithShortDescription", self.with_short_description),
            ("WithLongDescription", self.with_long_description),
        ];
        for (key, enabled) in selectors {
            if enabled {
                message.set_field(key, "true");
            }
        }
    }
}

/// Optional fields for `ClientPut` in any upload mode.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub verbosity: Option<i32>,
    pub max_retries: Option<i32>,
    pub priority_class: Option<i32>,
    pub get_chk_only: Option<bool>,
    pub global: Option<bool>,
    pub dont_compress: Option<bool>,
    pub client_token: Option<String>,
    pub persistence: Option<String>,
    pub target_filename: Option<String>,
    pub early_encode: Option<bool>,
}

impl PutOptions {
    fn apply(&self, message: &mut Message) {
        if let Some(v) = &self.content_type {
            message.set_field("Metadata.ContentType", v);
        }
        if let Some(v) = self.verbosity {
            message.set_field("Verbosity", v.to_string());
        }
        if let Some(v) = self.max_retries {
            message.set_field("MaxRetries", v.to_string());
        }
        if let Some(v) = self.priority_class {
            message.set_field("PriorityClass", v.to_string());
        }
        if let Some(v) = self.get_chk_only {
            message.set_field("GetCHKOnly", bool_str(v));
        }
        if let Some(v) = self.global {
            message.set_field("Global", bool_str(v));
        }
        if let Some(v) = self.dont_compress {
            message.set_field("DontCompress", bool_str(v));
        }
        if let Some(v) = &self.client_token {
            message.set_field("ClientToken", v);
        }
        if let Some(v) = &self.persistence {
            message.set_field("Persistence", v);
        }
        if let Some(v) = &self.target_filename {
            message.set_field("TargetFilename", v);
        }
        if let Some(v) = self.early_encode {
            message.set_field("EarlyEncode", bool_str(v));
        }
    }
}

/// Optional fields for `ClientGet`.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub verbosity: Option<i32>,
    pub max_retries: Option<i32>,
    pub priority_class: Option<i32>,
    pub return_type: Option<String>,
    pub global: Option<bool>,
    pub persistence: Option<String>,
}

impl GetOptions {
    fn apply(&self, message: &mut Message) {
        if let Some(v) = self.verbosity {
            message.set_field("Verbosity", v.to_string());
        }
        if let Some(v) = self.max_retries {
            message.set_field("MaxRetries", v.to_string());
        }
        if let Some(v) = self.priority_class {
            message.set_field("PriorityClass", v.to_string());
        }
        if let Some(v) = &self.return_type {
            message.set_field("ReturnType", v);
        }
        if let Some(v) = self.global {
            message.set_field("Global", bool_str(v));
        }
        if let Some(v) = &self.persistence {
            message.set_field("Persistence", v);
        }
    }
}

/// The node's `TestDDAReply`: where to find the read probe and what to write.
#[derive(Debug, Clone)]
pub struct DdaProbe {
    pub directory: String,
    pub read_filename: Option<String>,
    pub write_filename: Option<String>,
    pub content_to_write: Option<String>,
}

/// Outcome of a TestDDA exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdaResult {
    pub directory: String,
    pub read_allowed: bool,
    pub write_allowed: bool,
}

impl DdaResult {
    fn denied(directory: &str) -> Self {
        Self {
            directory: directory.to_string(),
            read_allowed: false,
            write_allowed: false,
        }
    }
}

/// A connected Freenet node.
pub struct Node {
    session: FcpSession,
}

impl Node {
    /// Connects and performs the handshake.
    pub async fn connect(config: SessionConfig) -> Result<Self, ClientError> {
        Ok(Self {
            session: FcpSession::connect(config).await?,
        })
    }

    /// The underlying session, for raw submits, notifications and shutdown.
    pub fn session(&self) -> &FcpSession {
        &self.session
    }

    /// The `NodeHello` cached at connect time.
    pub fn node_hello(&self) -> &Message {
        self.session.node_hello()
    }

    // =========================================================================
    // Peer management
    // =========================================================================

    /// Lists all peers of the node, in the order the node reports them.
    pub async fn list_peers(
        &self,
        options: &ListPeersOptions,
    ) -> Result<Vec<Message>, ClientError> {
        let mut m = Message::new("ListPeers");
        options.apply(&mut m);
        expect_list(
            self.global_command(m).await?,
            &[ServerHeader::Peer],
            ServerHeader::EndListPeers,
        )
    }

    /// Returns a single peer's noderef.
    pub async fn list_peer(&self, node_identifier: &str) -> Result<Message, ClientError> {
        let m = Message::new("ListPeer").with_field("NodeIdentifier", node_identifier);
        expect_single(self.global_command(m).await?, ServerHeader::Peer)
    }

    /// Lists the private notes attached to a darknet peer.
    pub async fn list_peer_notes(&self, node_identifier: &str) -> Result<Vec<Message>, ClientError> {
        let m = Message::new("ListPeerNotes").with_field("NodeIdentifier", node_identifier);
        expect_list(
            self.global_command(m).await?,
            &[ServerHeader::PeerNote],
            ServerHeader::EndListPeerNotes,
        )
    }

    /// Adds a peer from a noderef file on the node's filesystem.
    pub async fn add_peer_from_file(&self, path: &str) -> Result<Message, ClientError> {
        let m = Message::new("AddPeer").with_field("File", path);
        expect_single(self.global_command(m).await?, ServerHeader::Peer)
    }

    /// Adds a peer from a noderef URL.
    pub async fn add_peer_from_url(&self, url: &str) -> Result<Message, ClientError> {
        let m = Message::new("AddPeer").with_field("URL", url);
        expect_single(self.global_command(m).await?, ServerHeader::Peer)
    }

    /// Adds a peer from an inline noderef given as explicit fields.
    pub async fn add_peer(&self, noderef: &[(&str, &str)]) -> Result<Message, ClientError> {
        let mut m = Message::new("AddPeer");
        for (key, value) in noderef {
            m.set_field(*key, *value);
        }
        expect_single(self.global_command(m).await?, ServerHeader::Peer)
    }

    /// Modifies a peer's connection settings.
    pub async fn modify_peer(
        &self,
        node_identifier: &str,
        options: &ModifyPeerOptions,
    ) -> Result<Message, ClientError> {
        let mut m = Message::new("ModifyPeer").with_field("NodeIdentifier", node_identifier);
        options.apply(&mut m);
        expect_single(self.global_command(m).await?, ServerHeader::Peer)
    }

    /// Sets the private note on a darknet peer. Returns the terminal
    /// `PeerNote`.
    pub async fn modify_peer_note(
        &self,
        node_identifier: &str,
        note_text: &str,
    ) -> Result<Message, ClientError> {
        let m = Message::new("ModifyPeerNote")
            .with_field("NodeIdentifier", node_identifier)
            .with_field("NoteText", note_text)
            // the only note type the node accepts today
            .with_field("PeerNoteType", "1");
        expect_single(self.global_command(m).await?, ServerHeader::PeerNote)
    }

    /// Removes a peer.
    pub async fn remove_peer(&self, node_identifier: &str) -> Result<Message, ClientError> {
        let m = Message::new("RemovePeer").with_field("NodeIdentifier", node_identifier);
        expect_single_of(
            self.global_command(m).await?,
            &[ServerHeader::PeerRemoved, ServerHeader::Peer],
        )
    }

    // =========================================================================
    // Node information and configuration
    // =========================================================================

    /// Returns the node's own noderef and, optionally, volatile statistics.
    pub async fn get_node(&self, options: &GetNodeOptions) -> Result<Message, ClientError> {
        let mut m = Message::new("GetNode");
        options.apply(&mut m);
        expect_single(self.global_command(m).await?, ServerHeader::NodeData)
    }

    /// Reads the node configuration.
    pub async fn get_config(&self, options: &GetConfigOptions) -> Result<Message, ClientError> {
        let mut m = Message::new("GetConfig");
        options.apply(&mut m);
        expect_single(self.global_command(m).await?, ServerHeader::ConfigData)
    }

    /// Applies a prepared `ModifyConfig` message. Rejects anything else
    /// without sending it.
    pub async fn modify_config(&self, message: Message) -> Result<Message, ClientError> {
        if message.header() != "ModifyConfig" {
            return Err(ClientError::BadArgument(format!(
                "ModifyConfig message expected, {} received",
                message.header()
            )));
        }
        expect_single(self.global_command(message).await?, ServerHeader::ConfigData)
    }

    // =========================================================================
    // Keys, inserts and fetches
    // =========================================================================

    /// Generates an SSK keypair. Returns the terminal `SSKKeypair`.
    pub async fn generate_ssk(&self, identifier: Option<&str>) -> Result<Message, ClientError> {
        let id = self.request_identifier(identifier);
        let m = Message::new("GenerateSSK").with_field("Identifier", &id);
        expect_single(self.global_command(m).await?, ServerHeader::SskKeypair)
    }

    /// Inserts inline data (`UploadFrom=direct`). Returns the live job; the
    /// caller waits on it while progress streams in.
    pub async fn put_data(
        &self,
        uri: &str,
        data: impl Into<Bytes>,
        identifier: Option<&str>,
        options: &PutOptions,
    ) -> Result<JobHandle, ClientError> {
        let id = self.request_identifier(identifier);
        let mut m = Message::new("ClientPut")
            .with_field("URI", uri)
            .with_field("Identifier", &id);
        options.apply(&mut m);
        m.set_field("UploadFrom", "direct");
        m.set_payload(data.into());
        self.session.submit(m).await
    }

    /// Inserts a redirect to an existing URI (`UploadFrom=redirect`).
    pub async fn put_redirect(
        &self,
        uri: &str,
        target_uri: &str,
        identifier: Option<&str>,
        options: &PutOptions,
    ) -> Result<JobHandle, ClientError> {
        let id = self.request_identifier(identifier);
        let mut m = Message::new("ClientPut")
            .with_field("URI", uri)
            .with_field("Identifier", &id);
        options.apply(&mut m);
        m.set_field("UploadFrom", "redirect");
        m.set_field("TargetURI", target_uri);
        self.session.submit(m).await
    }

    /// Inserts a file the node reads from disk (`UploadFrom=disk`),
    /// attaching the salted `FileHash` the node demands when direct
    /// directory access is not proven.
    pub async fn put_disk(
        &self,
        uri: &str,
        path: impl AsRef<Path>,
        identifier: Option<&str>,
        options: &PutOptions,
    ) -> Result<JobHandle, ClientError> {
        let path = path.as_ref();
        let id = self.request_identifier(identifier);
        let hash = self.file_hash(&id, path).await?;
        let mut m = Message::new("ClientPut")
            .with_field("URI", uri)
            .with_field("Identifier", &id);
        options.apply(&mut m);
        m.set_field("UploadFrom", "disk");
        m.set_field("Filename", path.display().to_string());
        m.set_field("FileHash", hash);
        self.session.submit(m).await
    }

    /// Fetches a URI. Returns the live job; with `ReturnType=direct` the
    /// terminal `AllData` carries the payload.
    pub async fn get_data(
        &self,
        uri: &str,
        identifier: Option<&str>,
        options: &GetOptions,
    ) -> Result<JobHandle, ClientError> {
        let id = self.request_identifier(identifier);
        let mut m = Message::new("ClientGet")
            .with_field("URI", uri)
            .with_field("Identifier", &id);
        options.apply(&mut m);
        self.session.submit(m).await
    }

    /// Subscribes to updates of a USK. The returned job never completes on
    /// its own; it accumulates update messages until cancelled.
    pub async fn subscribe_usk(
        &self,
        uri: &str,
        identifier: Option<&str>,
        dont_poll: bool,
    ) -> Result<JobHandle, ClientError> {
        let id = self.request_identifier(identifier);
        let m = Message::new("SubscribeUSK")
            .with_field("URI", uri)
            .with_field("Identifier", &id)
            .with_field("DontPoll", bool_str(dont_poll));
        self.session.submit(m).await
    }

    // =========================================================================
    // Persistent requests
    // =========================================================================

    /// Enables or disables the stream of global-queue updates. The traffic
    /// arrives on [`FcpSession::subscribe_notifications`].
    pub async fn watch_global(&self, enabled: bool, verbosity_mask: i32) -> Result<(), ClientError> {
        let m = Message::new("WatchGlobal")
            .with_field("Enabled", bool_str(enabled))
            .with_field("VerbosityMask", verbosity_mask.to_string());
        self.session.send(m).await
    }

    /// Lists the requests the node keeps across client connections.
    pub async fn list_persistent_requests(&self) -> Result<Vec<Message>, ClientError> {
        expect_list(
            self.global_command(Message::new("ListPersistentRequest")).await?,
            &[
                ServerHeader::PersistentGet,
                ServerHeader::PersistentPut,
                ServerHeader::PersistentPutDir,
            ],
            ServerHeader::EndListPersistentRequest,
        )
    }

    /// Removes a persistent request. No reply is expected.
    pub async fn remove_persistent_request(
        &self,
        identifier: &str,
        global: bool,
    ) -> Result<(), ClientError> {
        let m = Message::new("RemovePersistentRequest")
            .with_field("Identifier", identifier)
            .with_field("Global", bool_str(global));
        self.session.send(m).await
    }

    // =========================================================================
    // TestDDA
    // =========================================================================

    /// Asks the node to probe direct disk access for a directory.
    pub async fn test_dda_request(
        &self,
        directory: &str,
        want_read: bool,
        want_write: bool,
    ) -> Result<DdaProbe, ClientError> {
        let mut m = Message::new("TestDDARequest").with_field("Directory", directory);
        if want_read {
            m.set_field("WantReadDirectory", "true");
        }
        if want_write {
            m.set_field("WantWriteDirectory", "true");
        }
        let reply = expect_single(self.global_command(m).await?, ServerHeader::TestDdaReply)?;
        Ok(DdaProbe {
            directory: reply.field("Directory").unwrap_or(directory).to_string(),
            read_filename: reply.field("ReadFilename").map(str::to_string),
            write_filename: reply.field("WriteFilename").map(str::to_string),
            content_to_write: reply.field("ContentToWrite").map(str::to_string),
        })
    }

    /// Echoes the probe results back to the node.
    pub async fn test_dda_response(
        &self,
        directory: &str,
        read_content: &str,
    ) -> Result<DdaResult, ClientError> {
        let mut m = Message::new("TestDDAResponse").with_field("Directory", directory);
        if !read_content.is_empty() {
            m.set_field("ReadContent", read_content);
        }
        let done = expect_single(self.global_command(m).await?, ServerHeader::TestDdaComplete)?;
        Ok(DdaResult {
            directory: done.field("Directory").unwrap_or(directory).to_string(),
            read_allowed: done.field("ReadDirectoryAllowed") == Some("true"),
            write_allowed: done.field("WriteDirectoryAllowed") == Some("true"),
        })
    }

    /// The full TestDDA exchange: request, probe-file read/write, response.
    /// Any failure along the way yields a denied result for the directory.
    pub async fn test_dda(&self, directory: &str, want_read: bool, want_write: bool) -> DdaResult {
        match self.test_dda_exchange(directory, want_read, want_write).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(directory, error = %err, "TestDDA failed");
                DdaResult::denied(directory)
            }
        }
    }

    async fn test_dda_exchange(
        &self,
        directory: &str,
        want_read: bool,
        want_write: bool,
    ) -> Result<DdaResult, ClientError> {
        let probe = self.test_dda_request(directory, want_read, want_write).await?;
        let mut read_content = String::new();
        if want_read {
            if let Some(path) = &probe.read_filename {
                // an unreadable probe file means no read capability; the
                // node concludes that from the missing content
                read_content = tokio::fs::read_to_string(path).await.unwrap_or_default();
            }
        }
        if want_write {
            if let (Some(path), Some(content)) = (&probe.write_filename, &probe.content_to_write) {
                if let Err(err) = tokio::fs::write(path, content).await {
                    tracing::debug!(path = %path, error = %err, "probe write failed");
                }
            }
        }
        self.test_dda_response(directory, &read_content).await
    }

    // =========================================================================
    // Connection control
    // =========================================================================

    /// Tells the node we are leaving, then shuts the session down.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.session.send(Message::new("Disconnect")).await?;
        self.session.shutdown();
        Ok(())
    }

    /// Asks the node process to shut itself down. No reply is expected.
    pub async fn shutdown_node(&self) -> Result<(), ClientError> {
        self.session.send(Message::new("Shutdown")).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn request_identifier(&self, identifier: Option<&str>) -> String {
        match identifier {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.session.next_unique_identifier(),
        }
    }

    async fn global_command(&self, message: Message) -> Result<Vec<ServerMessage>, ClientError> {
        let timeout = self.session.config().global_commands_timeout();
        let job = self.session.submit(message).await?;
        finish(job, timeout).await
    }

    /// FileHash salt: `sha256(connection_id "-" identifier ++ file bytes)`,
    /// streamed in 1 KiB blocks, base64-encoded.
    async fn file_hash(&self, identifier: &str, path: &Path) -> Result<String, ClientError> {
        let mut hasher = Sha256::new();
        hasher.update(self.session.connection_identifier().as_bytes());
        hasher.update(b"-");
        hasher.update(identifier.as_bytes());
        let mut file = tokio::fs::File::open(path).await?;
        let mut block = [0u8; FILE_HASH_BLOCK_SIZE];
        loop {
            let n = file.read(&mut block).await?;
            if n == 0 {
                break;
            }
            hasher.update(&block[..n]);
        }
        Ok(STANDARD.encode(hasher.finalize()))
    }
}

fn bool_str(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

/// Waits a one-shot job out and converts its terminal state to a result.
async fn finish(mut job: JobHandle, timeout: Duration) -> Result<Vec<ServerMessage>, ClientError> {
    match job.wait(Some(timeout)).await {
        JobStatus::Completed => Ok(job.responses()),
        JobStatus::Failed => match job.last_response() {
            Some(sm) if sm.kind.is_error() => Err(ClientError::from_node_message(&sm)),
            _ => Err(ClientError::RequestFailed(
                job.abort_reason().unwrap_or_else(|| "request failed".to_string()),
            )),
        },
        JobStatus::TimedOut => Err(ClientError::Timeout),
        JobStatus::Cancelled => match job.abort_reason() {
            Some(reason) => Err(ClientError::SessionDown(reason)),
            None => Err(ClientError::Cancelled),
        },
        // wait() only returns terminal states; keep the compiler honest
        JobStatus::Queued | JobStatus::InFlight => Err(ClientError::Timeout),
    }
}

fn expect_single(
    messages: Vec<ServerMessage>,
    kind: ServerHeader,
) -> Result<Message, ClientError> {
    expect_single_of(messages, &[kind])
}

fn expect_single_of(
    mut messages: Vec<ServerMessage>,
    kinds: &[ServerHeader],
) -> Result<Message, ClientError> {
    match messages.pop() {
        Some(sm) if kinds.contains(&sm.kind) => Ok(sm.message),
        Some(sm) => Err(ClientError::BadResponseShape(format!(
            "expected {}, got {}",
            kind_names(kinds),
            sm.kind.wire_name()
        ))),
        None => Err(ClientError::BadResponseShape(format!(
            "expected {}, got no reply",
            kind_names(kinds)
        ))),
    }
}

fn expect_list(
    messages: Vec<ServerMessage>,
    elements: &[ServerHeader],
    end: ServerHeader,
) -> Result<Vec<Message>, ClientError> {
    match messages.last() {
        Some(sm) if sm.kind == end => {}
        Some(sm) => {
            return Err(ClientError::BadResponseShape(format!(
                "expected {} to close the list, got {}",
                end.wire_name(),
                sm.kind.wire_name()
            )))
        }
        None => {
            return Err(ClientError::BadResponseShape(format!(
                "expected {} to close the list, got no reply",
                end.wire_name()
            )))
        }
    }
    Ok(messages
        .into_iter()
        .filter(|sm| elements.contains(&sm.kind))
        .map(|sm| sm.message)
        .collect())
}

fn kind_names(kinds: &[ServerHeader]) -> String {
    kinds
        .iter()
        .map(ServerHeader::wire_name)
        .collect::<Vec<_>>()
        .join(" or ")
}

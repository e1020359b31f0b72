//! In-process scripted node for tests.

use crate::config::SessionConfig;
use fcp_protocol::{Decoder, Encoder, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One accepted FCP connection, driven by a test script. Requests are
/// decoded with the real codec.
pub(crate) struct MockNode {
    stream: TcpStream,
    decoder: Decoder,
}

impl MockNode {
    /// Binds an ephemeral listener.
    pub(crate) async fn listen() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    pub(crate) async fn accept(listener: TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        Self {
            stream,
            decoder: Decoder::new(),
        }
    }

    /// Reads the next client request.
    pub(crate) async fn read_message(&mut self) -> Message {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(message) = self.decoder.decode().unwrap() {
                return message;
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed while a request was expected");
            self.decoder.extend(&buf[..n]);
        }
    }

    pub(crate) async fn send(&mut self, message: Message) {
        let wire = Encoder::encode(&message).unwrap();
        self.stream.write_all(&wire).await.unwrap();
    }

    /// Writes raw bytes, for malformed-frame scripts.
    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Reads the `ClientHello` and replies with a canned `NodeHello`.
    pub(crate) async fn handshake(&mut self) -> Message {
        let hello = self.read_message().await;
        assert_eq!(hello.header(), "ClientHello");
        self.send(node_hello()).await;
        hello
    }
}

pub(crate) fn node_hello() -> Message {
    Message::new("NodeHello")
        .with_field("FCPVersion", "2.0")
        .with_field("Node", "Fred")
        .with_field("ConnectionIdentifier", "conn1")
}

pub(crate) fn test_config(port: u16) -> SessionConfig {
    SessionConfig::new("alice", "127.0.0.1", port)
        .with_hello_timeout_secs(5)
        .with_global_commands_timeout_secs(5)
}

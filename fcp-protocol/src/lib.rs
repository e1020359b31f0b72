//! # fcp-protocol
//!
//! Wire protocol implementation for the Freenet Client Protocol (FCP 2.0).
//!
//! This crate provides:
//! - The `Message` type: header, ordered fields, optional binary payload
//! - Line-oriented framing with `EndMessage`/`Data` terminators
//! - An incremental decoder over a byte buffer
//! - Classification of node-originated messages into the fixed variant set

pub mod codec;
pub mod error;
pub mod message;
pub mod server;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use message::Message;
pub use server::{ServerHeader, ServerMessage};

/// FCP protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Default FCP port of a Freenet node.
pub const DEFAULT_PORT: u16 = 9481;

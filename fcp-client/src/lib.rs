//! # fcp-client
//!
//! Asynchronous client for the Freenet Client Protocol (FCP 2.0).
//!
//! This crate provides:
//! - A session multiplexing any number of concurrent requests over one
//!   socket, with per-job response accumulation and completion signalling
//! - A high-level API with one method per FCP command
//! - Timeout, cancellation and session-teardown semantics
//!
//! Logging goes through `tracing`; the embedding application installs the
//! subscriber.

pub mod config;
pub mod error;
pub mod job;
pub mod node;
pub mod session;

mod registry;
#[cfg(test)]
mod testutil;

pub use config::SessionConfig;
pub use error::ClientError;
pub use job::{JobHandle, JobStatus};
pub use node::{
    DdaProbe, DdaResult, GetConfigOptions, GetNodeOptions, GetOptions, ListPeersOptions,
    ModifyPeerOptions, Node, PutOptions,
};
pub use session::FcpSession;

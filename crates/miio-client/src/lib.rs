//! Session client for the Mi Home binary control protocol.
//!
//! [`client::Client`] is the stateful core: handshake lifecycle, stamp
//! projection, request-id allocation, the pending-call registry, per-call
//! timeout, and bounded retry, all built on top of [`miio_proto`]'s wire
//! codec and the [`transport::Transport`] contract this crate defines.
//! [`env::Environment`] decouples the state machine from wall-clock time
//! and randomness so it can be driven deterministically in tests.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod client;
pub mod env;
pub mod error;
mod pending;
pub mod transport;

pub use client::{CallReply, Client, ClientConfig, RemoteErrorBody, DEFAULT_PORT};
pub use error::ClientError;

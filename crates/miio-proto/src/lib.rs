//! Wire format for the Mi Home binary control protocol.
//!
//! A 32-byte header ([`header::PacketHeader`]) framing an AES-128-CBC
//! encrypted payload, assembled into a [`packet::Packet`]. [`request`] turns
//! a logical call into a packet ready for the transport; [`response`] turns
//! an inbound packet back into a classified, decrypted logical reply.
//! Neither module does any JSON parsing; the decrypted plaintext is handed
//! back verbatim for `miio-client` to interpret.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod bytes;
pub mod errors;
pub mod header;
pub mod packet;
pub mod request;
pub mod response;

pub use errors::{ProtocolError, Result};
pub use header::PacketHeader;
pub use packet::Packet;
pub use request::{LogicalRequest, serialize_request};
pub use response::{LogicalResponse, deserialize_response};

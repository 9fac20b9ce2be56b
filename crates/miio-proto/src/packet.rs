//! On-wire frame: a [`PacketHeader`] plus its (possibly empty) payload.

use bytes::Bytes;

use crate::{
    errors::Result,
    header::PacketHeader,
};

/// One parsed or to-be-serialized frame.
///
/// Pure data holder: this type does not know whether the payload is
/// ciphertext or plaintext, or whether the frame is a handshake or a normal
/// exchange. Classification happens one layer up, in [`crate::response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// 32-byte fixed header.
    pub header: PacketHeader,
    /// Payload bytes, `packet_length - 32` of them.
    pub payload: Bytes,
}

impl Packet {
    /// Wrap a header and payload whose lengths already agree
    /// (`header.packet_length() == 32 + payload.len()`).
    #[must_use]
    pub fn new(header: PacketHeader, payload: impl Into<Bytes>) -> Self {
        Self { header, payload: payload.into() }
    }

    /// The header-only handshake request (empty payload).
    #[must_use]
    pub fn handshake_request() -> Self {
        Self { header: PacketHeader::handshake_request(), payload: Bytes::new() }
    }

    /// Serialize header followed by payload.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PacketHeader::SIZE + self.payload.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a complete frame from `bytes`.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::errors::ProtocolError`] from [`PacketHeader::from_bytes`]
    /// (short buffer, bad magic, `packet_length` mismatch).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = PacketHeader::from_bytes(bytes)?;
        let payload = Bytes::copy_from_slice(&bytes[PacketHeader::SIZE..]);
        Ok(Self { header: *header, payload })
    }
}

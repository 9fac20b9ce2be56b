//! Turn a logical request into a wire-ready [`Packet`].

use miio_crypto::{derive_key_iv, encrypt, md5_concat};

use crate::{errors::Result, header::PacketHeader, packet::Packet};

/// A request before it has been framed onto the wire.
///
/// `Normal` carries an already-built JSON plaintext (`{"id":...,"method":
/// ...,"params":...}`); assembling that JSON is `miio-client`'s job, since
/// only it knows the request id allocated for correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalRequest {
    /// Header-only "hello" used to learn the device's id and stamp.
    Handshake,
    /// An encrypted method call.
    Normal {
        /// Device identifier learned from the handshake reply.
        device_id: u32,
        /// Projected stamp for this call (see `miio-client`'s stamp
        /// projection).
        stamp: u32,
        /// JSON-encoded `{"id":...,"method":...,"params":...}` body.
        plaintext_json: Vec<u8>,
    },
}

/// Serialize `request` into a [`Packet`], encrypting and checksumming a
/// `Normal` request's payload under `token`.
///
/// # Errors
///
/// Propagates [`crate::errors::ProtocolError::EncodingOverflow`] if the
/// encrypted payload is too large for the 16-bit `packet_length` field.
pub fn serialize_request(request: &LogicalRequest, token: &[u8; 16]) -> Result<Packet> {
    match request {
        LogicalRequest::Handshake => Ok(Packet::handshake_request()),
        LogicalRequest::Normal { device_id, stamp, plaintext_json } => {
            let (key, iv) = derive_key_iv(token);
            let ciphertext = encrypt(&key, &iv, plaintext_json);

            let mut header = PacketHeader::normal(*device_id, *stamp, ciphertext.len())?;
            let checksum = md5_concat(&[&header.checksum_prefix(), token, &ciphertext]);
            header.set_checksum(checksum);

            Ok(Packet::new(header, ciphertext))
        }
    }
}

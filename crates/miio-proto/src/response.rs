//! Validate an inbound [`Packet`] and classify it as a handshake or normal
//! reply.

use miio_crypto::{derive_key_iv, md5_concat};

use crate::{errors::ProtocolError, header::PacketHeader, packet::Packet};

/// A classified, decrypted inbound reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalResponse {
    /// Reply to a handshake request.
    Handshake {
        /// Device identifier reported by the device.
        device_id: u32,
        /// The device's current monotonic stamp.
        stamp: u32,
    },
    /// Reply to a normal method call, decrypted but not yet JSON-parsed.
    Normal {
        /// Device identifier echoed back.
        device_id: u32,
        /// Device stamp at time of reply.
        stamp: u32,
        /// Decrypted JSON body, passed through verbatim.
        plaintext: Vec<u8>,
    },
}

fn is_handshake_reply(header: &PacketHeader) -> bool {
    header.unknown1() == 0
        && header.packet_length() as usize == PacketHeader::SIZE
        && *header.checksum() == [0u8; 16]
}

/// Classify and, for normal replies, verify and decrypt `packet`.
///
/// # Errors
///
/// - [`ProtocolError::ChecksumMismatch`] if a normal reply's checksum does
///   not match the recomputed one.
/// - [`ProtocolError::DecryptFailure`] if the payload fails to decrypt once
///   the checksum has verified.
///
/// A handshake reply (all-zero `unknown1`, 32-byte frame, all-zero
/// checksum) is accepted unconditionally: it carries no payload and is not
/// checksummed by the device.
pub fn deserialize_response(
    packet: &Packet,
    token: &[u8; 16],
) -> Result<LogicalResponse, ProtocolError> {
    let header = &packet.header;

    if is_handshake_reply(header) {
        return Ok(LogicalResponse::Handshake { device_id: header.device_id(), stamp: header.stamp() });
    }

    let expected_checksum = md5_concat(&[&header.checksum_prefix(), token, &packet.payload]);
    if expected_checksum != *header.checksum() {
        return Err(ProtocolError::ChecksumMismatch);
    }

    let (key, iv) = derive_key_iv(token);
    let plaintext = miio_crypto::decrypt(&key, &iv, &packet.payload)?;

    Ok(LogicalResponse::Normal { device_id: header.device_id(), stamp: header.stamp(), plaintext })
}

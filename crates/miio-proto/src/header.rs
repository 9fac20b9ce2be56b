//! Fixed 32-byte packet header with zero-copy parsing.
//!
//! Field layout (all multi-byte integers big-endian, matching real device
//! firmware byte-for-byte):
//!
//! ```text
//! magic(2) packet_length(2) unknown1(4) device_id(4) stamp(4) checksum(16)
//! ```

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Constant two-byte magic that opens every frame.
pub const MAGIC: u16 = 0x2131;

/// Sentinel value used for `unknown1`, `device_id`, and `stamp` in a
/// handshake request.
pub const HANDSHAKE_SENTINEL: u32 = 0xFFFF_FFFF;

/// Fixed 32-byte on-wire header (big-endian network byte order).
///
/// Stored as raw byte arrays so the struct can be cast directly to and from
/// untrusted network bytes without alignment concerns.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PacketHeader {
    magic: [u8; 2],
    packet_length: [u8; 2],
    unknown1: [u8; 4],
    device_id: [u8; 4],
    stamp: [u8; 4],
    checksum: [u8; 16],
}

impl PacketHeader {
    /// Size of the serialized header in bytes.
    pub const SIZE: usize = 32;

    /// Build the header-only handshake request: every field a sentinel.
    #[must_use]
    pub fn handshake_request() -> Self {
        Self {
            magic: MAGIC.to_be_bytes(),
            packet_length: (Self::SIZE as u16).to_be_bytes(),
            unknown1: HANDSHAKE_SENTINEL.to_be_bytes(),
            device_id: HANDSHAKE_SENTINEL.to_be_bytes(),
            stamp: HANDSHAKE_SENTINEL.to_be_bytes(),
            checksum: [0xFF; 16],
        }
    }

    /// Build a normal-request header with a zeroed checksum placeholder.
    ///
    /// The caller fills in the real checksum via [`Self::set_checksum`] once
    /// the ciphertext is known (checksum covers the header prefix, token,
    /// and ciphertext together).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::EncodingOverflow`] if `payload_len` plus the
    /// header size does not fit in the 16-bit `packet_length` field.
    pub fn normal(device_id: u32, stamp: u32, payload_len: usize) -> Result<Self> {
        let packet_length = crate::bytes::try_u16_from_usize(Self::SIZE + payload_len)?;
        Ok(Self {
            magic: MAGIC.to_be_bytes(),
            packet_length: packet_length.to_be_bytes(),
            unknown1: 0u32.to_be_bytes(),
            device_id: device_id.to_be_bytes(),
            stamp: stamp.to_be_bytes(),
            checksum: [0u8; 16],
        })
    }

    /// Parse a header from the front of `bytes`, validating magic and that
    /// `packet_length` matches the buffer's total length.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooShort`] if `bytes` is shorter than
    ///   [`Self::SIZE`].
    /// - [`ProtocolError::InvalidMagic`] if the magic bytes are wrong.
    /// - [`ProtocolError::LengthMismatch`] if `packet_length` does not equal
    ///   `bytes.len()`.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        let magic = u16::from_be_bytes(header.magic);
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic { actual: magic });
        }

        let declared = header.packet_length() as usize;
        if declared != bytes.len() {
            return Err(ProtocolError::LengthMismatch { declared, actual: bytes.len() });
        }

        Ok(header)
    }

    /// Serialize to the 32-byte wire representation.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Framing magic, always [`MAGIC`] on a successfully-parsed header.
    #[must_use]
    pub fn magic(&self) -> u16 {
        u16::from_be_bytes(self.magic)
    }

    /// Total frame length (header + payload) in bytes.
    #[must_use]
    pub fn packet_length(&self) -> u16 {
        u16::from_be_bytes(self.packet_length)
    }

    /// `unknown1`: all-ones on a handshake request, all-zeros otherwise.
    #[must_use]
    pub fn unknown1(&self) -> u32 {
        u32::from_be_bytes(self.unknown1)
    }

    /// Device identifier reported by the device in its handshake reply.
    #[must_use]
    pub fn device_id(&self) -> u32 {
        u32::from_be_bytes(self.device_id)
    }

    /// Monotonic device stamp (handshake reply) or projected stamp (normal
    /// request).
    #[must_use]
    pub fn stamp(&self) -> u32 {
        u32::from_be_bytes(self.stamp)
    }

    /// Raw 16-byte checksum field.
    #[must_use]
    pub fn checksum(&self) -> &[u8; 16] {
        &self.checksum
    }

    /// The 16-byte prefix (`magic || packet_length || unknown1 || device_id
    /// || stamp`) that feeds the checksum construction defined by the wire
    /// format. Independent of the checksum field's own value.
    #[must_use]
    pub fn checksum_prefix(&self) -> [u8; 16] {
        let bytes = self.to_bytes();
        let mut prefix = [0u8; 16];
        prefix.copy_from_slice(&bytes[..16]);
        prefix
    }

    /// Overwrite the checksum field.
    pub fn set_checksum(&mut self, checksum: [u8; 16]) {
        self.checksum = checksum;
    }
}

impl std::fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHeader")
            .field("magic", &format!("{:#06x}", self.magic()))
            .field("packet_length", &self.packet_length())
            .field("unknown1", &format!("{:#010x}", self.unknown1()))
            .field("device_id", &self.device_id())
            .field("stamp", &self.stamp())
            .field("checksum", &hex_string(&self.checksum))
            .finish()
    }
}

impl PartialEq for PacketHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PacketHeader {}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn header_size_is_32_bytes() {
        assert_eq!(std::mem::size_of::<PacketHeader>(), PacketHeader::SIZE);
    }

    #[test]
    fn handshake_request_fields_are_sentinels() {
        let header = PacketHeader::handshake_request();
        assert_eq!(header.magic(), MAGIC);
        assert_eq!(header.packet_length(), 32);
        assert_eq!(header.unknown1(), HANDSHAKE_SENTINEL);
        assert_eq!(header.device_id(), HANDSHAKE_SENTINEL);
        assert_eq!(header.stamp(), HANDSHAKE_SENTINEL);
        assert_eq!(header.checksum(), &[0xFFu8; 16]);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn normal_header_round_trips() {
        let mut header = PacketHeader::normal(5, 10, 4).expect("small payload fits");
        header.set_checksum([0x11; 16]);

        let bytes = header.to_bytes();
        let parsed = PacketHeader::from_bytes(&bytes).expect("parses back");

        assert_eq!(*parsed, header);
        assert_eq!(parsed.device_id(), 5);
        assert_eq!(parsed.stamp(), 10);
        assert_eq!(parsed.packet_length(), 36);
    }

    #[test]
    fn reject_short_buffer() {
        let short = [0u8; 10];
        assert_eq!(
            PacketHeader::from_bytes(&short),
            Err(ProtocolError::FrameTooShort { expected: 32, actual: 10 })
        );
    }

    #[test]
    fn reject_invalid_magic() {
        let mut bytes = PacketHeader::handshake_request().to_bytes();
        bytes[0] = 0x00;
        assert_eq!(
            PacketHeader::from_bytes(&bytes),
            Err(ProtocolError::InvalidMagic { actual: u16::from_be_bytes([0x00, bytes[1]]) })
        );
    }

    #[test]
    fn reject_length_mismatch() {
        let bytes = PacketHeader::handshake_request().to_bytes();
        let mut padded = bytes.to_vec();
        padded.push(0xAA);
        assert_eq!(
            PacketHeader::from_bytes(&padded),
            Err(ProtocolError::LengthMismatch { declared: 32, actual: 33 })
        );
    }

    proptest! {
        #[test]
        #[allow(clippy::expect_used)]
        fn normal_header_round_trip_any_fields(device_id in any::<u32>(), stamp in any::<u32>(), payload_len in 0usize..=2000, checksum in any::<[u8; 16]>()) {
            let mut header = PacketHeader::normal(device_id, stamp, payload_len)
                .expect("payload_len bounded well under u16::MAX");
            header.set_checksum(checksum);

            let bytes = header.to_bytes();
            let parsed = PacketHeader::from_bytes(&bytes).expect("should parse");
            prop_assert_eq!(*parsed, header);
            prop_assert_eq!(parsed.device_id(), device_id);
            prop_assert_eq!(parsed.stamp(), stamp);
            prop_assert_eq!(*parsed.checksum(), checksum);
        }
    }
}

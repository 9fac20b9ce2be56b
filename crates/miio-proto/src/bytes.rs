//! Big-endian integer framing helpers.
//!
//! Everything the wire format needs beyond what `zerocopy` already gives the
//! header: narrowing a caller-supplied width (`usize`, `u64`) down to the
//! wire's fixed-width big-endian fields without ever silently truncating.

use crate::errors::ProtocolError;

/// Encode a `u32` as 4 big-endian bytes.
#[must_use]
pub fn u32_be(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Encode a `u16` as 2 big-endian bytes.
#[must_use]
pub fn u16_be(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Narrow a `usize` length to the `u16` `packet_length` field.
///
/// # Errors
///
/// Returns [`ProtocolError::EncodingOverflow`] if `value` does not fit in 16
/// bits (a frame that large cannot exist on this wire format).
pub fn try_u16_from_usize(value: usize) -> Result<u16, ProtocolError> {
    u16::try_from(value).map_err(|_| ProtocolError::EncodingOverflow { value: value as u64, width: 16 })
}

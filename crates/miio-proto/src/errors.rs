//! Wire-level error taxonomy.

use thiserror::Error;

/// Errors raised while parsing or validating a wire frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer shorter than the fixed 32-byte header.
    #[error("frame too short: need at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes actually present.
        actual: usize,
    },

    /// The first two bytes were not `0x21 0x31`.
    #[error("invalid magic bytes: expected 0x2131, got {actual:#06x}")]
    InvalidMagic {
        /// The magic value actually found.
        actual: u16,
    },

    /// `packet_length` did not match the length of the buffer it came from.
    #[error("packet_length {declared} does not match buffer length {actual}")]
    LengthMismatch {
        /// `packet_length` as declared in the header.
        declared: usize,
        /// Actual buffer length.
        actual: usize,
    },

    /// Checksum recomputed over a received normal reply did not match the
    /// one carried in the header.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// AES-128-CBC decryption of a payload failed.
    #[error("payload decryption failed")]
    DecryptFailure(#[from] miio_crypto::CryptoError),

    /// A value could not be losslessly narrowed to the wire's integer width.
    #[error("value {value} does not fit in a {width}-bit wire field")]
    EncodingOverflow {
        /// The value that failed to narrow.
        value: u64,
        /// The wire field's bit width.
        width: u8,
    },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

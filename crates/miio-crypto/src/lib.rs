//! Wire cryptography for the Mi Home binary control protocol.
//!
//! Pure functions, no protocol framing. Callers (`miio-proto`) provide the
//! byte sequences; this crate only knows how to turn a device token into a
//! key/IV pair, run AES-128-CBC, and chain MD5 over a sequence of buffers.
//!
//! # Key derivation
//!
//! ```text
//! token (16 bytes, pre-shared)
//!        │
//!        ├─ MD5(token)        -> K  (AES-128 key)
//!        └─ MD5(K || token)   -> IV (AES-128-CBC IV)
//! ```
//!
//! `K`/`IV` are re-derived from the token on every call; there is no key
//! caching here, since the device itself recomputes them the same way on
//! every packet.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use md5::{Digest, Md5};
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Length in bytes of the pre-shared device token.
pub const TOKEN_SIZE: usize = 16;

/// Errors from the cryptographic layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AES-128-CBC decryption failed (bad padding or corrupted ciphertext).
    #[error("AES-128-CBC decryption failed (bad padding or corrupted ciphertext)")]
    DecryptFailure,
}

/// MD5 digest over the in-order concatenation of `parts`.
///
/// This is the one chaining primitive the wire format builds everything
/// else from: key derivation (`derive_key_iv`) and the packet checksum
/// (`miio_proto`) are both instances of "hash some buffers back to back".
#[must_use]
pub fn md5_concat(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Derive the AES-128 key and CBC IV for a device token.
///
/// `K = MD5(token)`, `IV = MD5(K || token)`.
#[must_use]
pub fn derive_key_iv(token: &[u8; TOKEN_SIZE]) -> ([u8; 16], [u8; 16]) {
    let key = md5_concat(&[token]);
    let iv = md5_concat(&[&key, token]);
    (key, iv)
}

/// Encrypt `plaintext` with AES-128-CBC + PKCS#7 padding.
///
/// An empty plaintext produces an empty ciphertext (no padding block is
/// emitted); the wire format reserves this case for the handshake, which
/// never calls through this path in practice.
#[must_use]
pub fn encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    if plaintext.is_empty() {
        return Vec::new();
    }
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt `ciphertext` with AES-128-CBC, validating and stripping PKCS#7
/// padding.
///
/// An empty ciphertext decrypts to an empty plaintext, mirroring
/// [`encrypt`]'s handling of the empty case.
///
/// # Errors
///
/// Returns [`CryptoError::DecryptFailure`] if the ciphertext is not a
/// whole number of AES blocks or the trailing padding is malformed.
pub fn decrypt(key: &[u8; 16], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Ok(Vec::new());
    }
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptFailure)
}

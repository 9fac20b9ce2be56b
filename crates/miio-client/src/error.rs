//! Error taxonomy for the session client.
//!
//! Distinguishes retryable transport/wire failures from semantic failures
//! (`RemoteError`) and session-lifecycle failures (`SessionClosed`) that
//! must never be retried.

use thiserror::Error;

/// Errors a `Client` call can fail with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// A received frame failed to parse or validate.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A normal reply's checksum did not match the recomputed one.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// AES-128-CBC decryption of a reply's payload failed.
    #[error("payload decryption failed")]
    DecryptFailure,

    /// The transport failed to send or the socket reported an error.
    #[error("I/O error: {0}")]
    IoError(String),

    /// No reply arrived before the per-call deadline.
    #[error("timed out waiting for a reply")]
    Timeout,

    /// All `max_attempts` retries were exhausted.
    #[error("retry attempts exhausted")]
    RetryExhausted {
        /// The error from the last attempt.
        #[source]
        last: Box<ClientError>,
    },

    /// The device's reply body itself carried an `error` field.
    #[error("device returned an error ({code}): {message}")]
    RemoteError {
        /// The device-reported error code.
        code: String,
        /// The device-reported error message.
        message: String,
    },

    /// The client has been closed; no further calls are possible.
    #[error("session closed")]
    SessionClosed,

    /// A reply body was not valid JSON, or lacked fields the caller needed.
    #[error("invalid response body: {0}")]
    InvalidResponseBody(String),

    /// The supplied token string was not 32 hex characters.
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl ClientError {
    /// Whether this error, observed during a call attempt, should consume
    /// one retry attempt rather than fail the call outright.
    ///
    /// `RemoteError` and `SessionClosed` are semantic/lifecycle failures and
    /// are never retryable; everything wire- or transport-level is.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame(_)
                | Self::ChecksumMismatch
                | Self::DecryptFailure
                | Self::IoError(_)
                | Self::Timeout
        )
    }
}

impl From<miio_proto::ProtocolError> for ClientError {
    fn from(err: miio_proto::ProtocolError) -> Self {
        match err {
            miio_proto::ProtocolError::ChecksumMismatch => Self::ChecksumMismatch,
            miio_proto::ProtocolError::DecryptFailure(_) => Self::DecryptFailure,
            other => Self::MalformedFrame(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

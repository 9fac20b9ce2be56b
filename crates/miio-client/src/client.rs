//! The session client: handshake lifecycle, stamp projection, request-id
//! allocation, the pending-call registry, per-call timeout, and bounded
//! retry.
//!
//! This is the stateful core the rest of the workspace exists to serve:
//! [`miio_proto`] turns a logical request/response into wire bytes and
//! back, [`crate::transport::Transport`] moves those bytes over the
//! network; `Client` is the only thing that knows what a *call* is.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use miio_crypto::{TOKEN_SIZE, derive_key_iv};
use miio_proto::{LogicalRequest, LogicalResponse, Packet, deserialize_response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::env::{Environment, ProdEnv};
use crate::error::ClientError;
use crate::pending::PendingRegistry;
use crate::transport::{Transport, Unsubscribe};

/// Default UDP port Mi Home devices listen on.
pub const DEFAULT_PORT: u16 = 54321;

/// Default handshake validity window before a call forces a re-handshake.
pub const DEFAULT_HANDSHAKE_TTL: Duration = Duration::from_secs(10);

/// Default per-call reply deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum attempts (first try plus retries) per user call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay observed after a freshly-performed handshake before sending the
/// next normal request; some device firmware drops requests arriving too
/// close behind the handshake reply.
const POST_HANDSHAKE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound (exclusive) for the randomly-seeded initial request counter.
const INITIAL_COUNTER_BOUND: u32 = 10_000;

/// Tunables for a [`Client`] instance. All fields have sensible defaults
/// via [`Default`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a handshake stays valid before a call forces a re-handshake.
    pub handshake_ttl: Duration,
    /// Deadline for a single reply (handshake or normal) before `Timeout`.
    pub request_timeout: Duration,
    /// Maximum attempts (clamped to at least 1) per user call before
    /// `RetryExhausted`.
    pub max_attempts: u32,
    /// Explicit seed for `request_counter`; `None` picks a random value in
    /// `[0, 10_000)` via the environment's RNG.
    pub initial_counter: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_ttl: DEFAULT_HANDSHAKE_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_counter: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HandshakeInfo<I> {
    device_id: u32,
    device_stamp: u32,
    local_handshake_instant: I,
}

struct ClientState<I> {
    request_counter: u32,
    handshake: Option<HandshakeInfo<I>>,
    pending: PendingRegistry,
    closed: bool,
}

/// JSON-RPC envelope assembled for every normal call.
#[derive(Debug, Serialize)]
struct CallEnvelope<'a> {
    id: u32,
    method: &'a str,
    params: Value,
}

/// The device's reply body to a normal call, handed back verbatim by
/// [`Client::send`]. [`Client::simple_send`] additionally inspects
/// [`Self::error`] and turns it into [`ClientError::RemoteError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallReply {
    /// Echoes the request id this reply answers.
    pub id: u32,
    /// Success payload, present when the device did not report an error.
    #[serde(default)]
    pub result: Option<Value>,
    /// Device-reported execution time in milliseconds, when present.
    #[serde(default, rename = "exec_time")]
    pub exec_time: Option<Value>,
    /// Device-reported error, present when the call failed semantically.
    #[serde(default)]
    pub error: Option<RemoteErrorBody>,
}

/// The `error` object a device embeds in a reply body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteErrorBody {
    /// Device-reported error code. Devices disagree on whether this is a
    /// string or a number, so it is read as whatever JSON the reply used
    /// and stringified when surfaced as [`ClientError::RemoteError`].
    #[serde(default)]
    pub code: Value,
    /// Device-reported human-readable error message.
    #[serde(default)]
    pub message: String,
}

/// Session client bound to a single device.
///
/// Owns the handshake tuple, the request-id counter, and the pending-call
/// registry; multiplexes concurrent calls over one [`Transport`]. Cloning
/// a `Client` shares all of this state; every clone is a handle onto the
/// same session, matching a "single-owner, many concurrent callers"
/// shape.
pub struct Client<E: Environment, T: Transport> {
    env: E,
    transport: T,
    token: [u8; TOKEN_SIZE],
    target: SocketAddr,
    config: ClientConfig,
    state: Arc<Mutex<ClientState<E::Instant>>>,
    subscription: Arc<std::sync::Mutex<Option<Unsubscribe>>>,
}

impl<E: Environment, T: Transport> Clone for Client<E, T> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
            transport: self.transport.clone(),
            token: self.token,
            target: self.target,
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            subscription: Arc::clone(&self.subscription),
        }
    }
}

impl<E: Environment, T: Transport> Client<E, T> {
    /// Build a client against an injected [`Environment`], for tests or
    /// alternate runtimes. Production code normally wants
    /// [`Client::new`]/[`Client::from_hex_token`] instead.
    #[must_use]
    pub fn with_env(env: E, transport: T, token: [u8; TOKEN_SIZE], target: SocketAddr) -> Self {
        Self::with_config(env, transport, token, target, ClientConfig::default())
    }

    /// As [`Self::with_env`], with an explicit [`ClientConfig`].
    #[must_use]
    pub fn with_config(
        env: E,
        transport: T,
        token: [u8; TOKEN_SIZE],
        target: SocketAddr,
        config: ClientConfig,
    ) -> Self {
        let initial_counter =
            config.initial_counter.unwrap_or_else(|| env.random_u32_below(INITIAL_COUNTER_BOUND));
        Self {
            env,
            transport,
            token,
            target,
            config,
            state: Arc::new(Mutex::new(ClientState {
                request_counter: initial_counter,
                handshake: None,
                pending: PendingRegistry::new(),
                closed: false,
            })),
            subscription: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Subscribe to the transport. Safe to call more than once: a later
    /// call replaces the earlier subscription rather than stacking a
    /// second one. Returns a handle the caller can use to tear the
    /// subscription down early; [`Self::close`] tears it down too.
    pub fn start(&self) -> Unsubscribe {
        let target = self.target;
        let token = self.token;
        let state = Arc::clone(&self.state);

        let real = self.transport.subscribe(move |bytes, remote| {
            if remote != target {
                trace!(%remote, expected = %target, "dropping datagram from unexpected peer");
                return;
            }
            dispatch_inbound(bytes, &token, &state);
        });

        #[allow(clippy::expect_used)]
        let mut slot = self.subscription.lock().expect("subscription mutex poisoned");
        if let Some(previous) = slot.take() {
            previous.unsubscribe();
        }
        *slot = Some(real);
        drop(slot);

        let subscription = Arc::clone(&self.subscription);
        Unsubscribe::new(move || {
            #[allow(clippy::expect_used)]
            let mut slot = subscription.lock().expect("subscription mutex poisoned");
            if let Some(sub) = slot.take() {
                sub.unsubscribe();
            }
        })
    }

    /// Force a re-handshake on the next call, discarding any cached
    /// `(device_id, stamp)` tuple.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.handshake = None;
    }

    /// Cancel every pending call with [`ClientError::SessionClosed`] and
    /// unsubscribe from the transport. Further calls fail immediately.
    pub async fn close(&self) {
        #[allow(clippy::expect_used)]
        let mut slot = self.subscription.lock().expect("subscription mutex poisoned");
        if let Some(sub) = slot.take() {
            sub.unsubscribe();
        }
        drop(slot);

        let mut state = self.state.lock().await;
        state.closed = true;
        state.pending.drain();
    }

    /// Issue `method(params)` against the device and return its raw reply
    /// body, retrying up to [`ClientConfig::max_attempts`] times on
    /// retryable failure. Does not inspect the reply's `error` field; see
    /// [`Self::simple_send`] for that.
    ///
    /// # Errors
    ///
    /// Any [`ClientError`]; non-retryable kinds (`SessionClosed`) are
    /// returned immediately, retryable kinds (`Timeout`, `IoError`,
    /// `ChecksumMismatch`, `MalformedFrame`, `DecryptFailure`) are retried
    /// and, on exhaustion, wrapped in [`ClientError::RetryExhausted`].
    pub async fn send(&self, method: &str, params: Value) -> Result<CallReply, ClientError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.call_once(method, &params).await {
                Ok(reply) => return Ok(reply),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    debug!(attempt, attempts, error = %err, "call attempt failed");
                    last_err = Some(err);
                }
            }
        }

        #[allow(clippy::expect_used)]
        Err(ClientError::RetryExhausted {
            last: Box::new(last_err.expect("loop runs at least once for max_attempts >= 1")),
        })
    }

    /// As [`Self::send`], but treats a reply body carrying an `error`
    /// field as a terminal (non-retried) failure.
    ///
    /// # Errors
    ///
    /// Everything [`Self::send`] can fail with, plus
    /// [`ClientError::RemoteError`] when the device's reply body itself
    /// reports a failure.
    pub async fn simple_send(&self, method: &str, params: Value) -> Result<(), ClientError> {
        let reply = self.send(method, params).await?;
        if let Some(error) = reply.error {
            let code = match error.code {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(ClientError::RemoteError { code, message: error.message });
        }
        Ok(())
    }

    /// One full attempt of the per-call protocol: ensure a live handshake,
    /// allocate a request id, register it,
    /// serialize and send, then await resolution or the deadline.
    async fn call_once(&self, method: &str, params: &Value) -> Result<CallReply, ClientError> {
        let (device_id, stamp, request_id, rx) = {
            let (hs_device_id, hs_device_stamp, hs_instant) = self.ensure_handshake().await?;

            let mut state = self.state.lock().await;
            if state.closed {
                return Err(ClientError::SessionClosed);
            }

            let elapsed_secs = (self.env.now() - hs_instant).as_secs();
            let stamp = hs_device_stamp.wrapping_add(u32::try_from(elapsed_secs).unwrap_or(u32::MAX));

            state.request_counter = state.request_counter.wrapping_add(1);
            let request_id = state.request_counter;
            let rx = state.pending.register_call(request_id);

            (hs_device_id, stamp, request_id, rx)
        };

        let envelope = CallEnvelope { id: request_id, method, params: params.clone() };
        let plaintext_json = serde_json::to_vec(&envelope)
            .map_err(|err| ClientError::InvalidResponseBody(err.to_string()))?;

        let request = LogicalRequest::Normal { device_id, stamp, plaintext_json };
        let packet = miio_proto::serialize_request(&request, &self.token)?;

        self.transport.send(packet.to_bytes(), self.target).await?;
        trace!(request_id, method, "sent normal request");

        let outcome: Result<Vec<u8>, ClientError> = tokio::select! {
            res = rx => res.unwrap_or(Err(ClientError::SessionClosed)),
            () = self.env.sleep(self.config.request_timeout) => {
                let mut state = self.state.lock().await;
                state.pending.remove_call(request_id);
                Err(ClientError::Timeout)
            }
        };

        let plaintext = outcome?;
        serde_json::from_slice::<CallReply>(&plaintext)
            .map_err(|err| ClientError::InvalidResponseBody(err.to_string()))
    }

    /// Ensure a live handshake, performing one if none is cached or the
    /// cached one has expired, and return `(device_id, device_stamp,
    /// local_handshake_instant)` for stamp projection.
    ///
    /// Concurrent callers discovering the same missing/expired handshake
    /// wait on the single in-flight attempt rather than each sending their
    /// own: handshakes are serialized.
    async fn ensure_handshake(&self) -> Result<(u32, u32, E::Instant), ClientError> {
        let now = self.env.now();

        enum Join<I> {
            Cached(u32, u32, I),
            Wait { send_needed: bool, rx: tokio::sync::oneshot::Receiver<(u32, u32)> },
        }

        let join = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(ClientError::SessionClosed);
            }

            if let Some(hs) = state.handshake {
                if now - hs.local_handshake_instant <= self.config.handshake_ttl {
                    Join::Cached(hs.device_id, hs.device_stamp, hs.local_handshake_instant)
                } else {
                    let send_needed = !state.pending.handshake_in_flight();
                    let rx = state.pending.register_handshake();
                    Join::Wait { send_needed, rx }
                }
            } else {
                let send_needed = !state.pending.handshake_in_flight();
                let rx = state.pending.register_handshake();
                Join::Wait { send_needed, rx }
            }
        };

        let (send_needed, rx) = match join {
            Join::Cached(device_id, stamp, instant) => return Ok((device_id, stamp, instant)),
            Join::Wait { send_needed, rx } => (send_needed, rx),
        };

        if send_needed {
            let packet = miio_proto::serialize_request(&LogicalRequest::Handshake, &self.token)
                .unwrap_or_else(|_| unreachable!("handshake serialization never fails"));
            self.transport.send(packet.to_bytes(), self.target).await?;
            debug!("sent handshake request");
        }

        let outcome: Result<(u32, u32), ClientError> = tokio::select! {
            res = rx => res.map_err(|_| ClientError::SessionClosed),
            () = self.env.sleep(self.config.request_timeout) => {
                let mut state = self.state.lock().await;
                state.pending.clear_handshake_waiters();
                Err(ClientError::Timeout)
            }
        };
        let (device_id, stamp) = outcome?;

        if send_needed {
            let mut state = self.state.lock().await;
            state.handshake = Some(HandshakeInfo { device_id, device_stamp: stamp, local_handshake_instant: now });
            drop(state);
            self.env.sleep(POST_HANDSHAKE_DELAY).await;
        }

        Ok((device_id, stamp, now))
    }
}

impl<T: Transport> Client<ProdEnv, T> {
    /// Build a production client from a 32-hex-character token string.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidToken`] if `token_hex` is not exactly 32 hex
    /// digits.
    pub fn new(transport: T, token_hex: &str, address: IpAddr, port: Option<u16>) -> Result<Self, ClientError> {
        let token = parse_token_hex(token_hex)?;
        let target = SocketAddr::new(address, port.unwrap_or(DEFAULT_PORT));
        Ok(Self::with_env(ProdEnv, transport, token, target))
    }
}

/// Decode a 32-character hex token string into its 16 raw bytes.
fn parse_token_hex(token_hex: &str) -> Result<[u8; TOKEN_SIZE], ClientError> {
    if token_hex.len() != TOKEN_SIZE * 2 {
        return Err(ClientError::InvalidToken(format!(
            "expected {} hex characters, got {}",
            TOKEN_SIZE * 2,
            token_hex.len()
        )));
    }

    let mut token = [0u8; TOKEN_SIZE];
    for (i, byte) in token.iter_mut().enumerate() {
        let hex_pair = token_hex.get(i * 2..i * 2 + 2).ok_or_else(|| {
            ClientError::InvalidToken(format!("token is not valid ASCII hex at byte {i}"))
        })?;
        *byte = u8::from_str_radix(hex_pair, 16)
            .map_err(|_| ClientError::InvalidToken(format!("invalid hex digit at byte {i}")))?;
    }
    Ok(token)
}

/// Parse, classify, and route one inbound datagram already known to come
/// from the target device.
///
/// A handshake reply resolves every current handshake waiter. A normal
/// reply is decrypted first (independent of checksum validity) so that a
/// tampered checksum can still be routed to the specific pending call it
/// belongs to: wire-level errors from a specific datagram are surfaced
/// only to the pending call whose id matched. If no id can be
/// recovered at all (a parse failure, or a payload that fails to decrypt)
/// the datagram is dropped with a log; this is not an error, since late
/// or corrupt replies are expected background noise.
fn dispatch_inbound<I: Copy + Send + 'static>(
    bytes: &[u8],
    token: &[u8; TOKEN_SIZE],
    state: &Arc<Mutex<ClientState<I>>>,
) {
    let packet = match Packet::decode(bytes) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(error = %err, "dropping malformed frame");
            return;
        }
    };

    match classify(&packet, token) {
        Classified::Handshake { device_id, stamp } => {
            let state = Arc::clone(state);
            tokio::spawn(async move {
                let mut state = state.lock().await;
                state.pending.resolve_handshake(device_id, stamp);
            });
        }
        Classified::Normal { request_id, outcome } => {
            let state = Arc::clone(state);
            tokio::spawn(async move {
                let mut state = state.lock().await;
                state.pending.resolve_call(request_id, outcome);
            });
        }
        Classified::Unroutable => {
            warn!("dropping reply with no recoverable request id");
        }
    }
}

enum Classified {
    Handshake { device_id: u32, stamp: u32 },
    Normal { request_id: u32, outcome: Result<Vec<u8>, ClientError> },
    Unroutable,
}

/// Classify a parsed packet, deliberately not using
/// [`miio_proto::deserialize_response`] for the normal-reply path: that
/// function rejects a tampered checksum before decrypting, but this
/// dispatcher needs the id inside the ciphertext *regardless* of checksum
/// validity so it can route `ChecksumMismatch` to the one call it tampers.
fn classify(packet: &Packet, token: &[u8; TOKEN_SIZE]) -> Classified {
    // A handshake reply carries no payload and is not checksummed, so
    // `deserialize_response` is exactly right for it; reuse it, falling
    // through to the manual path for anything it didn't classify as one.
    if let Ok(LogicalResponse::Handshake { device_id, stamp }) = deserialize_response(packet, token) {
        return Classified::Handshake { device_id, stamp };
    }

    let header = &packet.header;
    let expected_checksum = miio_crypto::md5_concat(&[&header.checksum_prefix(), token, &packet.payload]);
    let checksum_ok = expected_checksum == *header.checksum();

    let (key, iv) = derive_key_iv(token);
    let plaintext = match miio_crypto::decrypt(&key, &iv, &packet.payload) {
        Ok(plaintext) => plaintext,
        Err(_) => return Classified::Unroutable,
    };

    let Some(request_id) = extract_json_id(&plaintext) else {
        return Classified::Unroutable;
    };

    let outcome = if checksum_ok { Ok(plaintext) } else { Err(ClientError::ChecksumMismatch) };
    Classified::Normal { request_id, outcome }
}

/// Best-effort extraction of the `id` field from a decrypted reply body,
/// without requiring the rest of the body to match [`CallReply`]: a
/// reply with a tampered checksum may still carry a perfectly valid id.
fn extract_json_id(plaintext: &[u8]) -> Option<u32> {
    let value: Value = serde_json::from_slice(plaintext).ok()?;
    let id = value.get("id")?.as_u64()?;
    u32::try_from(id).ok()
}

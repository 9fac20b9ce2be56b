//! The pending-call registry: in-flight requests keyed by `request_id`,
//! each resolved at most once by either an inbound reply or a deadline
//! firing.
//!
//! Modeled as a map from id to a one-shot completion handle owned by the
//! client itself, so the transport's inbound callback only needs a
//! reference to the shared registry, never a strong reference back to the
//! client.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::ClientError;

/// Registry of in-flight normal calls and (at most one) in-flight
/// handshake, demultiplexed by `request_id`.
///
/// A call resolves with `Err` rather than `Ok` when the inbound reply
/// itself carried a wire-level problem (currently: a checksum mismatch
/// whose ciphertext still decrypted cleanly enough to recover the id);
/// see `client::Client`'s dispatch callback for how that distinction is
/// made.
#[derive(Default)]
pub(crate) struct PendingRegistry {
    calls: HashMap<u32, oneshot::Sender<Result<Vec<u8>, ClientError>>>,
    /// Every caller currently waiting on the one in-flight handshake.
    /// Resolved together, since several concurrent calls may discover the
    /// same expired-or-missing handshake and must wait on it rather than
    /// each starting their own (spec: handshake is serialized).
    handshake_waiters: Vec<oneshot::Sender<(u32, u32)>>,
}

impl PendingRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register `request_id`, returning the receiving half the caller
    /// should await. At most one entry may exist per id.
    pub(crate) fn register_call(
        &mut self,
        request_id: u32,
    ) -> oneshot::Receiver<Result<Vec<u8>, ClientError>> {
        let (tx, rx) = oneshot::channel();
        self.calls.insert(request_id, tx);
        rx
    }

    /// Resolve the pending call for `request_id` with its outcome (a
    /// decrypted plaintext, or a wire-level error specific to that reply).
    /// Returns `false` if no such call is pending: a late reply after
    /// timeout, which is not an error.
    pub(crate) fn resolve_call(&mut self, request_id: u32, outcome: Result<Vec<u8>, ClientError>) -> bool {
        match self.calls.remove(&request_id) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Remove the pending entry for `request_id` without resolving it
    /// (called when its deadline fires).
    pub(crate) fn remove_call(&mut self, request_id: u32) {
        self.calls.remove(&request_id);
    }

    /// Whether a handshake is already in flight; callers must wait for it
    /// rather than send a second one.
    pub(crate) fn handshake_in_flight(&self) -> bool {
        !self.handshake_waiters.is_empty()
    }

    /// Join the in-flight handshake (or start tracking a new one). Every
    /// caller that registers here, the one who sends the request and
    /// everyone who merely waits on it, is resolved together.
    pub(crate) fn register_handshake(&mut self) -> oneshot::Receiver<(u32, u32)> {
        let (tx, rx) = oneshot::channel();
        self.handshake_waiters.push(tx);
        rx
    }

    /// Resolve every waiter on the in-flight handshake with
    /// `(device_id, stamp)`.
    pub(crate) fn resolve_handshake(&mut self, device_id: u32, stamp: u32) {
        for tx in self.handshake_waiters.drain(..) {
            let _ = tx.send((device_id, stamp));
        }
    }

    /// Abandon the in-flight handshake without resolving anyone. Called
    /// when a waiter's own deadline fires, so the next call attempts a
    /// fresh handshake rather than waiting on one nothing will ever answer.
    pub(crate) fn clear_handshake_waiters(&mut self) {
        self.handshake_waiters.clear();
    }

    /// Drain every pending call and every handshake waiter, to be dropped
    /// by the caller. Dropping a `oneshot::Sender` makes the matching
    /// receiver observe a closed channel, which `close()` turns into
    /// `SessionClosed` for each waiting caller.
    pub(crate) fn drain(&mut self) {
        self.calls.clear();
        self.handshake_waiters.clear();
    }

    #[cfg(test)]
    pub(crate) fn pending_call_count(&self) -> usize {
        self.calls.len()
    }
}

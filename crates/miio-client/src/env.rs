//! Environment abstraction for deterministic testing.
//!
//! Decouples the session client from wall-clock time and randomness so its
//! handshake-expiry, stamp-projection, and retry logic can be driven with
//! synthetic instants in tests instead of real sleeps.

use std::time::Duration;

/// Abstract environment providing time, sleeping, and randomness.
///
/// # Invariants
///
/// - `now()` never goes backwards within a single client's lifetime.
/// - `random_bytes()` uses a cryptographically secure source in production.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type this environment works in. Production uses
    /// [`std::time::Instant`]; tests use a manually-advanced virtual clock.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Suspend for `duration`. The only async method on this trait; driver
    /// code (the retry loop, the post-handshake delay) calls it; the wire
    /// codec and pure state transitions never do.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// A random `u32` in `[0, bound)`, used to seed the initial request
    /// counter. `bound` must be nonzero.
    fn random_u32_below(&self, bound: u32) -> u32 {
        let mut bytes = [0u8; 4];
        self.random_bytes(&mut bytes);
        u32::from_be_bytes(bytes) % bound
    }
}

/// Production [`Environment`] backed by `std::time::Instant`, `tokio::time`,
/// and the OS's cryptographic RNG (via the `rand` crate's default source).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProdEnv;

impl Environment for ProdEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::thread_rng().fill_bytes(buffer);
    }
}

/// Deterministic [`Environment`] for tests: a manually-advanced virtual
/// clock and a seeded, reproducible byte stream in place of real entropy.
pub mod test_utils {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::Environment;

    /// A virtual instant: elapsed [`Duration`] since the [`MockEnv`] was
    /// created.
    pub type MockInstant = Duration;

    /// Deterministic environment: time only moves when [`MockEnv::advance`]
    /// is called, and randomness is a fixed, reproducible byte sequence
    /// (a counter-keyed MD5-style stream, not secure, not meant to be).
    #[derive(Clone)]
    pub struct MockEnv {
        now: Arc<Mutex<Duration>>,
        rng_counter: Arc<Mutex<u64>>,
        // Wakes every task parked in `sleep` whenever the clock moves, so a
        // `tokio::select!` between a real event and `sleep` races exactly
        // the way it would against `tokio::time::sleep` in production:
        // the sleep branch only becomes ready once `advance` pushes the
        // clock past its deadline, not the instant it is polled.
        notify: Arc<tokio::sync::Notify>,
    }

    impl MockEnv {
        /// A fresh clock pinned at `T=0` with a deterministic RNG stream.
        #[must_use]
        pub fn new() -> Self {
            Self {
                now: Arc::new(Mutex::new(Duration::ZERO)),
                rng_counter: Arc::new(Mutex::new(0)),
                notify: Arc::new(tokio::sync::Notify::new()),
            }
        }

        /// Advance the virtual clock by `duration`, waking any task parked
        /// in [`Environment::sleep`] whose deadline has now passed.
        pub fn advance(&self, duration: Duration) {
            #[allow(clippy::expect_used)]
            let mut now = self.now.lock().expect("mock clock mutex poisoned");
            *now += duration;
            drop(now);
            self.notify.notify_waiters();
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Environment for MockEnv {
        type Instant = MockInstant;

        fn now(&self) -> Self::Instant {
            #[allow(clippy::expect_used)]
            let now = self.now.lock().expect("mock clock mutex poisoned");
            *now
        }

        async fn sleep(&self, duration: Duration) {
            let deadline = self.now() + duration;
            loop {
                // Constructed before the deadline check so a racing
                // `advance()` that lands between the check and the await
                // below is still observed; the opposite order can miss a
                // wakeup and park forever.
                let notified = self.notify.notified();
                if self.now() >= deadline {
                    return;
                }
                notified.await;
            }
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            #[allow(clippy::expect_used)]
            let mut counter = self.rng_counter.lock().expect("mock rng mutex poisoned");
            for chunk in buffer.chunks_mut(8) {
                let bytes = counter.to_be_bytes();
                let len = chunk.len();
                chunk.copy_from_slice(&bytes[..len]);
                *counter += 1;
            }
        }
    }

}

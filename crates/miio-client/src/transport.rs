//! The transport contract the session client talks to, plus a production
//! UDP implementation.
//!
//! Keeps the session state machine sans-IO: the client only ever calls
//! through the [`Transport`] trait, so tests can swap in an in-memory fake
//! without touching a real socket.

use std::future::Future;
use std::net::SocketAddr;

/// An inbound-subscription handle. Dropping it does *not* unsubscribe;
/// call [`Unsubscribe::unsubscribe`] explicitly, matching the "returns an
/// unsubscribe handle that removes exactly that subscription" contract.
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscribe {
    /// Wrap a teardown closure.
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(teardown)))
    }

    /// Remove exactly the subscription this handle was returned for.
    pub fn unsubscribe(mut self) {
        if let Some(teardown) = self.0.take() {
            teardown();
        }
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe").finish_non_exhaustive()
    }
}

/// The UDP transport contract consumed by [`crate::client::Client`].
///
/// Implementations interpret no bytes and perform no retry; both are the
/// session client's job.
pub trait Transport: Clone + Send + Sync + 'static {
    /// Transmit one datagram to `target`. Completes once the kernel accepts
    /// the bytes.
    fn send(&self, bytes: Vec<u8>, target: SocketAddr) -> impl Future<Output = std::io::Result<usize>> + Send;

    /// Register an inbound callback invoked as `(payload, remote_addr)` for
    /// every datagram received on this transport's bound endpoint.
    /// Multiple subscriptions are supported; invocation order among
    /// subscribers is unspecified.
    fn subscribe<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(&[u8], SocketAddr) + Send + Sync + 'static;

    /// Idempotent lazy bind of the local UDP endpoint. At most one bind is
    /// performed per transport instance.
    fn ensure_ready(&self) -> impl Future<Output = std::io::Result<()>> + Send;

    /// Release the endpoint and drop all subscriptions.
    fn close(&self);
}

#[cfg(feature = "transport")]
pub use udp::UdpTransport;

#[cfg(feature = "transport")]
mod udp {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, OnceLock};

    use tokio::net::UdpSocket;
    use tokio::task::JoinHandle;
    use tracing::{debug, warn};

    use super::Unsubscribe;

    type Subscriber = Arc<dyn Fn(&[u8], SocketAddr) + Send + Sync>;

    struct Inner {
        bind_addr: SocketAddr,
        socket: OnceLock<Arc<UdpSocket>>,
        subscribers: Mutex<Vec<(u64, Subscriber)>>,
        next_id: AtomicU64,
        recv_task: Mutex<Option<JoinHandle<()>>>,
    }

    /// Production [`super::Transport`] backed by `tokio::net::UdpSocket`.
    #[derive(Clone)]
    pub struct UdpTransport {
        inner: Arc<Inner>,
    }

    impl UdpTransport {
        /// A transport that will bind `bind_addr` on first use.
        #[must_use]
        pub fn new(bind_addr: SocketAddr) -> Self {
            Self {
                inner: Arc::new(Inner {
                    bind_addr,
                    socket: OnceLock::new(),
                    subscribers: Mutex::new(Vec::new()),
                    next_id: AtomicU64::new(0),
                    recv_task: Mutex::new(None),
                }),
            }
        }

        fn socket(&self) -> Option<Arc<UdpSocket>> {
            self.inner.socket.get().cloned()
        }
    }

    impl super::Transport for UdpTransport {
        async fn send(&self, bytes: Vec<u8>, target: SocketAddr) -> std::io::Result<usize> {
            self.ensure_ready().await?;
            #[allow(clippy::expect_used)]
            let socket =
                self.socket().expect("ensure_ready bound the socket or returned an error");
            socket.send_to(&bytes, target).await
        }

        fn subscribe<F>(&self, handler: F) -> Unsubscribe
        where
            F: Fn(&[u8], SocketAddr) + Send + Sync + 'static,
        {
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            #[allow(clippy::expect_used)]
            self.inner
                .subscribers
                .lock()
                .expect("subscriber list mutex poisoned")
                .push((id, Arc::new(handler)));

            let inner = Arc::clone(&self.inner);
            Unsubscribe::new(move || {
                #[allow(clippy::expect_used)]
                inner
                    .subscribers
                    .lock()
                    .expect("subscriber list mutex poisoned")
                    .retain(|(sub_id, _)| *sub_id != id);
            })
        }

        async fn ensure_ready(&self) -> std::io::Result<()> {
            if self.inner.socket.get().is_some() {
                return Ok(());
            }

            let socket = Arc::new(UdpSocket::bind(self.inner.bind_addr).await?);
            if self.inner.socket.set(Arc::clone(&socket)).is_err() {
                // Another caller raced us and bound first; use their socket.
                return Ok(());
            }

            let inner = Arc::clone(&self.inner);
            let task = tokio::spawn(async move {
                let mut buf = [0u8; 65536];
                loop {
                    match socket.recv_from(&mut buf).await {
                        Ok((len, remote)) => {
                            debug!(bytes = len, %remote, "inbound datagram");
                            #[allow(clippy::expect_used)]
                            let subscribers = inner
                                .subscribers
                                .lock()
                                .expect("subscriber list mutex poisoned")
                                .clone();
                            for (_, handler) in subscribers {
                                handler(&buf[..len], remote);
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "UDP recv failed, stopping receive loop");
                            break;
                        }
                    }
                }
            });

            #[allow(clippy::expect_used)]
            *self.inner.recv_task.lock().expect("recv task mutex poisoned") = Some(task);
            Ok(())
        }

        fn close(&self) {
            #[allow(clippy::expect_used)]
            self.inner.subscribers.lock().expect("subscriber list mutex poisoned").clear();
            #[allow(clippy::expect_used)]
            if let Some(task) = self.inner.recv_task.lock().expect("recv task mutex poisoned").take() {
                task.abort();
            }
        }
    }
}

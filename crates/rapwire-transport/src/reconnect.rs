//! Client-side automatic redial with exponential backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::thread;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::{ReconnectConfig, TransportConfig};
use crate::error::{Result, TransportError};
use crate::handler::RequestHandler;
use crate::stream::WireStream;
use crate::transport::{ConnectionObserver, Transport};

/// Callback run on every fresh connection before traffic resumes, e.g.
/// to re-negotiate a symbol table with the peer.
pub trait SessionSetup: Send + Sync {
    fn session_ready(&self, transport: &Transport) -> Result<()>;
}

impl<F> SessionSetup for F
where
    F: Fn(&Transport) -> Result<()> + Send + Sync,
{
    fn session_ready(&self, transport: &Transport) -> Result<()> {
        self(transport)
    }
}

/// Keeps a client connected: dials, watches for connection errors, and
/// redials with exponential backoff, rebuilding a fresh [`Transport`]
/// each time.
///
/// While disconnected, [`send`](Self::send) fails fast with
/// [`TransportError::Closed`].
pub struct Reconnector {
    inner: Arc<Inner>,
}

struct Inner {
    dial: Box<dyn Fn() -> Result<WireStream> + Send + Sync>,
    handler: Arc<dyn RequestHandler>,
    setup: Option<Box<dyn SessionSetup>>,
    config: TransportConfig,
    reconnect: ReconnectConfig,
    current: RwLock<Option<Transport>>,
    stopped: AtomicBool,
}

/// Per-connection observer that kicks off the redial loop on death.
struct RedialObserver {
    inner: Weak<Inner>,
}

impl ConnectionObserver for RedialObserver {
    fn connection_error(&self, error: &TransportError) {
        let Some(inner) = self.inner.upgrade() else { return };
        if inner.stopped.load(Ordering::Acquire) {
            return;
        }
        warn!(%error, "connection lost; starting redial loop");
        inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        thread::spawn(move || run_redial_loop(inner));
    }
}

impl Reconnector {
    /// Dial once and start watching the connection. Fails if the first
    /// dial or session setup fails.
    pub fn connect<D, H>(
        dial: D,
        handler: H,
        setup: Option<Box<dyn SessionSetup>>,
        config: TransportConfig,
        reconnect: ReconnectConfig,
    ) -> Result<Self>
    where
        D: Fn() -> Result<WireStream> + Send + Sync + 'static,
        H: RequestHandler + 'static,
    {
        let inner = Arc::new(Inner {
            dial: Box::new(dial),
            handler: Arc::new(handler),
            setup,
            config,
            reconnect,
            current: RwLock::new(None),
            stopped: AtomicBool::new(false),
        });
        establish(&inner)?;
        Ok(Self { inner })
    }

    /// Send on the current connection. Fails fast with
    /// [`TransportError::Closed`] while disconnected.
    pub fn send(&self, request: &[u8]) -> Result<Bytes> {
        let transport = self
            .inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match transport {
            Some(transport) => transport.send(request),
            None => Err(TransportError::Closed),
        }
    }

    /// Whether a live connection currently exists.
    pub fn is_connected(&self) -> bool {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Transport::is_alive)
    }

    /// Stop redialing and close the current connection.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        let transport = self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(transport) = transport {
            transport.close();
        }
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Dial, build a transport, run session setup, and publish it.
fn establish(inner: &Arc<Inner>) -> Result<()> {
    let stream = (inner.dial)()?;
    let observer = RedialObserver {
        inner: Arc::downgrade(inner),
    };
    let transport = Transport::open(
        stream,
        SharedHandler(Arc::clone(&inner.handler)),
        observer,
        inner.config.clone(),
    )?;

    if let Some(setup) = &inner.setup {
        if let Err(err) = setup.session_ready(&transport) {
            transport.close();
            return Err(err);
        }
    }

    *inner
        .current
        .write()
        .unwrap_or_else(PoisonError::into_inner) = Some(transport);
    debug!("connection established");
    Ok(())
}

fn run_redial_loop(inner: Arc<Inner>) {
    let mut backoff = inner.reconnect.initial_backoff;
    loop {
        if inner.stopped.load(Ordering::Acquire) {
            return;
        }
        thread::sleep(backoff);
        if inner.stopped.load(Ordering::Acquire) {
            return;
        }
        match establish(&inner) {
            Ok(()) => {
                info!("reconnected");
                return;
            }
            Err(err) => {
                warn!(%err, backoff_ms = backoff.as_millis() as u64, "redial failed");
                backoff = (backoff * 2).min(inner.reconnect.max_backoff);
            }
        }
    }
}

/// Adapter so one application handler outlives every rebuilt transport.
struct SharedHandler(Arc<dyn RequestHandler>);

impl RequestHandler for SharedHandler {
    fn handle(
        &self,
        ctx: &crate::handler::RequestContext,
    ) -> std::result::Result<Vec<u8>, crate::handler::HandlerFault> {
        self.0.handle(ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::handler::{HandlerFault, RequestContext};
    use crate::stream::WireListener;
    use crate::transport::NoopObserver;

    fn quiet_config() -> TransportConfig {
        TransportConfig {
            keepalive_interval: Duration::ZERO,
            ..TransportConfig::default()
        }
    }

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(100),
        }
    }

    fn echo(ctx: &RequestContext) -> std::result::Result<Vec<u8>, HandlerFault> {
        Ok(ctx.payload.to_vec())
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        check()
    }

    /// Echo server that serves one connection at a time, forever.
    fn spawn_echo_server(listener: WireListener) {
        thread::spawn(move || loop {
            let Ok(stream) = listener.accept() else { return };
            let Ok(transport) = Transport::open(stream, echo, NoopObserver, quiet_config()) else {
                continue;
            };
            while transport.is_alive() {
                thread::sleep(Duration::from_millis(10));
            }
        });
    }

    #[test]
    fn sends_through_the_current_connection() {
        let listener = WireListener::bind_tcp("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        spawn_echo_server(listener);

        let client = Reconnector::connect(
            move || WireStream::connect_tcp(addr),
            echo,
            None,
            quiet_config(),
            fast_reconnect(),
        )
        .unwrap();

        assert!(client.is_connected());
        let response = client.send(b"over tcp").unwrap();
        assert_eq!(response.as_ref(), b"over tcp");
    }

    #[test]
    fn initial_dial_failure_is_an_error() {
        let result = Reconnector::connect(
            || WireStream::connect_tcp("127.0.0.1:1"),
            echo,
            None,
            quiet_config(),
            fast_reconnect(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn redials_after_peer_drop_and_reruns_session_setup() {
        let listener = WireListener::bind_tcp("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // Server drops its first connection immediately, then echoes.
        let connections = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&connections);
        thread::spawn(move || loop {
            let Ok(stream) = listener.accept() else { return };
            let n = seen.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                drop(stream);
                continue;
            }
            let Ok(transport) = Transport::open(stream, echo, NoopObserver, quiet_config()) else {
                continue;
            };
            while transport.is_alive() {
                thread::sleep(Duration::from_millis(10));
            }
        });

        let setups = Arc::new(AtomicUsize::new(0));
        let setup_count = Arc::clone(&setups);
        let setup = move |_: &Transport| -> Result<()> {
            setup_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        let client = Reconnector::connect(
            move || WireStream::connect_tcp(addr),
            echo,
            Some(Box::new(setup)),
            quiet_config(),
            fast_reconnect(),
        )
        .unwrap();
        assert_eq!(setups.load(Ordering::SeqCst), 1);

        // First connection dies as soon as the server drops it; the
        // client notices on its next write or read and redials.
        assert!(wait_until(Duration::from_secs(10), || {
            client.send(b"probe").map_or(false, |r| r.as_ref() == b"probe")
        }));
        assert!(setups.load(Ordering::SeqCst) >= 2);
        assert!(connections.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn stopped_reconnector_fails_fast() {
        let listener = WireListener::bind_tcp("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        spawn_echo_server(listener);

        let client = Reconnector::connect(
            move || WireStream::connect_tcp(addr),
            echo,
            None,
            quiet_config(),
            fast_reconnect(),
        )
        .unwrap();
        client.stop();
        assert!(!client.is_connected());
        assert!(matches!(client.send(b"x"), Err(TransportError::Closed)));
    }
}

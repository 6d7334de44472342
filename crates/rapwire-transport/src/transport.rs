//! Correlated request/response machinery over one duplex stream.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Read, Write};
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Instant;

use bytes::Bytes;
use rapwire_codec::{encode, Value};
use rapwire_frame::{ChunkAssembler, FrameReader, FrameWriter, PING_RAP};
use rapwire_pool::{ChargePool, Dispatcher};
use tracing::{debug, trace, warn};

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::handler::{HandlerFault, RequestContext, RequestHandler};
use crate::stream::WireStream;

// How many expired raps to remember for silently dropping late responses.
const EXPIRED_RAP_CAPACITY: usize = 1024;

/// Connection lifecycle events. All methods default to no-ops.
pub trait ConnectionObserver: Send + Sync {
    /// Fired once, on the first successful write or ping round-trip.
    fn connection_stabilised(&self) {}
    /// Fired once, when the connection dies.
    fn connection_error(&self, _error: &TransportError) {}
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct PendingCalls {
    calls: HashMap<u64, SyncSender<Bytes>>,
    expired: VecDeque<u64>,
    expired_set: HashSet<u64>,
}

impl PendingCalls {
    fn remember_expired(&mut self, rap: u64) {
        if self.expired_set.insert(rap) {
            self.expired.push_back(rap);
            if self.expired.len() > EXPIRED_RAP_CAPACITY {
                if let Some(oldest) = self.expired.pop_front() {
                    self.expired_set.remove(&oldest);
                }
            }
        }
    }

    fn is_expired(&self, rap: u64) -> bool {
        self.expired_set.contains(&rap)
    }
}

struct Shared {
    config: TransportConfig,
    peer: Arc<str>,
    writer: Mutex<FrameWriter<Box<dyn Write + Send>>>,
    pending: Mutex<PendingCalls>,
    ping_waiter: Mutex<Option<SyncSender<()>>>,
    next_rap: AtomicU64,
    dead: AtomicBool,
    stabilised: AtomicBool,
    observer: Box<dyn ConnectionObserver>,
    dispatcher: Dispatcher<RequestContext>,
    // Shutdown handle, present when built from a WireStream. Taken on
    // failure so the blocked receive thread wakes up.
    stream: Mutex<Option<WireStream>>,
}

impl Shared {
    fn write_payload(&self, rap: u64, payload: Bytes) -> Result<()> {
        if self.dead.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        match lock(&self.writer).send_payload(rap, payload) {
            Ok(()) => {
                self.mark_stabilised();
                Ok(())
            }
            Err(err) => {
                let err = TransportError::from(err);
                self.fail(&err);
                Err(err)
            }
        }
    }

    fn mark_stabilised(&self) {
        if !self.stabilised.swap(true, Ordering::AcqRel) {
            debug!(peer = %self.peer, "connection stabilised");
            self.observer.connection_stabilised();
        }
    }

    /// Kill the connection once: resolve every pending call with an empty
    /// payload, wake the keepalive thread, and fire the observer.
    fn fail(&self, error: &TransportError) {
        if self.dead.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(peer = %self.peer, %error, "connection failed");
        let calls = std::mem::take(&mut lock(&self.pending).calls);
        for (_, waiter) in calls {
            waiter.send(Bytes::new()).ok();
        }
        lock(&self.ping_waiter).take();
        if let Some(stream) = lock(&self.stream).take() {
            stream.shutdown(Shutdown::Both).ok();
        }
        self.observer.connection_error(error);
    }
}

/// A live connection: correlated calls out, handled requests in.
///
/// Cheap to clone; all clones share one connection. The transport owns a
/// receive thread, an optional keepalive thread, and a worker pool with a
/// FIFO dispatcher for inbound requests.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    /// Start a transport over separate read and write halves.
    pub fn start<R, W, H, O>(
        read: R,
        write: W,
        handler: H,
        observer: O,
        config: TransportConfig,
    ) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
        H: RequestHandler + 'static,
        O: ConnectionObserver + 'static,
    {
        Self::build(
            Box::new(read),
            Box::new(write),
            None,
            Arc::from("peer"),
            Arc::new(handler),
            Box::new(observer),
            config,
        )
    }

    /// Start a transport over a [`WireStream`], keeping a shutdown handle
    /// so a dying connection unblocks its own receive thread.
    pub fn open<H, O>(
        stream: WireStream,
        handler: H,
        observer: O,
        config: TransportConfig,
    ) -> Result<Self>
    where
        H: RequestHandler + 'static,
        O: ConnectionObserver + 'static,
    {
        let peer = stream.peer_label();
        let read = stream.try_clone()?;
        let shutdown_handle = stream.try_clone()?;
        Ok(Self::build(
            Box::new(read),
            Box::new(stream),
            Some(shutdown_handle),
            peer,
            Arc::new(handler),
            Box::new(observer),
            config,
        ))
    }

    fn build(
        read: Box<dyn Read + Send>,
        write: Box<dyn Write + Send>,
        shutdown_handle: Option<WireStream>,
        peer: Arc<str>,
        handler: Arc<dyn RequestHandler>,
        observer: Box<dyn ConnectionObserver>,
        config: TransportConfig,
    ) -> Self {
        let pool = ChargePool::new(config.pool.clone());
        let frame_config = config.frame_config();

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let request_target = weak.clone();
            let dispatcher = Dispatcher::new(pool, move |ctx: RequestContext| {
                if let Some(shared) = request_target.upgrade() {
                    handle_request(&shared, handler.as_ref(), &ctx);
                }
            });
            Shared {
                config: config.clone(),
                peer: Arc::clone(&peer),
                writer: Mutex::new(FrameWriter::with_config(write, frame_config)),
                pending: Mutex::new(PendingCalls::default()),
                ping_waiter: Mutex::new(None),
                next_rap: AtomicU64::new(1),
                dead: AtomicBool::new(false),
                stabilised: AtomicBool::new(false),
                observer,
                dispatcher,
                stream: Mutex::new(shutdown_handle),
            }
        });

        let receive_target = Arc::downgrade(&shared);
        let receive_config = config.clone();
        thread::spawn(move || run_receive_loop(receive_target, read, receive_config));

        if !config.keepalive_interval.is_zero() {
            let keepalive_target = Arc::downgrade(&shared);
            thread::spawn(move || run_keepalive(keepalive_target));
        }

        debug!(peer = %peer, "transport started");
        Self { shared }
    }

    /// Send a request and block for the matching response.
    ///
    /// Times out after `call_timeout` with an **empty** payload; the rap
    /// is remembered so a late response is dropped silently. Fails fast
    /// with [`TransportError::Closed`] on a dead connection.
    pub fn send(&self, request: &[u8]) -> Result<Bytes> {
        let shared = &self.shared;
        if shared.dead.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let rap = shared.next_rap.fetch_add(1, Ordering::Relaxed);
        let (waiter, response) = sync_channel(1);
        lock(&shared.pending).calls.insert(rap, waiter);
        trace!(rap, len = request.len(), "sending call");

        if let Err(err) = shared.write_payload(rap, Bytes::copy_from_slice(request)) {
            lock(&shared.pending).calls.remove(&rap);
            return Err(err);
        }

        match response.recv_timeout(shared.config.call_timeout) {
            Ok(payload) => Ok(payload),
            Err(RecvTimeoutError::Timeout) => {
                let mut pending = lock(&shared.pending);
                pending.calls.remove(&rap);
                pending.remember_expired(rap);
                drop(pending);
                warn!(rap, "call timed out; returning empty payload");
                Ok(Bytes::new())
            }
            Err(RecvTimeoutError::Disconnected) => Ok(Bytes::new()),
        }
    }

    /// Whether the connection is still usable.
    pub fn is_alive(&self) -> bool {
        !self.shared.dead.load(Ordering::Acquire)
    }

    /// Whether the connection has seen its first successful write or
    /// ping round-trip.
    pub fn is_stabilised(&self) -> bool {
        self.shared.stabilised.load(Ordering::Acquire)
    }

    /// Label of the connected peer.
    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    /// Kill the connection. Pending calls resolve empty and the observer
    /// sees a [`TransportError::Closed`].
    pub fn close(&self) {
        self.shared.fail(&TransportError::Closed);
    }
}

fn handle_request(shared: &Arc<Shared>, handler: &dyn RequestHandler, ctx: &RequestContext) {
    let response = match handler.handle(ctx) {
        Ok(bytes) => Bytes::from(bytes),
        Err(fault) => {
            debug!(rap = ctx.rap, %fault, "handler fault");
            encode_fault(&fault)
        }
    };
    if let Err(err) = shared.write_payload(ctx.rap, response) {
        warn!(rap = ctx.rap, %err, "failed to write response");
    }
}

fn encode_fault(fault: &HandlerFault) -> Bytes {
    match encode(&Value::Diagnostic(fault.message().to_string()), None) {
        Ok(bytes) => Bytes::from(bytes),
        Err(_) => Bytes::new(),
    }
}

fn run_receive_loop(weak: Weak<Shared>, read: Box<dyn Read + Send>, config: TransportConfig) {
    let mut reader = FrameReader::with_config(read, config.frame_config());
    let mut assembler = ChunkAssembler::new(config.max_payload_size);
    let mut last_purge = Instant::now();

    loop {
        let frame = match reader.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if let Some(shared) = weak.upgrade() {
                    shared.fail(&TransportError::Closed);
                }
                break;
            }
            Err(err) => {
                if let Some(shared) = weak.upgrade() {
                    shared.fail(&err.into());
                }
                break;
            }
        };
        let Some(shared) = weak.upgrade() else { break };
        if shared.dead.load(Ordering::Acquire) {
            break;
        }

        let payload = match frame.chunk {
            Some(header) => match assembler.accept(header, frame.payload) {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    purge_if_due(&mut assembler, &mut last_purge, &config);
                    continue;
                }
                Err(err) => {
                    warn!(%err, "discarding bad chunk");
                    continue;
                }
            },
            None => frame.payload,
        };

        deliver(&shared, frame.rap, payload);
        purge_if_due(&mut assembler, &mut last_purge, &config);
    }
    trace!("receive loop stopped");
}

fn purge_if_due(assembler: &mut ChunkAssembler, last_purge: &mut Instant, config: &TransportConfig) {
    if last_purge.elapsed() >= config.chunk_stale_after {
        assembler.purge_stale(config.chunk_stale_after);
        *last_purge = Instant::now();
    }
}

/// Route one complete inbound payload: ping echo, pending-call response,
/// expired late response, or fresh request.
fn deliver(shared: &Arc<Shared>, rap: u64, payload: Bytes) {
    if rap == PING_RAP {
        let waiter = lock(&shared.ping_waiter).take();
        match waiter {
            Some(waiter) => {
                waiter.send(()).ok();
            }
            None => {
                trace!("echoing keepalive ping");
                if let Err(err) = shared.write_payload(PING_RAP, Bytes::new()) {
                    warn!(%err, "failed to echo ping");
                }
            }
        }
        return;
    }

    let mut pending = lock(&shared.pending);
    if let Some(waiter) = pending.calls.remove(&rap) {
        drop(pending);
        waiter.send(payload).ok();
        return;
    }
    if pending.is_expired(rap) {
        drop(pending);
        trace!(rap, "dropping late response for expired call");
        return;
    }
    drop(pending);

    let ctx = RequestContext {
        rap,
        payload,
        peer: Arc::clone(&shared.peer),
    };
    if let Err(err) = shared.dispatcher.enqueue(ctx) {
        warn!(rap, %err, "failed to dispatch request");
    }
}

fn run_keepalive(weak: Weak<Shared>) {
    loop {
        let interval = match weak.upgrade() {
            Some(shared) => shared.config.keepalive_interval,
            None => return,
        };
        thread::sleep(interval);

        let Some(shared) = weak.upgrade() else { return };
        if shared.dead.load(Ordering::Acquire) {
            return;
        }

        let (waiter, echo) = sync_channel(1);
        *lock(&shared.ping_waiter) = Some(waiter);
        if shared.write_payload(PING_RAP, Bytes::new()).is_err() {
            return;
        }
        match echo.recv_timeout(shared.config.keepalive_timeout) {
            Ok(()) => {
                trace!("keepalive echo received");
                shared.mark_stabilised();
            }
            Err(_) => {
                if shared.dead.load(Ordering::Acquire) {
                    return;
                }
                shared.fail(&TransportError::KeepaliveTimeout);
                return;
            }
        }
        lock(&shared.ping_waiter).take();
    }
}

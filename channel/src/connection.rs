//! [Connection] represents one physical connection to a resolved service.
//!
//! Once connected, two tasks run for the lifetime of the socket:
//!
//! - the writer loop drains a bounded queue of encoded frames onto the socket, so frames from
//!   concurrent sessions never interleave. Writers are suspended while the queue is full.
//! - the read loop feeds the frame decoder and dispatches every frame to its session.
//!
//! When either loop fails, or on disconnect, the [Link] is shut down: every open session
//! receives one disconnection error and the registry is emptied. A shut down link is never
//! reused, the next connect() creates a new one.

use crate::channel::{Channel, Rx, Tx};
use crate::gate::ConnectGate;
use crate::session::{Incoming, SessionRegistry};
use crate::transport::ClientTransport;
use arc_swap::ArcSwapOption;
use captains_log::filter::LogFilter;
use cocaine_codec::{Frame, FrameDecoder};
use cocaine_core::api::DispatchTree;
use cocaine_core::headers::{HeaderTable, Headers};
use cocaine_core::io::io_with_timeout;
use cocaine_core::{ClientConfig, CocaineError, ConnectError, Endpoint};
use crossfire::*;
use parking_lot::Mutex;
use rmpv::Value;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use std::{fmt, io};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub(crate) struct Link {
    service: String,
    peer: Endpoint,
    registry: Mutex<SessionRegistry>,
    writer: Mutex<Option<MAsyncTx<Vec<u8>>>>,
    close_tx: Mutex<Option<MTx<()>>>,
    closed: AtomicBool,
    logger: Arc<LogFilter>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "conn {}@{}", self.service, self.peer)
    }
}

impl Link {
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn register(
        &self, session: u64, rx_tree: Arc<DispatchTree>,
    ) -> Result<MAsyncRx<Incoming>, CocaineError> {
        self.registry.lock().register(session, rx_tree)
    }

    #[inline]
    pub(crate) fn unregister(&self, session: u64) {
        if self.registry.lock().unregister(session) {
            logger_trace!(self.logger, "{:?} session {} unregistered", self, session);
        }
    }

    /// Enqueue one encoded frame, suspends while the write queue is full
    pub(crate) async fn write(&self, buf: Vec<u8>) -> Result<(), CocaineError> {
        let tx = {
            let guard = self.writer.lock();
            guard.clone()
        };
        let Some(tx) = tx else {
            return Err(CocaineError::NotConnected(self.service.clone()));
        };
        if tx.send(buf).await.is_err() {
            return Err(CocaineError::Disconnected(self.service.clone()));
        }
        Ok(())
    }

    fn dispatch(&self, frame: Frame, table: &mut HeaderTable) {
        let headers = match frame.headers {
            None => Headers::new(),
            Some(raw) => match table.merge(&raw) {
                Ok(headers) => headers,
                Err(e) => {
                    logger_warn!(
                        self.logger,
                        "{:?} session {} drop headers: {}",
                        self,
                        frame.session,
                        e
                    );
                    Headers::new()
                }
            },
        };
        self.registry.lock().push(frame.session, frame.msg_type, frame.payload, headers);
    }

    /// Idempotent. Stops both loops and fans the disconnection out to every open session.
    pub(crate) fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close_tx.lock().take();
        self.writer.lock().take();
        let notified = self.registry.lock().close();
        logger_info!(self.logger, "{:?} disconnected, {} sessions notified", self, notified);
    }

    #[inline]
    fn session_count(&self) -> usize {
        self.registry.lock().len()
    }
}

async fn write_loop<W: tokio::io::AsyncWrite + Unpin>(
    link: Weak<Link>, mut writer: W, queue: MAsyncRx<Vec<u8>>, write_timeout: Duration,
    logger: Arc<LogFilter>,
) {
    while let Ok(buf) = queue.recv().await {
        let r: io::Result<()> = io_with_timeout!(write_timeout, writer.write_all(&buf));
        if let Err(e) = r {
            logger_warn!(logger, "write {} bytes failed: {}", buf.len(), e);
            if let Some(link) = link.upgrade() {
                link.shutdown();
            }
            return;
        }
    }
    // every sender is gone: disconnect() or the link was dropped
    let _ = writer.shutdown().await;
}

async fn read_loop<R: tokio::io::AsyncRead + Unpin>(
    link: Arc<Link>, mut reader: R, close_rx: MAsyncRx<()>, buf_size: usize,
) {
    let mut decoder = FrameDecoder::new();
    let mut table = HeaderTable::default();
    let mut buf = vec![0u8; buf_size];
    loop {
        let n = tokio::select! {
            r = reader.read(&mut buf) => match r {
                Ok(0) => {
                    logger_debug!(link.logger, "{:?} closed by peer", link);
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    logger_warn!(link.logger, "{:?} read error: {}", link, e);
                    break;
                }
            },
            _ = close_rx.recv() => {
                logger_debug!(link.logger, "{:?} read loop stopped", link);
                break;
            }
        };
        decoder.feed(&buf[..n]);
        for r in &mut decoder {
            match r {
                Ok(frame) => link.dispatch(frame, &mut table),
                Err(e) => logger_warn!(link.logger, "{:?} drop frame: {}", link, e),
            }
        }
    }
    link.shutdown();
}

/// One connection per named service. The session counter survives reconnects, so a
/// session id is never reused by the same Connection.
pub struct Connection<P: ClientTransport> {
    name: String,
    config: ClientConfig,
    logger: Arc<LogFilter>,
    counter: AtomicU64,
    link: ArcSwapOption<Link>,
    gate: ConnectGate,
    _phan: PhantomData<fn(&P)>,
}

impl<P: ClientTransport> fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &*self.link.load() {
            Some(link) => fmt::Debug::fmt(link, f),
            None => write!(f, "conn {}", self.name),
        }
    }
}

impl<P: ClientTransport> Connection<P> {
    pub fn new(name: &str, config: ClientConfig, logger: Arc<LogFilter>) -> Self {
        Self {
            name: name.to_string(),
            config,
            logger,
            counter: AtomicU64::new(1),
            link: ArcSwapOption::empty(),
            gate: ConnectGate::new(),
            _phan: Default::default(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        match &*self.link.load() {
            Some(link) => !link.is_closed(),
            None => false,
        }
    }

    /// The endpoint of the live socket
    pub fn peer(&self) -> Option<Endpoint> {
        match &*self.link.load() {
            Some(link) if !link.is_closed() => Some(link.peer.clone()),
            _ => None,
        }
    }

    /// Try the endpoints in order, the first success wins.
    ///
    /// Concurrent callers join the attempt in flight and share its outcome.
    pub async fn connect(&self, endpoints: &[Endpoint]) -> Result<(), CocaineError> {
        self.gate.run(|| self.is_connected(), move || self.try_endpoints(endpoints)).await
    }

    async fn try_endpoints(&self, endpoints: &[Endpoint]) -> Result<(), CocaineError> {
        let mut attempts = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            logger_debug!(self.logger, "conn {} connecting to {}", self.name, endpoint);
            match P::connect(endpoint, &self.config).await {
                Ok(conn) => {
                    self.start(conn, endpoint.clone());
                    return Ok(());
                }
                Err(reason) => {
                    logger_warn!(
                        self.logger,
                        "conn {} unable to connect {}: {}",
                        self.name,
                        endpoint,
                        reason
                    );
                    attempts.push((endpoint.clone(), reason));
                }
            }
        }
        Err(ConnectError { service: self.name.clone(), attempts }.into())
    }

    fn start(&self, conn: P, peer: Endpoint) {
        let mut thresholds = self.config.thresholds;
        if thresholds == 0 {
            thresholds = 128;
        }
        let mut buf_size = self.config.stream_buf_size;
        if buf_size == 0 {
            buf_size = 8 * 1024;
        }
        let (reader, writer) = conn.into_split();
        let (write_tx, write_rx) = mpmc::bounded_async::<Vec<u8>>(thresholds);
        let (close_tx, close_rx) = mpmc::unbounded_async::<()>();
        let link = Arc::new(Link {
            service: self.name.clone(),
            peer,
            registry: Mutex::new(SessionRegistry::new(&self.name, self.logger.clone())),
            writer: Mutex::new(Some(write_tx)),
            close_tx: Mutex::new(Some(close_tx)),
            closed: AtomicBool::new(false),
            logger: self.logger.clone(),
        });
        logger_info!(self.logger, "{:?} connected", link);
        tokio::spawn(write_loop(
            Arc::downgrade(&link),
            writer,
            write_rx,
            self.config.timeout.write_timeout,
            self.logger.clone(),
        ));
        tokio::spawn(read_loop(link.clone(), reader, close_rx, buf_size));
        if let Some(old) = self.link.swap(Some(link)) {
            old.shutdown();
        }
    }

    /// Allocate the next session id, starting from 1
    #[inline(always)]
    pub fn next_session(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    fn live_link(&self) -> Result<Arc<Link>, CocaineError> {
        match self.link.load_full() {
            Some(link) if !link.is_closed() => Ok(link),
            _ => Err(CocaineError::NotConnected(self.name.clone())),
        }
    }

    /// Open a session: register its rx side, then write the invocation frame.
    ///
    /// Fails fast with [CocaineError::NotConnected] when there is no live socket.
    pub async fn invoke(
        &self, method_id: u64, args: Vec<Value>, headers: Vec<Value>, tx_tree: Arc<DispatchTree>,
        rx_tree: Arc<DispatchTree>,
    ) -> Result<Channel, CocaineError> {
        let link = self.live_link()?;
        let session = self.next_session();
        let queue = link.register(session, rx_tree.clone())?;
        let frame = Frame::new(session, method_id, args).with_headers(headers);
        let res = match frame.encode() {
            Ok(buf) => link.write(buf).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = res {
            logger_warn!(self.logger, "{:?} invoke {} failed: {}", link, method_id, e);
            link.unregister(session);
            return Err(e);
        }
        logger_debug!(self.logger, "{:?} session {} invoked method {}", link, session, method_id);
        let rx = Rx::new(&self.name, session, &rx_tree, queue, Arc::downgrade(&link));
        let tx = Tx::new(&self.name, session, tx_tree, link);
        Ok(Channel { rx, tx })
    }

    /// Enqueue an already encoded frame on the live socket
    pub async fn write(&self, frame: &Frame) -> Result<(), CocaineError> {
        let link = self.live_link()?;
        link.write(frame.encode()?).await
    }

    /// Open sessions on the live socket
    pub fn session_count(&self) -> usize {
        match &*self.link.load() {
            Some(link) => link.session_count(),
            None => 0,
        }
    }

    pub fn disconnect(&self) {
        if let Some(link) = self.link.swap(None) {
            link.shutdown();
        }
    }
}

impl<P: ClientTransport> Drop for Connection<P> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

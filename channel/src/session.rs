//! Per-connection session bookkeeping.
//!
//! The [SessionRegistry] is owned by the connection and only touched by its read loop and
//! by callers opening or dropping channels. Each registered session keeps a
//! [DispatchCursor] over its rx tree and the sending end of its queue.

use captains_log::filter::LogFilter;
use cocaine_core::CocaineError;
use cocaine_core::api::{DispatchTree, Transition};
use cocaine_core::headers::Headers;
use crossfire::*;
use rmpv::Value;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// One decoded message of a session
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Symbolic name from the dispatch tree
    pub name: String,
    pub msg_type: u64,
    pub payload: Vec<Value>,
    pub headers: Headers,
}

pub type Incoming = Result<Message, CocaineError>;

/// Forward-only position in a dispatch tree
#[derive(Debug, Clone)]
pub struct DispatchCursor {
    node: Arc<DispatchTree>,
    done: bool,
}

impl DispatchCursor {
    /// An empty root is already terminal
    #[inline]
    pub fn new(root: Arc<DispatchTree>) -> Self {
        let done = root.is_empty();
        Self { node: root, done }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.done
    }

    #[inline]
    pub fn node(&self) -> &DispatchTree {
        &self.node
    }

    /// Message type of `name` at the current node, without consuming it
    #[inline]
    pub fn peek(&self, name: &str) -> Option<u64> {
        if self.done {
            return None;
        }
        self.node.find(name).map(|(msg_type, _)| msg_type)
    }

    /// Consume a message type, returning its name. None when it is not legal here.
    pub fn advance(&mut self, msg_type: u64) -> Option<String> {
        if self.done {
            return None;
        }
        let (name, next) = {
            let (name, next) = self.node.get(msg_type)?;
            (name.to_string(), next.clone())
        };
        match next {
            Transition::Recursive => {}
            Transition::Terminal => self.done = true,
            Transition::Node(sub) => self.node = sub,
        }
        Some(name)
    }
}

struct SessionSink {
    cursor: DispatchCursor,
    tx: MTx<Incoming>,
}

pub struct SessionRegistry {
    service: String,
    sessions: FxHashMap<u64, SessionSink>,
    closed: bool,
    logger: Arc<LogFilter>,
}

impl SessionRegistry {
    pub fn new(service: &str, logger: Arc<LogFilter>) -> Self {
        Self { service: service.to_string(), sessions: FxHashMap::default(), closed: false, logger }
    }

    /// Create the queue of a new session.
    ///
    /// With an empty rx tree nothing is registered, the returned queue is already closed.
    pub fn register(
        &mut self, session: u64, rx_tree: Arc<DispatchTree>,
    ) -> Result<MAsyncRx<Incoming>, CocaineError> {
        if self.closed {
            return Err(CocaineError::Disconnected(self.service.clone()));
        }
        let (tx, rx) = mpmc::unbounded_async::<Incoming>();
        let cursor = DispatchCursor::new(rx_tree);
        if !cursor.is_done() {
            self.sessions.insert(session, SessionSink { cursor, tx });
        }
        Ok(rx)
    }

    #[inline]
    pub fn unregister(&mut self, session: u64) -> bool {
        self.sessions.remove(&session).is_some()
    }

    #[inline]
    pub fn contains(&self, session: u64) -> bool {
        self.sessions.contains_key(&session)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Route one inbound message to its session.
    ///
    /// A session is removed after its terminal message, after a message type that is not
    /// legal at its current node, or once its receiver is gone.
    pub fn push(&mut self, session: u64, msg_type: u64, payload: Vec<Value>, headers: Headers) {
        let Some(sink) = self.sessions.get_mut(&session) else {
            logger_warn!(
                self.logger,
                "{}: drop message type {} for unknown session {}",
                self.service,
                msg_type,
                session
            );
            return;
        };
        let remove = match sink.cursor.advance(msg_type) {
            None => {
                logger_warn!(
                    self.logger,
                    "{}: session {} received unexpected message type {}",
                    self.service,
                    session,
                    msg_type
                );
                let _ = sink.tx.send(Err(CocaineError::InvalidMessageType {
                    service: self.service.clone(),
                    msg_type,
                }));
                true
            }
            Some(name) => {
                logger_trace!(self.logger, "{}: session {} <- {}", self.service, session, name);
                let msg = Message { name, msg_type, payload, headers };
                if sink.tx.send(Ok(msg)).is_err() {
                    logger_debug!(self.logger, "{}: session {} receiver gone", self.service, session);
                    true
                } else {
                    sink.cursor.is_done()
                }
            }
        };
        if remove {
            self.sessions.remove(&session);
        }
    }

    /// Deliver one disconnection error to every open session and forget them.
    ///
    /// Returns how many sessions were notified. Later registrations fail.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let count = self.sessions.len();
        for (_session, sink) in self.sessions.drain() {
            let _ = sink.tx.send(Err(CocaineError::Disconnected(self.service.clone())));
        }
        count
    }
}

use crate::connection::Link;
use crate::session::{DispatchCursor, Incoming, Message};
use cocaine_codec::{Frame, MsgpCodec};
use cocaine_core::api::{DispatchTree, Protocol};
use cocaine_core::error::DEFAULT_CATEGORY;
use cocaine_core::headers::Trace;
use cocaine_core::{CocaineError, ServiceError};
use crossfire::*;
use rmpv::Value;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Both sides of one session
pub struct Channel {
    pub rx: Rx,
    pub tx: Tx,
}

impl Channel {
    #[inline]
    pub fn session(&self) -> u64 {
        self.rx.session
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.rx, f)
    }
}

/// The receiving side of a session.
///
/// Messages come out in the order they were read from the socket. Once the session has
/// completed and the queue is drained, every further receive returns [CocaineError::Choke].
pub struct Rx {
    service: String,
    session: u64,
    protocol: Protocol,
    queue: MAsyncRx<Incoming>,
    link: Weak<Link>,
}

impl fmt::Debug for Rx {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "rx {}#{}", self.service, self.session)
    }
}

impl Rx {
    pub(crate) fn new(
        service: &str, session: u64, rx_tree: &DispatchTree, queue: MAsyncRx<Incoming>,
        link: Weak<Link>,
    ) -> Self {
        Self {
            service: service.to_string(),
            session,
            protocol: Protocol::detect(rx_tree),
            queue,
            link,
        }
    }

    #[inline]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Next raw message, a protocol or connection error, or Choke
    pub async fn recv(&mut self) -> Result<Message, CocaineError> {
        match self.queue.recv().await {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CocaineError::Choke),
        }
    }

    /// A zero timeout waits forever. On timeout the queue is left untouched.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Message, CocaineError> {
        if timeout.is_zero() {
            return self.recv().await;
        }
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(r) => r,
            Err(_) => Err(CocaineError::Timeout(timeout)),
        }
    }

    /// Next application value.
    ///
    /// `value` and `write` yield their payload, a single argument unwrapped. `error` becomes
    /// [CocaineError::Service], `close` becomes [CocaineError::Choke]. With an unknown
    /// vocabulary the raw `[name, payload]` is returned.
    pub async fn get(&mut self) -> Result<Value, CocaineError> {
        let msg = self.recv().await?;
        self.interpret(msg)
    }

    pub async fn get_timeout(&mut self, timeout: Duration) -> Result<Value, CocaineError> {
        let msg = self.recv_timeout(timeout).await?;
        self.interpret(msg)
    }

    /// [Rx::get] then deserialize
    #[inline]
    pub async fn get_as<T: DeserializeOwned>(&mut self) -> Result<T, CocaineError> {
        let v = self.get().await?;
        MsgpCodec::decode(v)
    }

    fn interpret(&self, msg: Message) -> Result<Value, CocaineError> {
        if self.protocol == Protocol::Null {
            return Ok(Value::Array(vec![Value::from(msg.name), Value::Array(msg.payload)]));
        }
        match msg.name.as_str() {
            "value" | "write" => Ok(unwrap_payload(msg.payload)),
            "error" => Err(parse_error(&self.service, msg.payload)),
            "close" => Err(CocaineError::Choke),
            _ => Ok(Value::Array(vec![Value::from(msg.name), Value::Array(msg.payload)])),
        }
    }
}

impl Drop for Rx {
    fn drop(&mut self) {
        if let Some(link) = self.link.upgrade() {
            link.unregister(self.session);
        }
    }
}

#[inline]
fn unwrap_payload(mut payload: Vec<Value>) -> Value {
    match payload.len() {
        0 => Value::Nil,
        1 => payload.pop().unwrap_or(Value::Nil),
        _ => Value::Array(payload),
    }
}

/// `[[category, code], reason]`, or `[code, reason]` from older peers
fn parse_error(service: &str, payload: Vec<Value>) -> CocaineError {
    let (category, code) = match payload.first() {
        Some(Value::Array(pair)) if pair.len() == 2 => (pair[0].as_u64(), pair[1].as_u64()),
        Some(v) => (Some(DEFAULT_CATEGORY), v.as_u64()),
        None => (None, None),
    };
    let reason = match payload.get(1) {
        Some(Value::String(s)) => s.as_str().unwrap_or_default().to_string(),
        Some(Value::Binary(b)) => String::from_utf8_lossy(b).into_owned(),
        Some(v) => v.to_string(),
        None => String::new(),
    };
    match (category, code) {
        (Some(category), Some(code)) => {
            ServiceError { service: service.to_string(), category, code, reason }.into()
        }
        _ => CocaineError::Frame(format!("malformed error payload from {}", service)),
    }
}

/// The sending side of a session
pub struct Tx {
    service: String,
    session: u64,
    cursor: DispatchCursor,
    link: Arc<Link>,
}

impl fmt::Debug for Tx {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx {}#{}", self.service, self.session)
    }
}

impl Tx {
    pub(crate) fn new(
        service: &str, session: u64, tx_tree: Arc<DispatchTree>, link: Arc<Link>,
    ) -> Self {
        Self { service: service.to_string(), session, cursor: DispatchCursor::new(tx_tree), link }
    }

    /// Whether anything may still be sent
    #[inline]
    pub fn is_done(&self) -> bool {
        self.cursor.is_done()
    }

    /// Send the message `name` of the current tx node
    #[inline]
    pub async fn invoke(&mut self, name: &str, args: Vec<Value>) -> Result<(), CocaineError> {
        self.send(name, args, Vec::new()).await
    }

    #[inline]
    pub async fn invoke_traced(
        &mut self, name: &str, args: Vec<Value>, trace: &Trace,
    ) -> Result<(), CocaineError> {
        self.send(name, args, trace.pack()).await
    }

    async fn send(
        &mut self, name: &str, args: Vec<Value>, headers: Vec<Value>,
    ) -> Result<(), CocaineError> {
        if self.cursor.is_done() {
            return Err(CocaineError::Choke);
        }
        let Some(msg_type) = self.cursor.peek(name) else {
            return Err(CocaineError::NoSuchMethod(name.to_string()));
        };
        let buf = Frame::new(self.session, msg_type, args).with_headers(headers).encode()?;
        self.link.write(buf).await?;
        self.cursor.advance(msg_type);
        Ok(())
    }

    /// Stream chunk
    #[inline]
    pub async fn write(&mut self, value: Value) -> Result<(), CocaineError> {
        self.invoke("write", vec![value]).await
    }

    pub async fn error(
        &mut self, category: u64, code: u64, reason: &str,
    ) -> Result<(), CocaineError> {
        let args = vec![
            Value::Array(vec![Value::from(category), Value::from(code)]),
            Value::from(reason),
        ];
        self.invoke("error", args).await
    }

    #[inline]
    pub async fn close(&mut self) -> Result<(), CocaineError> {
        self.invoke("close", Vec::new()).await
    }
}

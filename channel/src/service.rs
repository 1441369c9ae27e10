use crate::channel::Channel;
use crate::connection::Connection;
use crate::gate::ConnectGate;
use crate::locator::Locator;
use crate::transport::ClientTransport;
use arc_swap::ArcSwapOption;
use cocaine_codec::MsgpCodec;
use captains_log::filter::LogFilter;
use cocaine_core::api::ServiceApi;
use cocaine_core::headers::Trace;
use cocaine_core::{ClientConfig, CocaineError};
use rmpv::Value;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(strum::Display, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceState {
    #[strum(serialize = "disconnected")]
    Disconnected = 0,
    #[strum(serialize = "resolving")]
    Resolving = 1,
    #[strum(serialize = "connecting")]
    Connecting = 2,
    #[strum(serialize = "connected")]
    Connected = 3,
}

impl ServiceState {
    #[inline]
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Resolving,
            2 => Self::Connecting,
            3 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// Proxy of a named service.
///
/// Creating it does not touch the network. The first call resolves the name through the
/// locator, checks the version, and connects; the same happens again after the connection
/// dropped, so the API is always the one of the process currently behind the endpoint.
pub struct Service<P: ClientTransport> {
    name: String,
    /// 0 accepts any version
    version: u64,
    seed: Option<String>,
    locator: Arc<Locator<P>>,
    conn: Connection<P>,
    api: ArcSwapOption<ServiceApi>,
    state: AtomicU8,
    gate: ConnectGate,
    logger: Arc<LogFilter>,
}

impl<P: ClientTransport> fmt::Debug for Service<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "service {} v{}", self.name, self.version)
    }
}

impl<P: ClientTransport> Service<P> {
    pub fn new(
        name: &str, version: u64, seed: Option<String>, locator: Arc<Locator<P>>,
        config: ClientConfig, logger: Arc<LogFilter>,
    ) -> Self {
        Self {
            name: name.to_string(),
            version,
            seed,
            locator,
            conn: Connection::new(name, config, logger.clone()),
            api: ArcSwapOption::empty(),
            state: AtomicU8::new(ServiceState::Disconnected as u8),
            gate: ConnectGate::new(),
            logger,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> ServiceState {
        let state = ServiceState::from_u8(self.state.load(Ordering::Acquire));
        if state == ServiceState::Connected && !self.conn.is_connected() {
            return ServiceState::Disconnected;
        }
        state
    }

    #[inline]
    fn set_state(&self, state: ServiceState) {
        logger_trace!(self.logger, "{:?} -> {}", self, state);
        self.state.store(state as u8, Ordering::Release);
    }

    /// Resolve and connect unless already connected.
    ///
    /// Concurrent callers join the attempt in flight and get its outcome.
    pub async fn connect(&self) -> Result<(), CocaineError> {
        let ready = || self.conn.is_connected() && self.api.load().is_some();
        self.gate.run(ready, move || self.try_connect()).await
    }

    async fn try_connect(&self) -> Result<(), CocaineError> {
        self.set_state(ServiceState::Resolving);
        // after the first attempt the API is fetched again, the process behind the name
        // may have changed
        let reconnect = self.gate.attempts() > 0;
        let seed = self.seed.as_deref();
        let resolved = if reconnect {
            self.locator.resolve_fresh(&self.name, seed).await
        } else {
            self.locator.resolve_with(&self.name, seed).await
        };
        let info = match resolved {
            Ok(info) => info,
            Err(e) => {
                self.set_state(ServiceState::Disconnected);
                return Err(e);
            }
        };
        if self.version != 0 && info.version != self.version {
            logger_error!(
                self.logger,
                "{:?} resolved version {} does not match",
                self,
                info.version
            );
            self.set_state(ServiceState::Disconnected);
            return Err(CocaineError::VersionMismatch {
                service: self.name.clone(),
                expected: self.version,
                got: info.version,
            });
        }
        self.api.store(Some(Arc::new(info.api)));
        self.set_state(ServiceState::Connecting);
        if let Err(e) = self.conn.connect(&info.endpoints).await {
            self.set_state(ServiceState::Disconnected);
            return Err(e);
        }
        self.set_state(ServiceState::Connected);
        Ok(())
    }

    /// The API of the last resolve
    #[inline]
    pub fn api(&self) -> Option<Arc<ServiceApi>> {
        self.api.load_full()
    }

    /// Method names of the last resolve, in method id order
    pub fn methods(&self) -> Vec<String> {
        match self.api.load_full() {
            Some(api) => api.methods().map(|m| m.name.clone()).collect(),
            None => Vec::new(),
        }
    }

    #[inline]
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Channel, CocaineError> {
        self.call_with_headers(method, args, Vec::new()).await
    }

    /// Serialize `args` into the argument list, a tuple gives one argument per field
    pub async fn call_args<T: Serialize>(
        &self, method: &str, args: &T,
    ) -> Result<Channel, CocaineError> {
        let args = MsgpCodec::encode_args(args)?;
        self.call_with_headers(method, args, Vec::new()).await
    }

    /// Call with the trace context attached to the invocation frame
    #[inline]
    pub async fn call_traced(
        &self, method: &str, args: Vec<Value>, trace: &Trace,
    ) -> Result<Channel, CocaineError> {
        self.call_with_headers(method, args, trace.pack()).await
    }

    /// Allocate a session for `method` and write the invocation frame.
    ///
    /// `headers` are raw header entries, see [cocaine_core::headers::Headers::pack].
    pub async fn call_with_headers(
        &self, method: &str, args: Vec<Value>, headers: Vec<Value>,
    ) -> Result<Channel, CocaineError> {
        if !self.conn.is_connected() {
            self.connect().await?;
        }
        let Some(api) = self.api.load_full() else {
            return Err(CocaineError::NotConnected(self.name.clone()));
        };
        let Some(m) = api.find(method) else {
            return Err(CocaineError::NoSuchMethod(method.to_string()));
        };
        self.conn.invoke(m.id, args, headers, m.tx.clone(), m.rx.clone()).await
    }

    #[inline]
    pub fn session_count(&self) -> usize {
        self.conn.session_count()
    }

    pub fn disconnect(&self) {
        self.conn.disconnect();
        self.set_state(ServiceState::Disconnected);
    }
}

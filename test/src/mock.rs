//! A scripted stand-in for the cloud runtime.
//!
//! [RuntimeMock] runs a locator and any number of services on ephemeral ports of 127.0.0.1.
//! Services answer every new session with the [Answer] script registered for the method,
//! and count what they receive so tests can assert on the wire traffic.

use cocaine_codec::{Frame, FrameDecoder};
use cocaine_core::api::{DispatchTree, ResolveInfo, ServiceApi, streaming_rx, value_as_string};
use cocaine_core::error::CocaineErrno;
use cocaine_core::{ClientConfig, Endpoint};
use parking_lot::Mutex;
use rmpv::Value;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const LOCATOR: &'static str = "locator";

/// Category of the errors the mock sends
pub const MOCK_CATEGORY: u64 = 1;

/// One step of the reply to a session
#[derive(Debug, Clone)]
pub enum Answer {
    /// `[session, 0, [value]]`
    Chunk(Value),
    /// `[session, 1, [[category, code], reason]]`
    Error(u64, String),
    /// `[session, 2, []]`
    Choke,
    /// Stop answering, the session stays open
    Hang,
    /// `[session, type, payload]` with a type chosen by the test
    Typed(u64, Vec<Value>),
    /// A complete frame written as is, whatever session it names
    Raw(Frame),
    /// A msgpack value that is not a frame
    Garbage(Value),
}

impl Answer {
    #[inline]
    pub fn error(code: u64, reason: &str) -> Self {
        Self::Error(code, reason.to_string())
    }

    /// Append the bytes of this answer to `out`, false once the script stops
    fn write(&self, session: u64, out: &mut Vec<u8>) -> bool {
        let frame = match self {
            Self::Chunk(v) => Frame::new(session, 0, vec![v.clone()]),
            Self::Error(code, reason) => Frame::new(session, 1, error_payload(*code, reason)),
            Self::Choke => Frame::new(session, 2, Vec::new()),
            Self::Typed(msg_type, payload) => Frame::new(session, *msg_type, payload.clone()),
            Self::Raw(frame) => frame.clone(),
            Self::Garbage(v) => {
                if let Err(e) = rmpv::encode::write_value(out, v) {
                    log::error!("mock encode error: {}", e);
                }
                return true;
            }
            Self::Hang => return false,
        };
        if let Err(e) = frame.encode_into(out) {
            log::error!("mock encode error: {}", e);
        }
        true
    }
}

fn error_payload(code: u64, reason: &str) -> Vec<Value> {
    vec![
        Value::Array(vec![Value::from(MOCK_CATEGORY), Value::from(code)]),
        Value::from(reason),
    ]
}

/// Server side state of the locator or of one service
struct Node {
    name: String,
    api: Mutex<ServiceApi>,
    /// Held back before every write
    delay: Mutex<Duration>,
    scripts: Mutex<FxHashMap<u64, Vec<Answer>>>,
    connections: AtomicUsize,
    frames: AtomicUsize,
    last_headers: Mutex<Option<Vec<Value>>>,
    generation: watch::Sender<u64>,
}

impl Node {
    fn new(name: &str, api: ServiceApi) -> Arc<Self> {
        let (generation, _) = watch::channel(0);
        Arc::new(Self {
            name: name.to_string(),
            api: Mutex::new(api),
            delay: Mutex::new(Duration::ZERO),
            scripts: Mutex::new(FxHashMap::default()),
            connections: AtomicUsize::new(0),
            frames: AtomicUsize::new(0),
            last_headers: Mutex::new(None),
            generation,
        })
    }

    fn script(&self, msg_type: u64) -> Vec<Answer> {
        match self.scripts.lock().get(&msg_type) {
            Some(answers) => answers.clone(),
            None => {
                let code = CocaineErrno::NoHandler.code();
                vec![Answer::Error(code, format!("{}: no handler for {}", self.name, msg_type))]
            }
        }
    }

    fn drop_connections(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}

type Registry = Mutex<FxHashMap<String, ResolveInfo>>;

fn locator_script(registry: &Registry, frame: &Frame) -> Vec<Answer> {
    match frame.msg_type {
        // resolve
        0 => {
            let name = frame.payload.first().and_then(value_as_string).unwrap_or_default();
            match registry.lock().get(&name) {
                Some(info) => vec![Answer::Chunk(info.to_value())],
                None => vec![Answer::error(1, "service is not available")],
            }
        }
        // refresh
        2 => vec![Answer::Chunk(Value::Nil)],
        // cluster
        3 => vec![Answer::Chunk(Value::Map(Vec::new()))],
        other => vec![Answer::error(CocaineErrno::NoHandler.code(), &format!("method {}", other))],
    }
}

async fn accept_loop(listener: TcpListener, node: Arc<Node>, registry: Option<Arc<Registry>>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                log::warn!("mock {} accept error: {}", node.name, e);
                return;
            }
        };
        node.connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(serve(stream, node.clone(), registry.clone()));
    }
}

async fn serve(stream: TcpStream, node: Arc<Node>, registry: Option<Arc<Registry>>) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let mut generation = node.generation.subscribe();
    let mut decoder = FrameDecoder::new();
    let mut sessions = FxHashSet::default();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = tokio::select! {
            r = reader.read(&mut buf) => match r {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
            _ = generation.changed() => {
                log::debug!("mock {} drops a connection", node.name);
                break;
            }
        };
        decoder.feed(&buf[..n]);
        let mut out = Vec::new();
        for r in &mut decoder {
            let frame = match r {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("mock {} bad frame: {}", node.name, e);
                    continue;
                }
            };
            node.frames.fetch_add(1, Ordering::SeqCst);
            if let Some(headers) = frame.headers.as_ref() {
                node.last_headers.lock().replace(headers.clone());
            }
            // follow-up messages of an open session are only counted
            if !sessions.insert(frame.session) {
                continue;
            }
            let answers = match registry.as_ref() {
                Some(registry) => locator_script(registry, &frame),
                None => node.script(frame.msg_type),
            };
            for answer in answers.iter() {
                if !answer.write(frame.session, &mut out) {
                    break;
                }
            }
        }
        if out.is_empty() {
            continue;
        }
        let delay = *node.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if writer.write_all(&out).await.is_err() {
            break;
        }
    }
}

/// The api of a plain streaming service: methods numbered in order, no follow-up messages
pub fn streaming_api(methods: &[&str]) -> ServiceApi {
    let mut api = ServiceApi::new();
    for (id, name) in methods.iter().enumerate() {
        api = api.with(id as u64, name, DispatchTree::new(), streaming_rx());
    }
    api
}

pub struct RuntimeMock {
    locator: Endpoint,
    registry: Arc<Registry>,
    nodes: Mutex<FxHashMap<String, Arc<Node>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RuntimeMock {
    /// Start the locator, must be called inside a tokio runtime
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind locator");
        let port = listener.local_addr().expect("addr").port();
        let registry = Arc::new(Registry::default());
        let node = Node::new(LOCATOR, cocaine_core::api::locator_api());
        let task = tokio::spawn(accept_loop(listener, node.clone(), Some(registry.clone())));
        let mut nodes = FxHashMap::default();
        nodes.insert(LOCATOR.to_string(), node);
        Self {
            locator: Endpoint::new("127.0.0.1", port),
            registry,
            nodes: Mutex::new(nodes),
            tasks: Mutex::new(vec![task]),
        }
    }

    #[inline]
    pub fn locator_endpoint(&self) -> Endpoint {
        self.locator.clone()
    }

    /// Client config pointing at the mock locator, with short connect timeouts
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.locators = vec![self.locator_endpoint()];
        config.timeout.connect_timeout = Duration::from_secs(1);
        config.timeout.resolve_timeout = Duration::from_secs(3);
        config
    }

    pub async fn register(&self, name: &str, version: u64, methods: &[&str]) -> Endpoint {
        self.register_api(name, version, streaming_api(methods)).await
    }

    /// Listen for `name` and publish it in the locator
    pub async fn register_api(&self, name: &str, version: u64, api: ServiceApi) -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind service");
        let endpoint = Endpoint::new("127.0.0.1", listener.local_addr().expect("addr").port());
        let node = Node::new(name, api.clone());
        self.tasks.lock().push(tokio::spawn(accept_loop(listener, node.clone(), None)));
        self.nodes.lock().insert(name.to_string(), node);
        self.publish(name, vec![endpoint.clone()], version, api);
        endpoint
    }

    /// Publish `name` in the locator.
    ///
    /// A service started with [Self::register_api] takes the new api, otherwise nothing listens
    /// on `endpoints`.
    pub fn publish(&self, name: &str, endpoints: Vec<Endpoint>, version: u64, api: ServiceApi) {
        if let Some(node) = self.nodes.lock().get(name) {
            *node.api.lock() = api.clone();
        }
        self.registry.lock().insert(name.to_string(), ResolveInfo { endpoints, version, api });
    }

    /// Script the answer of every new session of `method`
    pub fn on(&self, name: &str, method: &str, answers: Vec<Answer>) {
        let node = self.node(name);
        let id = node.api.lock().find(method).map(|m| m.id).expect("method not in api");
        node.scripts.lock().insert(id, answers);
    }

    fn node(&self, name: &str) -> Arc<Node> {
        self.nodes.lock().get(name).cloned().expect("unknown mock service")
    }

    /// Hold every reply of `name` back by `delay`
    pub fn delay(&self, name: &str, delay: Duration) {
        *self.node(name).delay.lock() = delay;
    }

    /// Connections accepted so far
    pub fn connections(&self, name: &str) -> usize {
        self.node(name).connections.load(Ordering::SeqCst)
    }

    /// Frames received so far, over every connection
    pub fn frames(&self, name: &str) -> usize {
        self.node(name).frames.load(Ordering::SeqCst)
    }

    /// Raw header entries of the last frame that carried any
    pub fn last_headers(&self, name: &str) -> Option<Vec<Value>> {
        self.node(name).last_headers.lock().clone()
    }

    /// Close every open connection of `name`, the listener keeps accepting
    pub fn drop_connections(&self, name: &str) {
        self.node(name).drop_connections();
    }
}

impl Drop for RuntimeMock {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for node in self.nodes.lock().values() {
            node.drop_connections();
        }
    }
}

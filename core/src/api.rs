//! Dispatch trees and service API descriptions.
//!
//! A service does not publish its protocol statically: the locator returns, per method,
//! a tree describing which message types may be sent (tx) and received (rx) at every point
//! of a session. The trees are immutable once parsed and shared between sessions.
//!
//! ```text
//! {0: ["write", null], 1: ["error", {}], 2: ["close", {}]}
//! ```
//!
//! - `null` keeps the current node (recursive message, e.g. a stream chunk)
//! - `{}` is the last message of the session
//! - a non-empty mapping becomes the current node

use crate::{CocaineError, Endpoint};
use rmpv::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What happens to a session after a message has been consumed
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The current node is kept
    Recursive,
    /// No further message is legal
    Terminal,
    /// Move to the subtree
    Node(Arc<DispatchTree>),
}

impl Transition {
    fn from_value(v: &Value) -> Result<Self, CocaineError> {
        match v {
            Value::Nil => Ok(Self::Recursive),
            Value::Map(entries) if entries.is_empty() => Ok(Self::Terminal),
            Value::Map(_) => Ok(Self::Node(Arc::new(DispatchTree::from_value(v)?))),
            _ => Err(malformed("transition", v)),
        }
    }
}

/// `message_type -> (name, transition)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchTree {
    entries: BTreeMap<u64, (String, Transition)>,
}

impl DispatchTree {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style insertion, mostly for static protocols and tests
    pub fn with(mut self, msg_type: u64, name: &str, transition: Transition) -> Self {
        self.entries.insert(msg_type, (name.to_string(), transition));
        self
    }

    #[inline]
    pub fn get(&self, msg_type: u64) -> Option<(&str, &Transition)> {
        self.entries.get(&msg_type).map(|(name, t)| (name.as_str(), t))
    }

    /// Look up a message type by its symbolic name
    pub fn find(&self, name: &str) -> Option<(u64, &Transition)> {
        for (msg_type, (n, t)) in self.entries.iter() {
            if n == name {
                return Some((*msg_type, t));
            }
        }
        None
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|(name, _)| name.as_str())
    }

    /// Parse the msgpack representation, `nil` is read as the empty tree
    pub fn from_value(v: &Value) -> Result<Self, CocaineError> {
        let mut tree = Self::new();
        let entries = match v {
            Value::Nil => return Ok(tree),
            Value::Map(entries) => entries,
            _ => return Err(malformed("dispatch tree", v)),
        };
        for (k, entry) in entries.iter() {
            let msg_type = value_as_u64(k).ok_or_else(|| malformed("message type", k))?;
            let fields = entry.as_array().ok_or_else(|| malformed("dispatch entry", entry))?;
            if fields.len() < 2 {
                return Err(malformed("dispatch entry", entry));
            }
            let name = value_as_string(&fields[0]).ok_or_else(|| malformed("name", &fields[0]))?;
            let transition = Transition::from_value(&fields[1])?;
            tree.entries.insert(msg_type, (name, transition));
        }
        Ok(tree)
    }
}

/// How the messages of an rx tree should be turned into values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// `value` / `error`, one answer
    Primitive,
    /// `write`* then `close`, or `error`
    Streaming,
    /// Unknown vocabulary, the raw `[name, payload]` is handed out
    Null,
}

impl Protocol {
    pub fn detect(rx: &DispatchTree) -> Self {
        for name in rx.names() {
            match name {
                "value" => return Self::Primitive,
                "write" => return Self::Streaming,
                _ => {}
            }
        }
        Self::Null
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDesc {
    pub id: u64,
    pub name: String,
    /// What may be sent after the invocation
    pub tx: Arc<DispatchTree>,
    /// What may be received after the invocation
    pub rx: Arc<DispatchTree>,
}

/// `method_id -> (name, tx tree, rx tree)` of one service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceApi {
    methods: BTreeMap<u64, MethodDesc>,
    by_name: BTreeMap<String, u64>,
}

impl ServiceApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: u64, name: &str, tx: DispatchTree, rx: DispatchTree) -> Self {
        self.insert(MethodDesc { id, name: name.to_string(), tx: Arc::new(tx), rx: Arc::new(rx) });
        self
    }

    fn insert(&mut self, method: MethodDesc) {
        self.by_name.insert(method.name.clone(), method.id);
        self.methods.insert(method.id, method);
    }

    #[inline]
    pub fn find(&self, name: &str) -> Option<&MethodDesc> {
        self.by_name.get(name).and_then(|id| self.methods.get(id))
    }

    #[inline]
    pub fn get(&self, id: u64) -> Option<&MethodDesc> {
        self.methods.get(&id)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDesc> {
        self.methods.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn from_value(v: &Value) -> Result<Self, CocaineError> {
        let entries = v.as_map().ok_or_else(|| malformed("api", v))?;
        let mut api = Self::new();
        for (k, entry) in entries.iter() {
            let id = value_as_u64(k).ok_or_else(|| malformed("method id", k))?;
            let fields = entry.as_array().ok_or_else(|| malformed("method", entry))?;
            if fields.len() < 3 {
                return Err(malformed("method", entry));
            }
            let name = value_as_string(&fields[0]).ok_or_else(|| malformed("name", &fields[0]))?;
            api.insert(MethodDesc {
                id,
                name,
                tx: Arc::new(DispatchTree::from_value(&fields[1])?),
                rx: Arc::new(DispatchTree::from_value(&fields[2])?),
            });
        }
        Ok(api)
    }
}

impl fmt::Display for ServiceApi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, m) in self.methods.values().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", m.id, m.name)?;
        }
        write!(f, "}}")
    }
}

/// The answer of the locator for one service name
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveInfo {
    pub endpoints: Vec<Endpoint>,
    pub version: u64,
    pub api: ServiceApi,
}

impl ResolveInfo {
    /// `[[[host, port], ...], version, api]`
    pub fn from_value(v: &Value) -> Result<Self, CocaineError> {
        let fields = v.as_array().ok_or_else(|| malformed("resolve result", v))?;
        if fields.len() < 3 {
            return Err(malformed("resolve result", v));
        }
        let raw_endpoints = fields[0].as_array().ok_or_else(|| malformed("endpoints", &fields[0]))?;
        let mut endpoints = Vec::with_capacity(raw_endpoints.len());
        for ep in raw_endpoints.iter() {
            let pair = ep.as_array().ok_or_else(|| malformed("endpoint", ep))?;
            if pair.len() < 2 {
                return Err(malformed("endpoint", ep));
            }
            let host = value_as_string(&pair[0]).ok_or_else(|| malformed("host", &pair[0]))?;
            let port = value_as_u64(&pair[1])
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| malformed("port", &pair[1]))?;
            endpoints.push(Endpoint::new(host, port));
        }
        let version = value_as_u64(&fields[1]).ok_or_else(|| malformed("version", &fields[1]))?;
        let api = ServiceApi::from_value(&fields[2])?;
        Ok(Self { endpoints, version, api })
    }

    pub fn to_value(&self) -> Value {
        let endpoints = self
            .endpoints
            .iter()
            .map(|ep| Value::Array(vec![Value::from(ep.host.as_str()), Value::from(ep.port)]))
            .collect::<Vec<_>>();
        let api = self
            .api
            .methods()
            .map(|m| {
                (
                    Value::from(m.id),
                    Value::Array(vec![
                        Value::from(m.name.as_str()),
                        tree_to_value(&m.tx),
                        tree_to_value(&m.rx),
                    ]),
                )
            })
            .collect::<Vec<_>>();
        Value::Array(vec![Value::Array(endpoints), Value::from(self.version), Value::Map(api)])
    }
}

/// Inverse of [DispatchTree::from_value]
pub fn tree_to_value(tree: &DispatchTree) -> Value {
    let mut entries = Vec::with_capacity(tree.entries.len());
    for (msg_type, (name, transition)) in tree.entries.iter() {
        let next = match transition {
            Transition::Recursive => Value::Nil,
            Transition::Terminal => Value::Map(Vec::new()),
            Transition::Node(sub) => tree_to_value(sub),
        };
        entries.push((Value::from(*msg_type), Value::Array(vec![Value::from(name.as_str()), next])));
    }
    Value::Map(entries)
}

/// `value` or `error`, both terminal
pub fn primitive_rx() -> DispatchTree {
    DispatchTree::new()
        .with(0, "value", Transition::Terminal)
        .with(1, "error", Transition::Terminal)
}

/// `write` any number of times, then `close`; or `error`
pub fn streaming_rx() -> DispatchTree {
    DispatchTree::new()
        .with(0, "write", Transition::Recursive)
        .with(1, "error", Transition::Terminal)
        .with(2, "close", Transition::Terminal)
}

/// The locator protocol is fixed and known before anything is resolved
pub fn locator_api() -> ServiceApi {
    let discard = || DispatchTree::new().with(0, "discard", Transition::Terminal);
    ServiceApi::new()
        .with(0, "resolve", DispatchTree::new(), primitive_rx())
        .with(1, "connect", DispatchTree::new(), streaming_rx())
        .with(2, "refresh", DispatchTree::new(), primitive_rx())
        .with(3, "cluster", DispatchTree::new(), primitive_rx())
        .with(4, "publish", discard(), primitive_rx())
        .with(5, "routing", discard(), streaming_rx())
}

#[inline]
pub fn value_as_u64(v: &Value) -> Option<u64> {
    v.as_u64()
}

/// Strings may come as msgpack str or raw bin depending on the peer
pub fn value_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => s.as_str().map(|s| s.to_string()),
        Value::Binary(b) => String::from_utf8(b.clone()).ok(),
        _ => None,
    }
}

pub fn value_as_bytes(v: &Value) -> Option<&[u8]> {
    match v {
        Value::String(s) => Some(s.as_bytes()),
        Value::Binary(b) => Some(b.as_slice()),
        _ => None,
    }
}

#[inline]
fn malformed(what: &str, v: &Value) -> CocaineError {
    CocaineError::Frame(format!("invalid {}: {}", what, v))
}

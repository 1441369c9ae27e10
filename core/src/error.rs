use crate::Endpoint;
use std::fmt;
use std::time::Duration;

/// Error category used by the framework itself (as opposed to categories chosen by services)
pub const FRAMEWORK_CATEGORY: u64 = 42;

/// Category assumed when the peer sends an error code without a category
pub const DEFAULT_CATEGORY: u64 = 999;

/// Framework error codes, shared with the runtime and the worker side.
///
/// NOTE: the discriminants are part of the protocol, never renumber them.
#[derive(
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Debug,
    thiserror::Error,
)]
#[repr(u32)]
pub enum CocaineErrno {
    /// Uncaught exception in the handler
    #[strum(serialize = "uncaught_exception")]
    UncaughtException = 100,
    /// No handler for requested event
    #[strum(serialize = "no_handler")]
    NoHandler = 200,
    /// Syntax or import error in application source
    #[strum(serialize = "bad_source")]
    BadSource = 210,
    /// Invocation failed
    #[strum(serialize = "invocation_failed")]
    InvocationFailed = 212,
    /// Service is disconnected
    #[strum(serialize = "service_disconnected")]
    ServiceDisconnected = 220,
    /// Service API version is unexpected
    #[strum(serialize = "invalid_api_version")]
    InvalidApiVersion = 230,
    /// Message type is out of protocol
    #[strum(serialize = "invalid_message_type")]
    InvalidMessageType = 240,
}

impl CocaineErrno {
    #[inline]
    pub fn code(&self) -> u64 {
        *self as u32 as u64
    }
}

/// An error sent by the remote peer for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub service: String,
    pub category: u64,
    pub code: u64,
    pub reason: String,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "error in service \"{}\" - {} [{}]", self.service, self.reason, self.code)
    }
}

impl std::error::Error for ServiceError {}

/// Why a single endpoint could not be connected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectReason {
    #[error("connection refused")]
    Refused,
    #[error("timeout ({0:?})")]
    Timeout(Duration),
    #[error("could not resolve hostname")]
    Unresolvable,
    #[error("{0}")]
    Io(String),
}

impl From<std::io::Error> for ConnectReason {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::ConnectionRefused => Self::Refused,
            _ => Self::Io(e.to_string()),
        }
    }
}

/// Every endpoint tried by one connect() call, with the reason it failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectError {
    pub service: String,
    pub attempts: Vec<(Endpoint, ConnectReason)>,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(f, "unable to connect to \"{}\": no endpoints", self.service);
        }
        write!(f, "unable to connect to \"{}\":", self.service)?;
        for (i, (endpoint, reason)) in self.attempts.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, " {} - {}", endpoint, reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConnectError {}

#[derive(Debug, thiserror::Error)]
pub enum CocaineError {
    /// Name not found, locator returned an error or malformed data
    #[error("unable to resolve service \"{name}\": {reason}")]
    Resolve { name: String, reason: String },
    /// All candidate endpoints failed
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// The peer sent an error message for the session
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// The message type is not legal at the current dispatch tree node
    #[error("unexpected message type {msg_type} in service \"{service}\"")]
    InvalidMessageType { service: String, msg_type: u64 },
    #[error("service {0} has been disconnected")]
    Disconnected(String),
    #[error("service {0} is not connected")]
    NotConnected(String),
    #[error("invalid API version of service \"{service}\": expected `{expected}`, got `{got}`")]
    VersionMismatch { service: String, expected: u64, got: u64 },
    /// The method is not legal at the current dispatch tree node, or absent from the API
    #[error("no such method `{0}`")]
    NoSuchMethod(String),
    /// The session has completed, no more messages will come or may be sent
    #[error("session is closed")]
    Choke,
    #[error("timeout ({0:?})")]
    Timeout(Duration),
    #[error("malformed data: {0}")]
    Frame(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Clone for CocaineError {
    /// `Io` keeps its kind and message, the rest is cloned as is
    fn clone(&self) -> Self {
        match self {
            Self::Resolve { name, reason } => {
                Self::Resolve { name: name.clone(), reason: reason.clone() }
            }
            Self::Connect(e) => Self::Connect(e.clone()),
            Self::Service(e) => Self::Service(e.clone()),
            Self::InvalidMessageType { service, msg_type } => {
                Self::InvalidMessageType { service: service.clone(), msg_type: *msg_type }
            }
            Self::Disconnected(s) => Self::Disconnected(s.clone()),
            Self::NotConnected(s) => Self::NotConnected(s.clone()),
            Self::VersionMismatch { service, expected, got } => {
                Self::VersionMismatch { service: service.clone(), expected: *expected, got: *got }
            }
            Self::NoSuchMethod(s) => Self::NoSuchMethod(s.clone()),
            Self::Choke => Self::Choke,
            Self::Timeout(d) => Self::Timeout(*d),
            Self::Frame(s) => Self::Frame(s.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl CocaineError {
    /// Map to the framework code the runtime uses for the same condition
    pub fn errno(&self) -> Option<CocaineErrno> {
        match self {
            Self::InvalidMessageType { .. } => Some(CocaineErrno::InvalidMessageType),
            Self::Disconnected(_) | Self::NotConnected(_) => {
                Some(CocaineErrno::ServiceDisconnected)
            }
            Self::VersionMismatch { .. } => Some(CocaineErrno::InvalidApiVersion),
            _ => None,
        }
    }

    #[inline]
    pub fn is_choke(&self) -> bool {
        matches!(self, Self::Choke)
    }

    /// Errors after which reconnecting through the locator might help
    #[inline]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::NotConnected(_))
    }
}

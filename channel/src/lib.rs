#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # cocaine-channel
//!
//! The session engine of the cocaine client.
//!
//! One [Connection] is kept per resolved service. Every call allocates a session on it and
//! returns a [Channel]: the [Rx] side receives the frames the read loop dispatched to the
//! session, the [Tx] side sends follow-up messages. Both sides walk the dispatch tree the
//! locator published for the method, so protocol misuse is caught locally.
//!
//! ```text
//! ServiceFactory ── Locator ── Connection(locator) ── resolve()
//!       │
//!       └── Service ── Connection(service) ── SessionRegistry ── Rx / Tx
//! ```

#[macro_use]
extern crate captains_log;

mod transport;
pub use transport::ClientTransport;
pub mod session;
pub use session::Message;
mod channel;
pub use channel::*;
mod connection;
mod gate;
pub use connection::Connection;
mod locator;
pub use locator::*;
mod service;
pub use service::*;
mod factory;
pub use factory::ServiceFactory;
mod storage;
pub use storage::Storage;

pub use cocaine_core::{ClientConfig, Endpoint, TimeoutSetting, api, error, headers};
pub use cocaine_core::{CocaineError, ConnectError, ConnectReason, ServiceError};

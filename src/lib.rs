//! # cocaine
//!
//! Client framework for the cocaine cloud.
//!
//! A [ServiceFactory] resolves named services through the locator and keeps one connection
//! per service. Every call opens a session on that connection and returns a [Channel]:
//!
//! ```no_run
//! use cocaine::{ClientConfig, ServiceFactory};
//!
//! # async fn run() -> Result<(), cocaine::CocaineError> {
//! let factory = ServiceFactory::new(ClientConfig::default());
//! let node = factory.create_service("node", 1);
//! let mut ch = node.call("list", vec![]).await?;
//! loop {
//!     match ch.rx.get().await {
//!         Ok(v) => println!("{}", v),
//!         Err(e) if e.is_choke() => break,
//!         Err(e) => return Err(e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub use cocaine_channel::session;
pub use cocaine_channel::{Channel, ClientTransport, Message, ResolveCache, Rx, ServiceState, Tx};
pub use cocaine_codec::{Frame, FrameDecoder, FrameError, MsgpCodec};
pub use cocaine_core::*;
pub use cocaine_tcp::TcpTransport;

pub type Connection = cocaine_channel::Connection<TcpTransport>;
pub type Locator = cocaine_channel::Locator<TcpTransport>;
pub type Service = cocaine_channel::Service<TcpTransport>;
pub type ServiceFactory = cocaine_channel::ServiceFactory<TcpTransport>;
pub type Storage = cocaine_channel::Storage<TcpTransport>;

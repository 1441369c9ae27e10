use cocaine_core::{ClientConfig, ConnectReason, Endpoint};
use std::fmt;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};

/// The byte stream a [Connection](crate::Connection) runs on.
///
/// The implementation can be found in `cocaine-tcp`.
pub trait ClientTransport: fmt::Debug + Send + Sized + 'static {
    type Reader: AsyncRead + Unpin + Send + 'static;
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Establish the connection to one endpoint, honoring `config.timeout.connect_timeout`
    fn connect(
        endpoint: &Endpoint, config: &ClientConfig,
    ) -> impl Future<Output = Result<Self, ConnectReason>> + Send;

    /// The read half goes to the read loop, the write half to the writer loop
    fn into_split(self) -> (Self::Reader, Self::Writer);
}

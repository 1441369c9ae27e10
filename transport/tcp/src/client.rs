use cocaine_channel::ClientTransport;
use cocaine_core::{ClientConfig, ConnectReason, Endpoint};
use log::warn;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream, lookup_host};

/// A connected TCP stream with keep-alive and nodelay set
pub struct TcpTransport {
    stream: TcpStream,
    endpoint: Endpoint,
    addr: SocketAddr,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tcp {}({})", self.endpoint, self.addr)
    }
}

impl TcpTransport {
    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn resolve(endpoint: &Endpoint, timeout: Duration) -> Result<SocketAddr, ConnectReason> {
        let target = (endpoint.host.as_str(), endpoint.port);
        let res = if timeout.is_zero() {
            lookup_host(target).await
        } else {
            match tokio::time::timeout(timeout, lookup_host(target)).await {
                Ok(r) => r,
                Err(_) => return Err(ConnectReason::Timeout(timeout)),
            }
        };
        match res {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => Ok(addr),
                None => Err(ConnectReason::Unresolvable),
            },
            Err(e) => {
                warn!("Cannot resolve {}: {}", endpoint, e);
                Err(ConnectReason::Unresolvable)
            }
        }
    }
}

impl ClientTransport for TcpTransport {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    async fn connect(endpoint: &Endpoint, config: &ClientConfig) -> Result<Self, ConnectReason> {
        let connect_timeout = config.timeout.connect_timeout;
        let addr = Self::resolve(endpoint, connect_timeout).await?;
        let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        socket.set_keepalive(true)?;
        let stream = if connect_timeout.is_zero() {
            socket.connect(addr).await
        } else {
            match tokio::time::timeout(connect_timeout, socket.connect(addr)).await {
                Ok(r) => r,
                Err(_) => {
                    warn!("Connect {} timeout after {:?}", endpoint, connect_timeout);
                    return Err(ConnectReason::Timeout(connect_timeout));
                }
            }
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot connect addr {}: {}", addr, e);
                return Err(e.into());
            }
        };
        stream.set_nodelay(true)?;
        Ok(Self { stream, endpoint: endpoint.clone(), addr })
    }

    #[inline]
    fn into_split(self) -> (Self::Reader, Self::Writer) {
        self.stream.into_split()
    }
}

//! Network utilities

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
}

/// Bind a listening socket with `SO_REUSEADDR` (and `SO_REUSEPORT` on
/// Linux) set before the bind, so restarts don't trip over sockets in
/// TIME_WAIT.
pub fn bind_reuse(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(any(target_os = "linux", target_os = "android"))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    TcpListener::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_reuse_ephemeral() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = bind_reuse(addr, 16).unwrap();
        let local = listener.local_addr().unwrap();
        assert_ne!(local.port(), 0);
    }

    #[tokio::test]
    async fn test_configure_stream() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = bind_reuse(addr, 16).unwrap();
        let local = listener.local_addr().unwrap();

        let client = TcpStream::connect(local).await.unwrap();
        configure_tcp_stream(&client);
        assert!(client.nodelay().unwrap());
    }
}

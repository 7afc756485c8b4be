//! TCP listener binding

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket};

/// Accept backlog for all listeners
const LISTEN_BACKLOG: u32 = 1024;

/// Bind a TCP listener, optionally in transparent-intercept mode.
///
/// `IP_TRANSPARENT` must be set before the bind, so this builds the socket
/// by hand instead of using `TcpListener::bind`.
pub async fn bind(addr: SocketAddr, transparent: bool) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    socket.set_reuseaddr(true)?;
    if transparent {
        super::set_transparent(&socket)?;
    }

    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_plain() {
        let listener = bind("127.0.0.1:0".parse().unwrap(), false).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_error() {
        let first = bind("127.0.0.1:0".parse().unwrap(), false).await.unwrap();
        let addr = first.local_addr().unwrap();
        assert!(bind(addr, false).await.is_err());
    }
}

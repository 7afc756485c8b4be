//! UDP socket binding
//!
//! UDP is connectionless; the dispatcher drives a recv loop on the bound
//! socket and hands each datagram to the module.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Bind a UDP socket, optionally in transparent-intercept mode.
pub async fn bind(addr: SocketAddr, transparent: bool) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(addr).await?;
    if transparent {
        super::set_transparent(&socket)?;
    }
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_plain() {
        let socket = bind("127.0.0.1:0".parse().unwrap(), false).await.unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }
}

//! Common types shared by all layers
//!
//! - Stream: unified async I/O abstraction handed to pipeline modules
//! - Network: transport discriminator for listener specs

use tokio::io::{AsyncRead, AsyncWrite};

/// The core stream type handed to pipeline modules.
/// Modules operate on this unified abstraction, never on raw sockets.
pub type Stream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// Trait for types that can be converted into a Stream
pub trait IntoStream {
    fn into_stream(self) -> Stream;
}

impl<T> IntoStream for T
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn into_stream(self) -> Stream {
        Box::new(self)
    }
}

/// Network type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Udp,
}

impl Default for Network {
    fn default() -> Self {
        Network::Tcp
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Tcp => write!(f, "tcp"),
            Network::Udp => write!(f, "udp"),
        }
    }
}

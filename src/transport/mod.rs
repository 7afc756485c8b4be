//! Transport layer
//!
//! Responsibilities:
//! - Bind listening sockets (TCP, UDP), optionally in transparent mode
//! - NO protocol parsing, NO content inspection
//!
//! Transparent mode sets `IP_TRANSPARENT`, letting a listener accept traffic
//! destined for arbitrary addresses that network-layer rules redirected to
//! it. Requires `CAP_NET_ADMIN` on Linux; unsupported elsewhere.
//!
//! Bind failures surface as raw `io::Error` so the dispatcher can attach
//! listener context before they turn fatal.

pub mod tcp;
pub mod udp;

#[cfg(target_os = "linux")]
pub(crate) fn set_transparent<F: std::os::fd::AsFd>(socket: &F) -> std::io::Result<()> {
    use nix::sys::socket::{setsockopt, sockopt::IpTransparent};

    setsockopt(socket, IpTransparent, &true)
        .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_transparent<F>(_socket: &F) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "transparent interception requires Linux",
    ))
}

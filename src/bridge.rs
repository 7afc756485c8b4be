//! CNI bridge address discovery
//!
//! Transparent-intercept listeners bind on the node's CNI bridge interface.
//! The bridge may come up after this process starts, so discovery polls the
//! kernel's interface state until an IPv4 address is assigned. This runs once
//! at startup, before any listener binds; it never shares a task with
//! connection handling.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

/// Default bridge device name
pub const DEFAULT_DEVICE: &str = "cni0";

/// Environment variable overriding the bridge device name
pub const DEVICE_ENV: &str = "CNI_BRIDGE_ETH";

/// Interval between interface-state polls
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bridge device name, from the environment or the default.
pub fn device_name() -> String {
    std::env::var(DEVICE_ENV).unwrap_or_else(|_| DEFAULT_DEVICE.to_string())
}

/// Resolve the bridge interface's IPv4 address, polling until the device
/// reports one.
///
/// Suspends forever if the device never appears; callers wanting a bound
/// wait must wrap this in a timeout. A malformed interface dump yields
/// `0.0.0.0`, which means "not yet known" and is never a valid bind target.
pub async fn resolve(device: &str) -> Ipv4Addr {
    let mut logged = false;
    loop {
        match dump_device(device).await {
            Some(dump) if dump.lines().any(|l| l.trim_start().starts_with("inet ")) => {
                let addr = parse_inet_addr(&dump);
                debug!("Bridge device {} resolved to {}", device, addr);
                return addr;
            }
            _ => {
                if !logged {
                    warn!("Waiting for IPv4 address on bridge device {}", device);
                    logged = true;
                }
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Dump interface state via `ip addr show dev <device>`.
async fn dump_device(device: &str) -> Option<String> {
    let output = Command::new("ip")
        .args(["addr", "show", "dev", device])
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract the IPv4 address from an interface dump.
///
/// Takes the first `inet` line and the address portion before the prefix
/// length. Returns `0.0.0.0` when the dump carries no parseable address.
pub fn parse_inet_addr(dump: &str) -> Ipv4Addr {
    dump.lines()
        .map(str::trim)
        .find(|line| line.starts_with("inet "))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|cidr| cidr.split('/').next())
        .and_then(|addr| addr.parse().ok())
        .unwrap_or(Ipv4Addr::UNSPECIFIED)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
4: cni0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP group default qlen 1000
    link/ether 9e:2f:41:8c:aa:01 brd ff:ff:ff:ff:ff:ff
    inet 10.1.2.3/24 brd 10.1.2.255 scope global cni0
       valid_lft forever preferred_lft forever
    inet6 fe80::9c2f:41ff:fe8c:aa01/64 scope link
       valid_lft forever preferred_lft forever";

    #[test]
    fn test_parse_inet_addr() {
        assert_eq!(parse_inet_addr(DUMP), Ipv4Addr::new(10, 1, 2, 3));
    }

    #[test]
    fn test_parse_no_inet_line() {
        let dump = "4: cni0: <BROADCAST> mtu 1500\n    link/ether 9e:2f:41:8c:aa:01";
        assert_eq!(parse_inet_addr(dump), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_parse_skips_inet6() {
        let dump = "    inet6 fe80::1/64 scope link\n    inet 192.168.49.1/24 scope global";
        assert_eq!(parse_inet_addr(dump), Ipv4Addr::new(192, 168, 49, 1));
    }

    #[test]
    fn test_parse_malformed_address() {
        let dump = "    inet not-an-address/24 scope global";
        assert_eq!(parse_inet_addr(dump), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_device_name_default() {
        // Only valid while CNI_BRIDGE_ETH is unset in the test environment.
        if std::env::var(DEVICE_ENV).is_err() {
            assert_eq!(device_name(), DEFAULT_DEVICE);
        }
    }
}

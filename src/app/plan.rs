//! Listener plan
//!
//! Pure function from configuration to the set of listeners to activate.
//! The port table is fixed: deployment tooling (kubelet probes, scrape
//! configs, redirect rules) hardcodes these ports.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::common::Network;
use crate::config::Config;
use crate::module::ModuleKind;

/// Transparent outbound interception
pub const OUTBOUND_PORT: u16 = 15001;
/// Transparent inbound interception
pub const INBOUND_PORT: u16 = 15003;
/// Metrics export, internal format
pub const STATS_INTERNAL_PORT: u16 = 15000;
/// Metrics export, prometheus scrape format
pub const STATS_PROMETHEUS_PORT: u16 = 15010;
/// Transparent local DNS interception
pub const DNS_PORT: u16 = 15053;
pub const LIVENESS_PROBE_PORT: u16 = 15901;
pub const READINESS_PROBE_PORT: u16 = 15902;
pub const STARTUP_PROBE_PORT: u16 = 15903;

/// One listener to bind: transport, address, intercept mode, target module.
/// Value object, never mutated after planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSpec {
    pub network: Network,
    pub addr: SocketAddr,
    pub transparent: bool,
    pub module: ModuleKind,
}

impl ListenerSpec {
    fn tcp(addr: SocketAddr, module: ModuleKind) -> Self {
        Self {
            network: Network::Tcp,
            addr,
            transparent: false,
            module,
        }
    }

    fn tcp_transparent(addr: SocketAddr, module: ModuleKind) -> Self {
        Self {
            network: Network::Tcp,
            addr,
            transparent: true,
            module,
        }
    }

    fn udp_transparent(addr: SocketAddr, module: ModuleKind) -> Self {
        Self {
            network: Network::Udp,
            addr,
            transparent: true,
            module,
        }
    }
}

/// Build the listener set for a configuration and a resolved bridge address.
///
/// A feature whose gating field is absent contributes nothing: its port is
/// never bound.
pub fn build_plan(config: &Config, bridge_ip: Ipv4Addr) -> Vec<ListenerSpec> {
    let bridge = IpAddr::V4(bridge_ip);
    let any_v4 = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    let any_v6 = IpAddr::V6(Ipv6Addr::UNSPECIFIED);

    let mut plan = Vec::new();

    if config.inbound_enabled() {
        plan.push(ListenerSpec::tcp_transparent(
            SocketAddr::new(bridge, INBOUND_PORT),
            ModuleKind::Inbound,
        ));
    }

    if config.outbound_enabled() {
        plan.push(ListenerSpec::tcp_transparent(
            SocketAddr::new(bridge, OUTBOUND_PORT),
            ModuleKind::Outbound,
        ));
    }

    if config.probe_scheme().is_some() {
        plan.push(ListenerSpec::tcp(
            SocketAddr::new(any_v4, LIVENESS_PROBE_PORT),
            ModuleKind::LivenessProbe,
        ));
        plan.push(ListenerSpec::tcp(
            SocketAddr::new(any_v4, READINESS_PROBE_PORT),
            ModuleKind::ReadinessProbe,
        ));
        plan.push(ListenerSpec::tcp(
            SocketAddr::new(any_v4, STARTUP_PROBE_PORT),
            ModuleKind::StartupProbe,
        ));
    }

    plan.push(ListenerSpec::tcp(
        SocketAddr::new(any_v4, STATS_PROMETHEUS_PORT),
        ModuleKind::StatsPrometheus,
    ));
    plan.push(ListenerSpec::tcp(
        SocketAddr::new(any_v6, STATS_INTERNAL_PORT),
        ModuleKind::StatsInternal,
    ));

    if config.dns_proxy_enabled() {
        plan.push(ListenerSpec::udp_transparent(
            SocketAddr::new(bridge, DNS_PORT),
            ModuleKind::Dns,
        ));
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    const BRIDGE: Ipv4Addr = Ipv4Addr::new(10, 1, 0, 1);

    fn find(plan: &[ListenerSpec], module: ModuleKind) -> Option<&ListenerSpec> {
        plan.iter().find(|spec| spec.module == module)
    }

    #[test]
    fn test_empty_config_binds_only_stats() {
        let plan = build_plan(&Config::default(), BRIDGE);
        assert_eq!(plan.len(), 2);

        let prometheus = find(&plan, ModuleKind::StatsPrometheus).unwrap();
        assert_eq!(prometheus.addr, "0.0.0.0:15010".parse().unwrap());
        assert_eq!(prometheus.network, Network::Tcp);
        assert!(!prometheus.transparent);

        let internal = find(&plan, ModuleKind::StatsInternal).unwrap();
        assert_eq!(internal.addr, "[::]:15000".parse().unwrap());
    }

    #[test]
    fn test_inbound_listener() {
        let config = Config::from_json(r#"{"Inbound": {"TrafficMatches": {}}}"#).unwrap();
        let plan = build_plan(&config, BRIDGE);

        let inbound = find(&plan, ModuleKind::Inbound).unwrap();
        assert_eq!(inbound.addr, "10.1.0.1:15003".parse().unwrap());
        assert_eq!(inbound.network, Network::Tcp);
        assert!(inbound.transparent);

        assert!(find(&plan, ModuleKind::Outbound).is_none());
        assert!(find(&plan, ModuleKind::Dns).is_none());
    }

    #[test]
    fn test_outbound_listener_via_policy() {
        let config = Config::from_json(r#"{"Outbound": {}}"#).unwrap();
        let plan = build_plan(&config, BRIDGE);

        let outbound = find(&plan, ModuleKind::Outbound).unwrap();
        assert_eq!(outbound.addr, "10.1.0.1:15001".parse().unwrap());
        assert!(outbound.transparent);
    }

    #[test]
    fn test_outbound_listener_via_egress_flag() {
        let config =
            Config::from_json(r#"{"Spec": {"Traffic": {"EnableEgress": true}}}"#).unwrap();
        let plan = build_plan(&config, BRIDGE);
        assert!(find(&plan, ModuleKind::Outbound).is_some());
    }

    #[test]
    fn test_probe_listeners_all_or_nothing() {
        let config = Config::from_json(
            r#"{"Spec": {"Probes": {"LivenessProbes": [{"httpGet": {"scheme": "HTTP"}}]}}}"#,
        )
        .unwrap();
        let plan = build_plan(&config, BRIDGE);

        for (kind, port) in [
            (ModuleKind::LivenessProbe, LIVENESS_PROBE_PORT),
            (ModuleKind::ReadinessProbe, READINESS_PROBE_PORT),
            (ModuleKind::StartupProbe, STARTUP_PROBE_PORT),
        ] {
            let spec = find(&plan, kind).unwrap();
            assert_eq!(spec.addr.port(), port);
            assert!(!spec.transparent);
        }

        // No scheme, no probe listeners at all.
        let plan = build_plan(&Config::default(), BRIDGE);
        assert!(find(&plan, ModuleKind::LivenessProbe).is_none());
        assert!(find(&plan, ModuleKind::ReadinessProbe).is_none());
        assert!(find(&plan, ModuleKind::StartupProbe).is_none());
    }

    #[test]
    fn test_dns_listener() {
        let config = Config::from_json(r#"{"Spec": {"LocalDNSProxy": {}}}"#).unwrap();
        let plan = build_plan(&config, BRIDGE);

        let dns = find(&plan, ModuleKind::Dns).unwrap();
        assert_eq!(dns.addr, "10.1.0.1:15053".parse().unwrap());
        assert_eq!(dns.network, Network::Udp);
        assert!(dns.transparent);
    }

    #[test]
    fn test_full_config_plan() {
        let config = Config::from_json(
            r#"{
                "Inbound": {"TrafficMatches": {}},
                "Outbound": {"TrafficMatches": {}},
                "Spec": {
                    "Probes": {"LivenessProbes": [{"httpGet": {"scheme": "HTTP"}}]},
                    "LocalDNSProxy": {}
                }
            }"#,
        )
        .unwrap();
        let plan = build_plan(&config, BRIDGE);
        assert_eq!(plan.len(), 8);
    }
}

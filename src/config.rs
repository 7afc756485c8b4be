//! Proxy configuration
//!
//! Mirrors the JSON codebase configuration pushed by the ECNET control plane.
//! The core only gates listeners on presence of features; the routing payloads
//! inside `TrafficMatches`/`ClustersConfigs` belong to the downstream modules
//! and are carried opaquely.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Top-level proxy configuration, loaded once at startup and read-only for
/// the process lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(rename = "Inbound", default, skip_serializing_if = "Option::is_none")]
    pub inbound: Option<InboundTrafficPolicy>,

    #[serde(rename = "Outbound", default, skip_serializing_if = "Option::is_none")]
    pub outbound: Option<OutboundTrafficPolicy>,

    #[serde(rename = "Spec", default)]
    pub spec: MeshConfigSpec,
}

/// Inbound traffic policy; match rules are consumed by `inbound-main`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundTrafficPolicy {
    #[serde(rename = "TrafficMatches", default, skip_serializing_if = "Option::is_none")]
    pub traffic_matches: Option<Map<String, Value>>,
}

/// Outbound traffic policy; consumed by `outbound-main`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundTrafficPolicy {
    #[serde(rename = "TrafficMatches", default, skip_serializing_if = "Option::is_none")]
    pub traffic_matches: Option<Map<String, Value>>,

    #[serde(rename = "ClustersConfigs", default, skip_serializing_if = "Option::is_none")]
    pub clusters_configs: Option<Map<String, Value>>,
}

/// Mesh-level spec: probes, egress, local DNS proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfigSpec {
    #[serde(rename = "SidecarLogLevel", default, skip_serializing_if = "Option::is_none")]
    pub sidecar_log_level: Option<String>,

    #[serde(rename = "Traffic", default, skip_serializing_if = "Option::is_none")]
    pub traffic: Option<TrafficSpec>,

    #[serde(rename = "Probes", default)]
    pub probes: ProbesSpec,

    #[serde(rename = "LocalDNSProxy", default, skip_serializing_if = "Option::is_none")]
    pub local_dns_proxy: Option<LocalDnsProxy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficSpec {
    #[serde(rename = "EnableEgress", default)]
    pub enable_egress: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbesSpec {
    #[serde(rename = "LivenessProbes", default, skip_serializing_if = "Vec::is_empty")]
    pub liveness_probes: Vec<Probe>,

    #[serde(rename = "ReadinessProbes", default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_probes: Vec<Probe>,

    #[serde(rename = "StartupProbes", default, skip_serializing_if = "Vec::is_empty")]
    pub startup_probes: Vec<Probe>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Probe {
    #[serde(rename = "httpGet", default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpGetAction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpGetAction {
    #[serde(rename = "scheme", default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(rename = "path", default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(rename = "port", default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Local DNS proxy configuration; consumed by `dns-main`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalDnsProxy {
    #[serde(rename = "UpstreamDNSServers", default, skip_serializing_if = "Option::is_none")]
    pub upstream_dns_servers: Option<UpstreamDnsServers>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamDnsServers {
    #[serde(rename = "Primary", default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,

    #[serde(rename = "Secondary", default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Inbound interception is active when inbound traffic matches were pushed.
    pub fn inbound_enabled(&self) -> bool {
        self.inbound
            .as_ref()
            .map_or(false, |i| i.traffic_matches.is_some())
    }

    /// Outbound interception is active when an outbound policy exists or
    /// egress is explicitly enabled.
    pub fn outbound_enabled(&self) -> bool {
        self.outbound.is_some()
            || self
                .spec
                .traffic
                .as_ref()
                .map_or(false, |t| t.enable_egress)
    }

    /// Scheme of the first liveness probe, if one is configured.
    /// Gates all three probe listeners.
    pub fn probe_scheme(&self) -> Option<&str> {
        self.spec
            .probes
            .liveness_probes
            .first()
            .and_then(|p| p.http_get.as_ref())
            .and_then(|h| h.scheme.as_deref())
    }

    /// Local DNS interception is active when a local DNS proxy is configured.
    pub fn dns_proxy_enabled(&self) -> bool {
        self.spec.local_dns_proxy.is_some()
    }
}

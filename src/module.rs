//! Pipeline module interface
//!
//! Every bound listener forwards its accepted connections (or datagrams) into
//! a named downstream module. The core performs no protocol logic itself: a
//! module receives the raw stream plus transport addresses and owns all
//! protocol-specific handling from there.
//!
//! Interception and DNS modules are heavyweight collaborators provided by the
//! embedding deployment; this file also carries the small built-in modules the
//! standalone binary wires up (probe responder, stats exporter, drain).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::common::Stream;
use crate::error::{Error, Result};

/// Identifies the downstream module a listener delegates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Transparent inbound interception
    Inbound,
    /// Transparent outbound interception
    Outbound,
    /// Local DNS interception
    Dns,
    LivenessProbe,
    ReadinessProbe,
    StartupProbe,
    /// Metrics export, scrape format
    StatsPrometheus,
    /// Metrics export, internal format
    StatsInternal,
}

impl ModuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModuleKind::Inbound => "inbound-main",
            ModuleKind::Outbound => "outbound-main",
            ModuleKind::Dns => "dns-main",
            ModuleKind::LivenessProbe => "probes.liveness",
            ModuleKind::ReadinessProbe => "probes.readiness",
            ModuleKind::StartupProbe => "probes.startup",
            ModuleKind::StatsPrometheus => "stats.prometheus",
            ModuleKind::StatsInternal => "stats.ecnet",
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A downstream processing pipeline.
///
/// Implementations own all protocol handling; the dispatcher only routes
/// accepted connections here, one tokio task per connection.
#[async_trait]
pub trait PipelineModule: Send + Sync {
    /// Handle one accepted TCP connection.
    async fn handle_stream(&self, stream: Stream, peer: SocketAddr, local: SocketAddr)
        -> Result<()>;

    /// Handle one received UDP datagram. `socket` is the bound socket for
    /// replies.
    async fn handle_datagram(
        &self,
        _payload: Vec<u8>,
        _peer: SocketAddr,
        _socket: Arc<UdpSocket>,
    ) -> Result<()> {
        Err(Error::Unsupported("datagram handling".into()))
    }
}

/// Maps each module kind to its implementation.
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    modules: HashMap<ModuleKind, Arc<dyn PipelineModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: ModuleKind, module: Arc<dyn PipelineModule>) -> Self {
        self.modules.insert(kind, module);
        self
    }

    pub fn get(&self, kind: ModuleKind) -> Result<Arc<dyn PipelineModule>> {
        self.modules
            .get(&kind)
            .cloned()
            .ok_or(Error::UnknownModule(kind.name()))
    }
}

// ============================================================================
// Built-in modules
// ============================================================================

/// Responds to health probes with a canned 200.
pub struct ProbeResponder {
    kind: ModuleKind,
}

impl ProbeResponder {
    pub fn new(kind: ModuleKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl PipelineModule for ProbeResponder {
    async fn handle_stream(
        &self,
        mut stream: Stream,
        peer: SocketAddr,
        _local: SocketAddr,
    ) -> Result<()> {
        // Drain the request head before answering; probes send tiny requests.
        let mut buf = [0u8; 2048];
        let _ = stream.read(&mut buf).await?;

        debug!("[{}] probe from {}", self.kind, peer);

        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK",
            )
            .await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Serves the crate's prometheus registry as an HTTP scrape response.
pub struct StatsExporter;

#[async_trait]
impl PipelineModule for StatsExporter {
    async fn handle_stream(
        &self,
        mut stream: Stream,
        _peer: SocketAddr,
        _local: SocketAddr,
    ) -> Result<()> {
        let mut buf = [0u8; 2048];
        let _ = stream.read(&mut buf).await?;

        let body = crate::metrics::gather_text();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(body.as_bytes()).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Placeholder for externally-provided modules: logs and closes.
pub struct DrainModule {
    kind: ModuleKind,
}

impl DrainModule {
    pub fn new(kind: ModuleKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl PipelineModule for DrainModule {
    async fn handle_stream(
        &self,
        mut stream: Stream,
        peer: SocketAddr,
        local: SocketAddr,
    ) -> Result<()> {
        debug!("[{}] no pipeline wired, dropping {} -> {}", self.kind, peer, local);
        stream.shutdown().await?;
        Ok(())
    }

    async fn handle_datagram(
        &self,
        payload: Vec<u8>,
        peer: SocketAddr,
        _socket: Arc<UdpSocket>,
    ) -> Result<()> {
        debug!(
            "[{}] no pipeline wired, dropping {} byte datagram from {}",
            self.kind,
            payload.len(),
            peer
        );
        Ok(())
    }
}

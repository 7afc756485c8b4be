//! Dispatcher - realizes a listener plan
//!
//! Binds every listener in the plan, then runs one accept/recv loop per
//! listener. Each accepted connection (or received datagram) is handled in
//! its own tokio task and delegated to the module registered for the
//! listener's kind; the dispatcher itself performs no protocol logic.
//!
//! Binding happens up front and any failure is fatal: the error propagates
//! out of `bind_all` before a single serve loop starts, leaving the process
//! supervisor to act. There is no rebind retry.

use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::common::{IntoStream, Network};
use crate::error::{Error, Result};
use crate::module::{ModuleRegistry, PipelineModule};

use super::plan::ListenerSpec;

/// Largest datagram a DNS interception listener can receive
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// A bound listener paired with its spec and module.
pub enum BoundListener {
    Tcp {
        spec: ListenerSpec,
        listener: TcpListener,
        module: Arc<dyn PipelineModule>,
    },
    Udp {
        spec: ListenerSpec,
        socket: Arc<UdpSocket>,
        module: Arc<dyn PipelineModule>,
    },
}

impl std::fmt::Debug for BoundListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundListener::Tcp { spec, .. } => {
                f.debug_struct("Tcp").field("spec", spec).finish_non_exhaustive()
            }
            BoundListener::Udp { spec, .. } => {
                f.debug_struct("Udp").field("spec", spec).finish_non_exhaustive()
            }
        }
    }
}

impl BoundListener {
    fn spec(&self) -> &ListenerSpec {
        match self {
            BoundListener::Tcp { spec, .. } => spec,
            BoundListener::Udp { spec, .. } => spec,
        }
    }
}

/// Dispatcher binds a listener plan and pumps connections into modules.
pub struct Dispatcher {
    registry: ModuleRegistry,
    shutdown_tx: broadcast::Sender<()>,
}

impl Dispatcher {
    pub fn new(registry: ModuleRegistry) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registry,
            shutdown_tx,
        }
    }

    /// Handle for triggering a shutdown from outside `run`.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind every listener in the plan. The module for each spec must be
    /// registered; missing modules and bind failures are startup errors.
    pub async fn bind_all(&self, plan: &[ListenerSpec]) -> Result<Vec<BoundListener>> {
        let mut bound = Vec::with_capacity(plan.len());

        for spec in plan {
            // Port 0 means disabled, never ephemeral.
            if spec.addr.port() == 0 {
                warn!("[{}] Port 0 in plan, listener disabled", spec.module);
                continue;
            }

            let module = self.registry.get(spec.module)?;

            let listener = match spec.network {
                Network::Tcp => crate::transport::tcp::bind(spec.addr, spec.transparent)
                    .await
                    .map(|listener| BoundListener::Tcp {
                        spec: spec.clone(),
                        listener,
                        module,
                    }),
                Network::Udp => crate::transport::udp::bind(spec.addr, spec.transparent)
                    .await
                    .map(|socket| BoundListener::Udp {
                        spec: spec.clone(),
                        socket: Arc::new(socket),
                        module,
                    }),
            }
            .map_err(|source| Error::Bind {
                addr: spec.addr,
                module: spec.module.name(),
                source,
            })?;

            info!(
                "[{}] Listening on {}/{}{}",
                spec.module,
                spec.network,
                spec.addr,
                if spec.transparent { " (transparent)" } else { "" }
            );
            bound.push(listener);
        }

        Ok(bound)
    }

    /// Serve a set of bound listeners until a shutdown broadcast arrives.
    pub async fn run(&self, bound: Vec<BoundListener>) -> Result<()> {
        let mut handles = Vec::with_capacity(bound.len());

        for listener in bound {
            let module_name = listener.spec().module.name();
            let shutdown_rx = self.shutdown_tx.subscribe();

            let handle = tokio::spawn(async move {
                let result = match listener {
                    BoundListener::Tcp {
                        spec,
                        listener,
                        module,
                    } => serve_tcp(spec, listener, module, shutdown_rx).await,
                    BoundListener::Udp {
                        spec,
                        socket,
                        module,
                    } => serve_udp(spec, socket, module, shutdown_rx).await,
                };
                if let Err(e) = result {
                    error!("[{}] Listener error: {}", module_name, e);
                }
            });
            handles.push(handle);
        }

        info!("Dispatcher running with {} listeners", handles.len());

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// Accept loop for one TCP listener.
async fn serve_tcp(
    spec: ListenerSpec,
    listener: TcpListener,
    module: Arc<dyn PipelineModule>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let local = listener.local_addr()?;
    let mut conn_count: u64 = 0;

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        conn_count += 1;
                        let conn_id = conn_count;
                        debug!("[{}] New connection #{} from {}", spec.module, conn_id, peer);

                        let _ = stream.set_nodelay(true);
                        let module = module.clone();
                        let module_name = spec.module.name();

                        tokio::spawn(async move {
                            if let Err(e) = module.handle_stream(stream.into_stream(), peer, local).await {
                                warn!("[{}] Connection #{} from {} error: {}", module_name, conn_id, peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("[{}] Accept error: {}", spec.module, e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("[{}] Shutting down (handled {} connections)", spec.module, conn_count);
                break;
            }
        }
    }

    Ok(())
}

/// Recv loop for one UDP listener.
async fn serve_udp(
    spec: ListenerSpec,
    socket: Arc<UdpSocket>,
    module: Arc<dyn PipelineModule>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut datagram_count: u64 = 0;

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, peer)) => {
                        datagram_count += 1;
                        debug!("[{}] {} byte datagram from {}", spec.module, len, peer);

                        let payload = buf[..len].to_vec();
                        let module = module.clone();
                        let socket = socket.clone();
                        let module_name = spec.module.name();

                        tokio::spawn(async move {
                            if let Err(e) = module.handle_datagram(payload, peer, socket).await {
                                warn!("[{}] Datagram from {} error: {}", module_name, peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("[{}] Recv error: {}", spec.module, e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("[{}] Shutting down (handled {} datagrams)", spec.module, datagram_count);
                break;
            }
        }
    }

    Ok(())
}

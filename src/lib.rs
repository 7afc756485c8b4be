//! ecnet-proxy - sidecar data plane entrypoint
//!
//! # Architecture
//!
//! ```text
//! Config ──> ListenerPlan ──> Dispatcher ──> PipelineModule
//!               ▲                              (per connection)
//!               │
//!        bridge address
//!         (AddressResolver)
//! ```
//!
//! The runtime configuration decides which interception listeners to
//! activate (inbound, outbound, local DNS, health probes, metrics export)
//! and each bound listener delegates its connections to a named downstream
//! pipeline module. The outbound HTTP pipeline additionally carries a
//! metrics correlation layer tracking per-destination counters and
//! per-identity latency histograms across request/response exchanges.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common.rs        # Core types: Stream, Network
//! ├── config.rs        # Control-plane configuration tree
//! ├── bridge.rs        # CNI bridge IPv4 discovery
//! ├── transport/       # TCP/UDP binding, transparent intercept
//! ├── module.rs        # Pipeline module interface + built-ins
//! ├── app/             # Listener plan + dispatcher
//! └── metrics/         # Destination/identity caches + correlator
//! ```

// Core types
pub mod common;
pub mod error;

// Startup wiring
pub mod app;
pub mod bridge;
pub mod config;
pub mod module;
pub mod transport;

// Outbound HTTP metrics correlation
pub mod metrics;

// Re-exports for convenience
pub use app::{build_plan, Dispatcher, ListenerSpec};
pub use common::{Network, Stream};
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::{HttpMetricsCorrelator, MetricsStore};
pub use module::{ModuleKind, ModuleRegistry, PipelineModule};

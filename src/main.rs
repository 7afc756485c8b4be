//! ecnet-proxy - sidecar data plane entrypoint

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ecnet_proxy::app::{build_plan, Dispatcher};
use ecnet_proxy::config::Config;
use ecnet_proxy::error::Result;
use ecnet_proxy::module::{
    DrainModule, ModuleKind, ModuleRegistry, ProbeResponder, StatsExporter,
};
use ecnet_proxy::{bridge, metrics};

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    // Initialize logging
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    // Load configuration
    let config = if let Some(path) = args.config {
        Config::load(&path)?
    } else {
        info!("No config file specified, starting with empty config");
        Config::default()
    };

    info!("ecnet-proxy v{} starting...", env!("CARGO_PKG_VERSION"));

    metrics::init_metrics();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    info!("Goodbye!");
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    // Discover the CNI bridge address before any listener binds. Blocks
    // until the bridge is up; external readiness checks cover the wait.
    let device = bridge::device_name();
    info!("Resolving bridge address on device {}", device);
    let bridge_ip = bridge::resolve(&device).await;
    info!("Bridge address: {}", bridge_ip);

    let plan = build_plan(&config, bridge_ip);
    let dispatcher = Dispatcher::new(default_registry());
    let bound = dispatcher.bind_all(&plan).await?;

    // Shut down on Ctrl+C
    let shutdown = dispatcher.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            let _ = shutdown.send(());
        }
    });

    dispatcher.run(bound).await
}

/// Default wiring for the standalone binary: built-in probe and stats
/// modules, drain handlers where the deployment normally supplies the
/// interception pipelines.
fn default_registry() -> ModuleRegistry {
    ModuleRegistry::new()
        .register(ModuleKind::Inbound, Arc::new(DrainModule::new(ModuleKind::Inbound)))
        .register(ModuleKind::Outbound, Arc::new(DrainModule::new(ModuleKind::Outbound)))
        .register(ModuleKind::Dns, Arc::new(DrainModule::new(ModuleKind::Dns)))
        .register(
            ModuleKind::LivenessProbe,
            Arc::new(ProbeResponder::new(ModuleKind::LivenessProbe)),
        )
        .register(
            ModuleKind::ReadinessProbe,
            Arc::new(ProbeResponder::new(ModuleKind::ReadinessProbe)),
        )
        .register(
            ModuleKind::StartupProbe,
            Arc::new(ProbeResponder::new(ModuleKind::StartupProbe)),
        )
        .register(ModuleKind::StatsPrometheus, Arc::new(StatsExporter))
        .register(ModuleKind::StatsInternal, Arc::new(StatsExporter))
}

/// Command line arguments
struct Args {
    config: Option<PathBuf>,
    version: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config = None;
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') && config.is_none() => {
                    // Positional argument: treat as config file
                    config = Some(PathBuf::from(arg));
                }
                _ => {}
            }
            i += 1;
        }

        Self { config, version }
    }
}

fn print_help() {
    println!(
        r#"ecnet-proxy - sidecar data plane entrypoint

USAGE:
    ecnet-proxy [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to codebase configuration file (JSON)
    -v, --version           Print version information
    -h, --help              Print help information

ENVIRONMENT:
    CNI_BRIDGE_ETH          Bridge device for address discovery (default: cni0)
    RUST_LOG                Log level (default: info)

PORTS (bound per configuration):
    15001/tcp   outbound interception (transparent)
    15003/tcp   inbound interception (transparent)
    15053/udp   local DNS interception (transparent)
    15901-3/tcp liveness/readiness/startup probes
    15010/tcp   prometheus metrics
    15000/tcp   internal metrics
"#
    );
}

fn print_version() {
    println!("ecnet-proxy v{}", env!("CARGO_PKG_VERSION"));
}

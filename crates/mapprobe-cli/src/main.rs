//! mapprobe - readiness and endpoint checks for Kubernetes routing
//!
//! ## Commands
//!
//! - `probe`: retry a request against an HTTP or WebSocket URL until the
//!   body matches
//! - `wait`: poll any resource until its `Ready` condition is true
//! - `domain-mapping`: create a DomainMapping, wait for it, probe it and
//!   clean it up

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mapprobe_core::{
    CancellationToken, ConditionPoller, EndpointProbe, Matcher, PollSpec, ProbeConfig,
    ProbeRequest, RetryConfig, Scheme,
};
use mapprobe_kube::{api_resource, CheckConfig, DomainMappingCheck, KubeAccessor, ServiceRef};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "mapprobe")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Readiness polling and endpoint probing for Kubernetes routing", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe an http:// or ws:// URL until the response body matches
    Probe {
        /// URL to probe
        url: String,

        /// Substring the body must contain
        #[arg(short, long, default_value = "wsserver")]
        expect: String,

        /// Require the body to equal --expect exactly
        #[arg(long)]
        exact: bool,

        /// Dial this address instead of resolving the URL host
        #[arg(long, env = "MAPPROBE_INGRESS")]
        ingress: Option<SocketAddr>,

        /// Treat the host as not resolvable (requires --ingress)
        #[arg(long)]
        no_resolve: bool,

        /// Maximum number of attempts
        #[arg(short, long, default_value = "10")]
        attempts: u32,

        /// Overall timeout in seconds
        #[arg(short, long, default_value = "120")]
        timeout: u64,
    },

    /// Wait until a resource reports Ready=True
    Wait {
        /// API version, e.g. serving.knative.dev/v1
        #[arg(long)]
        api_version: String,

        /// Resource kind, e.g. Service
        #[arg(long)]
        kind: String,

        /// Plural resource name, e.g. services
        #[arg(long)]
        plural: String,

        /// Object name
        #[arg(long)]
        name: String,

        /// Namespace (cluster-scoped when omitted)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Seconds between checks
        #[arg(long, default_value = "1")]
        interval: u64,

        /// Overall timeout in seconds
        #[arg(long, default_value = "600")]
        timeout: u64,
    },

    /// Map a host to a Knative Service and verify traffic reaches it
    DomainMapping {
        /// Knative Service to map
        #[arg(long)]
        service: String,

        /// Namespace of the Service
        #[arg(short, long, default_value = "serving-tests", env = "MAPPROBE_NAMESPACE")]
        namespace: String,

        /// Publicly resolvable domain; defaults to routing through the ingress
        #[arg(long, env = "MAPPROBE_CUSTOM_DOMAIN")]
        custom_domain: Option<String>,

        /// Probe scheme (ws or http)
        #[arg(long, default_value = "ws")]
        scheme: Scheme,

        /// Substring the body must contain
        #[arg(short, long, default_value = "wsserver")]
        expect: String,

        /// DomainMapping API version
        #[arg(long, env = "MAPPROBE_DOMAIN_MAPPING_API_VERSION")]
        api_version: Option<String>,

        /// Namespace of the ingress gateway Service
        #[arg(long, default_value = "kourier-system", env = "MAPPROBE_INGRESS_NAMESPACE")]
        ingress_namespace: String,

        /// Name of the ingress gateway Service
        #[arg(long, default_value = "kourier", env = "MAPPROBE_INGRESS_SERVICE")]
        ingress_service: String,

        /// Ingress address; skips Service lookup
        #[arg(long, env = "MAPPROBE_INGRESS")]
        ingress: Option<SocketAddr>,

        /// Seconds between readiness checks
        #[arg(long, default_value = "1")]
        interval: u64,

        /// Readiness timeout in seconds
        #[arg(long, default_value = "600")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    mapprobe_core::init_tracing(cli.json, level);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match cli.command {
        Commands::Probe {
            url,
            expect,
            exact,
            ingress,
            no_resolve,
            attempts,
            timeout,
        } => {
            let matcher = if exact {
                Matcher::exact(expect)
            } else {
                Matcher::contains(expect)
            };
            let request = ProbeRequest::from_url(&url, matcher)?.resolvable(!no_resolve);
            let config = ProbeConfig {
                retry: RetryConfig::with_max_attempts(attempts),
                timeout: Duration::from_secs(timeout),
                ingress,
                ..ProbeConfig::default()
            };
            cmd_probe(request, config, cancel).await
        }
        Commands::Wait {
            api_version,
            kind,
            plural,
            name,
            namespace,
            interval,
            timeout,
        } => {
            let spec = PollSpec::new(Duration::from_secs(interval), Duration::from_secs(timeout))?;
            cmd_wait(
                &api_version,
                &kind,
                &plural,
                &name,
                namespace.as_deref(),
                spec,
                cancel,
            )
            .await
        }
        Commands::DomainMapping {
            service,
            namespace,
            custom_domain,
            scheme,
            expect,
            api_version,
            ingress_namespace,
            ingress_service,
            ingress,
            interval,
            timeout,
        } => {
            let mut config = CheckConfig::new(service, namespace);
            config.custom_domain = custom_domain;
            config.scheme = scheme;
            config.expected_body = expect;
            if let Some(api_version) = api_version {
                config.api_version = api_version;
            }
            config.ingress_service = ServiceRef {
                namespace: ingress_namespace,
                name: ingress_service,
            };
            config.probe.ingress = ingress;
            config.poll = PollSpec::new(Duration::from_secs(interval), Duration::from_secs(timeout))?;
            cmd_domain_mapping(config, cancel).await
        }
    }
}

/// Cancel in-flight work on the first Ctrl-C.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });
}

async fn cmd_probe(request: ProbeRequest, config: ProbeConfig, cancel: CancellationToken) -> Result<()> {
    let probe = EndpointProbe::new(config, cancel)?;
    let result = probe
        .probe(&request)
        .await
        .with_context(|| format!("Probe of {} failed", request.host))?;

    println!(
        "✓ {} answered after {} retr{} in {:?}",
        request.host,
        result.retries,
        if result.retries == 1 { "y" } else { "ies" },
        result.elapsed
    );
    Ok(())
}

async fn cmd_wait(
    api_version: &str,
    kind: &str,
    plural: &str,
    name: &str,
    namespace: Option<&str>,
    spec: PollSpec,
    cancel: CancellationToken,
) -> Result<()> {
    let resource = api_resource(api_version, kind, plural)?;
    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let accessor = KubeAccessor::new(client, &resource, namespace);

    let poller = ConditionPoller::new(spec, cancel)?;
    poller
        .wait_for_ready(&accessor, name)
        .await
        .with_context(|| format!("{} {} did not become ready", kind, name))?;

    println!("✓ {} {} is ready", kind, name);
    Ok(())
}

async fn cmd_domain_mapping(config: CheckConfig, cancel: CancellationToken) -> Result<()> {
    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let label = config.label.clone();

    let report = DomainMappingCheck::new(client, config, cancel)
        .run()
        .await
        .with_context(|| format!("{} failed", label))?;

    info!(
        host = %report.host,
        retries = report.probe.retries,
        "DomainMapping check passed"
    );
    println!(
        "✓ {} ready after {:?}, answered after {} retries",
        report.host, report.ready_after, report.probe.retries
    );
    Ok(())
}

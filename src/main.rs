use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ezmesh::{
    config::{ConfigManager, RefreshScheduler},
    egress::{EgressListener, EgressRegistry, EgressRuleCache, SourceOptions},
    endpoints::{endpoint_source, EndpointCache, EndpointListener},
    k8s::DestinationRules,
    xds::{AdsTransport, DiscoveryClient, NoSubsetTags, NodeInfo},
    DataPlane,
};

/// an ez service mesh sidecar config agent
#[derive(Parser, Debug)]
#[command(version)]
struct CliArgs {
    /// Log in a pretty, human-readable format.
    #[arg(long)]
    log_pretty: bool,

    /// The address of the control plane's discovery service.
    #[arg(
        long,
        env = "EZMESH_CONTROL_PLANE",
        default_value = "http://istio-pilot.istio-system:15010"
    )]
    control_plane: String,

    /// Where egress rules come from. One of `pilot` or `file`.
    #[arg(long, env = "EZMESH_EGRESS_BACKEND", default_value = "pilot")]
    egress_backend: String,

    /// The egress rule file. Required with `--egress-backend=file`.
    #[arg(long, env = "EZMESH_EGRESS_FILE")]
    egress_file: Option<PathBuf>,

    /// How often to refresh egress rules from the control plane.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    egress_refresh_interval: Duration,

    /// How often to refresh endpoint subsets from the control plane.
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    endpoint_refresh_interval: Duration,

    /// How long to wait for a single discovery response.
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    request_timeout: Duration,

    /// How many early refresh requests can be queued before new ones are
    /// dropped.
    #[arg(long, default_value_t = 10)]
    trigger_capacity: usize,

    /// Serve prometheus metrics on this address.
    #[arg(long, env = "EZMESH_METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Don't look up subset tags from DestinationRules. Every subset gets an
    /// empty set of tags.
    #[arg(long)]
    no_subset_tags: bool,
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    setup_tracing(args.log_pretty);

    if let Err(e) = run(args).await {
        tracing::error!(err = ?e, "exiting: {e}");
        std::process::exit(1);
    }
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let node = NodeInfo::from_env()?;
    tracing::info!(node_id = node.node_id(), "starting");

    if let Some(addr) = &args.metrics_addr {
        ezmesh::metrics::install_prom(addr)?;
    }

    let transport = AdsTransport::connect_lazy(&args.control_plane)?;
    let client = match subset_tags(args.no_subset_tags).await {
        Some(tags) => DiscoveryClient::new(&node, transport, tags, args.request_timeout),
        None => DiscoveryClient::new(&node, transport, NoSubsetTags, args.request_timeout),
    };
    let client = Arc::new(client);

    // caches have to exist before any source does its first pull.
    let egress_cache = Arc::new(EgressRuleCache::new());
    let endpoint_cache = Arc::new(EndpointCache::new());

    let egress = Arc::new(ConfigManager::new());
    egress.register_listener("*", Arc::new(EgressListener::new(egress_cache.clone())));
    let backend = EgressRegistry::builtin().build(
        &args.egress_backend,
        &SourceOptions {
            client: Some(client.clone()),
            file: args.egress_file.clone(),
            refresh_interval: args.egress_refresh_interval,
            trigger_capacity: args.trigger_capacity,
        },
    )?;
    egress.add_source(backend.source).await;

    let endpoints = Arc::new(ConfigManager::new());
    endpoints.register_listener("*", Arc::new(EndpointListener::new(endpoint_cache.clone())));
    let (scheduler, trigger) =
        RefreshScheduler::new(args.endpoint_refresh_interval, args.trigger_capacity);
    endpoints
        .add_source(Arc::new(endpoint_source(client, scheduler)))
        .await;

    // the proxy reads routing data through this.
    let mut data_plane = DataPlane::new(egress_cache, endpoint_cache).with_endpoint_trigger(trigger);
    if let Some(trigger) = backend.trigger {
        data_plane = data_plane.with_egress_trigger(trigger);
    }
    let _data_plane = data_plane;
    tracing::info!(egress_backend = args.egress_backend, "sources ready");

    let mut handles = egress.run();
    handles.extend(endpoints.run());
    for result in futures::future::join_all(handles).await {
        result?;
    }

    Ok(())
}

async fn subset_tags(disabled: bool) -> Option<DestinationRules> {
    if disabled {
        return None;
    }

    match kube::Client::try_default().await {
        Ok(client) => Some(DestinationRules::new(client)),
        Err(e) => {
            tracing::warn!(err = %e, "no kubernetes client, subsets will have no tags");
            None
        }
    }
}

fn setup_tracing(log_pretty: bool) {
    let default_log_filter = "ezmesh=info"
        .parse()
        .expect("default log filter must be valid");
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_log_filter)
                .from_env_lossy(),
        )
        .with_target(true);

    if log_pretty {
        // don't use .pretty(), it's too pretty
        builder.init();
    } else {
        builder
            .json()
            .flatten_event(true)
            .with_span_list(false)
            .init();
    }
}

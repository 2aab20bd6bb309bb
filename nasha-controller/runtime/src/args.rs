use crate::{
    core::{resource, MembershipEvent, Metrics, Reconciler, ResourceSet},
    k8s::{config_map, watch, watcher, ConfigMap, Node, Nodes},
    ovh, routes,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{net::IpAddr, path::PathBuf};
use tokio::{sync::mpsc, time::Duration};
use tracing::{info, info_span, Instrument};

// Membership events are processed one at a time; a burst of node changes waits here.
const EVENT_BUFFER_CAPACITY: usize = 256;

#[derive(Debug, Parser)]
#[clap(name = "nasha-controller", about = "Grants cluster nodes access to NAS-HA partitions")]
pub struct Args {
    #[clap(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain", env = "LOG_FORMAT")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// How membership changes are detected: `watch`, `poll` or `full-poll`.
    #[clap(long, default_value = "watch", env = "MODE")]
    mode: Mode,

    /// Seconds between node lists in the `poll` and `full-poll` modes.
    #[clap(
        long,
        default_value = "60",
        env = "POLL_INTERVAL",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_interval: u64,

    /// JSON list of partitions, reread on SIGHUP.
    #[clap(long, default_value = "/nasha/partitions.json", env = "OVH_NASHA_LIST")]
    partitions_file: PathBuf,

    /// Reads the partition list from the `nasha-partitions` ConfigMap instead of a file.
    #[clap(long, env = "PARTITIONS_CONFIG_MAP")]
    partitions_config_map: bool,

    /// Namespace of the partitions ConfigMap.
    #[clap(long, env = "NAMESPACE")]
    namespace: Option<String>,

    /// An OVH API endpoint name (e.g. `ovh-eu`) or base URL.
    #[clap(long, default_value = "ovh-eu", env = "OVH_ENDPOINT")]
    ovh_endpoint: String,

    #[clap(long, env = "OVH_APPLICATION_KEY", hide_env_values = true)]
    ovh_application_key: String,

    #[clap(long, env = "OVH_APPLICATION_SECRET", hide_env_values = true)]
    ovh_application_secret: Secret,

    #[clap(long, env = "OVH_CONSUMER_KEY", hide_env_values = true)]
    ovh_consumer_key: Secret,

    /// Also routes partition addresses via this node's public gateway.
    #[clap(long, env = "ENFORCE_ROUTES")]
    enforce_routes: bool,

    /// Seconds between route enforcement passes.
    #[clap(
        long,
        default_value = "60",
        env = "ROUTE_INTERVAL",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    route_interval: u64,

    /// A public address whose next hop is the public gateway.
    #[clap(long, default_value = "1.1.1.1", env = "GATEWAY_PROBE")]
    gateway_probe: IpAddr,

    #[clap(long, default_value = "ip", env = "IP_COMMAND")]
    ip_command: PathBuf,
}

/// A credential that is never logged.
#[derive(Clone)]
struct Secret(String);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Reacts to `Node` watch events.
    Watch,
    /// Lists `Node`s periodically and reacts to the differences.
    Poll,
    /// Periodically converges every access list on the current members.
    FullPoll,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            mode,
            poll_interval,
            partitions_file,
            partitions_config_map,
            namespace,
            ovh_endpoint,
            ovh_application_key,
            ovh_application_secret,
            ovh_consumer_key,
            enforce_routes,
            route_interval,
            gateway_probe,
            ip_command,
        } = self;

        let namespace = match (partitions_config_map, namespace) {
            (true, None) => bail!("--namespace is required to read partitions from a ConfigMap"),
            (true, Some(ns)) => Some(ns),
            (false, _) => None,
        };
        let poll_interval = Duration::from_secs(poll_interval);

        let mut prom = <Registry>::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("nasha"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let store = ovh::Client::connect(
            &ovh_endpoint,
            ovh::Credentials {
                application_key: ovh_application_key,
                application_secret: ovh_application_secret.0,
                consumer_key: ovh_consumer_key.0,
            },
        )
        .await
        .with_context(|| format!("failed to connect to the OVH API at {ovh_endpoint}"))?;

        // Load the partition list and keep it current.
        let resources = match namespace {
            Some(ns) => {
                let resources = config_map::fetch(runtime.client(), &ns).await?;
                info!(partitions = resources.len(), namespace = %ns, "Loaded partition list");
                let (publisher, rx) = resource::channel(resources);
                let config_maps = runtime.watch_namespaced::<ConfigMap>(
                    ns.clone(),
                    watcher::Config::default().fields(&format!("metadata.name={}", config_map::NAME)),
                );
                tokio::spawn(
                    config_map::partitions(config_maps, publisher)
                        .instrument(info_span!("partitions")),
                );
                rx
            }
            None => {
                let resources = ResourceSet::read(&partitions_file)?;
                info!(partitions = resources.len(), path = %partitions_file.display(), "Loaded partition list");
                let (publisher, rx) = resource::channel(resources);
                tokio::spawn(
                    resource::reload_on_hangup(partitions_file, publisher)
                        .instrument(info_span!("partitions")),
                );
                rx
            }
        };

        if enforce_routes {
            let enforcer = routes::Enforcer::discover(routes::IpRoute::new(ip_command), gateway_probe)
                .await
                .context("failed to discover the public gateway")?;
            tokio::spawn(
                enforcer
                    .run(
                        resources.clone(),
                        Duration::from_secs(route_interval),
                        runtime.shutdown_handle().signaled(),
                    )
                    .instrument(info_span!("routes")),
            );
        }

        let nodes = Nodes::new(runtime.client());
        let reconciler = Reconciler::new(store, nodes.clone(), resources, metrics);
        info!(?mode, "Starting reconciler");
        match mode {
            Mode::FullPoll => {
                tokio::spawn(
                    reconciler
                        .run_full_poll(poll_interval, runtime.shutdown_handle().signaled())
                        .instrument(info_span!("reconciler")),
                );
            }
            Mode::Watch | Mode::Poll => {
                reconciler
                    .startup_cleanup()
                    .instrument(info_span!("startup_cleanup"))
                    .await;

                let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_CAPACITY);
                if mode == Mode::Watch {
                    let node_watch = runtime.watch_all::<Node>(watcher::Config::default());
                    tokio::spawn(
                        membership_watch(node_watch, events_tx, runtime.shutdown_handle())
                            .instrument(info_span!("nodes")),
                    );
                } else {
                    tokio::spawn(
                        watch::poll(
                            nodes,
                            poll_interval,
                            events_tx,
                            runtime.shutdown_handle().signaled(),
                        )
                        .instrument(info_span!("nodes")),
                    );
                }
                tokio::spawn(
                    membership_events(reconciler, events_rx, runtime.shutdown_handle())
                        .instrument(info_span!("reconciler")),
                );
            }
        }

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Feeds node watch events to the reconciler until shutdown.
async fn membership_watch<S>(
    watch: S,
    events: mpsc::Sender<MembershipEvent>,
    drain: kubert::shutdown::Watch,
) where
    S: futures::Stream<Item = watcher::Event<Node>>,
{
    tokio::select! {
        _ = watch::nodes(watch, events) => {}
        _release = drain.signaled() => {}
    }
}

/// Applies membership events until every sender is gone.
///
/// Holding `drain` delays shutdown until the queued events are applied.
async fn membership_events(
    reconciler: Reconciler<ovh::Client, Nodes>,
    events: mpsc::Receiver<MembershipEvent>,
    drain: kubert::shutdown::Watch,
) {
    reconciler.run(events).await;
    drop(drain);
}

// === impl Secret ===

impl std::str::FromStr for Secret {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

// === impl Mode ===

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "watch" => Ok(Self::Watch),
            "poll" => Ok(Self::Poll),
            "full-poll" | "fullpoll" => Ok(Self::FullPoll),
            _ => bail!("invalid mode: {s} (expected watch, poll or full-poll)"),
        }
    }
}

#[cfg(test)]
mod tests;

use crate::{Enforcer, IpRoute};
use anyhow::{Context, Result};
use clap::Parser;
use nasha_controller_core::{resource, ResourceSet};
use std::{net::IpAddr, path::PathBuf};
use tokio::time::Duration;
use tracing::{debug, error, info};

/// Routes NAS-HA service addresses via the node's public gateway
#[derive(Debug, Parser)]
#[clap(name = "nasha-route-fixer", version, about)]
pub struct Args {
    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: kubert::LogFilter,

    #[clap(long, env = "LOG_FORMAT", default_value = "plain")]
    log_format: kubert::LogFormat,

    /// JSON list of partitions; reread on SIGHUP
    #[clap(long, env = "OVH_NASHA_LIST", default_value = "/nasha/partitions.json")]
    partitions_file: PathBuf,

    /// Seconds between enforcement passes
    #[clap(
        long,
        env = "ROUTE_INTERVAL",
        default_value = "60",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval: u64,

    /// A public address whose next hop is the public gateway
    #[clap(long, env = "GATEWAY_PROBE", default_value = "1.1.1.1")]
    gateway_probe: IpAddr,

    /// Path to the iproute2 `ip` command
    #[clap(long, env = "IP_COMMAND", default_value = "ip")]
    ip_command: PathBuf,
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
            partitions_file,
            interval,
            gateway_probe,
            ip_command,
        } = self;

        log_format
            .try_init(log_level)
            .context("failed to configure logging")?;

        let resources = ResourceSet::read(&partitions_file)?;
        info!(partitions = resources.len(), path = %partitions_file.display(), "Loaded partition list");
        let (publisher, rx) = resource::channel(resources);
        #[cfg(unix)]
        tokio::spawn(resource::reload_on_hangup(partitions_file, publisher));
        #[cfg(not(unix))]
        let _publisher = publisher;

        let enforcer = Enforcer::discover(IpRoute::new(ip_command), gateway_probe)
            .await
            .context("failed to discover the public gateway")?;
        enforcer
            .run(rx, Duration::from_secs(interval), shutdown())
            .await;
        Ok(())
    }
}

/// Completes on SIGINT or SIGTERM.
///
/// A signal that cannot be listened for is logged and never completes.
async fn shutdown() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(%error, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(error) => {
                error!(%error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => debug!("Received SIGINT"),
        _ = terminate => debug!("Received SIGTERM"),
    }
}

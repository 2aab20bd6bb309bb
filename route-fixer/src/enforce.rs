use anyhow::{anyhow, Result};
use nasha_controller_core::{resource, ResourceSet};
use std::{future::Future, net::IpAddr};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, info_span, instrument, Instrument};

/// The local routing table.
#[async_trait::async_trait]
pub trait RouteTable: Send + Sync {
    /// Returns the next hop the kernel uses to reach `addr`, if it goes through a gateway.
    async fn gateway(&self, addr: IpAddr) -> Result<Option<IpAddr>>;

    /// Routes `addr` (and only `addr`) via `gateway`.
    async fn add_host_route(&self, addr: IpAddr, gateway: IpAddr) -> Result<()>;
}

#[derive(Debug)]
pub struct Enforcer<T> {
    table: T,
    gateway: IpAddr,
}

impl<T: RouteTable> Enforcer<T> {
    /// Discovers the public gateway as the next hop toward `probe`, a public address.
    pub async fn discover(table: T, probe: IpAddr) -> Result<Self> {
        let gateway = table
            .gateway(probe)
            .await?
            .ok_or_else(|| anyhow!("no gateway routes to {probe}"))?;
        info!(%gateway, "Discovered public gateway");
        Ok(Self::new(table, gateway))
    }

    pub fn new(table: T, gateway: IpAddr) -> Self {
        Self { table, gateway }
    }

    pub fn gateway(&self) -> IpAddr {
        self.gateway
    }

    /// Routes every partition's service address via the public gateway.
    ///
    /// Failures are logged; the next pass retries them.
    #[instrument(skip_all, fields(gateway = %self.gateway))]
    pub async fn enforce(&self, resources: &ResourceSet) {
        for resource in resources {
            let Some(addr) = resource.ip else {
                debug!(partition = %resource.id, "No service address");
                continue;
            };

            match self.table.gateway(addr).await {
                Ok(Some(gw)) if gw == self.gateway => {
                    debug!(%addr, "Already routed via the public gateway");
                    continue;
                }
                Ok(gw) => debug!(%addr, gateway = ?gw, "Not routed via the public gateway"),
                Err(error) => error!(%addr, %error, "Failed to look up route"),
            }

            match self.table.add_host_route(addr, self.gateway).await {
                Ok(()) => info!(%addr, "Added route via the public gateway"),
                Err(error) => error!(%addr, %error, "Failed to add route"),
            }
        }
    }

    /// Enforces routes every `interval` (non-zero) until `shutdown` completes.
    pub async fn run<F: Future>(
        self,
        resources: resource::Receiver,
        interval: Duration,
        shutdown: F,
    ) {
        tokio::pin!(shutdown);
        let mut timer = time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let snapshot = resources.borrow().clone();
                    self.enforce(&snapshot).instrument(info_span!("routes")).await;
                }
                _release = &mut shutdown => {
                    debug!("Shutting down");
                    return;
                }
            }
        }
    }
}

use crate::RouteTable;
use anyhow::{bail, Context, Result};
use ipnet::IpNet;
use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};
use tokio::process::Command;
use tracing::trace;

/// A `RouteTable` driven by iproute2.
#[derive(Clone, Debug)]
pub struct IpRoute {
    program: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Route {
    gateway: Option<IpAddr>,
}

impl IpRoute {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn ip(&self, args: &[&str]) -> Result<Vec<u8>> {
        trace!(program = %self.program.display(), ?args);
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        if !output.status.success() {
            bail!(
                "{} {} failed ({}): {}",
                self.program.display(),
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}

impl Default for IpRoute {
    fn default() -> Self {
        Self::new("ip")
    }
}

#[async_trait::async_trait]
impl RouteTable for IpRoute {
    async fn gateway(&self, addr: IpAddr) -> Result<Option<IpAddr>> {
        let addr = addr.to_string();
        let out = self.ip(&["-json", "route", "get", &addr]).await?;
        parse_route_get(&out)
    }

    async fn add_host_route(&self, addr: IpAddr, gateway: IpAddr) -> Result<()> {
        let dst = IpNet::from(addr).to_string();
        let via = gateway.to_string();
        self.ip(&["route", "replace", &dst, "via", &via]).await?;
        Ok(())
    }
}

/// Reads the gateway from `ip -json route get` output.
pub(crate) fn parse_route_get(out: &[u8]) -> Result<Option<IpAddr>> {
    let routes = serde_json::from_slice::<Vec<Route>>(out).context("invalid route output")?;
    Ok(routes.into_iter().find_map(|r| r.gateway))
}

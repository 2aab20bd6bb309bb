//! Partition lists served from a `ConfigMap`.

use crate::{watcher::Event, Api, Client, ConfigMap};
use anyhow::{anyhow, Context, Result};
use futures::prelude::*;
use nasha_controller_core::{resource::Publisher, ResourceSet};
use tracing::{debug, error, info, warn};

pub const NAME: &str = "nasha-partitions";
pub const DATA_KEY: &str = "partitions.json";

/// Fetches the partition list. Used once, at startup.
pub async fn fetch(client: Client, namespace: &str) -> Result<ResourceSet> {
    let api = Api::<ConfigMap>::namespaced(client, namespace);
    let config_map = api
        .get(NAME)
        .await
        .with_context(|| format!("failed to get ConfigMap {namespace}/{NAME}"))?;
    parse(&config_map)
}

pub fn parse(config_map: &ConfigMap) -> Result<ResourceSet> {
    let raw = config_map
        .data
        .as_ref()
        .and_then(|data| data.get(DATA_KEY))
        .ok_or_else(|| anyhow!("ConfigMap {NAME} has no {DATA_KEY} key"))?;
    ResourceSet::from_json(raw.as_bytes()).map_err(Into::into)
}

/// Publishes the partition list every time the `ConfigMap` changes.
///
/// An invalid or deleted `ConfigMap` leaves the last valid list in place.
pub async fn partitions<S>(watch: S, publisher: Publisher)
where
    S: Stream<Item = Event<ConfigMap>>,
{
    tokio::pin!(watch);
    while let Some(event) = watch.next().await {
        match event {
            Event::InitApply(config_map) | Event::Apply(config_map) => {
                match parse(&config_map) {
                    Ok(resources) => {
                        let len = resources.len();
                        if publisher.publish(resources) {
                            info!(partitions = len, "Partition list updated");
                        } else {
                            debug!("Partition list unchanged");
                        }
                    }
                    Err(error) => error!(%error, "Ignoring invalid partition list"),
                }
            }
            Event::Delete(_) => warn!("ConfigMap {NAME} deleted; keeping the last partition list"),
            Event::Init | Event::InitDone => {}
        }
    }
    debug!("ConfigMap watch ended");
}

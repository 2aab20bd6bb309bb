use crate::ResourceRef;
use anyhow::Result;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

/// An access list record, as returned by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessEntry {
    pub ip: IpNet,
    pub mode: AccessMode,
    pub id: u64,
}

/// The remote per-partition access list.
///
/// Every call is a network round trip. Implementations do not retry; a failed call is retried by
/// the next reconciliation that needs it.
#[async_trait::async_trait]
pub trait AccessStore: Send + Sync {
    /// Fetches the entry for `addr`, returning `None` if the store has no such entry.
    async fn lookup(&self, resource: &ResourceRef, addr: IpAddr) -> Result<Option<AccessEntry>>;

    /// Lists the address blocks currently granted access.
    async fn list(&self, resource: &ResourceRef) -> Result<Vec<IpNet>>;

    async fn create(&self, resource: &ResourceRef, block: IpNet, mode: AccessMode) -> Result<()>;

    /// Removes the entry for `block`, which may be wider than a single host.
    async fn delete(&self, resource: &ResourceRef, block: IpNet) -> Result<()>;

    /// Returns true if `addr` holds an entry.
    ///
    /// A failed lookup reads as absent: the caller may then issue a create for an entry that
    /// already exists, which the store rejects without side effects.
    async fn exists(&self, resource: &ResourceRef, addr: IpAddr) -> bool {
        match self.lookup(resource, addr).await {
            Ok(entry) => entry.is_some(),
            Err(error) => {
                tracing::debug!(%resource, %addr, %error, "Access lookup failed");
                false
            }
        }
    }
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadWrite => "readwrite",
            Self::ReadOnly => "readonly",
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

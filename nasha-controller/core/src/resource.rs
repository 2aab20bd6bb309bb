use serde::{Deserialize, Deserializer};
use std::{
    fmt,
    net::IpAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Identifies a partition by its NAS-HA service and partition name.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceRef {
    pub nasha: String,
    pub name: String,
}

/// A partition whose access list is reconciled against cluster membership.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "RawResource")]
pub struct Resource {
    pub id: ResourceRef,

    /// The address the NAS-HA service is reached on. Only used for routing.
    pub ip: Option<IpAddr>,

    /// When set, the access list must hold exactly the member addresses.
    pub exclusive: bool,
}

/// An immutable snapshot of the partitions to protect.
///
/// Reloads replace the whole set; readers clone the snapshot once per pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceSet(Arc<[Resource]>);

/// Publishes reloaded partition lists, skipping lists equal to the current one.
#[derive(Debug)]
pub struct Publisher(watch::Sender<ResourceSet>);

pub type Receiver = watch::Receiver<ResourceSet>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid partition list: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("partition {index} has an empty `{field}`")]
    Empty { index: usize, field: &'static str },
}

#[derive(Deserialize)]
struct RawResource {
    #[serde(default, deserialize_with = "empty_as_none")]
    ip: Option<IpAddr>,
    name: String,
    nasha: String,
    #[serde(default)]
    exclusive: bool,
}

pub fn channel(initial: ResourceSet) -> (Publisher, Receiver) {
    let (tx, rx) = watch::channel(initial);
    (Publisher(tx), rx)
}

// === impl ResourceRef ===

impl ResourceRef {
    pub fn new(nasha: impl ToString, name: impl ToString) -> Self {
        Self {
            nasha: nasha.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.nasha, self.name)
    }
}

// === impl Resource ===

impl From<RawResource> for Resource {
    fn from(RawResource { ip, name, nasha, exclusive }: RawResource) -> Self {
        Self {
            id: ResourceRef { nasha, name },
            ip,
            exclusive,
        }
    }
}

fn empty_as_none<'de, D: Deserializer<'de>>(de: D) -> Result<Option<IpAddr>, D::Error> {
    match Option::<String>::deserialize(de)?.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(ip) => ip.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

// === impl ResourceSet ===

impl ResourceSet {
    pub fn from_json(raw: &[u8]) -> Result<Self, Error> {
        let resources = serde_json::from_slice::<Vec<Resource>>(raw)?;
        for (index, r) in resources.iter().enumerate() {
            if r.id.nasha.is_empty() {
                return Err(Error::Empty {
                    index,
                    field: "nasha",
                });
            }
            if r.id.name.is_empty() {
                return Err(Error::Empty {
                    index,
                    field: "name",
                });
            }
        }
        Ok(resources.into_iter().collect())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| Error::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.0.iter()
    }

    pub fn exclusive(&self) -> impl Iterator<Item = &Resource> {
        self.0.iter().filter(|r| r.exclusive)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Resource> for ResourceSet {
    fn from_iter<T: IntoIterator<Item = Resource>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ResourceSet {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// === impl Publisher ===

impl Publisher {
    /// Replaces the current set, returning false if it was unchanged.
    pub fn publish(&self, resources: ResourceSet) -> bool {
        self.0.send_if_modified(|current| {
            if *current == resources {
                return false;
            }
            *current = resources;
            true
        })
    }

    pub fn subscribe(&self) -> Receiver {
        self.0.subscribe()
    }

    /// Rereads the partition list from `path`, returning true if it changed.
    pub fn reload(&self, path: &Path) -> Result<bool, Error> {
        ResourceSet::read(path).map(|resources| self.publish(resources))
    }
}

/// Rereads the partition list from `path` every time the process receives `SIGHUP`.
///
/// A list that fails to load leaves the current one in place.
#[cfg(unix)]
pub async fn reload_on_hangup(path: PathBuf, publisher: Publisher) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(hangups) => hangups,
        Err(error) => {
            error!(%error, "Failed to register SIGHUP handler; partitions will not be reloaded");
            return;
        }
    };
    while hangups.recv().await.is_some() {
        match publisher.reload(&path) {
            Ok(true) => info!(path = %path.display(), "Partition list reloaded"),
            Ok(false) => debug!(path = %path.display(), "Partition list unchanged"),
            Err(error) => error!(%error, "Failed to reload partition list"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partition_list() {
        let set = ResourceSet::from_json(
            br#"[
                {"ip": "198.51.100.5", "name": "p1", "nasha": "nas1", "exclusive": true},
                {"ip": "", "name": "p2", "nasha": "nas1"},
                {"name": "p3", "nasha": "nas2"}
            ]"#,
        )
        .expect("list must parse");

        let resources = set.iter().cloned().collect::<Vec<_>>();
        assert_eq!(
            resources,
            vec![
                Resource {
                    id: ResourceRef::new("nas1", "p1"),
                    ip: Some("198.51.100.5".parse().unwrap()),
                    exclusive: true,
                },
                Resource {
                    id: ResourceRef::new("nas1", "p2"),
                    ip: None,
                    exclusive: false,
                },
                Resource {
                    id: ResourceRef::new("nas2", "p3"),
                    ip: None,
                    exclusive: false,
                },
            ]
        );
        assert_eq!(set.exclusive().count(), 1);
    }

    #[test]
    fn rejects_invalid_lists() {
        assert!(matches!(
            ResourceSet::from_json(br#"{"name": "p1"}"#),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            ResourceSet::from_json(br#"[{"ip": "nope", "name": "p1", "nasha": "nas1"}]"#),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            ResourceSet::from_json(br#"[{"name": "p1", "nasha": ""}]"#),
            Err(Error::Empty {
                index: 0,
                field: "nasha"
            })
        ));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partitions.json");
        std::fs::write(&path, r#"[{"name": "p1", "nasha": "nas1"}]"#).unwrap();
        assert_eq!(ResourceSet::read(&path).unwrap().len(), 1);

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            ResourceSet::read(missing),
            Err(Error::Read { .. })
        ));
    }

    #[test]
    fn reload_publishes_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partitions.json");
        std::fs::write(&path, r#"[{"name": "p1", "nasha": "nas1"}]"#).unwrap();
        let (publisher, rx) = channel(ResourceSet::read(&path).unwrap());

        assert!(!publisher.reload(&path).unwrap());

        std::fs::write(&path, r#"[{"name": "p2", "nasha": "nas1"}]"#).unwrap();
        assert!(publisher.reload(&path).unwrap());
        assert_eq!(rx.borrow().iter().next().unwrap().id, ResourceRef::new("nas1", "p2"));

        std::fs::write(&path, "[").unwrap();
        assert!(publisher.reload(&path).is_err());
        assert_eq!(rx.borrow().len(), 1);
    }

    #[test]
    fn publish_skips_equal_sets() {
        let set = ResourceSet::from_json(br#"[{"name": "p1", "nasha": "nas1"}]"#).unwrap();
        let (publisher, mut rx) = channel(set.clone());

        assert!(!publisher.publish(set.clone()));
        assert!(!rx.has_changed().unwrap());

        let reloaded = ResourceSet::from_json(
            br#"[{"name": "p1", "nasha": "nas1", "exclusive": true}]"#,
        )
        .unwrap();
        assert!(publisher.publish(reloaded.clone()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), reloaded);
    }
}

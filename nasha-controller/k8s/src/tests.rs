use crate::{
    config_map, node, watch, watcher::Event, ConfigMap, Node, NodeAddress, NodeStatus,
    ObjectMeta, Resolution,
};
use futures::prelude::*;
use maplit::btreemap;
use nasha_controller_core::{membership::Tracker, resource, Member, MembershipEvent, ResourceSet};
use tokio::sync::mpsc;

const NONE: [(&str, &str); 0] = [];

fn mk_node(
    name: impl ToString,
    addresses: impl IntoIterator<Item = (&'static str, &'static str)>,
    labels: impl IntoIterator<Item = (&'static str, &'static str)>,
) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        status: Some(NodeStatus {
            addresses: Some(
                addresses
                    .into_iter()
                    .map(|(type_, address)| NodeAddress {
                        type_: type_.to_string(),
                        address: address.to_string(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_worker(name: impl ToString, external: &'static str) -> Node {
    mk_node(
        name,
        [("InternalIP", "192.168.0.10"), ("ExternalIP", external)],
        NONE,
    )
}

fn member(name: &str, addr: &str) -> Member {
    Member::new(name, addr.parse().unwrap())
}

fn mk_config_map(partitions: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map::NAME.to_string()),
            namespace: Some("nasha".to_string()),
            ..Default::default()
        },
        data: Some(btreemap! {
            config_map::DATA_KEY.to_string() => partitions.to_string(),
        }),
        ..Default::default()
    }
}

async fn collect(mut rx: mpsc::Receiver<MembershipEvent>) -> Vec<MembershipEvent> {
    let mut events = vec![];
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    events
}

#[test]
fn prefers_external_address() {
    let node = mk_node(
        "node-0",
        [
            ("Hostname", "node-0"),
            ("InternalIP", "192.168.0.10"),
            ("ExternalIP", "203.0.113.10"),
        ],
        NONE,
    );
    assert_eq!(
        node::resolve(&node),
        Resolution::Member(member("node-0", "203.0.113.10"))
    );
}

#[test]
fn falls_back_to_internal_address() {
    let node = mk_node("node-0", [("InternalIP", "10.0.0.1")], NONE);
    assert_eq!(
        node::resolve(&node),
        Resolution::Member(member("node-0", "10.0.0.1"))
    );

    let node = mk_node(
        "node-1",
        [("ExternalIP", "not-an-ip"), ("InternalIP", "10.0.0.2")],
        NONE,
    );
    assert_eq!(
        node::resolve(&node),
        Resolution::Member(member("node-1", "10.0.0.2"))
    );
}

#[test]
fn unresolved_without_addresses() {
    let node = mk_node("node-0", [("Hostname", "node-0")], NONE);
    assert_eq!(node::resolve(&node), Resolution::Unresolved);

    let node = Node {
        metadata: ObjectMeta {
            name: Some("node-1".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    assert_eq!(node::resolve(&node), Resolution::Unresolved);
}

#[test]
fn excludes_control_plane() {
    let node = mk_node(
        "cp-0",
        [("ExternalIP", "203.0.113.1")],
        [("node-role.kubernetes.io/control-plane", "")],
    );
    assert_eq!(node::resolve(&node), Resolution::ControlPlane);

    let node = mk_node(
        "cp-1",
        [("ExternalIP", "203.0.113.2")],
        [("node-role.kubernetes.io/master", "")],
    );
    assert_eq!(node::resolve(&node), Resolution::ControlPlane);
}

#[test]
fn members_skips_unusable_nodes() {
    let nodes = vec![
        mk_worker("node-1", "203.0.113.11"),
        mk_node(
            "cp-0",
            [("ExternalIP", "203.0.113.1")],
            [("node-role.kubernetes.io/control-plane", "")],
        ),
        mk_node("node-2", NONE, NONE),
        mk_worker("node-0", "203.0.113.10"),
    ];
    assert_eq!(
        node::members(&nodes),
        vec![
            member("node-1", "203.0.113.11"),
            member("node-0", "203.0.113.10"),
        ]
    );
}

#[test]
fn relist_diffs_against_prior_list() {
    let mut tracker = Tracker::default();
    let first = vec![
        mk_worker("node-0", "203.0.113.10"),
        mk_worker("node-1", "203.0.113.11"),
    ];
    assert_eq!(
        node::relist(&mut tracker, &first),
        vec![
            MembershipEvent::Joined(member("node-0", "203.0.113.10")),
            MembershipEvent::Joined(member("node-1", "203.0.113.11")),
        ]
    );

    let second = vec![
        mk_worker("node-1", "203.0.113.11"),
        mk_worker("node-2", "203.0.113.12"),
    ];
    assert_eq!(
        node::relist(&mut tracker, &second),
        vec![
            MembershipEvent::Joined(member("node-2", "203.0.113.12")),
            MembershipEvent::Left(member("node-0", "203.0.113.10")),
        ]
    );

    assert_eq!(node::relist(&mut tracker, &second), vec![]);
}

#[tokio::test]
async fn watch_translates_node_events() {
    let updates = vec![
        Event::Init,
        Event::InitApply(mk_worker("node-0", "203.0.113.10")),
        Event::InitApply(mk_worker("node-1", "203.0.113.11")),
        Event::InitApply(mk_node(
            "cp-0",
            [("ExternalIP", "203.0.113.1")],
            [("node-role.kubernetes.io/control-plane", "")],
        )),
        Event::InitDone,
        // Status updates that don't change the address are ignored.
        Event::Apply(mk_worker("node-0", "203.0.113.10")),
        Event::Apply(mk_worker("node-1", "203.0.113.21")),
        Event::Apply(mk_worker("node-2", "203.0.113.12")),
        Event::Delete(mk_worker("node-0", "203.0.113.10")),
        // The watch restarts; node-2 went away in the meantime.
        Event::Init,
        Event::InitApply(mk_worker("node-1", "203.0.113.21")),
        Event::InitDone,
    ];

    let (tx, rx) = mpsc::channel(32);
    watch::nodes(stream::iter(updates), tx).await;

    assert_eq!(
        collect(rx).await,
        vec![
            MembershipEvent::Joined(member("node-0", "203.0.113.10")),
            MembershipEvent::Joined(member("node-1", "203.0.113.11")),
            MembershipEvent::Left(member("node-1", "203.0.113.11")),
            MembershipEvent::Joined(member("node-1", "203.0.113.21")),
            MembershipEvent::Joined(member("node-2", "203.0.113.12")),
            MembershipEvent::Left(member("node-0", "203.0.113.10")),
            MembershipEvent::Left(member("node-2", "203.0.113.12")),
        ]
    );
}

#[tokio::test]
async fn watch_stops_when_reconciler_is_gone() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    // Must return even though the stream never ends.
    watch::nodes(
        stream::iter([Event::Apply(mk_worker("node-0", "203.0.113.10"))]).chain(stream::pending()),
        tx,
    )
    .await;
}

#[test]
fn parses_config_map() {
    let cm = mk_config_map(r#"[{"ip": "198.51.100.5", "name": "p1", "nasha": "nas1"}]"#);
    assert_eq!(config_map::parse(&cm).unwrap().len(), 1);

    let empty = ConfigMap::default();
    assert!(config_map::parse(&empty).is_err());

    let invalid = mk_config_map("{");
    assert!(config_map::parse(&invalid).is_err());
}

#[tokio::test]
async fn config_map_updates_partitions() {
    let initial =
        ResourceSet::from_json(br#"[{"name": "p1", "nasha": "nas1"}]"#).expect("must parse");
    let (publisher, mut rx) = resource::channel(initial.clone());

    let two = r#"[{"name": "p1", "nasha": "nas1"}, {"name": "p2", "nasha": "nas1"}]"#;
    let updates = vec![
        Event::Init,
        Event::InitApply(mk_config_map(r#"[{"name": "p1", "nasha": "nas1"}]"#)),
        Event::InitDone,
        Event::Apply(mk_config_map("not json")),
        Event::Apply(mk_config_map(two)),
        Event::Delete(mk_config_map(two)),
    ];
    config_map::partitions(stream::iter(updates), publisher).await;

    let current = rx.borrow_and_update().clone();
    assert_eq!(current, ResourceSet::from_json(two.as_bytes()).unwrap());
}

use super::{Args, Mode};
use clap::Parser;

const CREDENTIALS: [&str; 6] = [
    "--ovh-application-key",
    "app-key",
    "--ovh-application-secret",
    "app-secret",
    "--ovh-consumer-key",
    "consumer-key",
];

fn parse(args: &[&str]) -> Result<Args, clap::Error> {
    Args::try_parse_from(
        std::iter::once("nasha-controller")
            .chain(CREDENTIALS)
            .chain(args.iter().copied()),
    )
}

#[test]
fn parses_modes() {
    assert_eq!("watch".parse::<Mode>().unwrap(), Mode::Watch);
    assert_eq!("poll".parse::<Mode>().unwrap(), Mode::Poll);
    assert_eq!("full-poll".parse::<Mode>().unwrap(), Mode::FullPoll);
    assert!("listen".parse::<Mode>().is_err());
}

#[test]
fn parses_args() {
    let args = parse(&["--mode", "full-poll", "--poll-interval", "30"]).expect("args must parse");
    assert_eq!(args.mode, Mode::FullPoll);
    assert_eq!(args.poll_interval, 30);
    assert_eq!(args.ovh_endpoint, "ovh-eu");
    assert!(!args.enforce_routes);

    assert!(parse(&["--mode", "sometimes"]).is_err());
}

#[test]
fn debug_hides_ovh_secrets() {
    let args = parse(&[]).expect("args must parse");
    let debug = format!("{args:?}");
    assert!(!debug.contains("app-secret"));
    assert!(!debug.contains("consumer-key"));
}

#[test]
fn rejects_zero_intervals() {
    assert!(parse(&["--poll-interval", "0"]).is_err());
    assert!(parse(&["--route-interval", "0"]).is_err());
    assert!(parse(&["--poll-interval", "1", "--route-interval", "1"]).is_ok());
}

#[test]
fn parses_config_map_source() {
    let args = parse(&["--partitions-config-map", "--namespace", "nasha"]).expect("args must parse");
    assert!(args.partitions_config_map);
    assert_eq!(args.namespace.as_deref(), Some("nasha"));
}

#[tokio::test]
async fn config_map_source_requires_namespace() {
    let args = parse(&["--partitions-config-map"]).expect("args must parse");
    let error = args.run().await.expect_err("run must fail without a namespace");
    assert!(error.to_string().contains("--namespace"));
}

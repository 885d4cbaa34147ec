//! End-to-end runs against the simulated platform.
//!
//! Every test runs on a paused tokio clock, so convergence waits and 30 second
//! flows complete instantly while elapsed times stay exact.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use fabricbench::analysis::render_text;
use fabricbench::bench::{run_flows, FlowSpec, FlowStatus, HarnessSettings};
use fabricbench::config_loader::load_config;
use fabricbench::convergence::{await_convergence, ConvergenceOutcome, ConvergencePolicy};
use fabricbench::orchestrator::{run, RunOptions};
use fabricbench::platform::{Platform, SimBehavior, SimulatedPlatform};
use fabricbench::topology::{build, configure_forwarding, LinkParams, Node, Shape, SwitchOptions, Topology, TopologyDescriptor};
use fabricbench::config::Config;
use tempfile::NamedTempFile;
use tokio::time::Instant;

async fn started(topology: &Topology, behavior: SimBehavior) -> Arc<SimulatedPlatform> {
    let platform = Arc::new(SimulatedPlatform::new(behavior));
    build(topology, platform.as_ref()).await.unwrap();
    platform.start().await.unwrap();
    configure_forwarding(topology, platform.as_ref()).await.unwrap();
    platform
}

/// One switch with `n` hosts named h1..hn
fn wide_star(n: usize) -> Topology {
    let mut topo = TopologyDescriptor::new("wide-star");
    topo.add_node(Node::switch("s1", SwitchOptions::plain(), None));
    for i in 1..=n {
        let host = format!("h{}", i);
        topo.add_node(Node::host(host.as_str(), None));
        topo.add_link(&host, "s1", LinkParams::edge());
    }
    Topology::new(topo).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_every_shape_reaches_all_pairs() {
    for shape in Shape::all() {
        let topology = Topology::new(shape.descriptor()).unwrap();
        let platform = started(&topology, SimBehavior::default()).await;
        await_convergence(&topology, platform.as_ref(), &ConvergencePolicy::default())
            .await
            .unwrap();
        let matrix = platform.ping_all().await.unwrap();
        assert!(matrix.all_reachable(), "{}: {}", shape, matrix.summary());
        assert_eq!(matrix.hosts.len(), topology.hosts().len());
    }
}

#[tokio::test(start_paused = true)]
async fn test_ring_unreachable_until_converged() {
    let topology = Topology::new(Shape::Ring.descriptor()).unwrap();
    assert!(topology.has_redundant_paths());
    let platform = started(&topology, SimBehavior::default()).await;

    let before = platform.ping_all().await.unwrap();
    assert!(!before.all_reachable());
    assert_eq!(before.summary(), "Results: 100% dropped (0/30 received)");

    let outcome = await_convergence(&topology, platform.as_ref(), &ConvergencePolicy::default())
        .await
        .unwrap();
    assert_eq!(outcome, ConvergenceOutcome::Waited { settle: Duration::from_secs(15) });

    let after = platform.ping_all().await.unwrap();
    assert!(after.all_reachable());
    assert_eq!(after.summary(), "Results: 0% dropped (30/30 received)");
}

#[tokio::test(start_paused = true)]
async fn test_flows_run_concurrently() {
    let topology = wide_star(10);
    let platform = started(&topology, SimBehavior::default()).await;
    let flows: Vec<FlowSpec> = (1..=5)
        .map(|i| FlowSpec::stream(&format!("h{}", i), &format!("h{}", i + 5)))
        .collect();

    let began = Instant::now();
    let report = run_flows(
        platform.clone(),
        &topology,
        "wide",
        &flows,
        Duration::from_secs(30),
        &HarnessSettings::default(),
    )
    .await
    .unwrap();

    // 1s server settle plus one flow duration, not five.
    assert_eq!(began.elapsed(), Duration::from_secs(31));
    assert_eq!(platform.peak_concurrent_clients(), 5);
    assert_eq!(report.completed, 5);
    assert_eq!(platform.running_daemons(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hung_client_is_failed_and_batch_completes() {
    let topology = Topology::new(Shape::Star.descriptor()).unwrap();
    let platform = started(&topology, SimBehavior::default().hanging("h2")).await;
    let flows = [FlowSpec::stream("h1", "h3"), FlowSpec::stream("h2", "h4")];
    let settings = HarnessSettings::default();

    let began = Instant::now();
    let report = run_flows(platform.clone(), &topology, "hang", &flows, Duration::from_secs(30), &settings)
        .await
        .unwrap();

    assert_eq!(began.elapsed(), Duration::from_secs(1 + 30 + 15));
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].status, FlowStatus::Completed);
    assert!(matches!(&report.results[1].status, FlowStatus::Failed { reason } if reason.contains("timed out")));
    assert_eq!(report.total_mbps, 75.0);
    assert_eq!((report.completed, report.failed), (1, 1));
    // Servers are stopped even though a client hung.
    assert_eq!(platform.running_daemons(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_and_garbled_clients() {
    let topology = Topology::new(Shape::Star.descriptor()).unwrap();
    let behavior = SimBehavior::default().failing_exec("h1").garbled("h2");
    let platform = started(&topology, behavior).await;
    let flows = [
        FlowSpec::stream("h1", "h4"),
        FlowSpec::stream("h2", "h5"),
        FlowSpec::stream("h3", "h6"),
    ];
    let report = run_flows(platform, &topology, "faults", &flows, Duration::from_secs(10), &HarnessSettings::default())
        .await
        .unwrap();

    assert!(matches!(&report.results[0].status, FlowStatus::Failed { reason } if reason.contains("exit status 1")));
    assert_eq!(report.results[1].status, FlowStatus::Unknown);
    assert!(report.results[1].raw_output.contains("no summary"));
    assert_eq!(report.results[2].throughput_mbps, Some(75.0));
    assert_eq!((report.completed, report.unknown, report.failed), (1, 1, 1));
    assert_eq!(report.total_mbps, 75.0);
}

#[tokio::test(start_paused = true)]
async fn test_star_concurrent_flows_scenario() {
    let platform = Arc::new(SimulatedPlatform::new(SimBehavior::default().with_throughput(74.3)));
    let report = run(&Config::for_shape(Shape::Star), platform.clone(), RunOptions::default())
        .await
        .unwrap();

    let group = &report.scenarios.groups[0];
    assert_eq!(group.group, "Concurrent flows");
    assert_eq!(group.results.len(), 2);
    let sum: f64 = group.results.iter().filter_map(|r| r.throughput_mbps).sum();
    assert_eq!(group.total_mbps, sum);

    let text = render_text(&report);
    assert!(text.contains("h1->h3: 74.3 Mbits/sec"));
    assert!(text.contains("h2->h4: 74.3 Mbits/sec"));
    assert!(text.contains("Results: 0% dropped (30/30 received)"));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_after_build_failure() {
    let platform = Arc::new(SimulatedPlatform::new(SimBehavior::default().failing_create("leaf2")));
    let report = run(&Config::for_shape(Shape::SpineLeaf), platform.clone(), RunOptions::default())
        .await
        .unwrap();

    assert!(report.error.as_deref().unwrap().contains("leaf2"));
    assert!(report.convergence.is_none());
    assert!(report.scenarios.groups.is_empty());
    assert_eq!(platform.stop_count(), 1);
    assert_eq!(platform.calls().last().map(String::as_str), Some("stop"));
    assert!(!platform.calls().iter().any(|c| c == "start"));
}

#[tokio::test(start_paused = true)]
async fn test_config_file_run_with_polling() {
    let yaml = r#"
topology:
  shape: spine-leaf
convergence:
  mode: poll
  initial_delay: 2s
  max_wait: 60s
harness:
  udp_bandwidth: 100M
scenarios:
  - name: Cross-leaf
    duration: 10s
    flows:
      - { client: h1, server: h5, transport: datagram }
      - { client: h_loadgen, server: h6, transport: datagram }
"#;
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", yaml).unwrap();
    let config = load_config(file.path()).unwrap();

    let platform = Arc::new(SimulatedPlatform::new(
        SimBehavior::default().with_stp_convergence(Duration::from_secs(10)),
    ));
    let report = run(&config, platform.clone(), RunOptions::default()).await.unwrap();

    assert!(report.succeeded(), "{:?}", report.error);
    assert!(matches!(report.convergence, Some(ConvergenceOutcome::Converged { attempts: 5, .. })));
    let group = &report.scenarios.groups[0];
    assert_eq!(group.completed, 2);
    assert!(platform
        .calls()
        .iter()
        .any(|c| c == "exec h_loadgen iperf -c 10.0.0.6 -t 10 -u -b 100M"));
}

//! Full cluster lifecycle against the `fake-node` server.
//!
//! Scenarios bind fixed loopback ports, so they run one at a time.

#![cfg(unix)]

use cluster_core::{
    Cluster, ClusterError, FailureCause, NodeState, ProcessTable, Stage, SysinfoProcessTable,
};
use cluster_e2e::Fixture;
use cluster_types::SetupCommand;
use serial_test::serial;
use std::path::Path;
use std::time::{Duration, Instant};

fn fixture() -> Fixture {
    Fixture::new(Path::new(env!("CARGO_BIN_EXE_fake-node"))).unwrap()
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
#[serial]
async fn two_nodes_come_up_and_go_down() {
    let fixture = fixture();
    let mut config = fixture.config("up-down", 2, 29200, 29300);
    config
        .system_properties
        .insert("cluster.mode".into(), "test".into());
    let cluster = Cluster::new(config).unwrap();

    let mut running = cluster.start().await.unwrap();
    assert_eq!(running.http_ports(), vec![29200, 29201]);
    assert_eq!(running.transport_ports(), vec![29300, 29301]);

    let client = reqwest::Client::new();
    for node in running.nodes() {
        let body = client
            .get(node.http_url())
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");

        let settings = std::fs::read_to_string(&node.config_file).unwrap();
        assert!(settings.contains("discovery.seed_hosts: 127.0.0.1:29300,127.0.0.1:29301"));

        let log = std::fs::read_to_string(&node.startup_log).unwrap();
        assert!(log.contains("-Dcluster.mode=test"));
    }

    let nodes = running.nodes();
    running.stop().await.unwrap();
    for node in &nodes {
        assert!(!node.pid_file.exists());
    }

    // Ports are released once the processes are gone.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(client.get(nodes[0].http_url()).send().await.is_err());
}

#[tokio::test]
#[serial]
async fn run_with_tears_down_after_workload() {
    let fixture = fixture();
    let cluster = Cluster::new(fixture.config("workload", 1, 29210, 29310)).unwrap();

    let pid_file = cluster
        .run_with(|nodes| async move {
            let status = reqwest::get(nodes[0].http_url()).await.unwrap().status();
            assert!(status.is_success());
            nodes[0].pid_file.clone()
        })
        .await
        .unwrap();

    assert!(!pid_file.exists());
    cluster.stop_from_pid_files().await.unwrap();
}

#[tokio::test]
#[serial]
async fn setup_commands_and_extensions_run_before_start() {
    let fixture = fixture();
    let artifact = fixture.path().join("analysis.zip");
    std::fs::write(&artifact, "plugin bytes").unwrap();

    let record = fixture.path().join("installed.txt");
    let mut config = fixture.config("setup", 1, 29220, 29320);
    config.extensions.insert("analysis".into(), artifact);
    config.distribution.plugin_installer = vec![
        "sh".into(),
        "-c".into(),
        format!("echo \"$0\" > '{}'", record.display()),
    ];
    config.setup_commands.push(SetupCommand::new(
        "marker",
        &["sh", "-c", "touch setup-ran"],
    ));
    let cluster = Cluster::new(config).unwrap();

    let mut running = cluster.start().await.unwrap();
    let nodes = running.nodes();
    let node = &nodes[0];
    assert!(node.working_dir.join("setup-ran").exists());
    let installed = std::fs::read_to_string(&record).unwrap();
    let staged = node.plugins_staging_dir.join("analysis").join("analysis.zip");
    assert_eq!(installed.trim(), format!("file:{}", staged.display()));
    running.stop().await.unwrap();
}

// =============================================================================
// Failure paths
// =============================================================================

#[tokio::test]
#[serial]
async fn failing_setup_command_reports_argv_and_exit_code() {
    let fixture = fixture();
    let mut config = fixture.config("setup-fail", 2, 29230, 29330);
    config
        .setup_commands
        .push(SetupCommand::new("broken", &["sh", "-c", "exit 1"]));
    let cluster = Cluster::new(config).unwrap();

    let err = cluster.start().await.err().unwrap();
    let ClusterError::StartupFailed(report) = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(report.cause, FailureCause::NodesFailed(vec![0, 1]));
    for node in &report.nodes {
        let NodeState::SetupFailed(text) = &node.state else {
            panic!("unexpected state: {}", node.state);
        };
        assert!(text.contains(&Stage::SetupCommands.to_string()));
        assert!(text.contains(r#"["sh", "-c", "exit 1"]"#));
        assert!(text.contains("exit code 1"));
    }
}

#[tokio::test]
#[serial]
async fn crashing_node_fails_early_with_log_tail() {
    let fixture = fixture();
    let mut config = fixture.config("crash", 2, 29240, 29340);
    config.env.insert("FAKE_NODE_CRASH".into(), "1".into());
    config.wait.timeout_secs = 30;
    let cluster = Cluster::new(config).unwrap();

    let started = Instant::now();
    let err = cluster.start().await.err().unwrap();
    assert!(started.elapsed() < Duration::from_secs(15));

    let ClusterError::StartupFailed(report) = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(matches!(report.cause, FailureCause::NodesFailed(_)));
    let crashed = report
        .nodes
        .iter()
        .find(|n| n.state == NodeState::FailureMarker)
        .unwrap();
    assert!(crashed
        .log_tail
        .as_deref()
        .unwrap_or_default()
        .contains("fatal: crash requested"));
    assert!(crashed.env.contains_key("FAKE_NODE_CRASH"));
}

#[tokio::test]
#[serial]
async fn slow_node_times_out_with_report_for_every_node() {
    let fixture = fixture();
    let mut config = fixture.config("slow", 2, 29250, 29350);
    config.env.insert("FAKE_NODE_DELAY_MS".into(), "60000".into());
    config.wait.timeout_secs = 2;
    let cluster = Cluster::new(config).unwrap();

    let err = cluster.start().await.err().unwrap();
    let ClusterError::StartupFailed(report) = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(report.cause, FailureCause::TimedOut(Duration::from_secs(2)));
    assert_eq!(report.nodes.len(), 2);
    assert!(report.nodes.iter().all(|n| n.state == NodeState::Starting));
    assert!(err.to_string().contains("timed out"));

    // Neither node wrote a pid file, yet both are gone.
    tokio::time::sleep(Duration::from_millis(300)).await;
    for node in cluster.nodes() {
        assert!(!node.pid_file.exists());
        assert!(
            processes_under(&node.home_dir).is_empty(),
            "{} still running",
            node.name()
        );
    }
}

/// Live processes whose command line mentions `dir`.
fn processes_under(dir: &Path) -> Vec<u32> {
    let dir = dir.display().to_string();
    SysinfoProcessTable
        .list()
        .unwrap()
        .into_iter()
        .filter(|(_, identity)| identity.contains(&dir))
        .map(|(pid, _)| pid)
        .collect()
}

// =============================================================================
// Stale instances
// =============================================================================

#[tokio::test]
#[serial]
async fn live_previous_instance_blocks_restart() {
    let fixture = fixture();
    let config = fixture.config("stale", 1, 29260, 29360);
    let first = Cluster::new(config.clone()).unwrap();
    let mut running = first.start().await.unwrap();

    let second = Cluster::new(config).unwrap();
    let err = second.start().await.err().unwrap();
    let text = err.to_string();
    assert!(text.contains("check-previous failed"));
    assert!(text.contains("was a previous cluster not stopped?"));

    // The failed restart must not have touched the live instance.
    let nodes = running.nodes();
    let node = &nodes[0];
    assert!(node.pid_file.exists());
    assert!(reqwest::get(node.http_url()).await.is_ok());

    running.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn stale_pid_file_of_unrelated_process_is_ignored() {
    let fixture = fixture();
    let config = fixture.config("recycled", 1, 29270, 29370);
    let cluster = Cluster::new(config).unwrap();

    // Our own pid stands in for a recycled id owned by an unrelated program.
    let nodes = cluster.nodes();
    let node = &nodes[0];
    std::fs::create_dir_all(&node.base_dir).unwrap();
    std::fs::write(&node.pid_file, std::process::id().to_string()).unwrap();

    let mut running = cluster.start().await.unwrap();
    let pid: u32 = std::fs::read_to_string(&node.pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_ne!(pid, std::process::id());
    running.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn status_reflects_running_cluster() {
    let fixture = fixture();
    let cluster = Cluster::new(fixture.config("status", 2, 29280, 29380)).unwrap();

    let mut running = cluster.start().await.unwrap();
    let status = cluster.status().await.unwrap();
    assert!(status.iter().all(|s| s.pid.is_some() && s.process_alive && s.responding));

    running.stop().await.unwrap();
    let status = cluster.status().await.unwrap();
    assert!(status.iter().all(|s| s.pid.is_none() && !s.process_alive));
}

//! Integration tests against a live engine.
//!
//! These require a running Docker daemon with network access and are marked
//! `#[ignore]`. Run with: `cargo test -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use linkrun::docker::{BollardEngine, CancelToken, ContainerSpec, Engine, OutputLine, OutputSink};
use linkrun::{Config, Orchestrator, RunError};

const IMAGE: &str = "alpine:3.20";

async fn orchestrator() -> Orchestrator {
    let engine = BollardEngine::connect(None).expect("failed to connect to docker");
    engine.ping().await.expect("docker daemon is not reachable");
    let orch = Orchestrator::new(Arc::new(engine), Config::default());
    orch.pull(IMAGE, None, |_| {}).await.expect("pull failed");
    orch
}

/// Collect everything the container wrote to stdout.
fn stdout_of(mut rx: mpsc::UnboundedReceiver<OutputLine>) -> String {
    let mut out = String::new();
    while let Ok(line) = rx.try_recv() {
        if let OutputLine::Stdout(text) = line {
            out.push_str(&text);
        }
    }
    out
}

#[tokio::test]
#[ignore]
async fn run_streams_output_to_channel() {
    let orch = orchestrator().await;
    let (tx, rx) = mpsc::unbounded_channel();
    let spec = ContainerSpec {
        command: Some("echo hi".into()),
        ..ContainerSpec::new(IMAGE)
    };

    let outcome = orch
        .run(&spec, OutputSink::Channel(tx), &CancelToken::new())
        .await
        .expect("run failed");

    assert!(outcome.exit.success());
    assert_eq!(stdout_of(rx).trim(), "hi");
    orch.remove(&outcome.container).await.expect("remove failed");
}

#[tokio::test]
#[ignore]
async fn non_zero_exit_is_user_error() {
    let orch = orchestrator().await;
    let spec = ContainerSpec {
        command: Some("false".into()),
        ..ContainerSpec::new(IMAGE)
    };

    let err = orch
        .run(&spec, OutputSink::Stdio, &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(1));
}

#[tokio::test]
#[ignore]
async fn missing_image_is_user_error() {
    let orch = orchestrator().await;
    let spec = ContainerSpec::new("linkrun-test/does-not-exist:never");

    let err = orch
        .run(&spec, OutputSink::Stdio, &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::User { .. }), "got {err:?}");
}

#[tokio::test]
#[ignore]
async fn client_reaches_server_through_link() {
    let orch = orchestrator().await;
    let server = ContainerSpec {
        command: Some("sleep 60".into()),
        ..ContainerSpec::new(IMAGE)
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let client = ContainerSpec {
        command: Some("getent hosts solver".into()),
        ..ContainerSpec::new(IMAGE)
    };

    let outcome = orch
        .run_linked(&server, &client, OutputSink::Channel(tx), &CancelToken::new())
        .await
        .expect("linked run failed");

    assert!(stdout_of(rx).contains("solver"));
    orch.stop(&outcome.server).await.expect("stop failed");
    tokio::time::timeout(Duration::from_secs(30), outcome.server_watch)
        .await
        .expect("server was not removed")
        .unwrap();
    orch.remove(&outcome.client).await.expect("remove failed");
}

#[tokio::test]
#[ignore]
async fn failing_client_tears_down_server() {
    let orch = orchestrator().await;
    let name = format!("linkrun-test-{}", std::process::id());
    let server = ContainerSpec {
        name: Some(name.clone()),
        command: Some("sleep 60".into()),
        ..ContainerSpec::new(IMAGE)
    };
    let client = ContainerSpec {
        command: Some("false".into()),
        ..ContainerSpec::new(IMAGE)
    };

    let err = orch
        .run_linked(&server, &client, OutputSink::Stdio, &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(1));
    let gone = orch.engine().inspect_container(&name).await.unwrap_err();
    assert!(linkrun::error::is_gone(&gone), "server still present: {gone}");
}

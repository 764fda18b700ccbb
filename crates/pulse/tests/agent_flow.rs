//! End-to-end agent tests against a local TCP collector.

#![cfg(unix)]

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use pulse::config::{AgentConfig, FailurePolicy};
use pulse::{AgentError, Service};

fn write_script(dir: &Path, name: &str, body: &str) {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o755)
        .open(dir.join(name))
        .unwrap();
    file.write_all(format!("#!/bin/sh\n{body}\n").as_bytes())
        .unwrap();
}

fn config(dir: &Path, address: String) -> AgentConfig {
    AgentConfig {
        api_key: Some("test-key".into()),
        address,
        plugin_dir: dir.to_path_buf(),
        tick_interval_ms: 100,
        ..Default::default()
    }
}

async fn start(dir: &Path) -> (Service, TcpStream) {
    start_with(dir, |_| {}).await
}

async fn start_with(dir: &Path, tweak: impl FnOnce(&mut AgentConfig)) -> (Service, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = config(dir, listener.local_addr().unwrap().to_string());
    tweak(&mut config);

    let service = Service::new(config).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (service, server)
}

#[tokio::test]
async fn test_mem_free_scenario() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "mem_free", "echo 'mem.free 1024'");
    fs::write(dir.path().join("README"), "plugins live here").unwrap();

    let (service, server) = start(dir.path()).await;
    assert_eq!(service.registry().snapshot(), vec!["mem_free"]);

    let agent = tokio::spawn(service.run());

    let mut lines = BufReader::new(server).lines();
    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let timestamp = line
        .strip_prefix("test-key.mem.free 1024 ")
        .unwrap_or_else(|| panic!("unexpected line: {line:?}"));
    assert!(timestamp.parse::<i64>().unwrap() > 0);

    agent.abort();
}

#[tokio::test]
async fn test_two_plugins_two_lines() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "cpu", "echo 'cpu.load 0.42'");
    write_script(dir.path(), "disk", "echo 'disk.used 77'");

    let (service, server) = start(dir.path()).await;
    let agent = tokio::spawn(service.run());

    let mut lines = BufReader::new(server).lines();
    let mut seen = BTreeSet::new();
    while seen.len() < 2 {
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let fields: Vec<&str> = line.split(' ').collect();
        assert_eq!(fields.len(), 3, "corrupted line: {line:?}");
        assert!(fields[2].parse::<i64>().is_ok(), "bad timestamp: {line:?}");
        seen.insert(format!("{} {}", fields[0], fields[1]));
    }
    assert_eq!(
        seen.into_iter().collect::<Vec<_>>(),
        vec!["test-key.cpu.load 0.42", "test-key.disk.used 77"]
    );

    agent.abort();
}

#[tokio::test]
async fn test_malformed_output_is_fatal() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "chatty", "echo 'one two three'");

    let (service, _server) = start(dir.path()).await;

    let result = tokio::time::timeout(Duration::from_secs(5), service.run())
        .await
        .unwrap();
    assert!(matches!(result, Err(AgentError::MalformedOutput { .. })));
}

#[tokio::test]
async fn test_skip_policy_keeps_running() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "broken", "exit 2");
    write_script(dir.path(), "ok", "echo 'ok.value 1'");

    let (service, server) = start_with(dir.path(), |c| {
        c.failure_policy = FailurePolicy::Skip;
    })
    .await;
    let registry = service.registry().clone();
    let agent = tokio::spawn(service.run());

    let mut lines = BufReader::new(server).lines();
    for _ in 0..3 {
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(line.starts_with("test-key.ok.value 1 "), "{line:?}");
    }

    assert!(registry.failures("broken").unwrap() >= 1);
    assert_eq!(registry.failures("ok"), Some(0));
    assert!(!agent.is_finished());

    agent.abort();
}

#[tokio::test]
async fn test_collector_disconnect_is_fatal() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "cpu", "echo 'cpu.load 0.1'");

    let (service, server) = start(dir.path()).await;
    drop(server);

    let result = tokio::time::timeout(Duration::from_secs(10), service.run())
        .await
        .unwrap();
    assert!(matches!(result, Err(AgentError::Write(_))));
}

#[tokio::test]
async fn test_missing_directory_fails_setup() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config(
        &dir.path().join("absent"),
        listener.local_addr().unwrap().to_string(),
    );

    let result = Service::new(config).await;
    assert!(matches!(result, Err(AgentError::Watch(_))));
}

#[tokio::test]
async fn test_unreachable_collector_fails_setup() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = Service::new(config(dir.path(), address)).await;
    assert!(matches!(result, Err(AgentError::Dial { .. })));
}

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use sideassist_bus::{BusClient, ConnectOptions, Message};

const WAIT: Duration = Duration::from_secs(5);

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/sabus-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn spawn(args: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_sideassist"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("sideassist should start")
}

fn wait_for_connect(path: &Path, id: &str, timeout: Duration) -> BusClient {
    let start = Instant::now();
    loop {
        match BusClient::connect(path, &ConnectOptions::new(id)) {
            Ok(client) => return client,
            Err(err) => {
                assert!(start.elapsed() < timeout, "connect timeout: {err}");
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

/// Forward every message received on `filter` to a channel.
fn watch(path: &Path, id: &str, filter: &str) -> mpsc::Receiver<Message> {
    let client = wait_for_connect(path, id, WAIT);
    client.subscribe(filter).expect("watcher should subscribe");
    let (_, mut receiver) = client.split();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        while let Ok(message) = receiver.recv() {
            if tx.send(message).is_err() {
                break;
            }
        }
    });
    rx
}

fn value_of(message: &Message) -> serde_json::Value {
    let payload: serde_json::Value =
        serde_json::from_slice(&message.payload).expect("payload should be json");
    payload["value"].clone()
}

fn stop(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn echo_mirrors_remote_sets() {
    let dir = unique_temp_dir("echo");
    let sock = dir.join("bus.sock");
    let sock_arg = sock.to_str().expect("socket path should be utf-8");

    let broker = spawn(&["broker", sock_arg]);
    let params = watch(&sock, "watcher", "side_assist/echo/parameter/param");

    let echo = spawn(&["echo", sock_arg, "--validator", r#"{"types":["Integer"]}"#]);
    let first = params.recv_timeout(WAIT).expect("initial param should arrive");
    assert_eq!(value_of(&first), serde_json::json!(123));

    let set = |value: &str, session: &str| {
        Command::new(env!("CARGO_BIN_EXE_sideassist"))
            .args(["--log-level", "error", "--format", "json", "set", sock_arg])
            .args(["--client", "echo", "--option", "opt", "--value", value])
            .args(["--session-id", session])
            .output()
            .expect("set should run")
    };

    let refused = set(r#""seven""#, "setter-0");
    assert_eq!(refused.status.code(), Some(0));

    // Echo subscribes right after uploading, so retry until it listens.
    let deadline = Instant::now() + WAIT;
    let mut attempt = 1;
    let next = loop {
        assert!(Instant::now() < deadline, "set request never applied");
        let accepted = set("7", &format!("setter-{attempt}"));
        assert_eq!(accepted.status.code(), Some(0));
        let report: serde_json::Value =
            serde_json::from_slice(&accepted.stdout).expect("set output should be json");
        assert_eq!(report["topic"], "side_assist/echo/option/opt/set");
        attempt += 1;
        if let Ok(message) = params.recv_timeout(Duration::from_millis(500)) {
            break message;
        }
    };
    assert_eq!(value_of(&next), serde_json::json!(7));
    assert!(!next.retain);

    stop(echo);
    stop(broker);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn watch_prints_retained_messages() {
    let dir = unique_temp_dir("watch");
    let sock = dir.join("bus.sock");
    let sock_arg = sock.to_str().expect("socket path should be utf-8");

    let broker = spawn(&["broker", sock_arg]);
    let publisher = wait_for_connect(&sock, "publisher", WAIT);
    publisher
        .publish("side_assist/demo/parameter/p", &br#"{"value":"hi"}"#[..], true)
        .expect("publish should succeed");
    publisher.disconnect().expect("disconnect should succeed");

    let output = Command::new(env!("CARGO_BIN_EXE_sideassist"))
        .args(["--log-level", "error", "--format", "json", "watch", sock_arg])
        .args(["--filter", "side_assist/demo/#", "--count", "1"])
        .args(["--session-id", "watch-cli"])
        .output()
        .expect("watch should run");
    assert_eq!(output.status.code(), Some(0));

    let line: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("watch output should be json");
    assert_eq!(line["topic"], "side_assist/demo/parameter/p");
    assert_eq!(line["retain"], true);
    assert_eq!(line["payload"]["value"], "hi");

    stop(broker);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn connecting_to_a_missing_broker_is_a_transport_error() {
    let dir = unique_temp_dir("missing");
    let sock = dir.join("absent.sock");
    let output = Command::new(env!("CARGO_BIN_EXE_sideassist"))
        .args(["--log-level", "error", "watch"])
        .arg(&sock)
        .args(["--count", "1"])
        .output()
        .expect("watch should run");
    assert_eq!(output.status.code(), Some(3));
    let _ = std::fs::remove_dir_all(&dir);
}

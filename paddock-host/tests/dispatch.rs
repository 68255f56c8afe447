//! Integration tests for host construction and named-operation dispatch
//!
//! Every operation answers with the uniform envelope; these tests exercise
//! the table end to end against a real directory layout and real children.

#![cfg(unix)]

use paddock_api::DrainedOutput;
use paddock_host::events::{EventKind, MemoryEventSink};
use paddock_host::{Host, HostConfig, LaunchPolicy};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _tmp: TempDir,
    host: Host,
    events: Arc<MemoryEventSink>,
    app: PathBuf,
    sandbox: PathBuf,
    configs: PathBuf,
    components: PathBuf,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().to_path_buf();
    let app = base.join("app");
    let sandbox = app.join("sandbox");
    let configs = app.join("configs");
    let components = app.join("components");
    for dir in [&app, &sandbox, &configs, &components] {
        fs::create_dir_all(dir).unwrap();
    }

    let events = Arc::new(MemoryEventSink::new());
    let mut config = HostConfig::new(&base);
    config.launch = LaunchPolicy {
        interpreter: PathBuf::from("/bin/sh"),
        script_extension: "sh".to_string(),
        script_env: Vec::new(),
    };
    let host = Host::with_events(config, events.clone());

    Fixture {
        _tmp: tmp,
        host,
        events,
        app,
        sandbox,
        configs,
        components,
    }
}

fn assert_success(reply: &Value) {
    assert_eq!(reply["success"], json!(true), "expected success: {}", reply);
}

fn assert_failure(reply: &Value) -> String {
    assert_eq!(reply["success"], json!(false), "expected failure: {}", reply);
    reply["message"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_unknown_operation_fails_cleanly() {
    let f = fixture();
    let reply = f.host.dispatch("frobnicate", Value::Null).await;
    let message = assert_failure(&reply);
    assert!(message.contains("unknown operation"));
}

#[tokio::test]
async fn test_invalid_arguments_fail_cleanly() {
    let f = fixture();
    let reply = f.host.dispatch("kill", json!({ "pid": "not-a-number" })).await;
    let message = assert_failure(&reply);
    assert!(message.contains("invalid arguments"));
}

#[tokio::test]
async fn test_clear_defaults_to_all() {
    let f = fixture();
    fs::write(f.sandbox.join("junk.txt"), "junk").unwrap();

    let reply = f.host.dispatch("clear", Value::Null).await;
    assert_success(&reply);
    assert!(fs::read_dir(&f.sandbox).unwrap().next().is_none());
}

#[tokio::test]
async fn test_prepare_and_assemble_round_trip() {
    let f = fixture();
    fs::write(f.components.join("a.js"), "alpha").unwrap();
    fs::write(f.components.join("b.js"), "beta").unwrap();
    fs::write(
        f.configs.join("stage.json"),
        serde_json::to_vec(&json!({
            "zone": [
                { "output": "ab.js", "components": ["a.js", "b.js"] }
            ]
        }))
        .unwrap(),
    )
    .unwrap();

    let reply = f.host.dispatch("prepare", json!({ "config": "stage.json" })).await;
    assert_success(&reply);
    assert_eq!(reply["prepared"], json!(["zone"]));

    let reply = f.host.dispatch("assemble", json!({ "config": "stage.json" })).await;
    assert_success(&reply);
    assert_eq!(
        fs::read_to_string(f.sandbox.join("zone/ab.js")).unwrap(),
        "alpha\nbeta"
    );
}

#[tokio::test]
async fn test_assemble_with_unsafe_config_path_fails() {
    let f = fixture();
    let reply = f
        .host
        .dispatch("assemble", json!({ "config": "../../../etc/stage.json" }))
        .await;
    assert_failure(&reply);
}

#[tokio::test]
async fn test_process_lifecycle_through_dispatch() {
    let f = fixture();
    fs::write(
        f.app.join("talker.sh"),
        "#!/bin/sh\necho over-the-wire\nsleep 30\n",
    )
    .unwrap();

    let reply = f
        .host
        .dispatch("start", json!({ "path": "talker.sh" }))
        .await;
    assert_success(&reply);
    let pid = reply["pid"].as_u64().unwrap() as u32;
    assert_eq!(reply["launched"], json!("talker.sh"));

    let reply = f.host.dispatch("list", Value::Null).await;
    assert_success(&reply);
    assert!(reply["pids"]
        .as_array()
        .unwrap()
        .contains(&json!(pid)));
    assert_eq!(reply["count"], json!(1));

    // Drain through the envelope: bytes come back base64-encoded.
    let mut collected = Vec::new();
    for _ in 0..100 {
        let reply = f.host.dispatch("read-output", json!({ "pid": pid })).await;
        assert_success(&reply);
        let payload: DrainedOutput = serde_json::from_value(reply).unwrap();
        collected.extend(payload.decode_stdout().unwrap());
        if collected.len() >= 14 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(collected, b"over-the-wire\n");

    let reply = f.host.dispatch("kill", json!({ "pid": pid })).await;
    assert_success(&reply);

    let reply = f.host.dispatch("kill", json!({ "pid": pid })).await;
    assert_failure(&reply);

    let spawned = f.events.find_by_kind(EventKind::ProcessSpawned);
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].pid, Some(pid));
    assert_eq!(f.events.find_by_kind(EventKind::ProcessKilled).len(), 1);
}

#[tokio::test]
async fn test_kill_all_through_dispatch() {
    let f = fixture();
    fs::write(f.app.join("sleeper.sh"), "#!/bin/sh\nsleep 30\n").unwrap();

    for _ in 0..2 {
        let reply = f
            .host
            .dispatch("start", json!({ "path": "sleeper.sh" }))
            .await;
        assert_success(&reply);
    }

    let reply = f.host.dispatch("kill-all", Value::Null).await;
    assert_success(&reply);
    assert_eq!(reply["killed"], json!(2));

    let reply = f.host.dispatch("list", Value::Null).await;
    assert_success(&reply);
    assert_eq!(reply["count"], json!(0));
}

#[tokio::test]
async fn test_resolve_hides_why_it_failed() {
    let f = fixture();
    fs::write(f.app.join("index.html"), "<html></html>").unwrap();

    let reply = f
        .host
        .dispatch("resolve", json!({ "path": "index.html" }))
        .await;
    assert_success(&reply);
    assert!(reply["path"].as_str().unwrap().ends_with("index.html"));

    let missing = f
        .host
        .dispatch("resolve", json!({ "path": "ghost.html" }))
        .await;
    let unsafe_reply = f
        .host
        .dispatch("resolve", json!({ "path": "%2e%2e/secret.html" }))
        .await;
    // Unsafe and missing must be indistinguishable to the caller.
    assert_eq!(assert_failure(&missing), assert_failure(&unsafe_reply));
}

#[tokio::test]
async fn test_end_session_clears_sandbox_and_stops_supervision() {
    let f = fixture();
    fs::create_dir_all(f.sandbox.join("zone")).unwrap();
    fs::write(f.sandbox.join("zone/staged.js"), "x").unwrap();
    fs::write(f.app.join("sleeper.sh"), "#!/bin/sh\nsleep 30\n").unwrap();
    let reply = f
        .host
        .dispatch("start", json!({ "path": "sleeper.sh" }))
        .await;
    assert_success(&reply);

    let reply = f.host.dispatch("end-session", Value::Null).await;
    assert_success(&reply);

    assert!(fs::read_dir(&f.sandbox).unwrap().next().is_none());
    // Supervision is over; process operations now fail.
    let reply = f.host.dispatch("list", Value::Null).await;
    assert_failure(&reply);

    assert!(!f.events.find_by_kind(EventKind::SessionEnded).is_empty());
}
